pub mod audit;
pub mod notification_queue;
