pub mod queue_item;

pub use queue_item::{QueueItem, QueueStats, QueueStatus};
