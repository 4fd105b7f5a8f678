use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Channel, DispatchError, DispatchOutcome, Dispatcher, required_str};
use crate::config::SmtpConfig;

/// Delivers `{ "channel": "email", "to", "subject", "body", "html"? }`
/// payloads through the system SMTP relay.
pub struct EmailDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailDispatcher {
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self, String> {
        let creds = Credentials::new(config.user.clone(), config.pass.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| format!("SMTP relay error: {e}"))?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(timeout))
            .build();

        let from = config
            .from
            .parse()
            .map_err(|e| format!("Invalid from address: {e}"))?;

        Ok(Self { transport, from })
    }

    fn build_message(&self, payload: &serde_json::Value) -> Result<Message, String> {
        let to: Mailbox = payload["to"]
            .as_str()
            .unwrap_or_default()
            .parse()
            .map_err(|e| format!("Invalid to address: {e}"))?;
        let subject = payload["subject"].as_str().unwrap_or_default();
        let body = payload["body"].as_str().unwrap_or_default().to_string();

        let content_type = if payload["html"].as_bool().unwrap_or(false) {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(content_type)
            .body(body)
            .map_err(|e| format!("Failed to build email: {e}"))
    }
}

#[async_trait]
impl Dispatcher for EmailDispatcher {
    fn validate(&self, payload: &serde_json::Value) -> Result<(), DispatchError> {
        validate_email_payload(payload)
    }

    async fn attempt(&self, payload: &serde_json::Value) -> Result<DispatchOutcome, DispatchError> {
        validate_email_payload(payload)?;

        let message = match self.build_message(payload) {
            Ok(message) => message,
            Err(reason) => return Ok(DispatchOutcome::Failed(reason)),
        };

        match self.transport.send(message).await {
            Ok(_) => Ok(DispatchOutcome::Delivered),
            Err(e) => Ok(DispatchOutcome::failed(format!("Failed to send email: {e}"))),
        }
    }
}

impl Channel for EmailDispatcher {
    fn id(&self) -> &str {
        "email"
    }
}

pub fn validate_email_payload(payload: &serde_json::Value) -> Result<(), DispatchError> {
    for field in ["to", "subject", "body"] {
        required_str(payload, field)?;
    }

    payload["to"]
        .as_str()
        .unwrap_or_default()
        .parse::<Mailbox>()
        .map_err(|e| DispatchError::from(format!("Invalid to address: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_complete_payload() {
        let payload = json!({
            "channel": "email",
            "to": "Jane <jane@example.com>",
            "subject": "Invoice overdue",
            "body": "Please pay invoice 42."
        });
        assert!(validate_email_payload(&payload).is_ok());
    }

    #[test]
    fn rejects_missing_fields() {
        let err = validate_email_payload(&json!({ "to": "jane@example.com", "body": "x" }))
            .unwrap_err();
        assert_eq!(err.message, "subject is required");
    }

    #[test]
    fn rejects_bad_recipient() {
        let err = validate_email_payload(&json!({
            "to": "not an address",
            "subject": "s",
            "body": "b"
        }))
        .unwrap_err();
        assert!(err.message.starts_with("Invalid to address"));
    }
}
