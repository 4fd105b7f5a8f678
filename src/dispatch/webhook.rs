use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

use super::{Channel, DispatchError, DispatchOutcome, Dispatcher, required_str};

/// Delivers `{ "channel": "webhook", "url", "method"?, "headers"?, "body"? }`
/// payloads over HTTP. Used for SMS and push providers that take a JSON POST.
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    fn validate(&self, payload: &serde_json::Value) -> Result<(), DispatchError> {
        validate_webhook_payload(payload)
    }

    async fn attempt(&self, payload: &serde_json::Value) -> Result<DispatchOutcome, DispatchError> {
        validate_webhook_payload(payload)?;

        let url = required_str(payload, "url")?;
        let mut request = match payload["method"].as_str().unwrap_or("POST") {
            "PUT" => self.client.put(url),
            _ => self.client.post(url),
        };

        if let Some(headers) = payload["headers"].as_object() {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        if !payload["body"].is_null() {
            request = request.json(&payload["body"]);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(DispatchOutcome::failed(format!("Request failed: {e}"))),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(DispatchOutcome::Delivered);
        }

        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        Ok(DispatchOutcome::failed(format!(
            "HTTP {}: {snippet}",
            status.as_u16()
        )))
    }
}

impl Channel for WebhookDispatcher {
    fn id(&self) -> &str {
        "webhook"
    }
}

pub fn validate_webhook_payload(payload: &serde_json::Value) -> Result<(), DispatchError> {
    let url = required_str(payload, "url")?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(DispatchError::from("url must be http or https"));
    }

    match payload["method"].as_str() {
        None | Some("POST") | Some("PUT") => {}
        Some(other) => {
            return Err(DispatchError::from(format!("Unsupported method: {other}")));
        }
    }

    match &payload["headers"] {
        serde_json::Value::Null => {}
        serde_json::Value::Object(headers) => {
            for (name, value) in headers {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| DispatchError::from(format!("Invalid header name: {name}")))?;
                value
                    .as_str()
                    .and_then(|v| HeaderValue::from_str(v).ok())
                    .ok_or_else(|| {
                        DispatchError::from(format!("Invalid value for header {name}"))
                    })?;
            }
        }
        _ => return Err(DispatchError::from("headers must be an object")),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_minimal_payload() {
        let payload = json!({ "url": "https://sms.example.com/send" });
        assert!(validate_webhook_payload(&payload).is_ok());
    }

    #[test]
    fn rejects_non_http_url() {
        let err = validate_webhook_payload(&json!({ "url": "ftp://example.com" })).unwrap_err();
        assert_eq!(err.message, "url must be http or https");
    }

    #[test]
    fn rejects_unsupported_method() {
        let err = validate_webhook_payload(&json!({
            "url": "https://example.com",
            "method": "DELETE"
        }))
        .unwrap_err();
        assert_eq!(err.message, "Unsupported method: DELETE");
    }

    #[test]
    fn rejects_bad_headers() {
        let err = validate_webhook_payload(&json!({
            "url": "https://example.com",
            "headers": { "bad name": "x" }
        }))
        .unwrap_err();
        assert_eq!(err.message, "Invalid header name: bad name");

        let err = validate_webhook_payload(&json!({
            "url": "https://example.com",
            "headers": { "X-Retries": 3 }
        }))
        .unwrap_err();
        assert_eq!(err.message, "Invalid value for header X-Retries");

        assert!(
            validate_webhook_payload(&json!({
                "url": "https://example.com",
                "headers": { "Authorization": "Bearer abc" }
            }))
            .is_ok()
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_a_failure_not_an_error() {
        let dispatcher = WebhookDispatcher::new(Duration::from_millis(500)).unwrap();
        let outcome = dispatcher
            .attempt(&json!({ "url": "http://127.0.0.1:1/hook", "body": { "text": "hi" } }))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed(reason) if reason.starts_with("Request failed")
        ));
    }
}
