use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// HMAC signature generator for outbound webhook authentication.
pub struct SignatureGenerator {
    secret: String,
}

impl SignatureGenerator {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Signs `timestamp.body` with HMAC-SHA256, hex encoded.
    pub fn sign_payload(&self, timestamp: &str, body: &str) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let signed_payload = format!("{}.{}", timestamp, body);
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signed_payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Outbound store webhook delivery. Fire-and-forget with bounded retries;
/// a store without a configured URL gets no deliveries.
#[derive(Clone)]
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: Option<String>,
    signature_generator: Option<Arc<SignatureGenerator>>,
    max_retries: u32,
}

impl WebhookPublisher {
    pub fn new(url: Option<String>, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            url,
            signature_generator: secret.map(|s| Arc::new(SignatureGenerator::new(s))),
            max_retries: 3,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Delivers `{topic, data}` with retry and exponential backoff.
    async fn deliver(&self, topic: &str, data: Value) -> Result<(), String> {
        let url = match &self.url {
            Some(url) => url.clone(),
            None => return Ok(()),
        };

        let envelope = serde_json::json!({ "type": topic, "data": data });
        let body = serde_json::to_string(&envelope).map_err(|e| e.to_string())?;
        let timestamp = chrono::Utc::now().to_rfc3339();
        let signature = self
            .signature_generator
            .as_ref()
            .map(|gen| gen.sign_payload(&timestamp, &body));

        for attempt in 1..=self.max_retries {
            let mut request = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("Timestamp", &timestamp)
                .body(body.clone());

            if let Some(ref sig) = signature {
                request = request.header("Store-Signature", sig);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Webhook {} delivered to {}", topic, url);
                    return Ok(());
                }
                Ok(response) => warn!(
                    "Webhook {} delivery failed with status {} (attempt {}/{})",
                    topic,
                    response.status(),
                    attempt,
                    self.max_retries
                ),
                Err(e) => warn!(
                    "Webhook {} delivery error: {} (attempt {}/{})",
                    topic, e, attempt, self.max_retries
                ),
            }

            if attempt < self.max_retries {
                let backoff = Duration::from_secs(2_u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(format!(
            "failed to deliver {} after {} attempts",
            topic, self.max_retries
        ))
    }

    /// Publishes asynchronously; delivery failure is logged, never
    /// propagated into the calling transaction.
    pub fn publish_async(&self, topic: &str, data: Value) {
        if !self.is_enabled() {
            return;
        }
        let publisher = self.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            if let Err(e) = publisher.deliver(&topic, data).await {
                error!("Async webhook delivery failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_generation() {
        let generator = SignatureGenerator::new("test_secret".to_string());
        let timestamp = "2026-01-01T00:00:00Z";
        let body = r#"{"type":"order.created"}"#;

        let sig = generator.sign_payload(timestamp, body);
        assert!(!sig.is_empty());
        assert_eq!(sig.len(), 64); // SHA256 produces 32 bytes = 64 hex chars
    }

    #[test]
    fn test_signature_is_deterministic() {
        let generator = SignatureGenerator::new("test_secret".to_string());
        let a = generator.sign_payload("t", "b");
        let b = generator.sign_payload("t", "b");
        assert_eq!(a, b);
    }

    #[test]
    fn test_disabled_without_url() {
        let publisher = WebhookPublisher::new(None, None);
        assert!(!publisher.is_enabled());
        // No-op, must not panic outside a runtime.
    }

    #[tokio::test]
    async fn test_deliver_without_url_is_noop() {
        let publisher = WebhookPublisher::new(None, Some("secret".to_string()));
        let result = publisher
            .deliver("order.created", serde_json::json!({"order_id": "o-1"}))
            .await;
        assert!(result.is_ok());
    }
}
