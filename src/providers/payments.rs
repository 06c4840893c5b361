use super::WebhookVerdict;
use crate::errors::ServiceError;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Lifecycle status of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresConfirmation,
    Processing,
    Succeeded,
    Failed,
}

/// Input for creating a payment intent. `metadata` is write-once: it is the
/// sole carrier of checkout context across the asynchronous confirmation
/// boundary and is never altered after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentIntentInput {
    pub amount_cents: i64,
    pub currency: String,
    pub metadata: serde_json::Value,
}

/// Result of intent creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedIntent {
    pub id: String,
    pub provider: String,
    pub provider_ref: String,
    pub status: PaymentIntentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Result of intent confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedIntent {
    pub status: PaymentIntentStatus,
    pub amount_cents: i64,
}

/// Full provider-side view of an intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub provider_ref: String,
    pub provider: String,
    pub status: PaymentIntentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundInput {
    pub provider_ref: String,
    /// None refunds the full captured amount
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    pub status: String,
}

/// Payments provider contract consumed by the checkout state machine.
#[async_trait]
pub trait PaymentsProvider: Send + Sync {
    /// Stable provider tag recorded on payment rows.
    fn name(&self) -> &'static str;

    async fn create_payment_intent(
        &self,
        input: CreatePaymentIntentInput,
    ) -> Result<CreatedIntent, ServiceError>;

    async fn confirm_payment_intent(
        &self,
        provider_ref: &str,
    ) -> Result<ConfirmedIntent, ServiceError>;

    async fn retrieve_payment_intent(
        &self,
        provider_ref: &str,
    ) -> Result<PaymentIntent, ServiceError>;

    async fn refund_payment(&self, input: RefundInput) -> Result<RefundResult, ServiceError>;

    /// Parses and authenticates an inbound webhook delivery.
    fn parse_webhook_event(
        &self,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> WebhookVerdict;
}

// ---------------------------------------------------------------------------
// Mock implementation
// ---------------------------------------------------------------------------

/// In-process payments provider backed by a concurrent intent store.
/// Confirmation transitions are deterministic so tests can drive the full
/// checkout flow without a gateway.
pub struct MockPaymentsProvider {
    intents: DashMap<String, PaymentIntent>,
    fail_confirmations: bool,
}

impl MockPaymentsProvider {
    pub fn new() -> Self {
        Self {
            intents: DashMap::new(),
            fail_confirmations: false,
        }
    }

    /// Provider whose confirmations always land in `Failed`.
    pub fn failing() -> Self {
        Self {
            intents: DashMap::new(),
            fail_confirmations: true,
        }
    }

    fn generate_ref() -> String {
        let token: u64 = rand::thread_rng().gen();
        format!("pi_mock_{:016x}", token)
    }
}

impl Default for MockPaymentsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentsProvider for MockPaymentsProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    #[instrument(skip(self, input))]
    async fn create_payment_intent(
        &self,
        input: CreatePaymentIntentInput,
    ) -> Result<CreatedIntent, ServiceError> {
        if input.amount_cents <= 0 {
            return Err(ServiceError::ProviderError(format!(
                "invalid intent amount: {}",
                input.amount_cents
            )));
        }

        let provider_ref = Self::generate_ref();
        let client_secret = format!("{}_secret", provider_ref);
        let intent = PaymentIntent {
            provider_ref: provider_ref.clone(),
            provider: self.name().to_string(),
            status: PaymentIntentStatus::RequiresConfirmation,
            amount_cents: input.amount_cents,
            currency: input.currency,
            metadata: input.metadata,
            client_secret: Some(client_secret.clone()),
        };
        self.intents.insert(provider_ref.clone(), intent);

        info!("Mock payment intent created: {}", provider_ref);
        Ok(CreatedIntent {
            id: provider_ref.clone(),
            provider: self.name().to_string(),
            provider_ref,
            status: PaymentIntentStatus::RequiresConfirmation,
            client_secret: Some(client_secret),
        })
    }

    #[instrument(skip(self))]
    async fn confirm_payment_intent(
        &self,
        provider_ref: &str,
    ) -> Result<ConfirmedIntent, ServiceError> {
        let mut entry = self
            .intents
            .get_mut(provider_ref)
            .ok_or_else(|| ServiceError::NotFound(format!("payment intent {}", provider_ref)))?;

        // Confirmation mutates status only; metadata stays as written.
        let next = if self.fail_confirmations {
            PaymentIntentStatus::Failed
        } else {
            PaymentIntentStatus::Succeeded
        };
        // Re-confirming a settled intent is a no-op reporting current state.
        if entry.status == PaymentIntentStatus::RequiresConfirmation
            || entry.status == PaymentIntentStatus::Processing
        {
            entry.status = next;
        }

        Ok(ConfirmedIntent {
            status: entry.status,
            amount_cents: entry.amount_cents,
        })
    }

    async fn retrieve_payment_intent(
        &self,
        provider_ref: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        self.intents
            .get(provider_ref)
            .map(|entry| entry.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("payment intent {}", provider_ref)))
    }

    async fn refund_payment(&self, input: RefundInput) -> Result<RefundResult, ServiceError> {
        let entry = self
            .intents
            .get(&input.provider_ref)
            .ok_or_else(|| ServiceError::NotFound(format!("payment intent {}", input.provider_ref)))?;
        if entry.status != PaymentIntentStatus::Succeeded {
            return Err(ServiceError::ProviderError(
                "cannot refund an unsettled intent".to_string(),
            ));
        }
        Ok(RefundResult {
            status: "refunded".to_string(),
        })
    }

    fn parse_webhook_event(
        &self,
        payload: &[u8],
        _headers: &HashMap<String, String>,
    ) -> WebhookVerdict {
        #[derive(Deserialize)]
        struct MockEvent {
            #[serde(rename = "type")]
            event_type: String,
            provider_ref: String,
            #[serde(default)]
            amount_cents: Option<i64>,
        }

        match serde_json::from_slice::<MockEvent>(payload) {
            Ok(event) => WebhookVerdict {
                accepted: true,
                event_type: Some(event.event_type),
                provider_ref: Some(event.provider_ref),
                amount_cents: event.amount_cents,
                reason: None,
            },
            Err(e) => WebhookVerdict::rejected(format!("malformed payload: {}", e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Real implementation (Stripe-style REST gateway)
// ---------------------------------------------------------------------------

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Metadata key under which the checkout context JSON travels; gateway
/// metadata values are flat strings.
const METADATA_CONTEXT_KEY: &str = "checkout_context";

pub struct StripePaymentsProvider {
    client: reqwest::Client,
    secret_key: String,
    webhook_secret: Option<String>,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    status: String,
}

impl StripePaymentsProvider {
    pub fn new(secret_key: String, webhook_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client"),
            secret_key,
            webhook_secret,
            api_base: STRIPE_API_BASE.to_string(),
        }
    }

    /// Test hook pointing the adapter at a local gateway double.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn map_status(status: &str) -> PaymentIntentStatus {
        match status {
            "succeeded" => PaymentIntentStatus::Succeeded,
            "processing" => PaymentIntentStatus::Processing,
            "requires_confirmation" | "requires_payment_method" | "requires_action" => {
                PaymentIntentStatus::RequiresConfirmation
            }
            _ => PaymentIntentStatus::Failed,
        }
    }

    fn intent_metadata(intent: &StripeIntent) -> serde_json::Value {
        intent
            .metadata
            .get(METADATA_CONTEXT_KEY)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(serde_json::Value::Null)
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<StripeIntent, ServiceError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("stripe request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ProviderError(format!(
                "stripe returned {}: {}",
                status, body
            )));
        }

        response
            .json::<StripeIntent>()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("stripe response unreadable: {}", e)))
    }

    /// Verifies a `t=...,v1=...` signature header over `timestamp.payload`.
    fn verify_signature(&self, payload: &[u8], header: &str) -> Result<(), String> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let secret = self
            .webhook_secret
            .as_ref()
            .ok_or_else(|| "webhook secret not configured".to_string())?;

        let mut timestamp = None;
        let mut signature = None;
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signature = Some(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or_else(|| "missing timestamp".to_string())?;
        let signature = signature.ok_or_else(|| "missing v1 signature".to_string())?;

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| "invalid webhook secret".to_string())?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        if expected == signature {
            Ok(())
        } else {
            Err("signature mismatch".to_string())
        }
    }
}

#[async_trait]
impl PaymentsProvider for StripePaymentsProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self, input))]
    async fn create_payment_intent(
        &self,
        input: CreatePaymentIntentInput,
    ) -> Result<CreatedIntent, ServiceError> {
        let context = serde_json::to_string(&input.metadata)?;
        let form = vec![
            ("amount".to_string(), input.amount_cents.to_string()),
            ("currency".to_string(), input.currency.to_lowercase()),
            (
                format!("metadata[{}]", METADATA_CONTEXT_KEY),
                context,
            ),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];

        let intent = self.post_form("/payment_intents", &form).await?;
        Ok(CreatedIntent {
            id: intent.id.clone(),
            provider: self.name().to_string(),
            provider_ref: intent.id.clone(),
            status: Self::map_status(&intent.status),
            client_secret: intent.client_secret,
        })
    }

    #[instrument(skip(self))]
    async fn confirm_payment_intent(
        &self,
        provider_ref: &str,
    ) -> Result<ConfirmedIntent, ServiceError> {
        let intent = self
            .post_form(&format!("/payment_intents/{}/confirm", provider_ref), &[])
            .await?;
        Ok(ConfirmedIntent {
            status: Self::map_status(&intent.status),
            amount_cents: intent.amount,
        })
    }

    async fn retrieve_payment_intent(
        &self,
        provider_ref: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        let response = self
            .client
            .get(format!("{}/payment_intents/{}", self.api_base, provider_ref))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("stripe request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!(
                "payment intent {}",
                provider_ref
            )));
        }
        if !response.status().is_success() {
            return Err(ServiceError::ProviderError(format!(
                "stripe returned {}",
                response.status()
            )));
        }

        let intent: StripeIntent = response.json().await.map_err(|e| {
            ServiceError::ProviderError(format!("stripe response unreadable: {}", e))
        })?;
        let metadata = Self::intent_metadata(&intent);
        Ok(PaymentIntent {
            provider_ref: intent.id,
            provider: self.name().to_string(),
            status: Self::map_status(&intent.status),
            amount_cents: intent.amount,
            currency: intent.currency.to_uppercase(),
            metadata,
            client_secret: intent.client_secret,
        })
    }

    async fn refund_payment(&self, input: RefundInput) -> Result<RefundResult, ServiceError> {
        let mut form = vec![("payment_intent".to_string(), input.provider_ref.clone())];
        if let Some(amount) = input.amount_cents {
            form.push(("amount".to_string(), amount.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/refunds", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("stripe request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ProviderError(format!(
                "stripe refund returned {}",
                response.status()
            )));
        }

        let refund: StripeRefund = response.json().await.map_err(|e| {
            ServiceError::ProviderError(format!("stripe response unreadable: {}", e))
        })?;
        Ok(RefundResult {
            status: refund.status,
        })
    }

    fn parse_webhook_event(
        &self,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> WebhookVerdict {
        let signature_header = match headers.get("stripe-signature") {
            Some(header) => header,
            None => return WebhookVerdict::rejected("missing stripe-signature header"),
        };

        if let Err(reason) = self.verify_signature(payload, signature_header) {
            warn!("Rejected payments webhook: {}", reason);
            return WebhookVerdict::rejected(reason);
        }

        #[derive(Deserialize)]
        struct EventObject {
            id: String,
            #[serde(default)]
            amount: Option<i64>,
        }
        #[derive(Deserialize)]
        struct EventData {
            object: EventObject,
        }
        #[derive(Deserialize)]
        struct GatewayEvent {
            #[serde(rename = "type")]
            event_type: String,
            data: EventData,
        }

        match serde_json::from_slice::<GatewayEvent>(payload) {
            Ok(event) => WebhookVerdict {
                accepted: true,
                event_type: Some(event.event_type),
                provider_ref: Some(event.data.object.id),
                amount_cents: event.data.object.amount,
                reason: None,
            },
            Err(e) => WebhookVerdict::rejected(format!("malformed payload: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_intent_lifecycle() {
        let provider = MockPaymentsProvider::new();
        let created = provider
            .create_payment_intent(CreatePaymentIntentInput {
                amount_cents: 12_50,
                currency: "USD".to_string(),
                metadata: json!({"cart_id": "abc"}),
            })
            .await
            .unwrap();

        assert_eq!(created.status, PaymentIntentStatus::RequiresConfirmation);
        assert!(created.client_secret.is_some());

        let confirmed = provider
            .confirm_payment_intent(&created.provider_ref)
            .await
            .unwrap();
        assert_eq!(confirmed.status, PaymentIntentStatus::Succeeded);
        assert_eq!(confirmed.amount_cents, 12_50);
    }

    #[tokio::test]
    async fn test_mock_metadata_is_write_once() {
        let provider = MockPaymentsProvider::new();
        let metadata = json!({"cart_id": "cart-1", "store_id": "store-1"});
        let created = provider
            .create_payment_intent(CreatePaymentIntentInput {
                amount_cents: 500,
                currency: "USD".to_string(),
                metadata: metadata.clone(),
            })
            .await
            .unwrap();

        provider
            .confirm_payment_intent(&created.provider_ref)
            .await
            .unwrap();

        let intent = provider
            .retrieve_payment_intent(&created.provider_ref)
            .await
            .unwrap();
        assert_eq!(intent.metadata, metadata);
    }

    #[tokio::test]
    async fn test_mock_reconfirm_is_stable() {
        let provider = MockPaymentsProvider::new();
        let created = provider
            .create_payment_intent(CreatePaymentIntentInput {
                amount_cents: 999,
                currency: "USD".to_string(),
                metadata: json!({}),
            })
            .await
            .unwrap();

        let first = provider
            .confirm_payment_intent(&created.provider_ref)
            .await
            .unwrap();
        let second = provider
            .confirm_payment_intent(&created.provider_ref)
            .await
            .unwrap();
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn test_mock_failing_provider() {
        let provider = MockPaymentsProvider::failing();
        let created = provider
            .create_payment_intent(CreatePaymentIntentInput {
                amount_cents: 100,
                currency: "USD".to_string(),
                metadata: json!({}),
            })
            .await
            .unwrap();

        let confirmed = provider
            .confirm_payment_intent(&created.provider_ref)
            .await
            .unwrap();
        assert_eq!(confirmed.status, PaymentIntentStatus::Failed);
    }

    #[tokio::test]
    async fn test_mock_rejects_non_positive_amount() {
        let provider = MockPaymentsProvider::new();
        let result = provider
            .create_payment_intent(CreatePaymentIntentInput {
                amount_cents: 0,
                currency: "USD".to_string(),
                metadata: json!({}),
            })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_mock_webhook_parse() {
        let provider = MockPaymentsProvider::new();
        let payload = br#"{"type":"payment_intent.succeeded","provider_ref":"pi_mock_1","amount_cents":1500}"#;
        let verdict = provider.parse_webhook_event(payload, &HashMap::new());
        assert!(verdict.accepted);
        assert_eq!(verdict.provider_ref.as_deref(), Some("pi_mock_1"));
        assert_eq!(verdict.amount_cents, Some(1500));
    }

    #[test]
    fn test_stripe_signature_verification_round_trip() {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let provider =
            StripePaymentsProvider::new("sk_test".to_string(), Some("whsec_test".to_string()));
        let payload = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","amount":2500}}}"#;
        let timestamp = "1700000000";

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(b"whsec_test").unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        let mut headers = HashMap::new();
        headers.insert(
            "stripe-signature".to_string(),
            format!("t={},v1={}", timestamp, signature),
        );

        let verdict = provider.parse_webhook_event(payload, &headers);
        assert!(verdict.accepted);
        assert_eq!(verdict.provider_ref.as_deref(), Some("pi_1"));
        assert_eq!(verdict.amount_cents, Some(2500));
    }

    #[test]
    fn test_stripe_rejects_bad_signature() {
        let provider =
            StripePaymentsProvider::new("sk_test".to_string(), Some("whsec_test".to_string()));
        let mut headers = HashMap::new();
        headers.insert(
            "stripe-signature".to_string(),
            "t=1700000000,v1=deadbeef".to_string(),
        );
        let verdict = provider.parse_webhook_event(b"{}", &headers);
        assert!(!verdict.accepted);
    }

    #[test]
    fn test_stripe_status_mapping() {
        assert_eq!(
            StripePaymentsProvider::map_status("succeeded"),
            PaymentIntentStatus::Succeeded
        );
        assert_eq!(
            StripePaymentsProvider::map_status("requires_confirmation"),
            PaymentIntentStatus::RequiresConfirmation
        );
        assert_eq!(
            StripePaymentsProvider::map_status("canceled"),
            PaymentIntentStatus::Failed
        );
    }
}
