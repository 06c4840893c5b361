use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Customer-facing notification payload for a completed checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderNotification {
    pub order_id: Uuid,
    pub order_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub total: Decimal,
    pub currency: String,
}

/// Customer-facing receipt for a captured payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Notifications contract. Delivery is best-effort; checkout never fails
/// because a notification could not be sent.
#[async_trait]
pub trait NotificationsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_order_confirmation(
        &self,
        notification: OrderNotification,
    ) -> Result<(), ServiceError>;

    async fn send_payment_receipt(&self, receipt: PaymentReceipt) -> Result<(), ServiceError>;
}

/// Mock adapter that only logs.
pub struct LogNotifications;

#[async_trait]
impl NotificationsProvider for LogNotifications {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send_order_confirmation(
        &self,
        notification: OrderNotification,
    ) -> Result<(), ServiceError> {
        info!(
            "Order confirmation for {} ({} {})",
            notification.order_number, notification.total, notification.currency
        );
        Ok(())
    }

    async fn send_payment_receipt(&self, receipt: PaymentReceipt) -> Result<(), ServiceError> {
        info!(
            "Payment receipt for {} ({} {}, txn {})",
            receipt.order_number, receipt.amount, receipt.currency, receipt.transaction_id
        );
        Ok(())
    }
}

/// Real adapter posting notification payloads to a configured endpoint.
pub struct PostNotifications {
    client: reqwest::Client,
    endpoint: String,
}

impl PostNotifications {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            endpoint,
        }
    }

    async fn post_payload<B: Serialize + Sync>(&self, body: &B) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("notification send failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "notification endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationsProvider for PostNotifications {
    fn name(&self) -> &'static str {
        "post"
    }

    #[instrument(skip(self, notification))]
    async fn send_order_confirmation(
        &self,
        notification: OrderNotification,
    ) -> Result<(), ServiceError> {
        self.post_payload(&notification).await
    }

    #[instrument(skip(self, receipt))]
    async fn send_payment_receipt(&self, receipt: PaymentReceipt) -> Result<(), ServiceError> {
        self.post_payload(&receipt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_log_notifications_always_succeeds() {
        let provider = LogNotifications;
        let result = provider
            .send_order_confirmation(OrderNotification {
                order_id: Uuid::new_v4(),
                order_number: "ORD-ABCD1234".to_string(),
                user_id: None,
                total: dec!(64.37),
                currency: "USD".to_string(),
            })
            .await;
        assert!(result.is_ok());
    }
}
