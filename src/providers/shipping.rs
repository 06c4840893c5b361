use super::{Address, WebhookVerdict};
use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateQuery {
    pub destination: Address,
    pub weight_oz: Decimal,
    pub item_count: i32,
    pub rush: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierRate {
    pub carrier: String,
    pub service: String,
    pub amount: Decimal,
    pub currency: String,
    pub estimated_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShipmentInput {
    pub order_id: Uuid,
    pub destination: Address,
    pub weight_oz: Decimal,
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub tracking_number: String,
    pub tracking_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_url: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub status: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingStatus {
    pub status: String,
    pub events: Vec<TrackingEvent>,
}

/// Shipping carrier contract.
#[async_trait]
pub trait ShippingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_rates(&self, query: RateQuery) -> Result<Vec<CarrierRate>, ServiceError>;

    async fn create_shipment(&self, input: CreateShipmentInput)
        -> Result<Shipment, ServiceError>;

    async fn track(&self, tracking_number: &str) -> Result<TrackingStatus, ServiceError>;

    fn parse_webhook_event(
        &self,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> WebhookVerdict;
}

// ---------------------------------------------------------------------------
// Mock implementation
// ---------------------------------------------------------------------------

/// Synthetic carrier producing stable rates and tracking data.
pub struct MockShippingProvider;

impl MockShippingProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockShippingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShippingProvider for MockShippingProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_rates(&self, query: RateQuery) -> Result<Vec<CarrierRate>, ServiceError> {
        let per_item = dec!(0.35) * Decimal::from(query.item_count);
        let per_oz = dec!(0.04) * query.weight_oz;
        let ground = dec!(8.00) + per_item + per_oz;
        let multiplier = if query.rush { dec!(1.5) } else { Decimal::ONE };

        Ok(vec![
            CarrierRate {
                carrier: "mockpost".to_string(),
                service: "ground".to_string(),
                amount: (ground * multiplier).round_dp(2),
                currency: "USD".to_string(),
                estimated_days: if query.rush { 2 } else { 5 },
            },
            CarrierRate {
                carrier: "mockpost".to_string(),
                service: "express".to_string(),
                amount: (ground * dec!(2.2)).round_dp(2),
                currency: "USD".to_string(),
                estimated_days: 1,
            },
        ])
    }

    async fn create_shipment(
        &self,
        input: CreateShipmentInput,
    ) -> Result<Shipment, ServiceError> {
        let tracking_number = format!("MOCK{}", &input.order_id.simple().to_string()[..12].to_uppercase());
        Ok(Shipment {
            tracking_url: format!("https://tracking.example.com/{}", tracking_number),
            label_url: Some(format!("https://labels.example.com/{}.pdf", tracking_number)),
            tracking_number,
            status: "label_created".to_string(),
        })
    }

    async fn track(&self, tracking_number: &str) -> Result<TrackingStatus, ServiceError> {
        Ok(TrackingStatus {
            status: "in_transit".to_string(),
            events: vec![TrackingEvent {
                status: "in_transit".to_string(),
                description: format!("package {} departed facility", tracking_number),
                occurred_at: Utc::now(),
            }],
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
            tracking_number: String,
        }
        match serde_json::from_slice::<MockEvent>(payload) {
            Ok(event) => WebhookVerdict {
                accepted: true,
                event_type: Some(event.event_type),
                provider_ref: Some(event.tracking_number),
                amount_cents: None,
                reason: None,
            },
            Err(e) => WebhookVerdict::rejected(format!("malformed payload: {}", e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Real implementation (REST carrier API)
// ---------------------------------------------------------------------------

pub struct RestShippingProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl RestShippingProvider {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client"),
            api_url,
            api_key,
        }
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ServiceError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("carrier request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ProviderError(format!(
                "carrier returned {}",
                response.status()
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("carrier response unreadable: {}", e)))
    }
}

#[async_trait]
impl ShippingProvider for RestShippingProvider {
    fn name(&self) -> &'static str {
        "carrier"
    }

    #[instrument(skip(self, query))]
    async fn get_rates(&self, query: RateQuery) -> Result<Vec<CarrierRate>, ServiceError> {
        #[derive(Deserialize)]
        struct RatesResponse {
            rates: Vec<CarrierRate>,
        }
        let response: RatesResponse = self.post_json("/rates", &query).await?;
        Ok(response.rates)
    }

    #[instrument(skip(self, input))]
    async fn create_shipment(
        &self,
        input: CreateShipmentInput,
    ) -> Result<Shipment, ServiceError> {
        self.post_json("/shipments", &input).await
    }

    async fn track(&self, tracking_number: &str) -> Result<TrackingStatus, ServiceError> {
        let response = self
            .client
            .get(format!("{}/tracking/{}", self.api_url, tracking_number))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("carrier request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!(
                "tracking {}",
                tracking_number
            )));
        }
        if !response.status().is_success() {
            return Err(ServiceError::ProviderError(format!(
                "carrier returned {}",
                response.status()
            )));
        }

        response
            .json::<TrackingStatus>()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("carrier response unreadable: {}", e)))
    }

    fn parse_webhook_event(
        &self,
        payload: &[u8],
        _headers: &HashMap<String, String>,
    ) -> WebhookVerdict {
        #[derive(Deserialize)]
        struct CarrierEvent {
            #[serde(rename = "type")]
            event_type: String,
            tracking_number: String,
        }
        match serde_json::from_slice::<CarrierEvent>(payload) {
            Ok(event) => WebhookVerdict {
                accepted: true,
                event_type: Some(event.event_type),
                provider_ref: Some(event.tracking_number),
                amount_cents: None,
                reason: None,
            },
            Err(e) => WebhookVerdict::rejected(format!("malformed payload: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destination() -> Address {
        Address {
            name: "Casey Printer".to_string(),
            line1: "1 Ink Way".to_string(),
            line2: None,
            city: "Portland".to_string(),
            state: "OR".to_string(),
            postal_code: "97201".to_string(),
            country: "US".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_rates_scale_with_weight_and_items() {
        let provider = MockShippingProvider::new();
        let light = provider
            .get_rates(RateQuery {
                destination: destination(),
                weight_oz: dec!(4),
                item_count: 1,
                rush: false,
            })
            .await
            .unwrap();
        let heavy = provider
            .get_rates(RateQuery {
                destination: destination(),
                weight_oz: dec!(64),
                item_count: 24,
                rush: false,
            })
            .await
            .unwrap();

        assert!(heavy[0].amount > light[0].amount);
        assert!(light.iter().all(|r| r.amount > Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_mock_rush_costs_more() {
        let provider = MockShippingProvider::new();
        let query = RateQuery {
            destination: destination(),
            weight_oz: dec!(9),
            item_count: 12,
            rush: false,
        };
        let standard = provider.get_rates(query.clone()).await.unwrap();
        let rush = provider
            .get_rates(RateQuery {
                rush: true,
                ..query
            })
            .await
            .unwrap();

        assert!(rush[0].amount > standard[0].amount);
    }

    #[tokio::test]
    async fn test_mock_shipment_creation() {
        let provider = MockShippingProvider::new();
        let shipment = provider
            .create_shipment(CreateShipmentInput {
                order_id: Uuid::new_v4(),
                destination: destination(),
                weight_oz: dec!(9),
                service: "ground".to_string(),
            })
            .await
            .unwrap();

        assert!(shipment.tracking_number.starts_with("MOCK"));
        assert!(shipment.tracking_url.contains(&shipment.tracking_number));
        assert!(shipment.label_url.is_some());
    }

    #[test]
    fn test_webhook_parse() {
        let provider = MockShippingProvider::new();
        let verdict = provider.parse_webhook_event(
            br#"{"type":"tracker.updated","tracking_number":"MOCK123"}"#,
            &HashMap::new(),
        );
        assert!(verdict.accepted);
        assert_eq!(verdict.provider_ref.as_deref(), Some("MOCK123"));
    }
}
