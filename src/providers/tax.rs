use super::Address;
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxQuery {
    pub store_id: Uuid,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub destination: Address,
    pub tax_exempt: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxLine {
    pub jurisdiction: String,
    /// Fraction, not percent
    pub rate: Decimal,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxQuote {
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub breakdown: Vec<TaxLine>,
}

/// Tax calculation contract.
#[async_trait]
pub trait TaxProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn calculate_tax(&self, query: TaxQuery) -> Result<TaxQuote, ServiceError>;
}

/// Mock tax provider applying a single configured flat rate to the
/// subtotal. Exempt queries always produce zero tax.
pub struct FlatRateTaxProvider {
    rate: Decimal,
}

impl FlatRateTaxProvider {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl TaxProvider for FlatRateTaxProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn calculate_tax(&self, query: TaxQuery) -> Result<TaxQuote, ServiceError> {
        let tax_cents = if query.tax_exempt {
            0
        } else {
            (Decimal::from(query.subtotal_cents) * self.rate)
                .round()
                .to_i64()
                .unwrap_or(0)
        };

        let breakdown = if tax_cents > 0 {
            vec![TaxLine {
                jurisdiction: query.destination.state.clone(),
                rate: self.rate,
                amount_cents: tax_cents,
            }]
        } else {
            Vec::new()
        };

        Ok(TaxQuote {
            subtotal_cents: query.subtotal_cents,
            shipping_cents: query.shipping_cents,
            tax_cents,
            total_cents: query.subtotal_cents + query.shipping_cents + tax_cents,
            breakdown,
        })
    }
}

/// Real tax adapter delegating to a REST calculation API.
pub struct RestTaxProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl RestTaxProvider {
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
}

#[async_trait]
impl TaxProvider for RestTaxProvider {
    fn name(&self) -> &'static str {
        "taxapi"
    }

    #[instrument(skip(self, query))]
    async fn calculate_tax(&self, query: TaxQuery) -> Result<TaxQuote, ServiceError> {
        let response = self
            .client
            .post(format!("{}/calculate", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&query)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("tax request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ProviderError(format!(
                "tax api returned {}",
                response.status()
            )));
        }

        response
            .json::<TaxQuote>()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("tax response unreadable: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn query(subtotal_cents: i64, tax_exempt: bool) -> TaxQuery {
        TaxQuery {
            store_id: Uuid::new_v4(),
            subtotal_cents,
            shipping_cents: 775,
            destination: Address {
                name: "Casey Printer".to_string(),
                line1: "1 Ink Way".to_string(),
                line2: None,
                city: "Portland".to_string(),
                state: "OR".to_string(),
                postal_code: "97201".to_string(),
                country: "US".to_string(),
            },
            tax_exempt,
        }
    }

    #[tokio::test]
    async fn test_flat_rate_applies_to_subtotal() {
        let provider = FlatRateTaxProvider::new(dec!(0.0725));
        let quote = provider.calculate_tax(query(10_000, false)).await.unwrap();

        assert_eq!(quote.tax_cents, 725);
        assert_eq!(quote.total_cents, 10_000 + 775 + 725);
        assert_eq!(quote.breakdown.len(), 1);
    }

    #[tokio::test]
    async fn test_exempt_zeroes_tax_not_shipping() {
        let provider = FlatRateTaxProvider::new(dec!(0.09));
        let quote = provider.calculate_tax(query(10_000, true)).await.unwrap();

        assert_eq!(quote.tax_cents, 0);
        assert_eq!(quote.shipping_cents, 775);
        assert!(quote.breakdown.is_empty());
    }
}
