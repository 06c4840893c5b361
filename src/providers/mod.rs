//! Pluggable provider adapters for payments, shipping, tax, notifications
//! and outbound webhooks. Each family has a mock and a real implementation
//! selected by configuration at process start; the resulting bundle is
//! injected into the services that need it rather than reached through
//! globals.

pub mod notifications;
pub mod payments;
pub mod shipping;
pub mod tax;
pub mod webhooks;

use crate::config::{AppConfig, ProviderMode};
use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use notifications::{
    LogNotifications, NotificationsProvider, OrderNotification, PaymentReceipt, PostNotifications,
};
pub use payments::{
    ConfirmedIntent, CreatePaymentIntentInput, CreatedIntent, MockPaymentsProvider, PaymentIntent,
    PaymentIntentStatus, PaymentsProvider, RefundInput, RefundResult, StripePaymentsProvider,
};
pub use shipping::{MockShippingProvider, RestShippingProvider, ShippingProvider};
pub use tax::{FlatRateTaxProvider, RestTaxProvider, TaxProvider};
pub use webhooks::WebhookPublisher;

/// Postal address carried through checkout and handed to shipping and tax
/// providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// Outcome of parsing an inbound provider webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerdict {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookVerdict {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            event_type: None,
            provider_ref: None,
            amount_cents: None,
            reason: Some(reason.into()),
        }
    }
}

/// Provider bundle resolved once per process from configuration.
#[derive(Clone)]
pub struct Providers {
    pub payments: Arc<dyn PaymentsProvider>,
    pub shipping: Arc<dyn ShippingProvider>,
    pub tax: Arc<dyn TaxProvider>,
    pub notifications: Arc<dyn NotificationsProvider>,
    pub webhooks: Arc<WebhookPublisher>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}

impl Providers {
    /// Builds the provider bundle from configuration. Real adapters require
    /// their credentials; a missing credential is a startup error, not a
    /// silent fallback to the mock.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let pc = &cfg.providers;

        let payments: Arc<dyn PaymentsProvider> = match pc.payments {
            ProviderMode::Mock => Arc::new(MockPaymentsProvider::new()),
            ProviderMode::Real => {
                let secret = pc.payments_secret_key.clone().ok_or_else(|| {
                    ServiceError::ProviderError(
                        "providers.payments_secret_key required for real payments".to_string(),
                    )
                })?;
                Arc::new(StripePaymentsProvider::new(
                    secret,
                    pc.payments_webhook_secret.clone(),
                ))
            }
        };

        let shipping: Arc<dyn ShippingProvider> = match pc.shipping {
            ProviderMode::Mock => Arc::new(MockShippingProvider::new()),
            ProviderMode::Real => {
                let url = pc.shipping_api_url.clone().ok_or_else(|| {
                    ServiceError::ProviderError(
                        "providers.shipping_api_url required for real shipping".to_string(),
                    )
                })?;
                Arc::new(RestShippingProvider::new(
                    url,
                    pc.shipping_api_key.clone().unwrap_or_default(),
                ))
            }
        };

        let tax: Arc<dyn TaxProvider> = match pc.tax {
            ProviderMode::Mock => Arc::new(FlatRateTaxProvider::new(cfg.pricing.mock_tax_rate)),
            ProviderMode::Real => {
                let url = pc.tax_api_url.clone().ok_or_else(|| {
                    ServiceError::ProviderError(
                        "providers.tax_api_url required for real tax".to_string(),
                    )
                })?;
                Arc::new(RestTaxProvider::new(
                    url,
                    pc.tax_api_key.clone().unwrap_or_default(),
                ))
            }
        };

        let notifications: Arc<dyn NotificationsProvider> = match pc.notifications {
            ProviderMode::Mock => Arc::new(LogNotifications),
            ProviderMode::Real => {
                let url = pc.notifications_url.clone().ok_or_else(|| {
                    ServiceError::ProviderError(
                        "providers.notifications_url required for real notifications".to_string(),
                    )
                })?;
                Arc::new(PostNotifications::new(url))
            }
        };

        let webhooks = Arc::new(WebhookPublisher::new(
            pc.store_webhook_url.clone(),
            pc.store_webhook_secret.clone(),
        ));

        Ok(Self {
            payments,
            shipping,
            tax,
            notifications,
            webhooks,
        })
    }

    /// All-mock bundle for tests.
    pub fn mock() -> Self {
        Self {
            payments: Arc::new(MockPaymentsProvider::new()),
            shipping: Arc::new(MockShippingProvider::new()),
            tax: Arc::new(FlatRateTaxProvider::new(
                crate::config::PricingConfig::default().mock_tax_rate,
            )),
            notifications: Arc::new(LogNotifications),
            webhooks: Arc::new(WebhookPublisher::new(None, None)),
        }
    }

    /// Mock bundle whose payment confirmations fail; used to exercise the
    /// failure path of checkout.
    pub fn mock_with_failing_payments() -> Self {
        Self {
            payments: Arc::new(MockPaymentsProvider::failing()),
            ..Self::mock()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_bundle_provider_names() {
        let providers = Providers::mock();
        assert_eq!(providers.payments.name(), "mock");
    }

    #[test]
    fn test_real_payments_requires_secret() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            8080,
            "test".to_string(),
        );
        cfg.providers.payments = ProviderMode::Real;

        let err = Providers::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("payments_secret_key"));
    }

    #[test]
    fn test_address_serialization_omits_empty_line2() {
        let addr = Address {
            name: "Casey Printer".to_string(),
            line1: "1 Ink Way".to_string(),
            line2: None,
            city: "Portland".to_string(),
            state: "OR".to_string(),
            postal_code: "97201".to_string(),
            country: "US".to_string(),
        };
        let json = serde_json::to_string(&addr).unwrap();
        assert!(!json.contains("line2"));
    }
}
