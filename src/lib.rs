pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod providers;
pub mod services;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    providers::Providers,
    services::{CartService, CheckoutService, PricingEngine, ProductionService, QuoteEngine},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Shared application state handed to the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub providers: Providers,
    pub services: AppServices,
}

#[derive(Clone)]
pub struct AppServices {
    pub pricing: PricingEngine,
    pub quotes: QuoteEngine,
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub production: ProductionService,
}

impl AppServices {
    /// Wires the service graph over one connection pool, one provider
    /// bundle and one event channel.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        providers: Providers,
        events: EventSender,
    ) -> Self {
        let pricing = PricingEngine::new(db.clone(), config.pricing.currency.clone());
        let production = ProductionService::new(db.clone(), events.clone());
        Self {
            pricing: pricing.clone(),
            quotes: QuoteEngine::new(),
            carts: CartService::new(db.clone(), pricing, events.clone()),
            checkout: CheckoutService::new(db.clone(), providers, production.clone(), events),
            production,
        }
    }
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        event_sender: EventSender,
    ) -> Result<Self, ServiceError> {
        let providers = Providers::from_config(&config)?;
        let services = AppServices::build(
            db.clone(),
            &config,
            providers.clone(),
            event_sender.clone(),
        );
        Ok(Self {
            db,
            config: Arc::new(config),
            event_sender,
            providers,
            services,
        })
    }
}
