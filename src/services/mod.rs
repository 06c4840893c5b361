/// Domain services: pricing, quoting, cart aggregate, checkout state
/// machine and production job management.
pub mod carts;
pub mod checkout;
pub mod pricing;
pub mod production;
pub mod quotes;

pub use carts::CartService;
pub use checkout::CheckoutService;
pub use pricing::PricingEngine;
pub use production::ProductionService;
pub use quotes::QuoteEngine;
