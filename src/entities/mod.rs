/// Domain entities for the pricing, cart, checkout and production pipeline.
pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod pricing_rule;
pub mod pricing_snapshot;
pub mod product;
pub mod product_variant;
pub mod production_job;
pub mod production_step;

// Re-export entities
pub use cart::{CartStatus, Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use order::{Entity as Order, Model as OrderModel, PaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentState};
pub use pricing_rule::{Entity as PricingRule, Model as PricingRuleModel};
pub use pricing_snapshot::{Entity as PricingSnapshot, Model as PricingSnapshotModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use production_job::{Entity as ProductionJob, Model as ProductionJobModel, ProductionJobStatus};
pub use production_step::{
    Entity as ProductionStep, Model as ProductionStepModel, ProductionStepStatus,
};
