use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Decoratable product owned by a store. Once a variant has been referenced
/// by a pricing snapshot the product side is treated as immutable.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub name: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    /// Fallback blank cost when a variant carries no supplier cost
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub base_price: Option<Decimal>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product_variant::Entity")]
    Variants,
    #[sea_orm(has_many = "super::pricing_rule::Entity")]
    PricingRules,
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variants.def()
    }
}

impl Related<super::pricing_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PricingRules.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
