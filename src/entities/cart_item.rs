use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cart line item. Owns exactly one pricing snapshot, frozen at add time;
/// quantity changes never re-price the snapshot.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cart_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[sea_orm(nullable)]
    pub design_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub mockup_url: Option<String>,
    /// Decoration selection (method, locations, colors) as priced
    #[sea_orm(column_type = "Json", nullable)]
    pub decoration: Option<Json>,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cart::Entity",
        from = "Column::CartId",
        to = "super::cart::Column::Id"
    )]
    Cart,
    #[sea_orm(
        belongs_to = "super::product_variant::Entity",
        from = "Column::VariantId",
        to = "super::product_variant::Column::Id"
    )]
    ProductVariant,
    #[sea_orm(has_one = "super::pricing_snapshot::Entity")]
    PricingSnapshot,
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cart.def()
    }
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductVariant.def()
    }
}

impl Related<super::pricing_snapshot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PricingSnapshot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
