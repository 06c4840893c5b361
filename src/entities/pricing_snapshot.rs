use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable price breakdown frozen when an item is added to a cart.
/// Created once, never mutated; re-pricing requires removing and re-adding
/// the item. The `breakdown` blob carries enough fields to reconstruct the
/// line without recomputation, and downstream invoice rendering depends on
/// its exact shape.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pricing_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub cart_item_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub base_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub color_surcharge: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity_discount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_price: Decimal,
    /// Unit price, setup fee, markup, discount, rule id, quantity, currency
    #[sea_orm(column_type = "Json")]
    pub breakdown: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cart_item::Entity",
        from = "Column::CartItemId",
        to = "super::cart_item::Column::Id"
    )]
    CartItem,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
