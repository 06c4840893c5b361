use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-configured markup/discount/decoration-cost policy scoped to a
/// product and a quantity range. Read-only from the pricing and checkout
/// paths; the `config` blob is parsed by the pricing engine.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pricing_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub active: bool,
    pub min_quantity: i32,
    /// Null means the range is unbounded above
    #[sea_orm(nullable)]
    pub max_quantity: Option<i32>,
    /// Markup percent, quantity breaks and per-method decoration costs
    #[sea_orm(column_type = "Json")]
    pub config: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Whether this rule's quantity range contains `quantity`.
    pub fn matches_quantity(&self, quantity: i32) -> bool {
        quantity >= self.min_quantity && self.max_quantity.map_or(true, |max| quantity <= max)
    }

    /// Width of the quantity range; unbounded ranges sort after any bounded
    /// range so the narrowest match wins deterministically.
    pub fn range_width(&self) -> i64 {
        match self.max_quantity {
            Some(max) => i64::from(max) - i64::from(self.min_quantity),
            None => i64::MAX,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
