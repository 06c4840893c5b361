use crate::{
    entities::{
        cart, cart_item, pricing_snapshot, Cart, CartItem, CartItemModel, CartModel, CartStatus,
        PricingSnapshot, PricingSnapshotModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{DecorationSelection, PricingEngine, PricingInput, VariantRef},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    ModelTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
    pub design_id: Option<Uuid>,
    pub mockup_url: Option<String>,
    pub decoration: Option<DecorationSelection>,
}

/// Cart with its line items and their frozen snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct CartDetails {
    pub cart: CartModel,
    pub items: Vec<CartLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub item: CartItemModel,
    pub snapshot: Option<PricingSnapshotModel>,
}

/// Cart aggregate. All mutations recompute the cached cart total from the
/// item snapshots inside the same transaction.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    pricing: PricingEngine,
    events: EventSender,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, pricing: PricingEngine, events: EventSender) -> Self {
        Self { db, pricing, events }
    }

    /// Finds the active cart for the user (or, failing that, the session),
    /// creating one when none exists. A concurrent first request can race
    /// the create into a unique violation; that outcome means the other
    /// request won, so the find is retried.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(
        &self,
        store_id: Uuid,
        user_id: Option<Uuid>,
        session_id: Option<String>,
    ) -> Result<CartModel, ServiceError> {
        if user_id.is_none() && session_id.is_none() {
            return Err(ServiceError::ValidationError(
                "either user_id or session_id is required".into(),
            ));
        }

        if let Some(existing) = self.find_active(store_id, user_id, &session_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            user_id: Set(user_id),
            session_id: Set(session_id.clone()),
            currency: Set("USD".to_string()),
            total: Set(Decimal::ZERO),
            status: Set(CartStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match cart.insert(&*self.db).await {
            Ok(created) => {
                info!(cart_id = %created.id, %store_id, "created cart");
                self.events.send_or_log(Event::CartCreated(created.id)).await;
                Ok(created)
            }
            Err(err) if is_unique_violation(&err) => {
                warn!(%store_id, "lost cart creation race, re-reading");
                self.find_active(store_id, user_id, &session_id)
                    .await?
                    .ok_or(ServiceError::DatabaseError(err))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_active(
        &self,
        store_id: Uuid,
        user_id: Option<Uuid>,
        session_id: &Option<String>,
    ) -> Result<Option<CartModel>, ServiceError> {
        let mut query = Cart::find()
            .filter(cart::Column::StoreId.eq(store_id))
            .filter(cart::Column::Status.eq(CartStatus::Active));

        query = match (user_id, session_id) {
            (Some(user_id), _) => query.filter(cart::Column::UserId.eq(user_id)),
            (None, Some(session_id)) => {
                query.filter(cart::Column::SessionId.eq(session_id.clone()))
            }
            (None, None) => return Ok(None),
        };

        Ok(query.one(&*self.db).await?)
    }

    /// Prices the line, then atomically creates the item, freezes its
    /// snapshot and recomputes the cart total.
    #[instrument(skip(self, input), fields(quantity = input.quantity))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        input: AddItemInput,
    ) -> Result<CartLine, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Self::load_active_cart(&txn, cart_id).await?;

        let decoration_json = input
            .decoration
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let priced = self
            .pricing
            .calculate_on(
                &txn,
                PricingInput {
                    variant: VariantRef::Id(input.variant_id),
                    quantity: input.quantity,
                    decoration: input.decoration,
                },
            )
            .await?;

        let now = Utc::now();
        let item = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(input.product_id),
            variant_id: Set(input.variant_id),
            design_id: Set(input.design_id),
            mockup_url: Set(input.mockup_url),
            decoration: Set(decoration_json),
            quantity: Set(input.quantity),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let snapshot = pricing_snapshot::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_item_id: Set(item.id),
            base_price: Set(priced.base_price),
            color_surcharge: Set(priced.color_surcharge),
            quantity_discount: Set(priced.quantity_discount),
            total_price: Set(priced.total),
            breakdown: Set(serde_json::to_value(&priced.breakdown)?),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        Self::recompute_total(&txn, &cart).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, item_id = %item.id, total = %snapshot.total_price, "added cart item");
        self.events
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                variant_id: item.variant_id,
                quantity: item.quantity,
            })
            .await;

        Ok(CartLine {
            item,
            snapshot: Some(snapshot),
        })
    }

    /// Changes a line's quantity without touching its snapshot. The frozen
    /// price is deliberate; re-pricing requires removing and re-adding.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be positive, got {quantity}"
            )));
        }

        let txn = self.db.begin().await?;
        let cart = Self::load_active_cart(&txn, cart_id).await?;
        let item = Self::load_item(&txn, &cart, item_id).await?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        Self::recompute_total(&txn, &cart).await?;
        txn.commit().await?;

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, cart_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let cart = Self::load_active_cart(&txn, cart_id).await?;
        let item = Self::load_item(&txn, &cart, item_id).await?;

        PricingSnapshot::delete_many()
            .filter(pricing_snapshot::Column::CartItemId.eq(item.id))
            .exec(&txn)
            .await?;
        item.delete(&txn).await?;

        Self::recompute_total(&txn, &cart).await?;
        txn.commit().await?;

        self.events
            .send_or_log(Event::CartItemRemoved { cart_id, item_id })
            .await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_cart_details(&self, cart_id: Uuid) -> Result<CartDetails, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart {cart_id}")))?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .find_also_related(PricingSnapshot)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|(item, snapshot)| CartLine { item, snapshot })
            .collect();

        Ok(CartDetails { cart, items })
    }

    /// Marks the cart abandoned. Terminal: every later mutation is
    /// rejected with `InvalidOperation`.
    #[instrument(skip(self))]
    pub async fn abandon_cart(&self, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        let cart = Self::load_active_cart(&*self.db, cart_id).await?;

        let mut active: cart::ActiveModel = cart.into();
        active.status = Set(CartStatus::Abandoned);
        active.updated_at = Set(Utc::now());
        let abandoned = active.update(&*self.db).await?;

        self.events.send_or_log(Event::CartAbandoned(cart_id)).await;
        Ok(abandoned)
    }

    async fn load_active_cart<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart {cart_id}")))?;

        if cart.status != CartStatus::Active {
            return Err(ServiceError::InvalidOperation(format!(
                "cart {cart_id} is no longer active"
            )));
        }
        Ok(cart)
    }

    async fn load_item<C: ConnectionTrait>(
        conn: &C,
        cart: &CartModel,
        item_id: Uuid,
    ) -> Result<CartItemModel, ServiceError> {
        let item = CartItem::find_by_id(item_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart item {item_id}")))?;
        if item.cart_id != cart.id {
            return Err(ServiceError::NotFound(format!(
                "cart item {item_id} in cart {}",
                cart.id
            )));
        }
        Ok(item)
    }

    /// Cart total is the sum of the frozen snapshot totals.
    async fn recompute_total<C: ConnectionTrait>(
        conn: &C,
        cart: &CartModel,
    ) -> Result<Decimal, ServiceError> {
        let lines = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .find_also_related(PricingSnapshot)
            .all(conn)
            .await?;

        let total: Decimal = lines
            .iter()
            .filter_map(|(_, snapshot)| snapshot.as_ref())
            .map(|snapshot| snapshot.total_price)
            .sum();

        let mut active: cart::ActiveModel = cart.clone().into();
        active.total = Set(total);
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;

        Ok(total)
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
