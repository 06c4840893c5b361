use crate::{
    entities::{
        cart, cart_item, order, order_item, payment, Cart, CartItem, CartItemModel, CartStatus,
        OrderModel, Payment, PaymentState, PaymentStatus, PricingSnapshot, PricingSnapshotModel,
        ProductVariant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    providers::{
        payments::{CreatePaymentIntentInput, PaymentIntentStatus},
        Address, OrderNotification, PaymentReceipt, Providers,
    },
    services::production::ProductionService,
};
use chrono::Utc;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct StartCheckoutInput {
    pub cart_id: Uuid,
    pub shipping_address: Address,
}

/// Checkout context frozen into the payment intent's metadata at start.
/// It is the sole carrier of cart identity across the asynchronous
/// confirmation boundary, so confirmation can resume with nothing but the
/// intent id.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckoutContext {
    store_id: Uuid,
    user_id: Option<Uuid>,
    cart_id: Uuid,
    shipping: Address,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStarted {
    pub provider: String,
    pub intent_id: String,
    pub client_secret: Option<String>,
    pub status: PaymentIntentStatus,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConfirmationOutcome {
    /// Provider has not settled the intent; nothing was materialized.
    Pending { status: PaymentIntentStatus },
    /// Payment captured and the order fully materialized.
    Completed { order_id: Uuid },
}

/// Checkout state machine. Start freezes cart context into a payment
/// intent; confirmation is idempotent on the intent id and materializes
/// order, items, payment and production job in one transaction.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    providers: Providers,
    production: ProductionService,
    events: EventSender,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        providers: Providers,
        production: ProductionService,
        events: EventSender,
    ) -> Self {
        Self {
            db,
            providers,
            production,
            events,
        }
    }

    #[instrument(skip(self, input), fields(cart_id = %input.cart_id))]
    pub async fn start_checkout(
        &self,
        input: StartCheckoutInput,
    ) -> Result<CheckoutStarted, ServiceError> {
        let cart = Cart::find_by_id(input.cart_id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::EmptyCart(input.cart_id))?;
        if cart.status != CartStatus::Active {
            return Err(ServiceError::InvalidOperation(format!(
                "cart {} is no longer active",
                cart.id
            )));
        }

        let item_count = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .count(&*self.db)
            .await?;
        if item_count == 0 {
            return Err(ServiceError::EmptyCart(cart.id));
        }
        // Providers reject zero-amount intents; catch it before the call.
        if cart.total <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "cart {} total {} is not chargeable",
                cart.id, cart.total
            )));
        }

        let context = CheckoutContext {
            store_id: cart.store_id,
            user_id: cart.user_id,
            cart_id: cart.id,
            shipping: input.shipping_address,
        };

        let created = self
            .providers
            .payments
            .create_payment_intent(CreatePaymentIntentInput {
                amount_cents: to_cents(cart.total)?,
                currency: cart.currency.clone(),
                metadata: serde_json::to_value(&context)?,
            })
            .await?;

        info!(cart_id = %cart.id, intent_id = %created.provider_ref, "checkout started");
        self.events
            .send_or_log(Event::CheckoutStarted {
                cart_id: cart.id,
                intent_id: created.provider_ref.clone(),
            })
            .await;

        Ok(CheckoutStarted {
            provider: created.provider,
            intent_id: created.provider_ref,
            client_secret: created.client_secret,
            status: created.status,
            amount: cart.total,
        })
    }

    /// Confirms the intent with the provider and materializes the order.
    /// Safe to call any number of times, from the client or from a
    /// redelivered provider webhook: the first successful materialization
    /// wins and later calls return the same order id.
    #[instrument(skip(self))]
    pub async fn handle_confirmation(
        &self,
        intent_id: &str,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        if let Some(existing) = self.find_payment(intent_id).await? {
            return Ok(ConfirmationOutcome::Completed {
                order_id: existing.order_id,
            });
        }

        let intent = self
            .providers
            .payments
            .retrieve_payment_intent(intent_id)
            .await?;
        let context: CheckoutContext = serde_json::from_value(intent.metadata.clone())
            .map_err(|e| {
                ServiceError::ProviderError(format!(
                    "intent {intent_id} carries no checkout context: {e}"
                ))
            })?;

        let confirmed = self
            .providers
            .payments
            .confirm_payment_intent(intent_id)
            .await?;
        if confirmed.status != PaymentIntentStatus::Succeeded {
            if confirmed.status == PaymentIntentStatus::Failed {
                warn!(%intent_id, "payment confirmation failed");
                self.events
                    .send_or_log(Event::PaymentFailed {
                        intent_id: intent_id.to_string(),
                    })
                    .await;
            }
            return Ok(ConfirmationOutcome::Pending {
                status: confirmed.status,
            });
        }

        // Payment is captured from here on. Materialization failures must
        // surface as CheckoutFailed with full context so the operator can
        // reconcile; reporting them as a payment failure would be a lie.
        let (order, job_id) = self
            .materialize_order(intent_id, &context, confirmed.amount_cents)
            .await
            .map_err(|source| {
                error!(
                    %intent_id,
                    cart_id = %context.cart_id,
                    store_id = %context.store_id,
                    error = %source,
                    "order materialization failed after captured payment"
                );
                ServiceError::checkout_failed(intent_id, context.cart_id, source)
            })?;

        self.after_commit(&order, job_id, intent_id).await;
        Ok(ConfirmationOutcome::Completed { order_id: order.id })
    }

    async fn find_payment(&self, intent_id: &str) -> Result<Option<payment::Model>, ServiceError> {
        Ok(Payment::find()
            .filter(payment::Column::TransactionId.eq(intent_id))
            .one(&*self.db)
            .await?)
    }

    /// One transaction: order, order items copied from the frozen
    /// snapshots, payment row keyed by the intent id, production job.
    async fn materialize_order(
        &self,
        intent_id: &str,
        context: &CheckoutContext,
        amount_cents: i64,
    ) -> Result<(OrderModel, Option<Uuid>), ServiceError> {
        let txn = self.db.begin().await?;

        // A concurrent confirmation may have won between the guard check
        // and here; the unique transaction_id column turns that into an
        // insert error, but re-checking inside the transaction keeps the
        // common redelivery case clean.
        if let Some(existing) = Payment::find()
            .filter(payment::Column::TransactionId.eq(intent_id))
            .one(&txn)
            .await?
        {
            txn.commit().await?;
            let order = crate::entities::Order::find_by_id(existing.order_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("order {}", existing.order_id))
                })?;
            return Ok((order, None));
        }

        let cart = Cart::find_by_id(context.cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart {}", context.cart_id)))?;

        let lines = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .find_also_related(PricingSnapshot)
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart(cart.id));
        }

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(cart.store_id),
            user_id: Set(cart.user_id),
            cart_id: Set(cart.id),
            order_number: Set(generate_order_number()),
            payment_status: Set(PaymentStatus::Paid),
            total_amount: Set(cart.total),
            currency: Set(cart.currency.clone()),
            shipping_address: Set(serde_json::to_value(&context.shipping)?),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for (item, snapshot) in &lines {
            self.insert_order_item(&txn, &order, item, snapshot.as_ref(), now)
                .await?;
        }

        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            amount: Set(from_cents(amount_cents)),
            currency: Set(cart.currency.clone()),
            provider: Set(self.providers.payments.name().to_string()),
            transaction_id: Set(intent_id.to_string()),
            status: Set(PaymentState::Captured),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let job = self.production.create_for_order(&txn, order.id).await?;

        // The cart is consumed; a retried start_checkout must not mint a
        // second intent against it.
        let mut consumed: cart::ActiveModel = cart.clone().into();
        consumed.status = Set(CartStatus::Completed);
        consumed.updated_at = Set(now);
        consumed.update(&txn).await?;

        txn.commit().await?;
        Ok((order, Some(job.id)))
    }

    async fn insert_order_item(
        &self,
        txn: &DatabaseTransaction,
        order: &OrderModel,
        item: &CartItemModel,
        snapshot: Option<&PricingSnapshotModel>,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let snapshot = snapshot.ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "cart item {} has no pricing snapshot",
                item.id
            ))
        })?;

        let sku = ProductVariant::find_by_id(item.variant_id)
            .one(txn)
            .await?
            .map(|variant| variant.sku)
            .unwrap_or_default();

        // The snapshot breakdown is a frozen contract; a missing unit
        // price means the snapshot was tampered with or never written
        // properly, and the order must not guess a price.
        let unit_price = snapshot
            .breakdown
            .get("unitPrice")
            .and_then(|v| serde_json::from_value::<Decimal>(v.clone()).ok())
            .ok_or_else(|| {
                ServiceError::InvalidOperation(format!(
                    "pricing snapshot {} has no readable unit price",
                    snapshot.id
                ))
            })?;

        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(item.product_id),
            variant_id: Set(item.variant_id),
            sku: Set(sku),
            decoration: Set(item.decoration.clone()),
            quantity: Set(item.quantity),
            unit_price: Set(unit_price),
            total_price: Set(snapshot.total_price),
            breakdown: Set(snapshot.breakdown.clone()),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;
        Ok(())
    }

    /// Post-commit side effects. All best-effort: the order exists whether
    /// or not any of these deliver.
    async fn after_commit(&self, order: &OrderModel, job_id: Option<Uuid>, intent_id: &str) {
        info!(order_id = %order.id, %intent_id, "checkout completed");

        self.events.send_or_log(Event::OrderCreated(order.id)).await;
        self.events
            .send_or_log(Event::PaymentCaptured {
                order_id: order.id,
                transaction_id: intent_id.to_string(),
            })
            .await;
        self.events
            .send_or_log(Event::CheckoutCompleted {
                cart_id: order.cart_id,
                order_id: order.id,
            })
            .await;
        if let Some(job_id) = job_id {
            self.events
                .send_or_log(Event::ProductionJobCreated {
                    order_id: order.id,
                    job_id,
                })
                .await;
        }

        if let Err(e) = self
            .providers
            .notifications
            .send_order_confirmation(OrderNotification {
                order_id: order.id,
                order_number: order.order_number.clone(),
                user_id: order.user_id,
                total: order.total_amount,
                currency: order.currency.clone(),
            })
            .await
        {
            warn!(order_id = %order.id, error = %e, "order confirmation not sent");
        }

        if let Err(e) = self
            .providers
            .notifications
            .send_payment_receipt(PaymentReceipt {
                order_id: order.id,
                order_number: order.order_number.clone(),
                transaction_id: intent_id.to_string(),
                amount: order.total_amount,
                currency: order.currency.clone(),
            })
            .await
        {
            warn!(order_id = %order.id, error = %e, "payment receipt not sent");
        }

        self.providers.webhooks.publish_async(
            "order.created",
            serde_json::json!({
                "orderId": order.id,
                "orderNumber": order.order_number,
                "storeId": order.store_id,
                "total": order.total_amount,
                "currency": order.currency,
            }),
        );
    }
}

fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), &suffix[..8])
}

fn to_cents(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("amount {amount} not representable in cents"))
        })
}

fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_cents() {
        assert_eq!(to_cents(dec!(112.30)).unwrap(), 11230);
        assert_eq!(to_cents(dec!(0.01)).unwrap(), 1);
        assert_eq!(to_cents(Decimal::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_from_cents() {
        assert_eq!(from_cents(11230), dec!(112.30));
        assert_eq!(from_cents(1), dec!(0.01));
    }

    #[test]
    fn test_order_number_shape() {
        let number = generate_order_number();
        assert!(number.starts_with("ORD-"));
        assert_eq!(number.len(), "ORD-20260101-ABCDEF01".len());
    }

    #[test]
    fn test_checkout_context_round_trips_metadata() {
        let context = CheckoutContext {
            store_id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
            cart_id: Uuid::new_v4(),
            shipping: Address {
                name: "Dana Ortiz".into(),
                line1: "500 Linden Ave".into(),
                line2: None,
                city: "Portland".into(),
                state: "OR".into(),
                postal_code: "97201".into(),
                country: "US".into(),
            },
        };
        let value = serde_json::to_value(&context).unwrap();
        let parsed: CheckoutContext = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.cart_id, context.cart_id);
        assert_eq!(parsed.shipping.postal_code, "97201");
    }
}
