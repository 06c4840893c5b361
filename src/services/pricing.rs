use crate::{
    entities::{pricing_rule, PricingRule, PricingRuleModel, Product, ProductVariant},
    errors::ServiceError,
};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Rounds half-away-from-zero to the cent. Applied exactly once per
/// formula; composed values are never re-rounded.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Print/embroidery technique applied to a product. Keys the per-method
/// decoration costs inside a pricing rule config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecorationMethod {
    ScreenPrint,
    Embroidery,
    Dtg,
    HeatTransfer,
}

/// Requested decoration for a line: method plus location and color counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecorationSelection {
    pub method: DecorationMethod,
    pub locations: i32,
    pub colors: i32,
}

/// Variant reference accepted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantRef {
    Id(Uuid),
    Sku(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingInput {
    pub variant: VariantRef,
    pub quantity: i32,
    pub decoration: Option<DecorationSelection>,
}

/// Per-method decoration fees inside a rule config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecorationCosts {
    #[serde(default)]
    pub per_location_fee: Decimal,
    #[serde(default)]
    pub per_color_fee: Decimal,
    #[serde(default)]
    pub setup_fee: Decimal,
}

/// Quantity break within a rule. The markup delta and fixed discount are
/// independent overrides; both, either or neither may be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityBreak {
    #[serde(alias = "qty")]
    pub min_qty: i32,
    #[serde(default)]
    pub unit_markup_delta_percent: Option<Decimal>,
    #[serde(default)]
    pub fixed_unit_discount: Option<Decimal>,
}

/// Parsed pricing rule config blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(default)]
    pub base_markup_percent: Decimal,
    #[serde(default)]
    pub breaks: Vec<QuantityBreak>,
    #[serde(default)]
    pub decoration_costs: HashMap<DecorationMethod, DecorationCosts>,
}

/// Breakdown frozen into a pricing snapshot. Field names and rounding are
/// a stable contract: order and invoice rendering depend on this shape
/// byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub unit_price: Decimal,
    pub setup_fee: Decimal,
    pub markup: Decimal,
    pub discount: Decimal,
    pub rule_id: Option<Uuid>,
    pub quantity: i32,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingResult {
    pub base_price: Decimal,
    /// Reserved; always zero today
    pub color_surcharge: Decimal,
    pub quantity_discount: Decimal,
    pub decoration_cost: Decimal,
    pub total: Decimal,
    pub breakdown: PriceBreakdown,
}

/// Selects the single applicable rule for a quantity. When store
/// configuration lets ranges overlap, the narrowest range wins, ties going
/// to the lower minimum and then the earlier rule.
pub fn select_rule(rules: &[PricingRuleModel], quantity: i32) -> Option<&PricingRuleModel> {
    rules
        .iter()
        .filter(|rule| rule.active && rule.matches_quantity(quantity))
        .min_by(|a, b| {
            a.range_width()
                .cmp(&b.range_width())
                .then(a.min_quantity.cmp(&b.min_quantity))
                .then(a.created_at.cmp(&b.created_at))
        })
}

/// Selects the quantity break with the highest threshold not exceeding
/// `quantity`: candidates sorted descending by threshold, first satisfying
/// one wins.
fn select_break(breaks: &[QuantityBreak], quantity: i32) -> Option<&QuantityBreak> {
    let mut candidates: Vec<&QuantityBreak> = breaks.iter().collect();
    candidates.sort_by(|a, b| b.min_qty.cmp(&a.min_qty));
    candidates.into_iter().find(|b| b.min_qty <= quantity)
}

/// Prices one line from already-resolved inputs. Pure so the rule/break
/// algebra is testable without a datastore.
pub fn price_line(
    blank_cost: Decimal,
    quantity: i32,
    rule: Option<(Uuid, &RuleConfig)>,
    decoration: Option<&DecorationSelection>,
    currency: &str,
) -> PricingResult {
    let mut markup = Decimal::ZERO;
    let mut discount = Decimal::ZERO;
    let mut decoration_cost = Decimal::ZERO;
    let mut setup_fee = Decimal::ZERO;
    let mut rule_id = None;

    if let Some((id, config)) = rule {
        rule_id = Some(id);
        markup = blank_cost * config.base_markup_percent / Decimal::ONE_HUNDRED;

        if let Some(brk) = select_break(&config.breaks, quantity) {
            if let Some(delta) = brk.unit_markup_delta_percent {
                markup =
                    blank_cost * (config.base_markup_percent + delta) / Decimal::ONE_HUNDRED;
            }
            if let Some(fixed) = brk.fixed_unit_discount {
                discount = fixed;
            }
        }

        if let Some(selection) = decoration {
            // Absent method config means all decoration fees are zero.
            let costs = config
                .decoration_costs
                .get(&selection.method)
                .cloned()
                .unwrap_or_default();
            decoration_cost = costs.per_location_fee * Decimal::from(selection.locations)
                + costs.per_color_fee * Decimal::from(selection.colors);
            setup_fee = costs.setup_fee;
        }
    }

    let unit_price = round2(blank_cost + markup - discount + decoration_cost);
    let total = round2(unit_price * Decimal::from(quantity) + setup_fee);

    PricingResult {
        base_price: blank_cost,
        color_surcharge: Decimal::ZERO,
        quantity_discount: discount,
        decoration_cost,
        total,
        breakdown: PriceBreakdown {
            unit_price,
            setup_fee,
            markup,
            discount,
            rule_id,
            quantity,
            currency: currency.to_string(),
        },
    }
}

/// Rule-based pricing engine. Resolves a variant, picks the single active
/// rule containing the quantity and produces the breakdown that gets
/// frozen into a cart snapshot.
#[derive(Clone)]
pub struct PricingEngine {
    db: Arc<DatabaseConnection>,
    currency: String,
}

impl PricingEngine {
    pub fn new(db: Arc<DatabaseConnection>, currency: String) -> Self {
        Self { db, currency }
    }

    #[instrument(skip(self))]
    pub async fn calculate(&self, input: PricingInput) -> Result<PricingResult, ServiceError> {
        self.calculate_on(&*self.db, input).await
    }

    /// Variant of [`calculate`] usable inside an open transaction.
    pub async fn calculate_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: PricingInput,
    ) -> Result<PricingResult, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be positive, got {}",
                input.quantity
            )));
        }

        let variant = match &input.variant {
            VariantRef::Id(id) => ProductVariant::find_by_id(*id).one(conn).await?,
            VariantRef::Sku(sku) => {
                ProductVariant::find()
                    .filter(crate::entities::product_variant::Column::Sku.eq(sku.clone()))
                    .one(conn)
                    .await?
            }
        }
        .ok_or_else(|| {
            ServiceError::NotFound(format!("product variant {:?}", input.variant))
        })?;

        let product = Product::find_by_id(variant.product_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("product {}", variant.product_id))
            })?;

        let blank_cost = variant
            .supplier_cost
            .or(product.base_price)
            .unwrap_or(Decimal::ZERO);

        let rules = PricingRule::find()
            .filter(pricing_rule::Column::ProductId.eq(product.id))
            .filter(pricing_rule::Column::Active.eq(true))
            .all(conn)
            .await?;

        let selected = select_rule(&rules, input.quantity);
        let parsed = match selected {
            Some(rule) => Some((
                rule.id,
                serde_json::from_value::<RuleConfig>(rule.config.clone())?,
            )),
            None => None,
        };

        Ok(price_line(
            blank_cost,
            input.quantity,
            parsed.as_ref().map(|(id, config)| (*id, config)),
            input.decoration.as_ref(),
            &self.currency,
        ))
    }
}
