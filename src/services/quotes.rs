use crate::errors::ServiceError;
use crate::services::pricing::round2;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// Built-in fallbacks used when a store has configured no rates at all.
const DEFAULT_SHIP_BASE: Decimal = dec!(8.00);
const DEFAULT_SHIP_PER_ITEM: Decimal = dec!(0.35);
const DEFAULT_SHIP_PER_OZ: Decimal = dec!(0.04);
const DEFAULT_SHIP_RUSH_MULTIPLIER: Decimal = dec!(1.5);
const DEFAULT_TAX_RATE: Decimal = dec!(0.0725);

// Screen print: per-location run charge scaled by print area, one screen
// burned per color per location.
const SCREEN_RUN_BASE: Decimal = dec!(0.90);
const SCREEN_RUN_PER_COLOR: Decimal = dec!(0.55);
const SCREEN_SETUP_PER_SCREEN: Decimal = dec!(20.00);

// Embroidery: run charge covers the first 5000 stitches, each started
// extra thousand adds to it; digitizing is a one-time per-location fee.
const EMBROIDERY_RUN_BASE: Decimal = dec!(4.50);
const EMBROIDERY_RUN_PER_EXTRA_K: Decimal = dec!(0.55);
const EMBROIDERY_INCLUDED_STITCHES: u32 = 5_000;
const EMBROIDERY_DIGITIZING_PER_LOCATION: Decimal = dec!(40.00);

const RUSH_RUN_SURCHARGE: Decimal = dec!(1.25);
const TARGET_MARGIN: Decimal = dec!(0.40);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrintSizeTier {
    Small,
    Medium,
    Large,
    Xlarge,
}

impl PrintSizeTier {
    fn multiplier(self) -> Decimal {
        match self {
            PrintSizeTier::Small => dec!(1.00),
            PrintSizeTier::Medium => dec!(1.10),
            PrintSizeTier::Large => dec!(1.25),
            PrintSizeTier::Xlarge => dec!(1.40),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteMethod {
    #[serde(rename_all = "camelCase")]
    ScreenPrint {
        color_count: u32,
        print_size_tier: PrintSizeTier,
    },
    #[serde(rename_all = "camelCase")]
    Embroidery { stitch_count: u32 },
}

/// Store-configured shipping rate considered by a quote. Subtotal bounds
/// are inclusive; an absent bound is unbounded on that side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteShippingRate {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub min_subtotal: Option<Decimal>,
    pub max_subtotal: Option<Decimal>,
    pub base_charge: Decimal,
    pub per_item_charge: Decimal,
    pub per_oz_charge: Decimal,
    pub rush_multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteTaxRate {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub rate: Decimal,
    pub applies_shipping: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub quantity: u32,
    pub blank_unit_cost: Decimal,
    #[serde(flatten)]
    pub method: QuoteMethod,
    pub locations: Vec<String>,
    #[serde(default)]
    pub rush: bool,
    /// Total shipment weight, not per-unit.
    pub weight_oz: Decimal,
    #[serde(default)]
    pub shipping_rates: Vec<QuoteShippingRate>,
    #[serde(default)]
    pub tax_rates: Vec<QuoteTaxRate>,
    #[serde(default)]
    pub tax_exempt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupFee {
    pub label: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub subtotal: Decimal,
    pub setup_fees: Vec<SetupFee>,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub suggested_unit_price: Decimal,
    pub effective_margin_pct: Decimal,
}

/// Stateless cost-plus quoting engine. Unlike the cart pricing path this
/// takes no datastore: decoration formulas, rate selection and tax are
/// composed from the request alone, so stores can quote before any
/// product exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteEngine;

impl QuoteEngine {
    pub fn new() -> Self {
        QuoteEngine
    }

    pub fn price(&self, request: &QuoteRequest) -> Result<Quote, ServiceError> {
        if request.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quote quantity must be positive".into(),
            ));
        }
        if request.locations.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one decoration location is required".into(),
            ));
        }
        if let QuoteMethod::ScreenPrint { color_count, .. } = request.method {
            if color_count < 1 {
                return Err(ServiceError::ValidationError(
                    "screen print requires at least one color".into(),
                ));
            }
        }

        let locations = Decimal::from(request.locations.len() as u32);
        let quantity = Decimal::from(request.quantity);

        let (run_per_unit, setup_fees) = match &request.method {
            QuoteMethod::ScreenPrint {
                color_count,
                print_size_tier,
            } => {
                let colors = Decimal::from(*color_count);
                let per_location =
                    (SCREEN_RUN_BASE + SCREEN_RUN_PER_COLOR * colors) * print_size_tier.multiplier();
                let screens = colors * locations;
                let fees = vec![SetupFee {
                    label: "screens".into(),
                    amount: round2(SCREEN_SETUP_PER_SCREEN * screens),
                }];
                (per_location * locations, fees)
            }
            QuoteMethod::Embroidery { stitch_count } => {
                let extra_thousands = Decimal::from(
                    stitch_count
                        .saturating_sub(EMBROIDERY_INCLUDED_STITCHES)
                        .div_ceil(1_000),
                );
                let per_location =
                    EMBROIDERY_RUN_BASE + EMBROIDERY_RUN_PER_EXTRA_K * extra_thousands;
                let fees = vec![SetupFee {
                    label: "digitizing".into(),
                    amount: round2(EMBROIDERY_DIGITIZING_PER_LOCATION * locations),
                }];
                (per_location * locations, fees)
            }
        };

        let run_per_unit = if request.rush {
            run_per_unit * RUSH_RUN_SURCHARGE
        } else {
            run_per_unit
        };

        let decorated_unit_cost = request.blank_unit_cost + run_per_unit;
        let suggested_unit_price = round2(decorated_unit_cost / (Decimal::ONE - TARGET_MARGIN));
        let setup_total: Decimal = setup_fees.iter().map(|f| f.amount).sum();
        let subtotal = round2(suggested_unit_price * quantity + setup_total);

        let shipping = self.shipping(request, subtotal);
        let tax = self.tax(request, subtotal, shipping);
        let total = subtotal + shipping + tax;

        let effective_margin_pct = if suggested_unit_price.is_zero() {
            Decimal::ZERO
        } else {
            round2(
                (suggested_unit_price - request.blank_unit_cost) / suggested_unit_price
                    * Decimal::ONE_HUNDRED,
            )
        };

        Ok(Quote {
            subtotal,
            setup_fees,
            shipping,
            tax,
            total,
            suggested_unit_price,
            effective_margin_pct,
        })
    }

    /// First active rate whose subtotal bounds contain the subtotal wins;
    /// with nothing configured a built-in ground rate applies.
    fn shipping(&self, request: &QuoteRequest, subtotal: Decimal) -> Decimal {
        let quantity = Decimal::from(request.quantity);

        let matched = request.shipping_rates.iter().find(|rate| {
            rate.active
                && rate.min_subtotal.map_or(true, |min| subtotal >= min)
                && rate.max_subtotal.map_or(true, |max| subtotal <= max)
        });

        let (base, per_item, per_oz, rush_multiplier) = match matched {
            Some(rate) => (
                rate.base_charge,
                rate.per_item_charge,
                rate.per_oz_charge,
                rate.rush_multiplier,
            ),
            None => (
                DEFAULT_SHIP_BASE,
                DEFAULT_SHIP_PER_ITEM,
                DEFAULT_SHIP_PER_OZ,
                DEFAULT_SHIP_RUSH_MULTIPLIER,
            ),
        };

        let mut charge = base + per_item * quantity + per_oz * request.weight_oz;
        if request.rush {
            charge *= rush_multiplier;
        }
        round2(charge)
    }

    fn tax(&self, request: &QuoteRequest, subtotal: Decimal, shipping: Decimal) -> Decimal {
        if request.tax_exempt {
            return Decimal::ZERO;
        }

        let active: Vec<&QuoteTaxRate> =
            request.tax_rates.iter().filter(|r| r.active).collect();
        if active.is_empty() {
            return round2(DEFAULT_TAX_RATE * subtotal);
        }

        active
            .iter()
            .map(|rate| {
                let taxable = if rate.applies_shipping {
                    subtotal + shipping
                } else {
                    subtotal
                };
                round2(rate.rate * taxable)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen_print_request() -> QuoteRequest {
        QuoteRequest {
            quantity: 24,
            blank_unit_cost: dec!(6.5),
            method: QuoteMethod::ScreenPrint {
                color_count: 3,
                print_size_tier: PrintSizeTier::Large,
            },
            locations: vec!["front".into(), "back".into()],
            rush: true,
            weight_oz: dec!(9),
            shipping_rates: vec![],
            tax_rates: vec![],
            tax_exempt: false,
        }
    }

    #[test]
    fn test_rush_screen_print_with_default_rates() {
        let quote = QuoteEngine::new().price(&screen_print_request()).unwrap();

        // 6 screens at $20: one per color per location.
        assert_eq!(quote.setup_fees.len(), 1);
        assert_eq!(quote.setup_fees[0].amount, dec!(120.00));
        // run/unit (0.90 + 0.55*3) * 1.25 tier * 2 locations * 1.25 rush
        // = 7.96875; decorated cost 14.46875; 40% margin => 24.11
        assert_eq!(quote.suggested_unit_price, dec!(24.11));
        assert_eq!(quote.subtotal, dec!(698.64));
        // (8 + 0.35*24 + 0.04*9) * 1.5 rush on the built-in ground rate
        assert_eq!(quote.shipping, dec!(25.14));
        // built-in 7.25% over the subtotal only
        assert_eq!(quote.tax, dec!(50.65));
        assert_eq!(quote.total, dec!(774.43));
        assert!(quote.total > quote.subtotal);
        assert!(quote.effective_margin_pct > Decimal::ZERO);
    }

    #[test]
    fn test_tax_exempt_embroidery_with_configured_rates() {
        let request = QuoteRequest {
            quantity: 12,
            blank_unit_cost: dec!(8),
            method: QuoteMethod::Embroidery { stitch_count: 6_500 },
            locations: vec!["chest".into()],
            rush: false,
            weight_oz: dec!(7),
            shipping_rates: vec![QuoteShippingRate {
                name: "ground".into(),
                active: true,
                min_subtotal: None,
                max_subtotal: None,
                base_charge: dec!(5),
                per_item_charge: dec!(0.2),
                per_oz_charge: dec!(0.05),
                rush_multiplier: dec!(1.5),
            }],
            tax_rates: vec![QuoteTaxRate {
                name: "state".into(),
                active: true,
                rate: dec!(0.09),
                applies_shipping: true,
            }],
            tax_exempt: true,
        };

        let quote = QuoteEngine::new().price(&request).unwrap();

        // 6500 stitches: 2 started extra thousands over the included 5000.
        // run 4.50 + 2*0.55 = 5.60/unit; decorated 13.60; suggested 22.67
        assert_eq!(quote.suggested_unit_price, dec!(22.67));
        assert_eq!(quote.setup_fees[0].amount, dec!(40.00));
        assert_eq!(quote.subtotal, dec!(312.04));
        // 5 + 0.2*12 + 0.05*7, no rush multiplier
        assert_eq!(quote.shipping, dec!(7.75));
        assert_eq!(quote.tax, Decimal::ZERO);
        assert!(quote.total > quote.subtotal - quote.tax);
    }

    #[test]
    fn test_tax_exempt_keeps_shipping() {
        let mut exempt = screen_print_request();
        exempt.tax_exempt = true;
        let taxed = QuoteEngine::new().price(&screen_print_request()).unwrap();
        let quote = QuoteEngine::new().price(&exempt).unwrap();

        assert_eq!(quote.tax, Decimal::ZERO);
        assert_eq!(quote.shipping, taxed.shipping);
        assert!(taxed.tax > Decimal::ZERO);
    }

    #[test]
    fn test_rate_bounds_select_by_subtotal() {
        let mut request = screen_print_request();
        request.rush = false;
        request.shipping_rates = vec![
            QuoteShippingRate {
                name: "small orders".into(),
                active: true,
                min_subtotal: None,
                max_subtotal: Some(dec!(100)),
                base_charge: dec!(4),
                per_item_charge: dec!(0.1),
                per_oz_charge: dec!(0.01),
                rush_multiplier: dec!(1.5),
            },
            QuoteShippingRate {
                name: "bulk".into(),
                active: true,
                min_subtotal: Some(dec!(100.01)),
                max_subtotal: None,
                base_charge: Decimal::ZERO,
                per_item_charge: dec!(0.5),
                per_oz_charge: Decimal::ZERO,
                rush_multiplier: dec!(1.5),
            },
        ];

        let quote = QuoteEngine::new().price(&request).unwrap();
        // Subtotal is far above 100, so the bulk rate applies: 0.5 * 24.
        assert_eq!(quote.shipping, dec!(12.00));
    }

    #[test]
    fn test_inactive_rates_skipped() {
        let mut request = screen_print_request();
        request.tax_rates = vec![QuoteTaxRate {
            name: "disabled".into(),
            active: false,
            rate: dec!(0.5),
            applies_shipping: false,
        }];
        let quote = QuoteEngine::new().price(&request).unwrap();
        // With no active configured rate the built-in default applies.
        assert_eq!(quote.tax, round2(DEFAULT_TAX_RATE * quote.subtotal));
    }

    #[test]
    fn test_applies_shipping_widens_taxable_base() {
        let mut request = screen_print_request();
        request.tax_rates = vec![QuoteTaxRate {
            name: "state".into(),
            active: true,
            rate: dec!(0.10),
            applies_shipping: true,
        }];
        let quote = QuoteEngine::new().price(&request).unwrap();
        assert_eq!(quote.tax, round2(dec!(0.10) * (quote.subtotal + quote.shipping)));
    }

    #[test]
    fn test_embroidery_included_stitches_add_nothing() {
        let request = QuoteRequest {
            quantity: 1,
            blank_unit_cost: dec!(10),
            method: QuoteMethod::Embroidery { stitch_count: 5_000 },
            locations: vec!["chest".into()],
            rush: false,
            weight_oz: dec!(4),
            shipping_rates: vec![],
            tax_rates: vec![],
            tax_exempt: true,
        };
        let quote = QuoteEngine::new().price(&request).unwrap();
        // decorated = 10 + 4.50; suggested = 14.50 / 0.6
        assert_eq!(quote.suggested_unit_price, dec!(24.17));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut request = screen_print_request();
        request.quantity = 0;
        let err = QuoteEngine::new().price(&request).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn test_no_locations_rejected() {
        let mut request = screen_print_request();
        request.locations.clear();
        let err = QuoteEngine::new().price(&request).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    proptest::proptest! {
        #[test]
        fn tax_exempt_always_zero_tax(rate in 1u32..100, qty in 1u32..500) {
            let mut request = screen_print_request();
            request.quantity = qty;
            request.tax_exempt = true;
            request.tax_rates = vec![QuoteTaxRate {
                name: "any".into(),
                active: true,
                rate: Decimal::from(rate) / Decimal::ONE_HUNDRED,
                applies_shipping: true,
            }];
            let quote = QuoteEngine::new().price(&request).unwrap();
            proptest::prop_assert_eq!(quote.tax, Decimal::ZERO);
            proptest::prop_assert!(quote.shipping > Decimal::ZERO);
        }
    }
}
