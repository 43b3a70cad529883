//! Pricing engine: cart plus coupon to a price breakdown.
//!
//! Pure computation over resolved product snapshots. Deterministic given its
//! inputs and touches no persistence, so the pricing formula can be property
//! tested in isolation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cart line resolved to its product snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Unit price before any discount.
    pub unit_price: Decimal,
    /// Product-level discount percentage (0-100).
    pub discount_pct: Decimal,
}

/// Frozen per-item snapshot that becomes the order item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price_at_order: Decimal,
    pub discount_at_order: Decimal,
    pub discounted_price_at_order: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Sum of discounted unit prices times quantity, before the coupon.
    pub total_before_discount: Decimal,
    /// After the coupon, excluding shipping.
    pub total_after_discount: Decimal,
    /// Final amount: after-coupon subtotal plus shipping.
    pub total_price: Decimal,
    pub lines: Vec<PricedLine>,
}

fn pct_multiplier(pct: Decimal) -> Decimal {
    Decimal::ONE - pct / dec!(100)
}

/// Prices a cart: per item `discounted = price * (1 - discount/100)`,
/// accumulate `discounted * quantity`, apply the coupon to the accumulated
/// subtotal, then add shipping.
pub fn price_cart(
    lines: &[CartLine],
    coupon_pct: Option<Decimal>,
    shipping_price: Decimal,
) -> PriceBreakdown {
    let mut total_before_discount = Decimal::ZERO;
    let mut priced = Vec::with_capacity(lines.len());

    for line in lines {
        let discounted = line.unit_price * pct_multiplier(line.discount_pct);
        total_before_discount += discounted * Decimal::from(line.quantity);
        priced.push(PricedLine {
            product_id: line.product_id,
            quantity: line.quantity,
            price_at_order: line.unit_price,
            discount_at_order: line.discount_pct,
            discounted_price_at_order: discounted,
        });
    }

    let total_after_discount = match coupon_pct {
        Some(pct) => total_before_discount * pct_multiplier(pct),
        None => total_before_discount,
    };

    PriceBreakdown {
        total_before_discount,
        total_after_discount,
        total_price: total_after_discount + shipping_price,
        lines: priced,
    }
}
