//! Exchange fee and slippage model
//!
//! Fills happen at the candle close moved against the trader by the
//! slippage rate: buys fill higher, sells fill lower.
//! Fee = notional × taker rate, charged on both entry and exit; every fill is
//! a market order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the book an order takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Fill price after slippage in the adverse direction.
pub fn fill_price(price: Decimal, side: OrderSide, slippage_rate: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => price * (Decimal::ONE + slippage_rate),
        OrderSide::Sell => price * (Decimal::ONE - slippage_rate),
    }
}

/// Fee charged on a fill of `quantity` units at `price`.
/// Returns 0 for non-positive inputs.
pub fn calculate_fee(quantity: Decimal, price: Decimal, rate: Decimal) -> Decimal {
    if quantity <= Decimal::ZERO || price <= Decimal::ZERO || rate <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    quantity * price * rate
}
