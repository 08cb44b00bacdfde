//! The pricing engine.
//!
//! Pure functions of the cart and the payment method. Every rail that needs a
//! total derives it from [`compute_summary`]; the server recomputes it instead of
//! trusting a client-supplied number whenever money is verified against it.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::cart::CartLine;
use crate::money::Yen;

/// The rail a backer pays through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Bank transfer, reconciled manually.
    Bank,
    /// PayPal order captured server-side.
    Paypal,
    /// Gasless JPYC stablecoin transfer on Polygon.
    Jpyc,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Bank => "bank",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::Jpyc => "jpyc",
        }
    }

    /// Whether the system fee is rebated in full on this rail.
    pub fn rebates_system_fee(&self) -> bool {
        matches!(self, PaymentMethod::Jpyc)
    }
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("payment method must be one of paypal, jpyc or bank, got {0:?}")]
pub struct UnknownPaymentMethod(pub String);

impl FromStr for PaymentMethod {
    type Err = UnknownPaymentMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank" => Ok(PaymentMethod::Bank),
            "paypal" => Ok(PaymentMethod::Paypal),
            "jpyc" => Ok(PaymentMethod::Jpyc),
            other => Err(UnknownPaymentMethod(other.to_string())),
        }
    }
}

/// Breakdown shown to the backer and used as the authoritative total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSummary {
    pub subtotal: Yen,
    pub system_fee: Yen,
    pub jpyc_discount: Yen,
    pub total: Yen,
}

/// Fee rate in percent, charged on every rail.
pub const SYSTEM_FEE_PERCENT: u64 = 5;

/// `round(subtotal × 5%)` with halves rounded up, in integer arithmetic.
pub fn system_fee(subtotal: Yen) -> Yen {
    let scaled = subtotal
        .get()
        .saturating_mul(SYSTEM_FEE_PERCENT)
        .saturating_add(50);
    Yen::new(scaled / 100)
}

/// Computes the checkout breakdown for a cart on a given rail.
///
/// `subtotal = Σ unit_price × quantity` and every rail charges [`system_fee`].
/// JPYC rebates the same amount as `jpyc_discount`, so its total is the subtotal.
pub fn compute_summary(lines: &[CartLine], method: PaymentMethod) -> CheckoutSummary {
    let subtotal: Yen = lines.iter().map(CartLine::line_total).sum();
    let system_fee = system_fee(subtotal);
    let jpyc_discount = if method.rebates_system_fee() {
        system_fee
    } else {
        Yen::ZERO
    };
    CheckoutSummary {
        subtotal,
        system_fee,
        jpyc_discount,
        total: subtotal + system_fee - jpyc_discount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(reward: &str, quantity: u32, unit_price: u64) -> CartLine {
        CartLine {
            reward_id: reward.to_string(),
            quantity,
            unit_price: Yen::new(unit_price),
            requires_shipping: false,
        }
    }

    #[test]
    fn bank_adds_five_percent_fee() {
        let summary = compute_summary(&[line("R001", 2, 3000)], PaymentMethod::Bank);
        assert_eq!(summary.subtotal, Yen::new(6000));
        assert_eq!(summary.system_fee, Yen::new(300));
        assert_eq!(summary.jpyc_discount, Yen::ZERO);
        assert_eq!(summary.total, Yen::new(6300));
    }

    #[test]
    fn paypal_fee_matches_bank() {
        let summary = compute_summary(&[line("R002", 1, 10000)], PaymentMethod::Paypal);
        assert_eq!(summary.system_fee, Yen::new(500));
        assert_eq!(summary.total, Yen::new(10500));
    }

    #[test]
    fn jpyc_rebates_the_fee() {
        let summary = compute_summary(&[line("R002", 1, 10000)], PaymentMethod::Jpyc);
        assert_eq!(summary.subtotal, Yen::new(10000));
        assert_eq!(summary.system_fee, Yen::new(500));
        assert_eq!(summary.jpyc_discount, Yen::new(500));
        assert_eq!(summary.total, Yen::new(10000));
    }

    #[test]
    fn jpyc_total_equals_subtotal() {
        let summary = compute_summary(
            &[line("R001", 2, 3000), line("R003", 1, 1234)],
            PaymentMethod::Jpyc,
        );
        assert_eq!(summary.system_fee, Yen::new(362));
        assert_eq!(summary.jpyc_discount, summary.system_fee);
        assert_eq!(summary.total, summary.subtotal);
        assert_eq!(summary.total, Yen::new(7234));
    }

    #[test]
    fn fee_rounds_half_up() {
        // 5% of 10 is 0.5, 5% of 9 is 0.45, 5% of 30 is 1.5
        assert_eq!(system_fee(Yen::new(10)), Yen::new(1));
        assert_eq!(system_fee(Yen::new(9)), Yen::ZERO);
        assert_eq!(system_fee(Yen::new(30)), Yen::new(2));
        assert_eq!(system_fee(Yen::new(1234)), Yen::new(62));
    }

    #[test]
    fn empty_cart_totals_zero() {
        let summary = compute_summary(&[], PaymentMethod::Bank);
        assert_eq!(summary.total, Yen::ZERO);
    }

    #[test]
    fn summary_is_deterministic() {
        let cart = [line("R001", 3, 2500), line("R002", 1, 9999)];
        let a = compute_summary(&cart, PaymentMethod::Paypal);
        let b = compute_summary(&cart, PaymentMethod::Paypal);
        assert_eq!(a, b);
    }

    #[test]
    fn summary_serializes_camel_case() {
        let summary = compute_summary(&[line("R001", 1, 1000)], PaymentMethod::Bank);
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["systemFee"], 50);
        assert_eq!(json["jpycDiscount"], 0);
    }

    #[test]
    fn payment_method_parses_known_rails_only() {
        assert_eq!("jpyc".parse::<PaymentMethod>().unwrap(), PaymentMethod::Jpyc);
        assert!("card".parse::<PaymentMethod>().is_err());
    }
}
