//! Request bodies of the checkout endpoints and their validation.
//!
//! Fields are optional on the wire so that a missing one produces the
//! checkout's own validation message instead of a serde error.

use backing_types::money::minor_units;
use backing_types::{BackerProfile, CartLine, PaymentMethod, RewardSelection, Yen};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CheckoutError;

/// Body of `POST /checkout`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub backer: Option<BackerProfile>,
    #[serde(default)]
    pub backing: Option<BackingInput>,
    #[serde(default)]
    pub items: Option<Vec<ItemInput>>,
}

/// The order header as the browser sends it.
///
/// `payment_status` and `order_status` are accepted for compatibility; the
/// server derives both from the payment method.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackingInput {
    #[serde(default)]
    pub total_amount: Option<Value>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub order_status: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One selected reward. `unit_price` is informational; the catalog price is stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemInput {
    #[serde(default)]
    pub reward_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<Value>,
    #[serde(default)]
    pub unit_price: Option<Value>,
}

/// Body of `POST /checkout/paypal-confirm`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayPalConfirmRequest {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(flatten)]
    pub backer: BackerProfile,
    #[serde(default)]
    pub selected_rewards: Option<Vec<ItemInput>>,
    #[serde(default)]
    pub total_amount: Option<Value>,
}

/// A `POST /checkout` body that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedCheckout {
    pub backer: BackerProfile,
    pub method: PaymentMethod,
    pub client_total: Yen,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub selections: Vec<RewardSelection>,
}

/// A `POST /checkout/paypal-confirm` body that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedPayPalConfirm {
    pub order_id: String,
    pub backer: BackerProfile,
    pub client_total: Yen,
    pub selections: Vec<RewardSelection>,
}

impl CheckoutRequest {
    pub fn validate(self) -> Result<ValidatedCheckout, CheckoutError> {
        let (Some(backer), Some(backing), Some(items)) = (self.backer, self.backing, self.items)
        else {
            return Err(CheckoutError::validation(
                "Missing required fields: backer, backing, items",
            ));
        };
        validate_backer(&backer)?;

        let total = backing.total_amount.as_ref().filter(|v| !v.is_null());
        let (Some(total), Some(method)) = (total, non_blank(backing.payment_method)) else {
            return Err(CheckoutError::validation(
                "Missing required backing fields: total_amount, payment_method",
            ));
        };
        let method: PaymentMethod = method.parse().map_err(|_| {
            CheckoutError::validation("Invalid payment_method. Must be one of: paypal, jpyc, bank")
        })?;
        let client_total = yen_amount(total)
            .ok_or_else(|| CheckoutError::validation("total_amount must be a whole number of yen"))?;

        let transaction_id = non_blank(backing.transaction_id);
        match method {
            PaymentMethod::Paypal => {
                return Err(CheckoutError::validation(
                    "PayPal orders are confirmed through /checkout/paypal-confirm",
                ));
            }
            PaymentMethod::Jpyc if transaction_id.is_none() => {
                return Err(CheckoutError::validation(
                    "transaction_id is required for jpyc payments",
                ));
            }
            _ => {}
        }

        Ok(ValidatedCheckout {
            backer,
            method,
            client_total,
            transaction_id,
            notes: non_blank(backing.notes),
            selections: selections(&items)?,
        })
    }
}

impl PayPalConfirmRequest {
    pub fn validate(self) -> Result<ValidatedPayPalConfirm, CheckoutError> {
        let missing = || CheckoutError::validation("Missing required fields");
        let order_id = non_blank(self.order_id).ok_or_else(missing)?;
        let items = self.selected_rewards.ok_or_else(missing)?;
        let total = self.total_amount.filter(|v| !v.is_null()).ok_or_else(missing)?;
        if self.backer.name.trim().is_empty() || self.backer.email.trim().is_empty() {
            return Err(missing());
        }
        if !self.backer.has_valid_email() {
            return Err(CheckoutError::validation("Invalid email format"));
        }
        let client_total = yen_amount(&total)
            .ok_or_else(|| CheckoutError::validation("totalAmount must be a whole number of yen"))?;
        Ok(ValidatedPayPalConfirm {
            order_id,
            backer: self.backer,
            client_total,
            selections: selections(&items)?,
        })
    }
}

pub fn validate_backer(backer: &BackerProfile) -> Result<(), CheckoutError> {
    if backer.name.trim().is_empty() || backer.email.trim().is_empty() {
        return Err(CheckoutError::validation(
            "Missing required backer fields: name, email",
        ));
    }
    if !backer.has_valid_email() {
        return Err(CheckoutError::validation("Invalid email format"));
    }
    Ok(())
}

/// Shipping fields become mandatory as soon as one line ships physically.
pub fn require_shipping(backer: &BackerProfile, lines: &[CartLine]) -> Result<(), CheckoutError> {
    if !lines.iter().any(|line| line.requires_shipping) {
        return Ok(());
    }
    let missing = backer.missing_shipping_fields();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CheckoutError::Validation(format!(
            "Shipping address is required. Missing fields: {}",
            missing.join(", ")
        )))
    }
}

fn selections(items: &[ItemInput]) -> Result<Vec<RewardSelection>, CheckoutError> {
    if items.is_empty() {
        return Err(CheckoutError::validation("items must be a non-empty array"));
    }
    items
        .iter()
        .map(|item| {
            let reward_id = item.reward_id.as_deref().map(str::trim).unwrap_or_default();
            let quantity = item
                .quantity
                .as_ref()
                .and_then(whole_number)
                .and_then(|q| u32::try_from(q).ok())
                .filter(|q| *q > 0);
            match quantity {
                Some(quantity) if !reward_id.is_empty() => Ok(RewardSelection {
                    reward_id: reward_id.to_string(),
                    quantity,
                }),
                _ => Err(CheckoutError::validation(
                    "Each item must have reward_id and a positive quantity",
                )),
            }
        })
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn whole_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a yen amount sent as a number or a decimal string.
///
/// `10500`, `10500.0` and `"10500.00"` are ¥10500; fractional yen are refused.
pub fn yen_amount(value: &Value) -> Option<Yen> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    let hundredths = minor_units(&text).ok()?;
    if hundredths < 0 || hundredths % 100 != 0 {
        return None;
    }
    u64::try_from(hundredths / 100).ok().map(Yen::new)
}
