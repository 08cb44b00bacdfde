//! Records persisted by the order ledger and served by the catalog.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::money::Yen;
use crate::pricing::PaymentMethod;

/// A purchasable crowdfunding reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTier {
    pub reward_id: String,
    pub title: String,
    pub unit_price: Yen,
    pub description: String,
    pub requires_shipping: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Contact and shipping data of the person backing the project.
///
/// Shipping fields are required only when a selected reward ships physically,
/// see [`BackerProfile::missing_shipping_fields`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackerProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line: Option<String>,
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

impl BackerProfile {
    pub fn has_valid_email(&self) -> bool {
        EMAIL_RE.is_match(self.email.trim())
    }

    /// Names of shipping fields that are absent or blank, in display order.
    pub fn missing_shipping_fields(&self) -> Vec<&'static str> {
        [
            ("phone_number", &self.phone_number),
            ("postal_code", &self.postal_code),
            ("prefecture", &self.prefecture),
            ("city", &self.city),
            ("address_line", &self.address_line),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Received,
    Shipped,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Received => "received",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
        }
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header of an order about to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub total_amount: Yen,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

impl NewOrder {
    /// Bank transfers wait for manual reconciliation.
    pub fn bank_transfer(total_amount: Yen) -> Self {
        Self {
            total_amount,
            payment_method: PaymentMethod::Bank,
            payment_status: PaymentStatus::Pending,
            order_status: OrderStatus::Pending,
            transaction_id: None,
            notes: None,
        }
    }

    /// An order whose money has already been verified on its rail.
    pub fn settled(
        total_amount: Yen,
        payment_method: PaymentMethod,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            total_amount,
            payment_method,
            payment_status: PaymentStatus::Completed,
            order_status: OrderStatus::Received,
            transaction_id: Some(transaction_id.into()),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Identifiers assigned by a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub backer_id: String,
    pub backing_id: String,
    pub backing_item_ids: Vec<String>,
}

/// Campaign progress shown on the public dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub target_amount: u64,
    pub current_amount: u64,
    pub backer_count: u64,
    /// Percent of target reached, one decimal place.
    pub achievement_rate: f64,
    pub remaining_amount: u64,
    pub reward_stats: BTreeMap<String, u64>,
}

/// Bank account shown to backers choosing bank transfer.
///
/// Read from configuration in snake_case, served to the browser in camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct BankDetails {
    pub bank_name: String,
    pub branch_name: String,
    pub account_type: String,
    pub account_number: String,
    pub account_holder: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_blank_shipping_fields() {
        let backer = BackerProfile {
            name: "Tanaka".into(),
            email: "tanaka@example.com".into(),
            phone_number: Some("090-1234-5678".into()),
            postal_code: Some("  ".into()),
            city: Some("Hamamatsu".into()),
            ..Default::default()
        };
        assert_eq!(
            backer.missing_shipping_fields(),
            vec!["postal_code", "prefecture", "address_line"]
        );
    }

    #[test]
    fn email_shape_check() {
        let mut backer = BackerProfile {
            email: "tanaka@example.com".into(),
            ..Default::default()
        };
        assert!(backer.has_valid_email());
        backer.email = "tanaka@example".into();
        assert!(!backer.has_valid_email());
        backer.email = "tan aka@example.com".into();
        assert!(!backer.has_valid_email());
    }

    #[test]
    fn settled_orders_are_completed_and_received() {
        let order = NewOrder::settled(Yen::new(10500), PaymentMethod::Paypal, "5O190127TN364715T");
        assert_eq!(order.payment_status, PaymentStatus::Completed);
        assert_eq!(order.order_status, OrderStatus::Received);
        assert_eq!(order.transaction_id.as_deref(), Some("5O190127TN364715T"));
    }
}
