//! Reward catalog and campaign dashboard, read from the public spreadsheet.

use backing_types::{CartLine, DashboardStats, RewardSelection, RewardTier, Yen};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use crate::sheet::{Row, SheetStore, SheetStoreError, cell_text};

pub const REWARDS_RANGE: &str = "rewards!A:F";
pub const DASHBOARD_RANGE: &str = "dashboard!A:B";

/// Target used when the dashboard sheet has none.
pub const DEFAULT_TARGET_AMOUNT: u64 = 100_000;

static REWARD_STAT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([R0-9]+)支援数$").expect("valid reward stat regex"));

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Store(#[from] SheetStoreError),
    #[error("unknown reward {0}")]
    UnknownReward(String),
    #[error("quantity for reward {0} must be at least 1")]
    InvalidQuantity(String),
}

#[derive(Clone)]
pub struct Catalog {
    sheets: Arc<dyn SheetStore>,
}

impl Catalog {
    pub fn new(sheets: Arc<dyn SheetStore>) -> Self {
        Self { sheets }
    }

    #[instrument(skip_all, err)]
    pub async fn rewards(&self) -> Result<Vec<RewardTier>, CatalogError> {
        let rows = self.sheets.read_range(REWARDS_RANGE).await?;
        Ok(parse_rewards(&rows))
    }

    #[instrument(skip_all, err)]
    pub async fn dashboard(&self) -> Result<DashboardStats, CatalogError> {
        let rows = self.sheets.read_range(DASHBOARD_RANGE).await?;
        Ok(parse_dashboard(&rows))
    }

    /// Attaches catalog prices and shipping flags to client selections.
    ///
    /// Duplicate selections of one reward are merged.
    pub async fn price_selections(
        &self,
        selections: &[RewardSelection],
    ) -> Result<Vec<CartLine>, CatalogError> {
        let rewards = self.rewards().await?;
        price_against(&rewards, selections)
    }
}

pub fn price_against(
    rewards: &[RewardTier],
    selections: &[RewardSelection],
) -> Result<Vec<CartLine>, CatalogError> {
    let mut lines: Vec<CartLine> = Vec::with_capacity(selections.len());
    for selection in selections {
        if selection.quantity == 0 {
            return Err(CatalogError::InvalidQuantity(selection.reward_id.clone()));
        }
        let reward = rewards
            .iter()
            .find(|r| r.reward_id == selection.reward_id)
            .ok_or_else(|| CatalogError::UnknownReward(selection.reward_id.clone()))?;
        match lines.iter_mut().find(|l| l.reward_id == reward.reward_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(selection.quantity),
            None => lines.push(CartLine::for_reward(reward, selection.quantity)),
        }
    }
    Ok(lines)
}

fn number(cell: Option<&serde_json::Value>) -> Option<f64> {
    let text = cell_text(cell);
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '¥' | '%' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn whole(cell: Option<&serde_json::Value>) -> u64 {
    number(cell).map(|n| n.max(0.0).round() as u64).unwrap_or(0)
}

/// Parses `rewards!A:F`; the first row is a header, rows without an id are skipped.
pub fn parse_rewards(rows: &[Row]) -> Vec<RewardTier> {
    rows.iter()
        .skip(1)
        .filter_map(|row| {
            let reward_id = cell_text(row.first()).trim().to_string();
            if reward_id.is_empty() {
                return None;
            }
            let Some(price) = number(row.get(2)) else {
                tracing::warn!(%reward_id, "Skipping reward without a numeric price");
                return None;
            };
            let image_url = cell_text(row.get(5)).trim().to_string();
            Some(RewardTier {
                title: cell_text(row.get(1)),
                unit_price: Yen::new(price.max(0.0).round() as u64),
                description: cell_text(row.get(3)),
                requires_shipping: cell_text(row.get(4)).trim().eq_ignore_ascii_case("TRUE"),
                image_url: (!image_url.is_empty()).then_some(image_url),
                reward_id,
            })
        })
        .collect()
}

/// Parses the labelled `dashboard!A:B` sheet.
pub fn parse_dashboard(rows: &[Row]) -> DashboardStats {
    let mut target_amount = 0;
    let mut current_amount = 0;
    let mut backer_count = 0;
    let mut remaining_amount = 0;
    let mut reward_stats = BTreeMap::new();

    for row in rows {
        let label = cell_text(row.first());
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        let value = row.get(1);
        match label {
            "目標金額" => target_amount = whole(value),
            "現在の支援金額" => current_amount = whole(value),
            "支援者数" => backer_count = whole(value),
            "残り金額" => remaining_amount = whole(value),
            _ => {
                if let Some(captures) = REWARD_STAT_LABEL.captures(label) {
                    reward_stats.insert(captures[1].to_string(), whole(value));
                }
            }
        }
    }

    if target_amount == 0 {
        target_amount = DEFAULT_TARGET_AMOUNT;
    }
    let achievement_rate =
        (current_amount as f64 / target_amount as f64 * 1000.0).round() / 10.0;

    DashboardStats {
        target_amount,
        current_amount,
        backer_count,
        achievement_rate,
        remaining_amount,
        reward_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySheetStore;
    use serde_json::json;

    fn reward_rows() -> Vec<Row> {
        vec![
            vec![
                json!("reward_id"),
                json!("title"),
                json!("unit_price"),
                json!("description"),
                json!("requires_shipping"),
                json!("image_url"),
            ],
            vec![
                json!("R001"),
                json!("Digital thanks"),
                json!("3,000"),
                json!("PDF report"),
                json!("FALSE"),
                json!("https://i.imgur.com/a.png"),
            ],
            vec![json!(""), json!("blank id row")],
            vec![
                json!("R002"),
                json!("T-shirt"),
                json!(5000),
                json!("Shipped"),
                json!("TRUE"),
            ],
        ]
    }

    #[test]
    fn parses_reward_rows() {
        let rewards = parse_rewards(&reward_rows());
        assert_eq!(rewards.len(), 2);
        assert_eq!(rewards[0].unit_price, Yen::new(3000));
        assert!(!rewards[0].requires_shipping);
        assert_eq!(rewards[0].image_url.as_deref(), Some("https://i.imgur.com/a.png"));
        assert!(rewards[1].requires_shipping);
        assert_eq!(rewards[1].image_url, None);
    }

    #[test]
    fn parses_dashboard_labels() {
        let rows = vec![
            vec![json!("目標金額"), json!(200000)],
            vec![json!("現在の支援金額"), json!("153,000")],
            vec![json!("支援者数"), json!(45)],
            vec![json!("目標達成率 (%)"), json!("10%")],
            vec![json!("残り金額"), json!(47000)],
            vec![json!("R001支援数"), json!(15)],
            vec![json!("R002支援数"), json!("12")],
            vec![json!("その他支援数"), json!(99)],
        ];
        let stats = parse_dashboard(&rows);
        assert_eq!(stats.target_amount, 200_000);
        assert_eq!(stats.current_amount, 153_000);
        assert_eq!(stats.backer_count, 45);
        assert_eq!(stats.achievement_rate, 76.5);
        assert_eq!(stats.remaining_amount, 47_000);
        assert_eq!(stats.reward_stats.len(), 2);
        assert_eq!(stats.reward_stats["R002"], 12);
    }

    #[test]
    fn dashboard_defaults_target() {
        let stats = parse_dashboard(&[vec![json!("現在の支援金額"), json!(76500)]]);
        assert_eq!(stats.target_amount, DEFAULT_TARGET_AMOUNT);
        assert_eq!(stats.achievement_rate, 76.5);
    }

    #[tokio::test]
    async fn prices_selections_from_catalog() {
        let store = Arc::new(MemorySheetStore::new().with_rows("rewards", reward_rows()));
        let catalog = Catalog::new(store);
        let lines = catalog
            .price_selections(&[
                RewardSelection {
                    reward_id: "R002".into(),
                    quantity: 1,
                },
                RewardSelection {
                    reward_id: "R002".into(),
                    quantity: 2,
                },
            ])
            .await
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 3);
        assert_eq!(lines[0].unit_price, Yen::new(5000));
        assert!(lines[0].requires_shipping);
    }

    #[tokio::test]
    async fn unknown_rewards_are_rejected() {
        let store = Arc::new(MemorySheetStore::new().with_rows("rewards", reward_rows()));
        let err = Catalog::new(store)
            .price_selections(&[RewardSelection {
                reward_id: "R999".into(),
                quantity: 1,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownReward(id) if id == "R999"));
    }
}
