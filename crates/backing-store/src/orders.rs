//! The order ledger.
//!
//! An order is three kinds of rows in three tabs: the backer (`backers`), the
//! order header (`backings`) and one line per reward (`backing_items`). Rows are
//! written strictly in that order so a reader never sees a header whose backer
//! is missing, or a line whose header is missing.
//!
//! Identifiers are sequential and human-readable (`B001`, `BACK001`,
//! `BIT001`). They are allocated by scanning the id column for the highest
//! number in use. Within one process, commits are serialized so two concurrent
//! checkouts cannot allocate the same id; separate processes writing the same
//! spreadsheet can still collide.
//!
//! There is no rollback. When a later write fails after an earlier one
//! succeeded, [`OrderStoreError::PartialCommit`] reports exactly which ids
//! were left behind.

use backing_types::{BackerProfile, CartLine, CommitReceipt, NewOrder};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde_json::{Value, json};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::sheet::{Row, SheetStore, SheetStoreError, cell_text};

/// A family of sequential ids stored in the first column of one tab.
#[derive(Debug, Clone, Copy)]
pub struct IdSequence {
    pub prefix: &'static str,
    pub id_range: &'static str,
    pub row_range: &'static str,
}

pub const BACKER_IDS: IdSequence = IdSequence {
    prefix: "B",
    id_range: "backers!A:A",
    row_range: "backers!A:J",
};

pub const BACKING_IDS: IdSequence = IdSequence {
    prefix: "BACK",
    id_range: "backings!A:A",
    row_range: "backings!A:J",
};

pub const BACKING_ITEM_IDS: IdSequence = IdSequence {
    prefix: "BIT",
    id_range: "backing_items!A:A",
    row_range: "backing_items!A:G",
};

impl IdSequence {
    /// Highest number among cells shaped exactly `PREFIX<digits>`.
    pub fn max_in_use(&self, column: &[Row]) -> u64 {
        column
            .iter()
            .filter_map(|row| {
                let cell = cell_text(row.first());
                let digits = cell.trim().strip_prefix(self.prefix)?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse::<u64>().ok()
            })
            .max()
            .unwrap_or(0)
    }

    /// Formats `n` zero-padded to at least three digits.
    pub fn format(&self, n: u64) -> String {
        format!("{}{:03}", self.prefix, n)
    }

    /// The next `count` ids after the highest one currently in the sheet.
    pub async fn allocate(
        &self,
        sheets: &dyn SheetStore,
        count: usize,
    ) -> Result<Vec<String>, SheetStoreError> {
        let column = sheets.read_range(self.id_range).await?;
        let start = self.max_in_use(&column);
        Ok((1..=count as u64).map(|i| self.format(start + i)).collect())
    }
}

/// Which write of a commit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    Backer,
    Order,
    Lines,
}

impl Display for CommitStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CommitStage::Backer => "backer",
            CommitStage::Order => "order",
            CommitStage::Lines => "lines",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrderStoreError {
    #[error("order must contain at least one line")]
    EmptyOrder,
    #[error("failed to allocate {prefix} id: {source}")]
    Allocation {
        prefix: &'static str,
        #[source]
        source: SheetStoreError,
    },
    /// Nothing was written.
    #[error("failed to write backer row: {0}")]
    Backer(#[source] SheetStoreError),
    /// Some rows were written before `failed` could not be.
    #[error("partial commit: {failed} write failed after backer {backer_id} (order {backing_id:?}): {source}")]
    PartialCommit {
        backer_id: String,
        backing_id: Option<String>,
        failed: CommitStage,
        #[source]
        source: SheetStoreError,
    },
}

/// Writes orders to the customer spreadsheet.
pub struct OrderStore {
    sheets: Arc<dyn SheetStore>,
    commit_lock: Mutex<()>,
    clock: fn() -> DateTime<Utc>,
}

impl OrderStore {
    pub fn new(sheets: Arc<dyn SheetStore>) -> Self {
        Self {
            sheets,
            commit_lock: Mutex::new(()),
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Persists backer, order header and lines, in that order.
    #[instrument(
        skip_all,
        fields(method = %order.payment_method, total = order.total_amount.get(), lines = lines.len()),
        err
    )]
    pub async fn commit_order(
        &self,
        backer: &BackerProfile,
        order: &NewOrder,
        lines: &[CartLine],
    ) -> Result<CommitReceipt, OrderStoreError> {
        if lines.is_empty() {
            return Err(OrderStoreError::EmptyOrder);
        }
        let _guard = self.commit_lock.lock().await;
        let sheets = self.sheets.as_ref();

        let backer_id = allocate_one(&BACKER_IDS, sheets).await?;
        let backing_id = allocate_one(&BACKING_IDS, sheets).await?;
        let backing_item_ids = BACKING_ITEM_IDS
            .allocate(sheets, lines.len())
            .await
            .map_err(|source| OrderStoreError::Allocation {
                prefix: BACKING_ITEM_IDS.prefix,
                source,
            })?;

        let now = (self.clock)();
        sheets
            .append_rows(BACKER_IDS.row_range, vec![backer_row(&backer_id, backer, now)])
            .await
            .map_err(OrderStoreError::Backer)?;

        let header = order_row(&backing_id, &backer_id, order, now);
        if let Err(source) = sheets.append_rows(BACKING_IDS.row_range, vec![header]).await {
            return Err(partial(&backer_id, None, CommitStage::Order, source));
        }

        let rows = lines
            .iter()
            .zip(&backing_item_ids)
            .map(|(line, id)| line_row(id, &backing_id, line))
            .collect();
        if let Err(source) = sheets.append_rows(BACKING_ITEM_IDS.row_range, rows).await {
            return Err(partial(
                &backer_id,
                Some(&backing_id),
                CommitStage::Lines,
                source,
            ));
        }

        tracing::info!(%backer_id, %backing_id, items = ?backing_item_ids, "Order committed");
        Ok(CommitReceipt {
            backer_id,
            backing_id,
            backing_item_ids,
        })
    }
}

async fn allocate_one(
    sequence: &IdSequence,
    sheets: &dyn SheetStore,
) -> Result<String, OrderStoreError> {
    let mut ids = sequence
        .allocate(sheets, 1)
        .await
        .map_err(|source| OrderStoreError::Allocation {
            prefix: sequence.prefix,
            source,
        })?;
    Ok(ids.remove(0))
}

fn partial(
    backer_id: &str,
    backing_id: Option<&str>,
    failed: CommitStage,
    source: SheetStoreError,
) -> OrderStoreError {
    tracing::error!(
        backer_id,
        backing_id = ?backing_id,
        %failed,
        error = %source,
        "Partial order commit, orphaned rows need manual cleanup"
    );
    OrderStoreError::PartialCommit {
        backer_id: backer_id.to_string(),
        backing_id: backing_id.map(str::to_string),
        failed,
        source,
    }
}

fn opt(value: &Option<String>) -> Value {
    json!(value.as_deref().unwrap_or_default())
}

fn iso(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Asia/Tokyo wall-clock time, e.g. `2025/1/5 9:03:07`.
pub fn tokyo_local(now: DateTime<Utc>) -> String {
    (now.naive_utc() + TimeDelta::hours(9))
        .format("%Y/%-m/%-d %-H:%M:%S")
        .to_string()
}

fn backer_row(id: &str, backer: &BackerProfile, now: DateTime<Utc>) -> Row {
    vec![
        json!(id),
        json!(backer.name.trim()),
        json!(backer.email.trim()),
        opt(&backer.phone_number),
        opt(&backer.postal_code),
        opt(&backer.prefecture),
        opt(&backer.city),
        opt(&backer.address_line),
        json!(iso(now)),
        json!(iso(now)),
    ]
}

fn order_row(id: &str, backer_id: &str, order: &NewOrder, now: DateTime<Utc>) -> Row {
    vec![
        json!(id),
        json!(backer_id),
        json!(tokyo_local(now)),
        json!(order.total_amount.get()),
        json!(order.payment_method.as_str()),
        json!(order.payment_status.as_str()),
        json!(order.order_status.as_str()),
        opt(&order.transaction_id),
        json!(iso(now)),
        opt(&order.notes),
    ]
}

fn line_row(id: &str, backing_id: &str, line: &CartLine) -> Row {
    vec![
        json!(id),
        json!(backing_id),
        json!(line.reward_id),
        json!(line.quantity),
        json!(line.unit_price.get()),
        json!(line.line_total().get()),
        json!(""),
    ]
}
