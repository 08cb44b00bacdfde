//! In-process [`SheetStore`] used by tests and local development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::sheet::{Row, SheetRange, SheetStore, SheetStoreError};

/// Tabs held in memory; appends are recorded in order.
#[derive(Debug, Default)]
pub struct MemorySheetStore {
    tabs: Mutex<HashMap<String, Vec<Row>>>,
    append_log: Mutex<Vec<String>>,
    failing_tabs: Mutex<HashSet<String>>,
}

impl MemorySheetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a tab with rows, replacing previous content.
    pub fn with_rows(self, tab: &str, rows: Vec<Row>) -> Self {
        lock(&self.tabs).insert(tab.to_string(), rows);
        self
    }

    /// Makes every later append to `tab` fail.
    pub fn fail_appends_to(&self, tab: &str) {
        lock(&self.failing_tabs).insert(tab.to_string());
    }

    pub fn rows(&self, tab: &str) -> Vec<Row> {
        lock(&self.tabs).get(tab).cloned().unwrap_or_default()
    }

    /// Tabs appended to, one entry per append call.
    pub fn append_log(&self) -> Vec<String> {
        lock(&self.append_log).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SheetStore for MemorySheetStore {
    async fn read_range(&self, range: &str) -> Result<Vec<Row>, SheetStoreError> {
        let range = SheetRange::parse(range)?;
        let tabs = lock(&self.tabs);
        let rows = tabs.get(&range.tab).map(Vec::as_slice).unwrap_or_default();
        Ok(rows
            .iter()
            .map(|row| {
                row.iter()
                    .skip(range.first_column)
                    .take(range.width())
                    .cloned()
                    .collect()
            })
            .collect())
    }

    async fn append_rows(&self, range: &str, rows: Vec<Row>) -> Result<(), SheetStoreError> {
        let range = SheetRange::parse(range)?;
        if lock(&self.failing_tabs).contains(&range.tab) {
            return Err(SheetStoreError::Unavailable(format!(
                "append to {} rejected",
                range.tab
            )));
        }
        lock(&self.append_log).push(range.tab.clone());
        lock(&self.tabs).entry(range.tab).or_default().extend(rows);
        Ok(())
    }
}
