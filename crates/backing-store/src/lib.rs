//! Persistence for the backing checkout.
//!
//! Customer data and the public catalog live in spreadsheets. This crate hides
//! that behind three pieces:
//!
//! - [`sheet::SheetStore`] - read a range, append rows; implemented by
//!   [`google::GoogleSheetsStore`] and [`memory::MemorySheetStore`]
//! - [`orders::OrderStore`] - id allocation and the ordered three-tab order commit
//! - [`catalog::Catalog`] - reward tiers, catalog pricing and dashboard statistics

pub mod catalog;
pub mod google;
pub mod memory;
pub mod orders;
pub mod sheet;

pub use catalog::{Catalog, CatalogError};
pub use google::{GoogleSheetsStore, ServiceAccountTokenSource, StaticToken, TokenSource};
pub use memory::MemorySheetStore;
pub use orders::{CommitStage, OrderStore, OrderStoreError};
pub use sheet::{SheetStore, SheetStoreError};
