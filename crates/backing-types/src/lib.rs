//! Core types for the backing checkout.
//!
//! This crate holds everything the checkout rails agree on without talking to
//! the outside world:
//!
//! - [`pricing`] - the pure pricing engine turning a cart and a payment method into a summary
//! - [`cart`] - cart lines and the merge/remove rules applied while a backer shops
//! - [`model`] - reward tiers, backer profiles, order headers and lines as persisted
//! - [`money`] - yen amounts and exact minor-unit parsing of decimal strings
//! - [`config`] - configuration values that may be literals or `$ENV` references
//! - [`timestamp`] - Unix timestamps as used by permit deadlines

pub mod cart;
pub mod config;
pub mod model;
pub mod money;
pub mod pricing;
pub mod timestamp;

pub use cart::*;
pub use model::*;
pub use money::*;
pub use pricing::*;
