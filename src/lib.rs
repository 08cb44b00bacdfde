//! Crowdfunding checkout core.
//!
//! Backers pick rewards, the server recomputes the total from the catalog and
//! records the backing in a spreadsheet ledger once the payment is accepted.
//! Three rails are supported: bank transfer, PayPal capture, and gasless JPYC
//! on Polygon through an EIP-2612 permit executed by a relay wallet.
//!
//! # Crates
//!
//! - [`types`] - money, cart pricing, domain records and configuration values
//! - [`store`] - the spreadsheet ledger: reward catalog, dashboard and order commits
//! - [`paypal`] - PayPal order capture with amount verification
//! - [`jpyc`] - permit signing and the relay that settles it on chain
//! - [`checkout`] - the orchestrator and its HTTP endpoints
//!
//! # Feature Flags
//!
//! - `telemetry` - OTLP export of traces and metrics

pub use backing_chain_jpyc as jpyc;
pub use backing_checkout as checkout;
pub use backing_paypal as paypal;
pub use backing_store as store;
pub use backing_types as types;
