#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Checkout orchestration for the backing campaign.
//!
//! [`CheckoutService`] ties the reward catalog, the order store and the
//! payment rails together; [`handlers::routes`] exposes it over HTTP.
//!
//! # Modules
//!
//! - [`orchestrator`] - dispatch by payment method, server-side total recomputation
//! - [`jpyc_flow`] - a JPYC payment as typed states, from signing to commit
//! - [`request`] - request bodies and their validation messages
//! - [`error`] - the checkout error taxonomy
//! - [`handlers`] - axum routes and response envelopes
//! - [`util`] - graceful shutdown and telemetry
//!
//! # Example
//!
//! ```ignore
//! use backing_checkout::{CheckoutService, handlers};
//! use backing_store::{Catalog, OrderStore};
//! use std::sync::Arc;
//!
//! let service = CheckoutService::new(Catalog::new(catalog_sheets), OrderStore::new(order_sheets))
//!     .with_paypal(paypal)
//!     .with_jpyc(relay);
//! let app = axum::Router::new().nest("/api", handlers::routes().with_state(Arc::new(service)));
//! ```
//!
//! # Feature Flags
//!
//! - `telemetry` - OTLP export of traces and metrics

pub mod error;
pub mod handlers;
pub mod jpyc_flow;
pub mod orchestrator;
pub mod request;
pub mod util;

#[cfg(test)]
mod test_support;

pub use error::{CheckoutError, ErrorKind};
pub use jpyc_flow::JpycPayment;
pub use orchestrator::{CheckoutOutcome, CheckoutService};
