//! PayPal rail of the backing checkout.
//!
//! The browser approves a PayPal order; the server then captures it with
//! [`PayPalClient::verify_and_capture`] and accepts the payment only if the
//! captured amount equals the total the server computed itself, compared in
//! integer hundredths.

pub mod client;
pub mod config;

pub use client::*;
pub use config::*;
