//! Polygon access for the JPYC rail.
//!
//! [`types`] is always available. The alloy-backed provider, its nonce
//! manager and configuration are compiled with the `relay` feature; the
//! `IJPYC` contract bindings with either `relay` or `client`.

pub mod types;
pub use types::*;

#[cfg(any(feature = "relay", feature = "client"))]
pub mod contract;

#[cfg(feature = "relay")]
pub mod config;
#[cfg(feature = "relay")]
pub use config::*;

#[cfg(feature = "relay")]
pub mod pending_nonce_manager;
#[cfg(feature = "relay")]
pub use pending_nonce_manager::*;

#[cfg(feature = "relay")]
pub mod provider;
#[cfg(feature = "relay")]
pub use provider::*;
