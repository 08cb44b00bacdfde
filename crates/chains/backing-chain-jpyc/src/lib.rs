//! JPYC rail of the backing checkout.
//!
//! JPYC is a yen stablecoin (1 JPYC = ¥1, 18 decimals) implementing
//! ERC-2612 `permit`. A backer never pays gas: the browser signs an EIP-712
//! `Permit` granting the relay wallet a one-time allowance, and the server
//! spends it with `permit` followed by `transferFrom`.
//!
//! # Modules
//!
//! - [`permit`] - the EIP-712 `Permit` type, the JPYC domain and signature recovery
//! - [`settlement`] - the gated relay: every check runs before anything is sent on-chain
//! - [`chain`] - Polygon constants, unit conversion and (with `relay`) the alloy provider
//! - `client` (feature `client`) - permit signing for wallets and scripts
//!
//! # Feature Flags
//!
//! - `relay` - alloy-backed [`chain::PolygonRelayProvider`] implementing
//!   [`settlement::JpycTokenProvider`]
//! - `client` - [`client::sign_permit`] and [`client::JpycClient`]

pub mod chain;
pub mod permit;
pub mod settlement;

#[cfg(feature = "client")]
pub mod client;

pub use permit::{PermitSignature, SignedPermit};
pub use settlement::{
    ChainCallError, JpycSettlement, JpycTokenProvider, PermitRelay, RelayRequest, Settlement,
    SettlementError, SettlementStep,
};
