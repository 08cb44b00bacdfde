use alloy_primitives::{Address, B256};
use backing_types::config::{LiteralOrEnv, RpcConfig};
use serde::Deserialize;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::time::Duration;

use crate::chain::types::{JPYC_POLYGON, POLYGON_CHAIN_ID};

/// JPYC section of the server configuration.
///
/// ```json
/// {
///   "token": "$NEXT_PUBLIC_JPYC_TOKEN_ADDRESS",
///   "rpc": [{ "http": "https://polygon-rpc.com", "rate_limit": 25 }],
///   "signer": "$BACKEND_WALLET_PRIVATE_KEY"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct JpycChainConfig {
    #[serde(default = "jpyc_chain_config::default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "jpyc_chain_config::default_token")]
    pub token: LiteralOrEnv<Address>,
    /// RPC endpoints, used with fallback in the given order.
    pub rpc: Vec<RpcConfig>,
    /// Relay wallet key. It pays gas and is the permit spender.
    pub signer: LiteralOrEnv<EvmPrivateKey>,
    /// How long one wait for a receipt lasts.
    #[serde(default = "jpyc_chain_config::default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    /// Receipt polls of the same transaction before giving up.
    #[serde(default = "jpyc_chain_config::default_confirmation_attempts")]
    pub confirmation_attempts: u32,
    /// Per-request timeout of the RPC transport.
    #[serde(default = "jpyc_chain_config::default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "jpyc_chain_config::default_eip1559")]
    pub eip1559: bool,
}

impl JpycChainConfig {
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

mod jpyc_chain_config {
    use super::*;

    pub fn default_chain_id() -> u64 {
        POLYGON_CHAIN_ID
    }
    pub fn default_token() -> LiteralOrEnv<Address> {
        LiteralOrEnv::from_literal(JPYC_POLYGON)
    }
    pub fn default_receipt_timeout_secs() -> u64 {
        30
    }
    pub fn default_confirmation_attempts() -> u32 {
        3
    }
    pub fn default_rpc_timeout_secs() -> u64 {
        10
    }
    pub fn default_eip1559() -> bool {
        true
    }
}

/// A validated EVM private key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }
}

impl Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("EvmPrivateKey(***)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid evm private key: {}", e))
    }
}
