//! Permit signing for the backer's wallet.
//!
//! The browser normally does this through its injected wallet; this module
//! does the same for scripts, integration tests and server-held wallets.
//!
//! ```ignore
//! use backing_chain_jpyc::client::JpycClient;
//! use alloy_provider::ProviderBuilder;
//!
//! let provider = ProviderBuilder::new().connect_http("https://polygon-rpc.com".parse()?);
//! let client = JpycClient::new(provider, JPYC_POLYGON);
//! let permit = client.prepare_permit(&signer, relay_address, Yen::new(10_000)).await?;
//! let body = RelayRequest::from_permit(&permit, receiver, Some(order_id));
//! ```

use alloy_primitives::{Address, FixedBytes, Signature, U256};
use alloy_provider::Provider;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolStruct;
use async_trait::async_trait;
use backing_types::Yen;
use backing_types::timestamp::UnixTimestamp;
use std::future::IntoFuture;
use std::sync::Arc;
use tracing::Instrument;

use crate::chain::contract::IJPYC;
use crate::chain::jpyc_units;
use crate::permit::{Permit, PermitSignature, SignedPermit, jpyc_domain};

/// How long a freshly signed permit stays valid.
pub const PERMIT_VALIDITY_SECS: u64 = 3600;

#[async_trait]
pub trait SignerLike {
    fn address(&self) -> Address;
    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error>;
}

#[async_trait]
impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        alloy_signer::Signer::address(self)
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

#[async_trait]
impl<T: SignerLike + Send + Sync> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PermitSigningError {
    #[error("amount must be a positive number of yen")]
    ZeroAmount,
    #[error("wallet refused to sign: {0}")]
    Signing(#[from] alloy_signer::Error),
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Everything a permit signature commits to, apart from the owner.
#[derive(Debug, Clone)]
pub struct PermitParams {
    pub chain_id: u64,
    pub token: Address,
    pub spender: Address,
    pub value: U256,
    pub nonce: U256,
    pub deadline: UnixTimestamp,
}

impl PermitParams {
    /// Parameters for paying `total` yen, valid for [`PERMIT_VALIDITY_SECS`] from now.
    pub fn for_total(chain_id: u64, token: Address, spender: Address, total: Yen, nonce: U256) -> Self {
        Self {
            chain_id,
            token,
            spender,
            value: jpyc_units(total),
            nonce,
            deadline: UnixTimestamp::now() + PERMIT_VALIDITY_SECS,
        }
    }
}

/// Signs an EIP-712 JPYC permit with `signer` as owner.
pub async fn sign_permit<S: SignerLike + Sync>(
    signer: &S,
    params: &PermitParams,
) -> Result<SignedPermit, PermitSigningError> {
    if params.value.is_zero() {
        return Err(PermitSigningError::ZeroAmount);
    }
    let message = Permit {
        owner: signer.address(),
        spender: params.spender,
        value: params.value,
        nonce: params.nonce,
        deadline: U256::from(params.deadline.as_secs()),
    };
    let hash = message.eip712_signing_hash(&jpyc_domain(params.chain_id, params.token));
    let signature = signer.sign_hash(&hash).await?;
    Ok(SignedPermit {
        owner: message.owner,
        spender: message.spender,
        value: message.value,
        nonce: message.nonce,
        deadline: message.deadline,
        signature: PermitSignature::from_signature(&signature),
    })
}

/// Read access to the JPYC token plus permit preparation.
pub struct JpycClient<P> {
    provider: P,
    token: Address,
}

impl<P: Provider> JpycClient<P> {
    pub fn new(provider: P, token: Address) -> Self {
        Self { provider, token }
    }

    pub async fn nonce(&self, owner: Address) -> Result<U256, PermitSigningError> {
        IJPYC::new(self.token, &self.provider)
            .nonces(owner)
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_permit_nonce", %owner, otel.kind = "client"))
            .await
            .map_err(|e| PermitSigningError::Rpc(e.to_string()))
    }

    pub async fn balance_of(&self, account: Address) -> Result<U256, PermitSigningError> {
        IJPYC::new(self.token, &self.provider)
            .balanceOf(account)
            .call()
            .await
            .map_err(|e| PermitSigningError::Rpc(e.to_string()))
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, PermitSigningError> {
        IJPYC::new(self.token, &self.provider)
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| PermitSigningError::Rpc(e.to_string()))
    }

    /// Reads chain id and the owner's nonce, then signs a permit for `total`.
    pub async fn prepare_permit<S: SignerLike + Sync>(
        &self,
        signer: &S,
        spender: Address,
        total: Yen,
    ) -> Result<SignedPermit, PermitSigningError> {
        let chain_id = self
            .provider
            .get_chain_id()
            .await
            .map_err(|e| PermitSigningError::Rpc(e.to_string()))?;
        let nonce = self.nonce(signer.address()).await?;
        let params = PermitParams::for_total(chain_id, self.token, spender, total, nonce);
        sign_permit(signer, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{JPYC_POLYGON, POLYGON_CHAIN_ID};
    use alloy_primitives::address;

    #[tokio::test]
    async fn signs_recoverable_permit_for_total() {
        let signer = PrivateKeySigner::random();
        let spender = address!("0x2222222222222222222222222222222222222222");
        let params = PermitParams::for_total(
            POLYGON_CHAIN_ID,
            JPYC_POLYGON,
            spender,
            Yen::new(10_000),
            U256::from(2u8),
        );
        let permit = sign_permit(&signer, &params).await.unwrap();

        assert_eq!(permit.value, jpyc_units(Yen::new(10_000)));
        assert_eq!(permit.nonce, U256::from(2u8));
        let remaining = permit.deadline - U256::from(UnixTimestamp::now().as_secs());
        assert!(remaining <= U256::from(PERMIT_VALIDITY_SECS));
        assert!(remaining >= U256::from(PERMIT_VALIDITY_SECS - 5));

        let domain = jpyc_domain(POLYGON_CHAIN_ID, JPYC_POLYGON);
        assert_eq!(permit.recover_signer(&domain).unwrap(), signer.address());
    }

    #[tokio::test]
    async fn zero_total_is_refused() {
        let signer = Arc::new(PrivateKeySigner::random());
        let params = PermitParams::for_total(
            POLYGON_CHAIN_ID,
            JPYC_POLYGON,
            Address::ZERO,
            Yen::ZERO,
            U256::ZERO,
        );
        assert!(matches!(
            sign_permit(&signer, &params).await,
            Err(PermitSigningError::ZeroAmount)
        ));
    }
}
