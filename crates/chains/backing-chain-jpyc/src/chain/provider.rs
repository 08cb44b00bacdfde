use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, B256, Bytes, TxHash, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{Identity, PendingTransactionError, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockId, TransactionReceipt, TransactionRequest};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::TransportError;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use async_trait::async_trait;
use backing_types::config::RpcConfig;
use std::future::IntoFuture;
use std::num::NonZeroUsize;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::Instrument;

use crate::chain::config::JpycChainConfig;
use crate::chain::contract::IJPYC;
use crate::chain::pending_nonce_manager::PendingNonceManager;
use crate::permit::SignedPermit;
use crate::settlement::{ChainCallError, JpycTokenProvider};

/// First pause before re-polling a receipt; doubled after every poll.
const RECEIPT_BACKOFF: Duration = Duration::from_secs(2);

/// Combined filler type for gas, blob gas, nonce, and chain ID.
pub type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

/// Relay wallet provider: fillers over a [`RootProvider`], signing with the relay key.
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

#[derive(Debug, thiserror::Error)]
pub enum RelayProviderError {
    #[error("no http(s) rpc endpoint configured for chain {0}")]
    NoRpcEndpoint(u64),
    #[error("invalid relay signer: {0}")]
    InvalidSigner(String),
    #[error("failed to build rpc http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MetaTransactionSendError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("transaction {tx_hash} not confirmed after {attempts} receipt attempts: {source}")]
    Unconfirmed {
        tx_hash: TxHash,
        attempts: u32,
        source: PendingTransactionError,
    },
}

impl From<MetaTransactionSendError> for ChainCallError {
    fn from(error: MetaTransactionSendError) -> Self {
        match error {
            MetaTransactionSendError::Transport(e) => ChainCallError::Rpc(e.to_string()),
            MetaTransactionSendError::Unconfirmed {
                tx_hash, attempts, ..
            } => ChainCallError::Unconfirmed { tx_hash, attempts },
        }
    }
}

/// Target and calldata of a relay transaction.
pub struct MetaTransaction {
    pub to: Address,
    pub calldata: Bytes,
    pub confirmations: u64,
}

/// Waits between receipt polls after the first wait timed out.
///
/// The first attempt is the confirmation watcher itself, so `attempts`
/// polls need `attempts - 1` pauses.
pub fn receipt_backoff(attempts: u32, initial: Duration) -> Vec<Duration> {
    (1..attempts.max(1))
        .map(|i| initial.saturating_mul(1u32 << (i - 1).min(16)))
        .collect()
}

/// The relay wallet on Polygon, talking to the JPYC token.
///
/// Transactions are signed by a single relay key. Gas is estimated against
/// the pending block; legacy gas pricing is used when `eip1559` is off. A
/// failed submission or receipt wait resets the cached wallet nonce.
#[derive(Debug)]
pub struct PolygonRelayProvider {
    chain_id: u64,
    token: Address,
    relay_address: Address,
    eip1559: bool,
    receipt_timeout: Duration,
    confirmation_attempts: u32,
    inner: InnerProvider,
    nonce_manager: PendingNonceManager,
}

impl PolygonRelayProvider {
    /// Throttled HTTP transports with fallback, in configuration order.
    pub fn rpc_client(
        chain_id: u64,
        rpc: &[RpcConfig],
        timeout: Duration,
    ) -> Result<RpcClient, RelayProviderError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let transports = rpc
            .iter()
            .filter(|config| matches!(config.http.scheme(), "http" | "https"))
            .map(|config| {
                tracing::info!(chain = chain_id, rpc_url = %config.http, rate_limit = ?config.rate_limit, "Using HTTP transport");
                let rate_limit = config.rate_limit.unwrap_or(u32::MAX);
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit))
                    .service(Http::with_client(http.clone(), config.http.clone()))
            })
            .collect::<Vec<_>>();
        let active = NonZeroUsize::new(transports.len())
            .ok_or(RelayProviderError::NoRpcEndpoint(chain_id))?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(active))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    pub fn try_new(config: &JpycChainConfig) -> Result<Self, RelayProviderError> {
        let key = B256::from_slice(config.signer.as_bytes());
        let signer = PrivateKeySigner::from_bytes(&key)
            .map_err(|e| RelayProviderError::InvalidSigner(e.to_string()))?
            .with_chain_id(Some(config.chain_id));
        let relay_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let client = Self::rpc_client(config.chain_id, &config.rpc, config.rpc_timeout())?;

        let nonce_manager = PendingNonceManager::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(
                    NonceFiller::new(nonce_manager.clone()),
                    ChainIdFiller::default(),
                ),
            ),
        );
        let inner: InnerProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client);

        tracing::info!(chain = config.chain_id, token = %config.token.inner(), relay = %relay_address, "Using JPYC relay provider");

        Ok(Self {
            chain_id: config.chain_id,
            token: *config.token.inner(),
            relay_address,
            eip1559: config.eip1559,
            receipt_timeout: config.receipt_timeout(),
            confirmation_attempts: config.confirmation_attempts.max(1),
            inner,
            nonce_manager,
        })
    }

    pub fn inner(&self) -> &InnerProvider {
        &self.inner
    }

    pub fn configured_chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Sends `tx` from the relay wallet and waits for its receipt.
    ///
    /// The first wait is bounded by the receipt timeout. If it fails, the
    /// receipt of the same hash is polled with exponential backoff until the
    /// attempts run out. The transaction is never re-sent.
    pub async fn send_transaction(
        &self,
        tx: MetaTransaction,
    ) -> Result<TransactionReceipt, MetaTransactionSendError> {
        let from = self.relay_address;
        let mut txr = TransactionRequest::default()
            .with_to(tx.to)
            .with_from(from)
            .with_input(tx.calldata);

        if !self.eip1559 {
            let gas: u128 = self
                .inner
                .get_gas_price()
                .into_future()
                .instrument(tracing::info_span!("get_gas_price"))
                .await?;
            txr.set_gas_price(gas);
        }

        let gas_limit = match self
            .inner
            .estimate_gas(txr.clone())
            .block(BlockId::pending())
            .await
        {
            Ok(gas_limit) => gas_limit,
            Err(e) => {
                self.nonce_manager.reset_nonce(from).await;
                return Err(MetaTransactionSendError::Transport(e));
            }
        };
        txr.set_gas_limit(gas_limit);

        let pending_tx = match self.inner.send_transaction(txr).await {
            Ok(pending) => pending,
            Err(e) => {
                self.nonce_manager.reset_nonce(from).await;
                return Err(MetaTransactionSendError::Transport(e));
            }
        };
        let tx_hash = *pending_tx.tx_hash();
        tracing::info!(%tx_hash, "transaction sent, waiting for receipt");

        let first_wait = pending_tx
            .with_required_confirmations(tx.confirmations)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await;
        let wait_error = match first_wait {
            Ok(receipt) => return Ok(receipt),
            Err(e) => e,
        };
        tracing::warn!(%tx_hash, error = %wait_error, "receipt wait failed, polling the same transaction");

        for (attempt, pause) in receipt_backoff(self.confirmation_attempts, RECEIPT_BACKOFF)
            .into_iter()
            .enumerate()
        {
            tokio::time::sleep(pause).await;
            match self.inner.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => tracing::debug!(%tx_hash, attempt = attempt + 2, "receipt not available yet"),
                Err(e) => tracing::warn!(%tx_hash, attempt = attempt + 2, error = %e, "receipt poll failed"),
            }
        }

        self.nonce_manager.reset_nonce(from).await;
        Err(MetaTransactionSendError::Unconfirmed {
            tx_hash,
            attempts: self.confirmation_attempts,
            source: wait_error,
        })
    }

    async fn send_to_token(&self, call: &'static str, calldata: Bytes) -> Result<TxHash, ChainCallError> {
        let receipt = self
            .send_transaction(MetaTransaction {
                to: self.token,
                calldata,
                confirmations: 1,
            })
            .instrument(tracing::info_span!("send_token_call", call, token_contract = %self.token, otel.kind = "client"))
            .await?;
        if receipt.status() {
            Ok(receipt.transaction_hash)
        } else {
            Err(ChainCallError::Reverted {
                tx_hash: receipt.transaction_hash,
            })
        }
    }
}

fn rpc_error(error: impl std::fmt::Display) -> ChainCallError {
    ChainCallError::Rpc(error.to_string())
}

#[async_trait]
impl JpycTokenProvider for PolygonRelayProvider {
    fn relay_address(&self) -> Address {
        self.relay_address
    }

    fn token_address(&self) -> Address {
        self.token
    }

    async fn chain_id(&self) -> Result<u64, ChainCallError> {
        self.inner
            .get_chain_id()
            .into_future()
            .instrument(tracing::info_span!("get_chain_id", otel.kind = "client"))
            .await
            .map_err(rpc_error)
    }

    async fn gas_balance(&self) -> Result<U256, ChainCallError> {
        self.inner
            .get_balance(self.relay_address)
            .into_future()
            .instrument(tracing::info_span!("get_gas_balance", relay = %self.relay_address, otel.kind = "client"))
            .await
            .map_err(rpc_error)
    }

    async fn permit_nonce(&self, owner: Address) -> Result<U256, ChainCallError> {
        let token = IJPYC::new(self.token, &self.inner);
        token
            .nonces(owner)
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_permit_nonce", %owner, token_contract = %self.token, otel.kind = "client"))
            .await
            .map_err(rpc_error)
    }

    async fn permit(&self, permit: &SignedPermit) -> Result<TxHash, ChainCallError> {
        let token = IJPYC::new(self.token, &self.inner);
        let calldata = token
            .permit(
                permit.owner,
                permit.spender,
                permit.value,
                permit.deadline,
                permit.signature.v,
                permit.signature.r,
                permit.signature.s,
            )
            .calldata()
            .clone();
        self.send_to_token("permit", calldata).await
    }

    async fn transfer_from(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<TxHash, ChainCallError> {
        let token = IJPYC::new(self.token, &self.inner);
        let calldata = token.transferFrom(from, to, value).calldata().clone();
        self.send_to_token("transferFrom", calldata).await
    }
}
