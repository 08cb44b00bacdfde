use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Marks an address whose nonce must be fetched from the node.
const UNKNOWN: u64 = u64::MAX;

/// Transaction nonces of the relay wallet.
///
/// The first nonce of an address is read with the `pending` block tag, so
/// transactions still in the mempool after a restart are counted; later ones
/// are incremented locally. Permit and transferFrom of one settlement go out
/// back to back from the same wallet, which is why this is cached at all.
///
/// After a failed submission or receipt wait the chain state is unknown, and
/// [`PendingNonceManager::reset_nonce`] forces the next transaction to ask the
/// node again.
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

impl PendingNonceManager {
    fn slot(&self, address: Address) -> Arc<Mutex<u64>> {
        // The dashmap guard must not be held across an await.
        let entry = self
            .nonces
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(UNKNOWN)));
        Arc::clone(entry.value())
    }

    pub async fn reset_nonce(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address).map(|e| Arc::clone(e.value())) {
            *slot.lock().await = UNKNOWN;
            tracing::debug!(%address, "relay nonce reset, next transaction re-reads it");
        }
    }

    /// The last nonce handed out for `address`, if known.
    pub async fn cached(&self, address: Address) -> Option<u64> {
        let slot = self.nonces.get(&address).map(|e| Arc::clone(e.value()))?;
        let nonce = *slot.lock().await;
        (nonce != UNKNOWN).then_some(nonce)
    }
}

#[async_trait]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: alloy_network::Network,
    {
        let slot = self.slot(address);
        let mut nonce = slot.lock().await;
        let next = if *nonce == UNKNOWN {
            tracing::trace!(%address, "fetching pending nonce");
            provider.get_transaction_count(address).pending().await?
        } else {
            *nonce + 1
        };
        *nonce = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[tokio::test]
    async fn reset_forgets_cached_nonce() {
        let manager = PendingNonceManager::default();
        let relay = address!("0x2222222222222222222222222222222222222222");
        assert_eq!(manager.cached(relay).await, None);

        *manager.slot(relay).lock().await = 7;
        assert_eq!(manager.cached(relay).await, Some(7));

        manager.reset_nonce(relay).await;
        assert_eq!(manager.cached(relay).await, None);
    }
}
