//! One JPYC payment as a typed state machine.
//!
//! ```text
//! Idle ──sign / attach_permit──▶ SignatureGenerated ──relay──▶ TransactionExecuted ──commit──▶ Committed
//!   └──────────────────────────────────┴──────────────────────────────┴──────────────────────▶ Failed
//! ```
//!
//! Each state is its own type and transitions consume it, so a permit cannot
//! be relayed twice and an order cannot be committed without a confirmed
//! transfer. [`JpycPayment`] wraps the states for callers that keep a payment
//! across steps, such as a wallet session.

use alloy_primitives::{Address, U256};
use backing_chain_jpyc::chain::{jpyc_units, yen_from_units};
use backing_chain_jpyc::client::{PermitParams, SignerLike, sign_permit};
use backing_chain_jpyc::{PermitRelay, RelayRequest, Settlement, SignedPermit};
use backing_types::{
    BackerProfile, CartLine, CheckoutSummary, CommitReceipt, PaymentMethod, Yen, compute_summary,
};

use crate::error::CheckoutError;
use crate::orchestrator::{CheckoutService, ensure_total};
use crate::request::{require_shipping, validate_backer};

/// What is being paid for.
#[derive(Debug, Clone)]
struct JpycOrder {
    backer: BackerProfile,
    lines: Vec<CartLine>,
    summary: CheckoutSummary,
    order_id: Option<String>,
}

impl JpycOrder {
    fn amount(&self) -> U256 {
        jpyc_units(self.summary.total)
    }
}

/// Cart priced and backer validated, nothing signed yet.
#[derive(Debug, Clone)]
pub struct Idle {
    order: JpycOrder,
}

/// The backer signed a permit for exactly the order total.
#[derive(Debug, Clone)]
pub struct SignatureGenerated {
    order: JpycOrder,
    permit: SignedPermit,
}

/// `permit` and `transferFrom` are confirmed on-chain.
#[derive(Debug, Clone)]
pub struct TransactionExecuted {
    order: JpycOrder,
    settlement: Settlement,
}

/// The order is recorded against the transfer hash.
#[derive(Debug, Clone)]
pub struct Committed {
    pub receipt: CommitReceipt,
    pub settlement: Settlement,
}

/// Terminal failure, with the state it happened in.
#[derive(Debug)]
pub struct Failed {
    pub stage: &'static str,
    pub error: CheckoutError,
    /// Present when money already moved; the order then needs manual recording.
    pub settlement: Option<Settlement>,
}

impl Failed {
    fn at(stage: &'static str, error: impl Into<CheckoutError>) -> Self {
        Self {
            stage,
            error: error.into(),
            settlement: None,
        }
    }
}

impl Idle {
    /// Starts a payment for catalog-priced `lines`.
    pub fn new(backer: BackerProfile, lines: Vec<CartLine>) -> Result<Self, CheckoutError> {
        validate_backer(&backer)?;
        if lines.is_empty() {
            return Err(CheckoutError::validation("items must be a non-empty array"));
        }
        require_shipping(&backer, &lines)?;
        let summary = compute_summary(&lines, PaymentMethod::Jpyc);
        Ok(Self {
            order: JpycOrder {
                backer,
                lines,
                summary,
                order_id: None,
            },
        })
    }

    /// Reference echoed back by the relay in its debug output.
    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order.order_id = Some(order_id.into());
        self
    }

    pub fn summary(&self) -> &CheckoutSummary {
        &self.order.summary
    }

    /// Token amount the permit must grant, `total × 10^18`.
    pub fn amount(&self) -> U256 {
        self.order.amount()
    }

    /// Signs the permit with the backer's wallet.
    pub async fn sign<S: SignerLike + Sync>(
        self,
        signer: &S,
        chain_id: u64,
        token: Address,
        spender: Address,
        nonce: U256,
    ) -> Result<SignatureGenerated, Failed> {
        let params = PermitParams::for_total(chain_id, token, spender, self.order.summary.total, nonce);
        match sign_permit(signer, &params).await {
            Ok(permit) => Ok(SignatureGenerated {
                order: self.order,
                permit,
            }),
            Err(e) => Err(Failed::at(
                "idle",
                CheckoutError::Validation(format!("could not sign the permit: {e}")),
            )),
        }
    }

    /// Accepts a permit signed elsewhere, e.g. by a browser wallet.
    pub fn attach_permit(self, permit: SignedPermit) -> Result<SignatureGenerated, Failed> {
        if permit.value != self.order.amount() {
            let submitted = yen_from_units(permit.value).unwrap_or(Yen::ZERO);
            return Err(Failed::at(
                "idle",
                CheckoutError::AmountMismatch {
                    expected: self.order.summary.total,
                    submitted,
                },
            ));
        }
        Ok(SignatureGenerated {
            order: self.order,
            permit,
        })
    }
}

impl SignatureGenerated {
    pub fn permit(&self) -> &SignedPermit {
        &self.permit
    }

    /// The body the wallet posts to `/jpyc/execute`.
    pub fn relay_request(&self, receiver: Address) -> RelayRequest {
        RelayRequest::from_permit(&self.permit, receiver, self.order.order_id.clone())
    }

    /// Hands the permit to the relay and waits for both confirmations.
    pub async fn relay(
        self,
        relay: &dyn PermitRelay,
        receiver: Address,
    ) -> Result<TransactionExecuted, Failed> {
        let request = self.relay_request(receiver);
        match relay.execute(&request).await {
            Ok(settlement) => Ok(TransactionExecuted {
                order: self.order,
                settlement,
            }),
            Err(e) => Err(Failed::at("signature_generated", e)),
        }
    }
}

impl TransactionExecuted {
    pub fn settlement(&self) -> &Settlement {
        &self.settlement
    }

    /// Records the order with `transaction_id` = the transferFrom hash.
    pub async fn commit(self, service: &CheckoutService) -> Result<Committed, Failed> {
        let settled = yen_from_units(self.settlement.amount);
        let checked = match settled {
            Some(submitted) => ensure_total(self.order.summary.total, submitted),
            None => Err(CheckoutError::AmountMismatch {
                expected: self.order.summary.total,
                submitted: Yen::ZERO,
            }),
        };
        let result = match checked {
            Ok(()) => {
                service
                    .record_jpyc_payment(
                        &self.order.backer,
                        &self.order.lines,
                        self.order.summary.total,
                        &self.settlement.transfer_tx_hash.to_string(),
                        None,
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(receipt) => Ok(Committed {
                receipt,
                settlement: self.settlement,
            }),
            Err(error) => Err(Failed {
                stage: "transaction_executed",
                error,
                settlement: Some(self.settlement),
            }),
        }
    }
}

/// A JPYC payment in any of its states.
#[derive(Debug)]
pub enum JpycPayment {
    Idle(Idle),
    SignatureGenerated(SignatureGenerated),
    TransactionExecuted(TransactionExecuted),
    Committed(Committed),
    Failed(Failed),
}

impl JpycPayment {
    pub fn state(&self) -> &'static str {
        match self {
            JpycPayment::Idle(_) => "idle",
            JpycPayment::SignatureGenerated(_) => "signature_generated",
            JpycPayment::TransactionExecuted(_) => "transaction_executed",
            JpycPayment::Committed(_) => "committed",
            JpycPayment::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JpycPayment::Committed(_) | JpycPayment::Failed(_))
    }

    /// Relays and commits a signed payment, stopping at the first failure.
    ///
    /// Other states are returned unchanged.
    pub async fn settle(
        self,
        relay: &dyn PermitRelay,
        receiver: Address,
        service: &CheckoutService,
    ) -> JpycPayment {
        let executed = match self {
            JpycPayment::SignatureGenerated(signed) => match signed.relay(relay, receiver).await {
                Ok(executed) => executed,
                Err(failed) => return JpycPayment::Failed(failed),
            },
            JpycPayment::TransactionExecuted(executed) => executed,
            other => return other,
        };
        match executed.commit(service).await {
            Ok(committed) => JpycPayment::Committed(committed),
            Err(failed) => JpycPayment::Failed(failed),
        }
    }
}

impl From<Idle> for JpycPayment {
    fn from(state: Idle) -> Self {
        JpycPayment::Idle(state)
    }
}

impl From<SignatureGenerated> for JpycPayment {
    fn from(state: SignatureGenerated) -> Self {
        JpycPayment::SignatureGenerated(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FakeToken, RECEIVER, RELAY, TRANSFER_TX, catalog_store, relay, service, signed_permit,
    };
    use alloy_signer_local::PrivateKeySigner;
    use backing_chain_jpyc::chain::{JPYC_POLYGON, POLYGON_CHAIN_ID};
    use backing_store::MemorySheetStore;
    use backing_types::RewardSelection;
    use serde_json::json;
    use std::sync::Arc;

    fn backer() -> BackerProfile {
        BackerProfile {
            name: "Hanako".into(),
            email: "hanako@example.jp".into(),
            ..Default::default()
        }
    }

    async fn idle(service: &CheckoutService) -> Idle {
        let selections = [RewardSelection {
            reward_id: "R001".into(),
            quantity: 2,
        }];
        let (lines, _) = service.quote(&selections, PaymentMethod::Jpyc).await.unwrap();
        Idle::new(backer(), lines).unwrap()
    }

    #[tokio::test]
    async fn signed_payment_is_relayed_then_committed() {
        let orders = Arc::new(MemorySheetStore::new());
        let service = service(catalog_store(), orders.clone());
        let token = Arc::new(FakeToken::default());
        let relay = relay(token.clone());

        let idle = idle(&service).await;
        assert_eq!(idle.summary().total, Yen::new(6000));
        assert_eq!(idle.amount(), jpyc_units(Yen::new(6000)));

        let wallet = PrivateKeySigner::random();
        let signed = idle
            .sign(&wallet, POLYGON_CHAIN_ID, JPYC_POLYGON, RELAY, U256::ZERO)
            .await
            .unwrap();
        let payment = JpycPayment::from(signed);
        assert_eq!(payment.state(), "signature_generated");

        let payment = payment.settle(&*relay, RECEIVER, &service).await;
        let JpycPayment::Committed(committed) = payment else {
            panic!("expected a committed payment");
        };
        assert_eq!(committed.receipt.backing_id, "BACK001");
        assert_eq!(committed.settlement.transfer_tx_hash, TRANSFER_TX);
        assert_eq!(
            token.transfers.lock().unwrap()[0],
            (wallet.address(), RECEIVER, jpyc_units(Yen::new(6000)))
        );
        let header = &orders.rows("backings")[0];
        assert_eq!(header[4], json!("jpyc"));
        assert_eq!(header[7], json!(TRANSFER_TX.to_string()));
    }

    #[tokio::test]
    async fn permit_for_another_amount_is_not_accepted() {
        let service = service(catalog_store(), Arc::new(MemorySheetStore::new()));
        let (_, permit) = signed_permit(Yen::new(1), 0).await;

        let failed = idle(&service).await.attach_permit(permit).unwrap_err();
        assert_eq!(failed.stage, "idle");
        assert!(matches!(failed.error, CheckoutError::AmountMismatch { submitted, .. } if submitted == Yen::new(1)));
    }

    #[tokio::test]
    async fn relay_rejection_fails_before_any_order_is_written() {
        let orders = Arc::new(MemorySheetStore::new());
        let service = service(catalog_store(), orders.clone());
        let token = Arc::new(FakeToken {
            nonce: U256::from(5u8),
            ..Default::default()
        });

        let (_, permit) = signed_permit(Yen::new(6000), 4).await;
        let signed = idle(&service).await.attach_permit(permit).unwrap();
        let payment = JpycPayment::from(signed)
            .settle(&*relay(token.clone()), RECEIVER, &service)
            .await;

        let JpycPayment::Failed(failed) = payment else {
            panic!("expected a failed payment");
        };
        assert_eq!(failed.stage, "signature_generated");
        assert!(failed.settlement.is_none());
        assert!(token.transfers.lock().unwrap().is_empty());
        assert!(orders.append_log().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_keeps_the_settlement() {
        let orders = Arc::new(MemorySheetStore::new());
        orders.fail_appends_to("backers");
        let service = service(catalog_store(), orders);
        let (_, permit) = signed_permit(Yen::new(6000), 0).await;
        let signed = idle(&service).await.attach_permit(permit).unwrap();
        let token = Arc::new(FakeToken::default());

        let executed = signed.relay(&*relay(token), RECEIVER).await.unwrap();
        let failed = executed.commit(&service).await.unwrap_err();
        assert_eq!(failed.stage, "transaction_executed");
        assert_eq!(
            failed.settlement.map(|s| s.transfer_tx_hash),
            Some(TRANSFER_TX)
        );
    }

    #[test]
    fn idle_requires_a_valid_backer() {
        let line = CartLine {
            reward_id: "R001".into(),
            quantity: 1,
            unit_price: Yen::new(3000),
            requires_shipping: false,
        };
        let nameless = BackerProfile {
            email: "hanako@example.jp".into(),
            ..Default::default()
        };
        assert!(Idle::new(nameless, vec![line.clone()]).is_err());
        assert!(Idle::new(backer(), Vec::new()).is_err());
        assert_eq!(JpycPayment::from(Idle::new(backer(), vec![line]).unwrap()).state(), "idle");
    }
}
