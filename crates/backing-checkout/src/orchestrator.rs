//! Dispatch of a checkout to its payment rail.
//!
//! | Rail | Verification | Committed as |
//! |------|--------------|--------------|
//! | bank | none, reconciled by hand | `pending` / `pending` |
//! | paypal | capture, captured amount equals the recomputed total | `completed` / `received` |
//! | jpyc | permit + transferFrom relayed and confirmed | `completed` / `received` |
//!
//! Order lines always carry catalog prices. On the paypal and jpyc rails the
//! total is recomputed from them and a client total that disagrees is refused.
//!
//! A jpyc order posted to `/checkout` must name the transfer hash of a
//! settlement this service relayed for exactly the recomputed total. Each
//! settlement is claimed by one order at most.

use alloy_primitives::TxHash;
use backing_chain_jpyc::chain::{jpyc_units, yen_from_units};
use backing_chain_jpyc::{PermitRelay, RelayRequest, Settlement};
use backing_paypal::PayPalClient;
use backing_store::{Catalog, OrderStore, OrderStoreError};
use backing_types::{
    BackerProfile, BankDetails, CartLine, CheckoutSummary, CommitReceipt, DashboardStats,
    NewOrder, PaymentMethod, RewardSelection, RewardTier, Yen, compute_summary,
};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::error::CheckoutError;
use crate::request::{CheckoutRequest, PayPalConfirmRequest, require_shipping};

/// Result of `POST /checkout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutOutcome {
    pub receipt: CommitReceipt,
    pub total_amount: Yen,
    pub payment_method: PaymentMethod,
}

/// Everything a checkout needs: catalog, order store and the configured rails.
pub struct CheckoutService {
    catalog: Catalog,
    orders: OrderStore,
    paypal: Option<PayPalClient>,
    jpyc: Option<Arc<dyn PermitRelay>>,
    bank: Option<BankDetails>,
    /// Relayed settlements not yet recorded as an order, by transfer hash.
    settlements: DashMap<TxHash, Settlement>,
}

impl CheckoutService {
    pub fn new(catalog: Catalog, orders: OrderStore) -> Self {
        Self {
            catalog,
            orders,
            paypal: None,
            jpyc: None,
            bank: None,
            settlements: DashMap::new(),
        }
    }

    pub fn with_paypal(mut self, paypal: PayPalClient) -> Self {
        self.paypal = Some(paypal);
        self
    }

    pub fn with_jpyc(mut self, relay: Arc<dyn PermitRelay>) -> Self {
        self.jpyc = Some(relay);
        self
    }

    pub fn with_bank_details(mut self, bank: BankDetails) -> Self {
        self.bank = Some(bank);
        self
    }

    pub async fn rewards(&self) -> Result<Vec<RewardTier>, CheckoutError> {
        Ok(self.catalog.rewards().await?)
    }

    pub async fn dashboard(&self) -> Result<DashboardStats, CheckoutError> {
        Ok(self.catalog.dashboard().await?)
    }

    pub fn bank_details(&self) -> Result<&BankDetails, CheckoutError> {
        self.bank
            .as_ref()
            .ok_or(CheckoutError::NotConfigured("Bank transfer"))
    }

    pub fn relay(&self) -> Result<&dyn PermitRelay, CheckoutError> {
        self.jpyc
            .as_deref()
            .ok_or(CheckoutError::NotConfigured("JPYC"))
    }

    /// Prices `selections` against the catalog and computes the summary for `method`.
    pub async fn quote(
        &self,
        selections: &[RewardSelection],
        method: PaymentMethod,
    ) -> Result<(Vec<CartLine>, CheckoutSummary), CheckoutError> {
        let lines = self.catalog.price_selections(selections).await?;
        let summary = compute_summary(&lines, method);
        Ok((lines, summary))
    }

    /// `POST /checkout`: commits a bank transfer, or a JPYC payment already relayed.
    #[instrument(skip_all, err)]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, CheckoutError> {
        let checkout = request.validate()?;
        let (lines, summary) = self.quote(&checkout.selections, checkout.method).await?;
        require_shipping(&checkout.backer, &lines)?;

        let receipt = match (checkout.method, checkout.transaction_id) {
            (PaymentMethod::Jpyc, Some(tx_hash)) => {
                ensure_total(summary.total, checkout.client_total)?;
                let settlement = self.claim_settlement(&tx_hash, summary.total)?;
                let transfer_tx_hash = settlement.transfer_tx_hash;
                self.record_jpyc_payment(
                    &checkout.backer,
                    &lines,
                    summary.total,
                    &transfer_tx_hash.to_string(),
                    checkout.notes,
                )
                .await
                .inspect_err(|error| {
                    if nothing_written(error) {
                        self.settlements.insert(transfer_tx_hash, settlement);
                    }
                })?
            }
            (PaymentMethod::Bank, _) => {
                if checkout.client_total != summary.total {
                    tracing::warn!(
                        submitted = checkout.client_total.get(),
                        computed = summary.total.get(),
                        "Bank transfer total differs from catalog prices, keeping the submitted total"
                    );
                }
                let mut order = NewOrder::bank_transfer(checkout.client_total);
                order.notes = checkout.notes;
                self.orders.commit_order(&checkout.backer, &order, &lines).await?
            }
            (method, _) => {
                return Err(CheckoutError::Validation(format!(
                    "{method} orders cannot be committed through /checkout"
                )));
            }
        };
        let total_amount = match checkout.method {
            PaymentMethod::Bank => checkout.client_total,
            _ => summary.total,
        };
        Ok(CheckoutOutcome {
            receipt,
            total_amount,
            payment_method: checkout.method,
        })
    }

    /// `POST /checkout/paypal-confirm`: capture, verify the amount, then commit.
    #[instrument(skip_all, err)]
    pub async fn confirm_paypal(
        &self,
        request: PayPalConfirmRequest,
    ) -> Result<CommitReceipt, CheckoutError> {
        let confirm = request.validate()?;
        let paypal = self
            .paypal
            .as_ref()
            .ok_or(CheckoutError::NotConfigured("PayPal"))?;
        let (lines, summary) = self.quote(&confirm.selections, PaymentMethod::Paypal).await?;
        require_shipping(&confirm.backer, &lines)?;
        // Refuse before capturing, so a tampered total never moves money.
        ensure_total(summary.total, confirm.client_total)?;

        let capture = paypal
            .verify_and_capture(&confirm.order_id, summary.total)
            .await?;
        let order = NewOrder::settled(summary.total, PaymentMethod::Paypal, &capture.transaction_id)
            .with_notes(format!("PayPal Payment - Order ID: {}", confirm.order_id));
        self.orders
            .commit_order(&confirm.backer, &order, &lines)
            .await
            .inspect_err(|error| {
                tracing::error!(
                    order_id = %confirm.order_id,
                    capture_id = ?capture.capture_id,
                    %error,
                    "PayPal payment captured but the order was not fully recorded"
                )
            })
            .map_err(Into::into)
    }

    /// `POST /jpyc/execute`: relays a signed permit.
    ///
    /// The confirmed settlement is kept until a `/checkout` claims it.
    #[instrument(skip_all, fields(order_id = ?request.order_id))]
    pub async fn execute_jpyc(&self, request: &RelayRequest) -> Result<Settlement, CheckoutError> {
        let settlement = self.relay()?.execute(request).await?;
        self.settlements
            .insert(settlement.transfer_tx_hash, settlement.clone());
        Ok(settlement)
    }

    /// Takes the unclaimed settlement with transfer hash `transaction_id`,
    /// provided it moved exactly `total`.
    fn claim_settlement(&self, transaction_id: &str, total: Yen) -> Result<Settlement, CheckoutError> {
        let hash: TxHash = transaction_id.parse().map_err(|_| {
            CheckoutError::validation("transaction_id must be a 0x-prefixed transaction hash")
        })?;
        let expected = jpyc_units(total);
        if let Some((_, settlement)) = self.settlements.remove_if(&hash, |_, s| s.amount == expected) {
            return Ok(settlement);
        }
        let relayed = self.settlements.get(&hash).map(|s| s.amount);
        match relayed {
            Some(amount) => Err(CheckoutError::AmountMismatch {
                expected: total,
                submitted: yen_from_units(amount).unwrap_or(Yen::ZERO),
            }),
            None => Err(CheckoutError::UnknownSettlement(hash)),
        }
    }

    /// Commits a JPYC payment whose transfer is confirmed on-chain.
    pub async fn record_jpyc_payment(
        &self,
        backer: &BackerProfile,
        lines: &[CartLine],
        total: Yen,
        transfer_tx_hash: &str,
        notes: Option<String>,
    ) -> Result<CommitReceipt, CheckoutError> {
        let mut order = NewOrder::settled(total, PaymentMethod::Jpyc, transfer_tx_hash);
        order.notes = notes;
        self.orders
            .commit_order(backer, &order, lines)
            .await
            .inspect_err(|error| {
                tracing::error!(
                    tx = transfer_tx_hash,
                    %error,
                    "JPYC transfer confirmed but the order was not fully recorded"
                )
            })
            .map_err(Into::into)
    }
}

/// Whether a failed commit left the sheets untouched.
fn nothing_written(error: &CheckoutError) -> bool {
    matches!(
        error,
        CheckoutError::Store(
            OrderStoreError::EmptyOrder | OrderStoreError::Allocation { .. } | OrderStoreError::Backer(_)
        )
    )
}

/// The client's total must equal the server's.
pub fn ensure_total(expected: Yen, submitted: Yen) -> Result<(), CheckoutError> {
    if expected == submitted {
        Ok(())
    } else {
        Err(CheckoutError::AmountMismatch {
            expected,
            submitted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{
        FakeToken, RECEIVER, TRANSFER_TX, catalog_store, paypal_server, relay, service,
        service_with_paypal, signed_permit,
    };
    use backing_store::MemorySheetStore;
    use serde_json::json;

    fn request(value: serde_json::Value) -> CheckoutRequest {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn bank_checkout_commits_pending_order_with_catalog_prices() {
        let orders = Arc::new(MemorySheetStore::new());
        let service = service(catalog_store(), orders.clone());

        let outcome = service
            .checkout(request(json!({
                "backer": { "name": "Hanako", "email": "hanako@example.jp" },
                "backing": { "total_amount": 6300, "payment_method": "bank", "notes": "invoice please" },
                "items": [{ "reward_id": "R001", "quantity": 2, "unit_price": 1 }]
            })))
            .await
            .unwrap();

        assert_eq!(outcome.receipt.backer_id, "B001");
        assert_eq!(outcome.receipt.backing_id, "BACK001");
        assert_eq!(outcome.total_amount, Yen::new(6300));
        let header = &orders.rows("backings")[0];
        assert_eq!(header[3], json!(6300));
        assert_eq!(header[4], json!("bank"));
        assert_eq!(header[5], json!("pending"));
        assert_eq!(header[6], json!("pending"));
        assert_eq!(header[9], json!("invoice please"));
        let line = &orders.rows("backing_items")[0];
        assert_eq!(line[4], json!(3000));
    }

    fn jpyc_checkout(total: u64, transaction_id: &str) -> CheckoutRequest {
        request(json!({
            "backer": { "name": "Hanako", "email": "hanako@example.jp" },
            "backing": { "total_amount": total, "payment_method": "jpyc", "transaction_id": transaction_id },
            "items": [{ "reward_id": "R001", "quantity": 2 }]
        }))
    }

    /// A service with a JPYC relay that already settled a permit for `paid`.
    async fn relayed(orders: Arc<MemorySheetStore>, paid: u64) -> CheckoutService {
        let service = service(catalog_store(), orders).with_jpyc(relay(Arc::new(FakeToken::default())));
        let (_, permit) = signed_permit(Yen::new(paid), 0).await;
        service
            .execute_jpyc(&RelayRequest::from_permit(&permit, RECEIVER, None))
            .await
            .unwrap();
        service
    }

    #[tokio::test]
    async fn jpyc_checkout_claims_the_relayed_settlement_once() {
        let orders = Arc::new(MemorySheetStore::new());
        let service = relayed(orders.clone(), 6000).await;
        let tx = TRANSFER_TX.to_string();

        let err = service.checkout(jpyc_checkout(6300, &tx)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::AmountMismatch { expected, .. } if expected == Yen::new(6000)));
        assert!(orders.append_log().is_empty());

        let outcome = service.checkout(jpyc_checkout(6000, &tx)).await.unwrap();
        assert_eq!(outcome.payment_method, PaymentMethod::Jpyc);
        let header = &orders.rows("backings")[0];
        assert_eq!(header[5], json!("completed"));
        assert_eq!(header[6], json!("received"));
        assert_eq!(header[7], json!(tx));

        let err = service.checkout(jpyc_checkout(6000, &tx)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::UnknownSettlement(hash) if hash == TRANSFER_TX));
        assert_eq!(orders.rows("backings").len(), 1);
    }

    #[tokio::test]
    async fn jpyc_checkout_refuses_unrelayed_and_underpaid_transfers() {
        let orders = Arc::new(MemorySheetStore::new());
        let service = relayed(orders.clone(), 5000).await;

        let unknown = format!("0x{}", "cd".repeat(32));
        let err = service.checkout(jpyc_checkout(6000, &unknown)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::UnknownSettlement(_)));
        assert_eq!(err.kind(), ErrorKind::Integrity);

        let err = service.checkout(jpyc_checkout(6000, "0xbb")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service
            .checkout(jpyc_checkout(6000, &TRANSFER_TX.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::AmountMismatch { expected, submitted }
                if expected == Yen::new(6000) && submitted == Yen::new(5000)
        ));
        assert!(orders.append_log().is_empty());
    }

    #[tokio::test]
    async fn jpyc_settlement_is_released_only_when_nothing_was_written() {
        let orders = Arc::new(MemorySheetStore::new());
        let service = relayed(orders.clone(), 6000).await;
        let tx = TRANSFER_TX.to_string();

        orders.fail_appends_to("backers");
        assert!(service.checkout(jpyc_checkout(6000, &tx)).await.is_err());
        assert!(orders.append_log().is_empty());
        assert!(service.settlements.contains_key(&TRANSFER_TX));

        let orders = Arc::new(MemorySheetStore::new());
        let service = relayed(orders.clone(), 6000).await;
        orders.fail_appends_to("backings");
        let err = service.checkout(jpyc_checkout(6000, &tx)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialCommit);
        assert!(!service.settlements.contains_key(&TRANSFER_TX));
    }

    #[tokio::test]
    async fn unknown_reward_and_missing_address_are_rejected() {
        let service = service(catalog_store(), Arc::new(MemorySheetStore::new()));
        let err = service
            .checkout(request(json!({
                "backer": { "name": "Hanako", "email": "hanako@example.jp" },
                "backing": { "total_amount": 100, "payment_method": "bank" },
                "items": [{ "reward_id": "R999", "quantity": 1 }]
            })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service
            .checkout(request(json!({
                "backer": { "name": "Hanako", "email": "hanako@example.jp" },
                "backing": { "total_amount": 5250, "payment_method": "bank" },
                "items": [{ "reward_id": "R002", "quantity": 1 }]
            })))
            .await
            .unwrap_err();
        assert!(err.user_message().starts_with("Shipping address is required"));
    }

    #[tokio::test]
    async fn paypal_confirm_commits_after_matching_capture() {
        let server = paypal_server("ORDER-7", "3150.00").await;
        let orders = Arc::new(MemorySheetStore::new());
        let service = service_with_paypal(catalog_store(), orders.clone(), &server);

        let receipt = service
            .confirm_paypal(
                serde_json::from_value(json!({
                    "orderId": "ORDER-7",
                    "name": "Hanako",
                    "email": "hanako@example.jp",
                    "selectedRewards": [{ "reward_id": "R001", "quantity": 1 }],
                    "totalAmount": 3150
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(receipt.backing_id, "BACK001");
        let header = &orders.rows("backings")[0];
        assert_eq!(header[4], json!("paypal"));
        assert_eq!(header[7], json!("ORDER-7"));
        assert_eq!(header[9], json!("PayPal Payment - Order ID: ORDER-7"));
    }

    #[tokio::test]
    async fn paypal_confirm_refuses_tampered_total_without_capturing() {
        let server = paypal_server("ORDER-8", "3150.00").await;
        let orders = Arc::new(MemorySheetStore::new());
        let service = service_with_paypal(catalog_store(), orders.clone(), &server);

        let err = service
            .confirm_paypal(
                serde_json::from_value(json!({
                    "orderId": "ORDER-8",
                    "name": "Hanako",
                    "email": "hanako@example.jp",
                    "selectedRewards": [{ "reward_id": "R001", "quantity": 1 }],
                    "totalAmount": 1
                }))
                .unwrap(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::AmountMismatch { .. }));
        assert!(orders.append_log().is_empty());
        let captures = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path().ends_with("/capture"))
            .count();
        assert_eq!(captures, 0);
    }

    #[tokio::test]
    async fn unconfigured_rails_say_so() {
        let service = service(catalog_store(), Arc::new(MemorySheetStore::new()));
        assert!(matches!(
            service.execute_jpyc(&RelayRequest::default()).await,
            Err(CheckoutError::NotConfigured("JPYC"))
        ));
        assert_eq!(
            service.bank_details().unwrap_err().user_message(),
            "Bank transfer payments are not configured"
        );
    }
}
