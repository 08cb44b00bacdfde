//! Fixtures shared by the tests of this crate.

use alloy_primitives::{Address, B256, TxHash, U256, address};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use backing_chain_jpyc::chain::{JPYC_POLYGON, POLYGON_CHAIN_ID};
use backing_chain_jpyc::client::{PermitParams, sign_permit};
use backing_chain_jpyc::{ChainCallError, JpycSettlement, JpycTokenProvider, SignedPermit};
use backing_paypal::{PayPalClient, PayPalConfig, PayPalCredentials, PayPalMode};
use backing_store::{Catalog, MemorySheetStore, OrderStore};
use backing_types::Yen;
use backing_types::config::{LiteralOrEnv, Secret};
use serde_json::json;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::orchestrator::CheckoutService;

pub const RELAY: Address = address!("0x2222222222222222222222222222222222222222");
pub const RECEIVER: Address = address!("0x3333333333333333333333333333333333333333");

/// R001 is digital at ¥3000, R002 ships at ¥5000.
pub fn catalog_store() -> Arc<MemorySheetStore> {
    Arc::new(
        MemorySheetStore::new()
            .with_rows(
                "rewards",
                vec![
                    vec![
                        json!("reward_id"),
                        json!("title"),
                        json!("unit_price"),
                        json!("description"),
                        json!("requires_shipping"),
                        json!("image_url"),
                    ],
                    vec![json!("R001"), json!("Thanks letter"), json!(3000), json!(""), json!("FALSE")],
                    vec![json!("R002"), json!("T-shirt"), json!(5000), json!(""), json!("TRUE")],
                ],
            )
            .with_rows(
                "dashboard",
                vec![
                    vec![json!("目標金額"), json!("100,000")],
                    vec![json!("現在の支援金額"), json!("25,000")],
                    vec![json!("支援者数"), json!("4")],
                ],
            ),
    )
}

pub fn service(catalog: Arc<MemorySheetStore>, orders: Arc<MemorySheetStore>) -> CheckoutService {
    CheckoutService::new(Catalog::new(catalog), OrderStore::new(orders))
}

pub fn service_with_paypal(
    catalog: Arc<MemorySheetStore>,
    orders: Arc<MemorySheetStore>,
    server: &MockServer,
) -> CheckoutService {
    let config = PayPalConfig {
        mode: PayPalMode::Sandbox,
        live: None,
        sandbox: Some(PayPalCredentials {
            client_id: LiteralOrEnv::from_literal("client".to_string()),
            secret: LiteralOrEnv::from_literal(Secret::new("secret")),
        }),
        timeout_secs: 5,
    };
    let client = PayPalClient::new(&config).with_base_url(server.uri().parse().unwrap());
    service(catalog, orders).with_paypal(client)
}

/// A PayPal sandbox that captures `order_id` for `amount`.
pub async fn paypal_server(order_id: &str, amount: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A21AA-token",
            "expires_in": 32400
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v2/checkout/orders/{order_id}/capture")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": order_id,
            "status": "COMPLETED",
            "purchase_units": [{
                "amount": { "currency_code": "JPY", "value": amount },
                "payments": { "captures": [{ "id": "CAPTURE-1", "status": "COMPLETED" }] }
            }]
        })))
        .mount(&server)
        .await;
    server
}

/// Token contract and relay wallet that confirm every transaction.
pub struct FakeToken {
    pub nonce: U256,
    pub transfers: Mutex<Vec<(Address, Address, U256)>>,
}

impl Default for FakeToken {
    fn default() -> Self {
        Self {
            nonce: U256::ZERO,
            transfers: Mutex::new(Vec::new()),
        }
    }
}

pub const PERMIT_TX: TxHash = B256::repeat_byte(0xaa);
pub const TRANSFER_TX: TxHash = B256::repeat_byte(0xbb);

#[async_trait]
impl JpycTokenProvider for FakeToken {
    fn relay_address(&self) -> Address {
        RELAY
    }

    fn token_address(&self) -> Address {
        JPYC_POLYGON
    }

    async fn chain_id(&self) -> Result<u64, ChainCallError> {
        Ok(POLYGON_CHAIN_ID)
    }

    async fn gas_balance(&self) -> Result<U256, ChainCallError> {
        Ok(U256::from(10u64.pow(17)))
    }

    async fn permit_nonce(&self, _owner: Address) -> Result<U256, ChainCallError> {
        Ok(self.nonce)
    }

    async fn permit(&self, _permit: &SignedPermit) -> Result<TxHash, ChainCallError> {
        Ok(PERMIT_TX)
    }

    async fn transfer_from(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<TxHash, ChainCallError> {
        self.transfers.lock().unwrap().push((from, to, value));
        Ok(TRANSFER_TX)
    }
}

pub fn relay(token: Arc<FakeToken>) -> Arc<JpycSettlement<Arc<FakeToken>>> {
    Arc::new(JpycSettlement::new(token))
}

/// A permit from a fresh wallet paying `total` to the relay.
pub async fn signed_permit(total: Yen, nonce: u64) -> (PrivateKeySigner, SignedPermit) {
    let signer = PrivateKeySigner::random();
    let params = PermitParams::for_total(POLYGON_CHAIN_ID, JPYC_POLYGON, RELAY, total, U256::from(nonce));
    let permit = sign_permit(&signer, &params).await.unwrap();
    (signer, permit)
}
