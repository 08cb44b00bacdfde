//! HTTP endpoints of the checkout.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /checkout` | commit a bank transfer, or a JPYC payment after relaying |
//! | `POST /checkout/paypal-confirm` | capture an approved PayPal order and commit it |
//! | `POST /jpyc/execute` | relay a signed JPYC permit: `permit` then `transferFrom` |
//! | `GET /rewards` | reward catalog |
//! | `GET /dashboard` | campaign progress |
//! | `GET /bank-details` | account to transfer to |
//!
//! Failures always answer `{ "success": false, "error" | "message": ..., "debug"?: ... }`.
//! Bodies are parsed here rather than through the `Json` extractor so that a
//! malformed body gets the same envelope.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use backing_chain_jpyc::{RelayRequest, Settlement, SettlementStep};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::error::{CheckoutError, ErrorKind};
use crate::orchestrator::CheckoutService;
use crate::request::{CheckoutRequest, PayPalConfirmRequest};

pub fn routes() -> Router<Arc<CheckoutService>> {
    Router::new()
        .route("/checkout", post(post_checkout))
        .route("/checkout/paypal-confirm", post(post_paypal_confirm))
        .route("/jpyc/execute", post(post_jpyc_execute))
        .route("/rewards", get(get_rewards))
        .route("/dashboard", get(get_dashboard))
        .route("/bank-details", get(get_bank_details))
}

#[derive(Debug, Serialize)]
struct CreatedOrder {
    backing_id: String,
    backer_id: String,
    total_amount: u64,
    payment_method: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct PayPalConfirmed {
    success: bool,
    backing_id: String,
    backer_id: String,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JpycExecuted {
    success: bool,
    message: &'static str,
    permit_tx_hash: String,
    transfer_tx_hash: String,
    transaction_hash: String,
    debug: serde_json::Value,
}

impl From<Settlement> for JpycExecuted {
    fn from(settlement: Settlement) -> Self {
        let transfer_tx_hash = settlement.transfer_tx_hash.to_string();
        Self {
            success: true,
            message: "JPYC payment completed",
            permit_tx_hash: settlement.permit_tx_hash.to_string(),
            transaction_hash: transfer_tx_hash.clone(),
            transfer_tx_hash,
            debug: json!({
                "owner": settlement.owner.to_string(),
                "receiver": settlement.receiver.to_string(),
                "amount": settlement.amount.to_string(),
                "orderId": settlement.order_id,
            }),
        }
    }
}

fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Integrity => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::ExternalService | ErrorKind::PartialCommit | ErrorKind::NotConfigured => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn log_failure(error: &CheckoutError, what: &'static str) {
    match error.kind() {
        ErrorKind::Validation => tracing::debug!(error = %error, "{what} rejected"),
        ErrorKind::Integrity | ErrorKind::Conflict => {
            tracing::warn!(error = %error, "{what} rejected")
        }
        _ => tracing::error!(error = ?error, "{what} failed"),
    }
}

/// `{ success: false, error }` with the status of the error kind.
fn error_response(error: &CheckoutError) -> Response {
    (
        status_of(error.kind()),
        Json(json!({ "success": false, "error": error.user_message() })),
    )
        .into_response()
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, serde_json::Error> {
    serde_json::from_slice(body)
}

fn invalid_json(error: &serde_json::Error) -> CheckoutError {
    CheckoutError::Validation(format!("Invalid JSON body: {error}"))
}

/// `POST /checkout`
#[instrument(skip_all)]
pub async fn post_checkout(
    State(service): State<Arc<CheckoutService>>,
    body: Bytes,
) -> impl IntoResponse {
    let request: CheckoutRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&invalid_json(&e)),
    };
    match service.checkout(request).await {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "data": CreatedOrder {
                    backing_id: outcome.receipt.backing_id,
                    backer_id: outcome.receipt.backer_id,
                    total_amount: outcome.total_amount.get(),
                    payment_method: outcome.payment_method.as_str(),
                    message: "Order created successfully.",
                },
            })),
        )
            .into_response(),
        Err(error) => {
            log_failure(&error, "Checkout");
            error_response(&error)
        }
    }
}

/// `POST /checkout/paypal-confirm`
///
/// Errors use `message` rather than `error`, as the PayPal button expects.
#[instrument(skip_all)]
pub async fn post_paypal_confirm(
    State(service): State<Arc<CheckoutService>>,
    body: Bytes,
) -> impl IntoResponse {
    let result = match parse_body::<PayPalConfirmRequest>(&body) {
        Ok(request) => service.confirm_paypal(request).await,
        Err(e) => Err(invalid_json(&e)),
    };
    match result {
        Ok(receipt) => (
            StatusCode::OK,
            Json(PayPalConfirmed {
                success: true,
                backing_id: receipt.backing_id,
                backer_id: receipt.backer_id,
                message: "Payment confirmed and order created",
            }),
        )
            .into_response(),
        Err(error) => {
            log_failure(&error, "PayPal confirmation");
            (
                status_of(error.kind()),
                Json(json!({ "success": false, "message": error.user_message() })),
            )
                .into_response()
        }
    }
}

/// `POST /jpyc/execute`
///
/// Every failure carries `debug.step`, naming the gate that stopped the relay.
#[instrument(skip_all)]
pub async fn post_jpyc_execute(
    State(service): State<Arc<CheckoutService>>,
    body: Bytes,
) -> impl IntoResponse {
    let request: RelayRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": "Invalid JSON body",
                    "debug": { "step": SettlementStep::JsonParse.as_str(), "error": e.to_string() },
                })),
            )
                .into_response();
        }
    };
    match service.execute_jpyc(&request).await {
        Ok(settlement) => (StatusCode::OK, Json(JpycExecuted::from(settlement))).into_response(),
        Err(error) => {
            log_failure(&error, "JPYC relay");
            let debug = match &error {
                CheckoutError::Settlement(e) => e.debug(),
                other => json!({ "step": SettlementStep::CatchAll.as_str(), "error": other.to_string() }),
            };
            (
                status_of(error.kind()),
                Json(json!({ "success": false, "error": error.user_message(), "debug": debug })),
            )
                .into_response()
        }
    }
}

/// `GET /rewards`: the catalog as a bare array.
#[instrument(skip_all)]
pub async fn get_rewards(State(service): State<Arc<CheckoutService>>) -> impl IntoResponse {
    match service.rewards().await {
        Ok(rewards) => (StatusCode::OK, Json(rewards)).into_response(),
        Err(error) => {
            log_failure(&error, "Reward catalog read");
            error_response(&error)
        }
    }
}

/// `GET /dashboard`
#[instrument(skip_all)]
pub async fn get_dashboard(State(service): State<Arc<CheckoutService>>) -> impl IntoResponse {
    match service.dashboard().await {
        Ok(stats) => (StatusCode::OK, Json(json!({ "success": true, "data": stats }))).into_response(),
        Err(error) => {
            log_failure(&error, "Dashboard read");
            error_response(&error)
        }
    }
}

/// `GET /bank-details`
#[instrument(skip_all)]
pub async fn get_bank_details(State(service): State<Arc<CheckoutService>>) -> impl IntoResponse {
    match service.bank_details() {
        Ok(details) => {
            (StatusCode::OK, Json(json!({ "success": true, "data": details }))).into_response()
        }
        Err(error) => {
            log_failure(&error, "Bank details");
            error_response(&error)
        }
    }
}
