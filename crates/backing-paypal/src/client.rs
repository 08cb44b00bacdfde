//! PayPal REST client: OAuth client-credentials token and order capture.

use backing_types::Yen;
use backing_types::money::{MoneyParseError, minor_units};
use backing_types::timestamp::UnixTimestamp;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;
use url::Url;

use crate::config::{PayPalConfig, PayPalCredentials};

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum PayPalError {
    #[error("PayPal credentials are not configured for {mode} mode")]
    CredentialsMissing { mode: &'static str },
    #[error("URL error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("PayPal authentication failed with status {status}: {body}")]
    AuthFailed { status: StatusCode, body: String },
    #[error("PayPal capture failed with status {status}: {body}")]
    CaptureFailed { status: StatusCode, body: String },
    #[error("PayPal capture for order {order_id} ended in status {status}")]
    CaptureNotCompleted { order_id: String, status: String },
    #[error("PayPal capture response carries no amount")]
    AmountMissing,
    #[error("PayPal captured amount is not a decimal: {0}")]
    AmountUnreadable(#[from] MoneyParseError),
    #[error("Payment amount mismatch: captured {captured} but expected {expected}")]
    AmountMismatch { captured: String, expected: Yen },
}

/// Outcome of a capture whose amount matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureVerification {
    /// The PayPal order id, recorded as the order's transaction id.
    pub transaction_id: String,
    /// Id of the capture inside the order, when PayPal reports one.
    pub capture_id: Option<String>,
    /// Amount exactly as PayPal reported it.
    pub captured_amount: String,
    pub currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    32_400
}

#[derive(Debug, Deserialize)]
struct Amount {
    #[serde(default)]
    currency_code: Option<String>,
    value: String,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    #[serde(default)]
    amount: Option<Amount>,
}

#[derive(Debug, Default, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    amount: Option<Amount>,
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct CapturedOrder {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Captures approved PayPal orders and checks what was captured.
pub struct PayPalClient {
    client: Client,
    base_url: Url,
    mode: &'static str,
    credentials: Option<PayPalCredentials>,
    timeout: Duration,
    token: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for PayPalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalClient")
            .field("base_url", &self.base_url.as_str())
            .field("mode", &self.mode)
            .field("configured", &self.credentials.is_some())
            .finish()
    }
}

impl PayPalClient {
    pub fn new(config: &PayPalConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.mode.base_url(),
            mode: match config.mode {
                crate::PayPalMode::Live => "live",
                crate::PayPalMode::Sandbox => "sandbox",
            },
            credentials: config.active_credentials().cloned(),
            timeout: config.timeout(),
            token: RwLock::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    fn url(&self, path: &str, context: &'static str) -> Result<Url, PayPalError> {
        self.base_url
            .join(path)
            .map_err(|source| PayPalError::UrlParse { context, source })
    }

    fn credentials(&self) -> Result<&PayPalCredentials, PayPalError> {
        self.credentials
            .as_ref()
            .ok_or(PayPalError::CredentialsMissing { mode: self.mode })
    }

    async fn access_token(&self) -> Result<String, PayPalError> {
        {
            let guard = self.token.read().await;
            if let Some(cached) = guard.as_ref().filter(|c| Instant::now() < c.expires_at) {
                return Ok(cached.token.clone());
            }
        }
        let mut guard = self.token.write().await;
        if let Some(cached) = guard.as_ref().filter(|c| Instant::now() < c.expires_at) {
            return Ok(cached.token.clone());
        }
        let context = "POST /v1/oauth2/token";
        let credentials = self.credentials()?;
        let response = self
            .client
            .post(self.url("/v1/oauth2/token", context)?)
            .basic_auth(credentials.client_id.inner(), Some(credentials.secret.expose()))
            .form(&[("grant_type", "client_credentials")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| PayPalError::Http { context, source })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PayPalError::AuthFailed { status, body });
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|source| PayPalError::JsonDeserialization { context, source })?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *guard = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    /// Captures `order_id` and checks the captured amount equals `expected_total`.
    ///
    /// The comparison is done in integer hundredths; `"10500.00"` matches ¥10500,
    /// `"10499.99"` does not. A mismatch is reported after the capture has happened
    /// and needs a manual refund.
    #[instrument(name = "paypal.capture", skip(self), fields(mode = self.mode), err)]
    pub async fn verify_and_capture(
        &self,
        order_id: &str,
        expected_total: Yen,
    ) -> Result<CaptureVerification, PayPalError> {
        let context = "POST /v2/checkout/orders/{id}/capture";
        let token = self.access_token().await?;
        let mut url = self.url("/v2/checkout/orders/", context)?;
        url.path_segments_mut()
            .map_err(|_| PayPalError::UrlParse {
                context,
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            })?
            .pop_if_empty()
            .push(order_id)
            .push("capture");
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("PayPal-Request-Id", UnixTimestamp::now_millis().to_string())
            .header("Prefer", "return=representation")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{}")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| PayPalError::Http { context, source })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PayPalError::CaptureFailed { status, body });
        }
        let order: CapturedOrder = response
            .json()
            .await
            .map_err(|source| PayPalError::JsonDeserialization { context, source })?;

        if let Some(order_status) = order.status.as_deref()
            && order_status != "COMPLETED"
        {
            return Err(PayPalError::CaptureNotCompleted {
                order_id: order_id.to_string(),
                status: order_status.to_string(),
            });
        }

        let unit = order.purchase_units.first().ok_or(PayPalError::AmountMissing)?;
        let capture = unit
            .payments
            .as_ref()
            .and_then(|p| p.captures.first());
        let amount = unit
            .amount
            .as_ref()
            .or_else(|| capture.and_then(|c| c.amount.as_ref()))
            .ok_or(PayPalError::AmountMissing)?;

        let captured = minor_units(&amount.value)?;
        if captured != expected_total.minor_units() {
            tracing::error!(
                order_id,
                captured = %amount.value,
                expected = expected_total.get(),
                "Captured PayPal amount does not match order total"
            );
            return Err(PayPalError::AmountMismatch {
                captured: amount.value.clone(),
                expected: expected_total,
            });
        }

        tracing::info!(order_id, amount = %amount.value, "PayPal capture verified");
        Ok(CaptureVerification {
            transaction_id: order_id.to_string(),
            capture_id: capture.map(|c| c.id.clone()),
            captured_amount: amount.value.clone(),
            currency_code: amount.currency_code.clone(),
        })
    }
}
