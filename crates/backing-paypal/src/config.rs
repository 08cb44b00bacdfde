use backing_types::config::{LiteralOrEnv, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Which PayPal environment orders are captured in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayPalMode {
    Live,
    #[default]
    Sandbox,
}

impl PayPalMode {
    pub fn base_url(&self) -> Url {
        let raw = match self {
            PayPalMode::Live => "https://api-m.paypal.com",
            PayPalMode::Sandbox => "https://api.sandbox.paypal.com",
        };
        Url::parse(raw).expect("static PayPal URL is valid")
    }
}

/// REST app credentials for one environment.
#[derive(Debug, Clone, Deserialize)]
pub struct PayPalCredentials {
    pub client_id: LiteralOrEnv<String>,
    pub secret: LiteralOrEnv<Secret>,
}

/// PayPal section of the server configuration.
///
/// ```json
/// {
///   "mode": "live",
///   "live": { "client_id": "$NEXT_PUBLIC_PAYPAL_CLIENT_ID", "secret": "$PAYPAL_SECRET_LIVE" },
///   "sandbox": { "client_id": "$NEXT_PUBLIC_PAYPAL_CLIENT_ID_SANDBOX", "secret": "$PAYPAL_SECRET_SANDBOX" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayPalConfig {
    #[serde(default)]
    pub mode: PayPalMode,
    #[serde(default)]
    pub live: Option<PayPalCredentials>,
    #[serde(default)]
    pub sandbox: Option<PayPalCredentials>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    15
}

impl PayPalConfig {
    /// Credentials of the active mode, if configured.
    pub fn active_credentials(&self) -> Option<&PayPalCredentials> {
        match self.mode {
            PayPalMode::Live => self.live.as_ref(),
            PayPalMode::Sandbox => self.sandbox.as_ref(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
