//! Relay-side settlement of a signed JPYC permit.
//!
//! [`JpycSettlement::settle`] runs a fixed sequence of gates and stops at the
//! first violation:
//!
//! 1. every field present, `v`, `r` and `s` well-formed
//! 2. `deadline` not in the past
//! 3. `spender` is the relay wallet
//! 4. the relay wallet has gas
//! 5. the node is on the expected chain
//! 6. the EIP-712 digest, rebuilt from the server's own domain, recovers `owner`
//! 7. the token's `nonces(owner)` equals the signed nonce
//!
//! Only then is `permit` sent, and only after it is confirmed `transferFrom`.
//! Nothing is sent on-chain when a gate fails.

use alloy_primitives::{Address, B256, TxHash, U256};
use async_trait::async_trait;
use backing_types::timestamp::UnixTimestamp;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

use crate::chain::POLYGON_CHAIN_ID;
use crate::permit::{PermitSignature, SignedPermit, jpyc_domain};

/// A JSON scalar that wallets send either as a number or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(serde_json::Number),
    Text(String),
}

impl Scalar {
    fn text(&self) -> String {
        match self {
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s.trim().to_string(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Scalar::Text(s) if s.trim().is_empty())
    }
}

impl From<U256> for Scalar {
    fn from(value: U256) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::Number(value.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySignature {
    #[serde(default)]
    pub v: Option<Scalar>,
    #[serde(default)]
    pub r: Option<String>,
    #[serde(default)]
    pub s: Option<String>,
}

/// Body of `POST /jpyc/execute`, as sent by the wallet.
///
/// Every field is optional on the wire so that a missing one is reported by
/// the validation gate rather than as a JSON error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub spender: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub amount: Option<Scalar>,
    #[serde(default)]
    pub deadline: Option<Scalar>,
    #[serde(default)]
    pub nonce: Option<Scalar>,
    #[serde(default)]
    pub signature: Option<RelaySignature>,
    #[serde(default)]
    pub order_id: Option<String>,
}

impl RelayRequest {
    /// Request body for relaying `permit`, paying out to `receiver`.
    pub fn from_permit(permit: &SignedPermit, receiver: Address, order_id: Option<String>) -> Self {
        Self {
            owner: Some(permit.owner.to_string()),
            spender: Some(permit.spender.to_string()),
            receiver: Some(receiver.to_string()),
            amount: Some(permit.value.into()),
            deadline: Some(permit.deadline.into()),
            nonce: Some(permit.nonce.into()),
            signature: Some(RelaySignature {
                v: Some(u64::from(permit.signature.v).into()),
                r: Some(permit.signature.r.to_string()),
                s: Some(permit.signature.s.to_string()),
            }),
            order_id,
        }
    }

    fn presence(&self) -> FieldPresence {
        fn present_str(v: &Option<String>) -> bool {
            v.as_deref().is_some_and(|s| !s.trim().is_empty())
        }
        fn present_scalar(v: &Option<Scalar>) -> bool {
            v.as_ref().is_some_and(|s| !s.is_blank())
        }
        FieldPresence {
            owner: present_str(&self.owner),
            spender: present_str(&self.spender),
            receiver: present_str(&self.receiver),
            amount: present_scalar(&self.amount),
            deadline: present_scalar(&self.deadline),
            nonce: present_scalar(&self.nonce),
            signature: self.signature.is_some(),
        }
    }
}

/// Which required fields of a [`RelayRequest`] were present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldPresence {
    pub owner: bool,
    pub spender: bool,
    pub receiver: bool,
    pub amount: bool,
    pub deadline: bool,
    pub nonce: bool,
    pub signature: bool,
}

impl FieldPresence {
    fn missing(&self) -> Vec<&'static str> {
        [
            ("owner", self.owner),
            ("spender", self.spender),
            ("receiver", self.receiver),
            ("amount", self.amount),
            ("deadline", self.deadline),
            ("nonce", self.nonce),
            ("signature", self.signature),
        ]
        .into_iter()
        .filter_map(|(name, present)| (!present).then_some(name))
        .collect()
    }
}

impl Display for FieldPresence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.missing().join(", "))
    }
}

/// The gate a settlement stopped at, as reported in `debug.step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStep {
    JsonParse,
    Validation,
    SignatureValidation,
    DeadlineCheck,
    SpenderValidation,
    GasBalanceCheck,
    Eip712Verification,
    NonceCheck,
    NonceMismatch,
    Permit,
    TransferFrom,
    CatchAll,
}

impl SettlementStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStep::JsonParse => "json_parse",
            SettlementStep::Validation => "validation",
            SettlementStep::SignatureValidation => "signature_validation",
            SettlementStep::DeadlineCheck => "deadline_check",
            SettlementStep::SpenderValidation => "spender_validation",
            SettlementStep::GasBalanceCheck => "gas_balance_check",
            SettlementStep::Eip712Verification => "eip712_verification",
            SettlementStep::NonceCheck => "nonce_check",
            SettlementStep::NonceMismatch => "nonce_mismatch",
            SettlementStep::Permit => "permit",
            SettlementStep::TransferFrom => "transferFrom",
            SettlementStep::CatchAll => "catch_all",
        }
    }
}

impl Display for SettlementStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the token contract rejected a `permit`, read from the revert text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitRevert {
    Nonce,
    Signature,
    Deadline,
    Other,
}

impl PermitRevert {
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("nonce") {
            PermitRevert::Nonce
        } else if message.contains("signature") {
            PermitRevert::Signature
        } else if message.contains("deadline") || message.contains("expired") {
            PermitRevert::Deadline
        } else {
            PermitRevert::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermitRevert::Nonce => "nonce",
            PermitRevert::Signature => "signature",
            PermitRevert::Deadline => "deadline",
            PermitRevert::Other => "unknown",
        }
    }

    fn user_message(&self) -> &'static str {
        match self {
            PermitRevert::Nonce => "The permit nonce is invalid or has already been used",
            PermitRevert::Signature => "The permit signature is invalid",
            PermitRevert::Deadline => "The permit signature has expired",
            PermitRevert::Other => "The permit transaction failed",
        }
    }
}

/// Failure of a single call through a [`JpycTokenProvider`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChainCallError {
    #[error("{0}")]
    Rpc(String),
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: TxHash },
    #[error("transaction {tx_hash} not confirmed after {attempts} receipt attempts")]
    Unconfirmed { tx_hash: TxHash, attempts: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("missing required fields: {0}")]
    MissingFields(FieldPresence),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("permit deadline {deadline} is before now ({now})")]
    DeadlineExpired { deadline: u64, now: u64 },
    #[error("spender {received} is not the relay wallet {expected}")]
    SpenderMismatch { expected: Address, received: Address },
    #[error("relay wallet {relay} has no gas balance")]
    InsufficientGas { relay: Address },
    #[error("wrong chain: expected {expected}, connected to {actual}")]
    WrongChain { expected: u64, actual: u64 },
    #[error("signature does not match owner {owner}: {reason}")]
    SignatureInvalid { owner: Address, reason: String },
    #[error("nonce mismatch: contract expects {expected}, signature has {received}")]
    NonceMismatch { expected: U256, received: U256 },
    #[error("{step} failed: {source}")]
    Chain {
        step: SettlementStep,
        source: ChainCallError,
    },
    #[error("permit failed ({}): {source}", .reason.as_str())]
    PermitFailed {
        reason: PermitRevert,
        source: ChainCallError,
    },
    #[error("transferFrom failed after permit {permit_tx_hash}: {source}")]
    TransferFailed {
        permit_tx_hash: TxHash,
        source: ChainCallError,
    },
}

impl SettlementError {
    pub fn step(&self) -> SettlementStep {
        match self {
            SettlementError::MissingFields(_) | SettlementError::InvalidField { .. } => {
                SettlementStep::Validation
            }
            SettlementError::MalformedSignature(_) => SettlementStep::SignatureValidation,
            SettlementError::DeadlineExpired { .. } => SettlementStep::DeadlineCheck,
            SettlementError::SpenderMismatch { .. } => SettlementStep::SpenderValidation,
            SettlementError::InsufficientGas { .. } => SettlementStep::GasBalanceCheck,
            SettlementError::WrongChain { .. } | SettlementError::SignatureInvalid { .. } => {
                SettlementStep::Eip712Verification
            }
            SettlementError::NonceMismatch { .. } => SettlementStep::NonceMismatch,
            SettlementError::Chain { step, .. } => *step,
            SettlementError::PermitFailed { .. } => SettlementStep::Permit,
            SettlementError::TransferFailed { .. } => SettlementStep::TransferFrom,
        }
    }

    /// Whether the request itself is at fault, as opposed to the chain or the relay.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SettlementError::MissingFields(_)
                | SettlementError::InvalidField { .. }
                | SettlementError::MalformedSignature(_)
                | SettlementError::DeadlineExpired { .. }
                | SettlementError::SpenderMismatch { .. }
                | SettlementError::WrongChain { .. }
                | SettlementError::SignatureInvalid { .. }
                | SettlementError::NonceMismatch { .. }
        )
    }

    /// Message safe to show to the backer.
    pub fn user_message(&self) -> String {
        match self {
            SettlementError::MissingFields(_) => "Required fields are missing".to_string(),
            SettlementError::InvalidField { field, .. } => format!("The {field} field is invalid"),
            SettlementError::MalformedSignature(_) => "Signature v, r and s are invalid".to_string(),
            SettlementError::DeadlineExpired { .. } => "The signature has expired".to_string(),
            SettlementError::SpenderMismatch { .. } => {
                "The spender address does not match the relay wallet".to_string()
            }
            SettlementError::InsufficientGas { .. } => {
                "The relay wallet has no gas balance".to_string()
            }
            SettlementError::WrongChain { .. } | SettlementError::SignatureInvalid { .. } => {
                "EIP-712 signature verification failed".to_string()
            }
            SettlementError::NonceMismatch { expected, received } => format!(
                "Nonce mismatch: the contract expects nonce {expected} but the signature was created with nonce {received}"
            ),
            SettlementError::Chain { step, .. } => match step {
                SettlementStep::NonceCheck => "Failed to check the permit nonce".to_string(),
                _ => "The blockchain node could not be reached".to_string(),
            },
            SettlementError::PermitFailed { reason, .. } => reason.user_message().to_string(),
            SettlementError::TransferFailed { .. } => {
                "The transferFrom transaction failed".to_string()
            }
        }
    }

    /// Diagnostic payload for `debug` in the error envelope.
    pub fn debug(&self) -> serde_json::Value {
        let step = self.step().as_str();
        match self {
            SettlementError::MissingFields(presence) => json!({
                "step": step,
                "owner": presence.owner,
                "spender": presence.spender,
                "receiver": presence.receiver,
                "amount": presence.amount,
                "deadline": presence.deadline,
                "nonce": presence.nonce,
                "signature": presence.signature,
            }),
            SettlementError::InvalidField { field, reason } => {
                json!({ "step": step, "field": field, "error": reason })
            }
            SettlementError::MalformedSignature(reason) => json!({ "step": step, "error": reason }),
            SettlementError::DeadlineExpired { deadline, now } => {
                json!({ "step": step, "deadline": deadline, "currentTimestamp": now })
            }
            SettlementError::SpenderMismatch { expected, received } => json!({
                "step": step,
                "expected": expected.to_string(),
                "received": received.to_string(),
            }),
            SettlementError::InsufficientGas { relay } => {
                json!({ "step": step, "relay": relay.to_string(), "balance": "0" })
            }
            SettlementError::NonceMismatch { expected, received } => json!({
                "step": step,
                "expected": expected.to_string(),
                "received": received.to_string(),
            }),
            SettlementError::PermitFailed { reason, source } => json!({
                "step": step,
                "errorMessage": source.to_string(),
                "errorReason": reason.as_str(),
            }),
            SettlementError::TransferFailed {
                permit_tx_hash,
                source,
            } => json!({
                "step": step,
                "errorMessage": source.to_string(),
                "permitTxHash": permit_tx_hash.to_string(),
            }),
            SettlementError::WrongChain { .. }
            | SettlementError::SignatureInvalid { .. }
            | SettlementError::Chain { .. } => json!({ "step": step, "error": self.to_string() }),
        }
    }
}

/// Both confirmed transactions of a settled permit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub permit_tx_hash: TxHash,
    pub transfer_tx_hash: TxHash,
    pub owner: Address,
    pub receiver: Address,
    pub amount: U256,
    pub order_id: Option<String>,
}

/// The token and relay wallet operations settlement needs.
///
/// `permit` and `transfer_from` return only once the transaction is
/// confirmed; a mined but reverted transaction is [`ChainCallError::Reverted`].
#[async_trait]
pub trait JpycTokenProvider: Send + Sync {
    fn relay_address(&self) -> Address;
    fn token_address(&self) -> Address;
    async fn chain_id(&self) -> Result<u64, ChainCallError>;
    async fn gas_balance(&self) -> Result<U256, ChainCallError>;
    async fn permit_nonce(&self, owner: Address) -> Result<U256, ChainCallError>;
    async fn permit(&self, permit: &SignedPermit) -> Result<TxHash, ChainCallError>;
    async fn transfer_from(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<TxHash, ChainCallError>;
}

#[async_trait]
impl<T: JpycTokenProvider + ?Sized> JpycTokenProvider for Arc<T> {
    fn relay_address(&self) -> Address {
        (**self).relay_address()
    }

    fn token_address(&self) -> Address {
        (**self).token_address()
    }

    async fn chain_id(&self) -> Result<u64, ChainCallError> {
        (**self).chain_id().await
    }

    async fn gas_balance(&self) -> Result<U256, ChainCallError> {
        (**self).gas_balance().await
    }

    async fn permit_nonce(&self, owner: Address) -> Result<U256, ChainCallError> {
        (**self).permit_nonce(owner).await
    }

    async fn permit(&self, permit: &SignedPermit) -> Result<TxHash, ChainCallError> {
        (**self).permit(permit).await
    }

    async fn transfer_from(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<TxHash, ChainCallError> {
        (**self).transfer_from(from, to, value).await
    }
}

/// Executes signed permits on behalf of backers.
#[async_trait]
pub trait PermitRelay: Send + Sync {
    fn relay_address(&self) -> Address;
    async fn execute(&self, request: &RelayRequest) -> Result<Settlement, SettlementError>;
}

/// A request that passed the offline gates.
struct PermitClaim {
    permit: SignedPermit,
    receiver: Address,
    deadline: u64,
}

fn parse_address(field: &'static str, raw: &Option<String>) -> Result<Address, SettlementError> {
    let raw = raw.as_deref().unwrap_or_default();
    Address::from_str(raw.trim()).map_err(|e| SettlementError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn parse_u256(field: &'static str, raw: &Option<Scalar>) -> Result<U256, SettlementError> {
    let text = raw.as_ref().map(Scalar::text).unwrap_or_default();
    U256::from_str(&text).map_err(|e| SettlementError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn parse_signature(raw: &RelaySignature) -> Result<PermitSignature, SettlementError> {
    let present = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());
    let v_present = raw.v.as_ref().is_some_and(|v| !v.is_blank());
    if !v_present || !present(&raw.r) || !present(&raw.s) {
        return Err(SettlementError::MalformedSignature(
            "v, r and s are all required".to_string(),
        ));
    }
    let v = raw.v.as_ref().map(Scalar::text).unwrap_or_default();
    let v = match v.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => v.parse::<u64>(),
    }
    .map_err(|e| SettlementError::MalformedSignature(format!("v: {e}")))?;
    let word = |name: &str, value: &Option<String>| {
        B256::from_str(value.as_deref().unwrap_or_default().trim())
            .map_err(|e| SettlementError::MalformedSignature(format!("{name}: {e}")))
    };
    let r = word("r", &raw.r)?;
    let s = word("s", &raw.s)?;
    PermitSignature::new(v, r, s).map_err(|e| SettlementError::MalformedSignature(e.to_string()))
}

fn parse_claim(request: &RelayRequest) -> Result<PermitClaim, SettlementError> {
    let presence = request.presence();
    if !presence.missing().is_empty() {
        return Err(SettlementError::MissingFields(presence));
    }
    let signature = parse_signature(request.signature.as_ref().unwrap_or(&RelaySignature::default()))?;
    let owner = parse_address("owner", &request.owner)?;
    let spender = parse_address("spender", &request.spender)?;
    let receiver = parse_address("receiver", &request.receiver)?;
    let value = parse_u256("amount", &request.amount)?;
    if value.is_zero() {
        return Err(SettlementError::InvalidField {
            field: "amount",
            reason: "must be positive".to_string(),
        });
    }
    let nonce = parse_u256("nonce", &request.nonce)?;
    let deadline_word = parse_u256("deadline", &request.deadline)?;
    let deadline = u64::try_from(deadline_word).map_err(|_| SettlementError::InvalidField {
        field: "deadline",
        reason: "out of range".to_string(),
    })?;
    Ok(PermitClaim {
        permit: SignedPermit {
            owner,
            spender,
            value,
            nonce,
            deadline: deadline_word,
            signature,
        },
        receiver,
        deadline,
    })
}

/// The gated permit relay over a [`JpycTokenProvider`].
pub struct JpycSettlement<P> {
    provider: P,
    expected_chain_id: u64,
}

impl<P: JpycTokenProvider> JpycSettlement<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            expected_chain_id: POLYGON_CHAIN_ID,
        }
    }

    pub fn with_expected_chain_id(mut self, chain_id: u64) -> Self {
        self.expected_chain_id = chain_id;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[instrument(skip_all, err, fields(order_id = ?request.order_id))]
    pub async fn settle(&self, request: &RelayRequest) -> Result<Settlement, SettlementError> {
        let claim = parse_claim(request)?;
        let permit = &claim.permit;

        let now = UnixTimestamp::now().as_secs();
        if claim.deadline < now {
            return Err(SettlementError::DeadlineExpired {
                deadline: claim.deadline,
                now,
            });
        }

        let relay = self.provider.relay_address();
        if permit.spender != relay {
            return Err(SettlementError::SpenderMismatch {
                expected: relay,
                received: permit.spender,
            });
        }

        let balance = self
            .provider
            .gas_balance()
            .await
            .map_err(|source| SettlementError::Chain {
                step: SettlementStep::GasBalanceCheck,
                source,
            })?;
        if balance.is_zero() {
            return Err(SettlementError::InsufficientGas { relay });
        }

        let chain_id = self
            .provider
            .chain_id()
            .await
            .map_err(|source| SettlementError::Chain {
                step: SettlementStep::Eip712Verification,
                source,
            })?;
        if chain_id != self.expected_chain_id {
            return Err(SettlementError::WrongChain {
                expected: self.expected_chain_id,
                actual: chain_id,
            });
        }

        let domain = jpyc_domain(chain_id, self.provider.token_address());
        match permit.recover_signer(&domain) {
            Ok(recovered) if recovered == permit.owner => {}
            Ok(recovered) => {
                return Err(SettlementError::SignatureInvalid {
                    owner: permit.owner,
                    reason: format!("recovered {recovered}"),
                });
            }
            Err(e) => {
                return Err(SettlementError::SignatureInvalid {
                    owner: permit.owner,
                    reason: e.to_string(),
                });
            }
        }

        let on_chain_nonce = self
            .provider
            .permit_nonce(permit.owner)
            .await
            .map_err(|source| SettlementError::Chain {
                step: SettlementStep::NonceCheck,
                source,
            })?;
        if on_chain_nonce != permit.nonce {
            tracing::warn!(owner = %permit.owner, expected = %on_chain_nonce, received = %permit.nonce, "permit nonce mismatch");
            return Err(SettlementError::NonceMismatch {
                expected: on_chain_nonce,
                received: permit.nonce,
            });
        }

        let permit_tx_hash = self.provider.permit(permit).await.map_err(|source| {
            let reason = PermitRevert::classify(&source.to_string());
            SettlementError::PermitFailed { reason, source }
        })?;
        tracing::info!(owner = %permit.owner, tx = %permit_tx_hash, "permit confirmed");

        let transfer_tx_hash = self
            .provider
            .transfer_from(permit.owner, claim.receiver, permit.value)
            .await
            .map_err(|source| {
                tracing::error!(owner = %permit.owner, permit_tx = %permit_tx_hash, error = %source, "transferFrom failed after permit, allowance left unused");
                SettlementError::TransferFailed {
                    permit_tx_hash,
                    source,
                }
            })?;
        tracing::info!(
            owner = %permit.owner,
            receiver = %claim.receiver,
            amount = %permit.value,
            tx = %transfer_tx_hash,
            "transferFrom confirmed"
        );

        Ok(Settlement {
            permit_tx_hash,
            transfer_tx_hash,
            owner: permit.owner,
            receiver: claim.receiver,
            amount: permit.value,
            order_id: request.order_id.clone(),
        })
    }
}

#[async_trait]
impl<P: JpycTokenProvider> PermitRelay for JpycSettlement<P> {
    fn relay_address(&self) -> Address {
        self.provider.relay_address()
    }

    async fn execute(&self, request: &RelayRequest) -> Result<Settlement, SettlementError> {
        self.settle(request).await
    }
}
