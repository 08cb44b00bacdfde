use alloy_primitives::TxHash;
use backing_chain_jpyc::SettlementError;
use backing_paypal::PayPalError;
use backing_store::{CatalogError, OrderStoreError};
use backing_types::Yen;

/// How a checkout failure is reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input.
    Validation,
    /// Money or signature does not add up: amount, signature, deadline, spender, chain.
    Integrity,
    /// The request raced another one, e.g. a permit nonce already used.
    Conflict,
    /// A processor, the chain or the sheet store failed or is unreachable.
    ExternalService,
    /// The order store wrote some rows of an order but not all.
    PartialCommit,
    /// The rail is not configured on this server.
    NotConfigured,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Validation(String),
    #[error("submitted total {submitted} does not match the computed total {expected}")]
    AmountMismatch { expected: Yen, submitted: Yen },
    #[error("no unclaimed JPYC settlement with transfer hash {0}")]
    UnknownSettlement(TxHash),
    #[error("{0} payments are not configured")]
    NotConfigured(&'static str),
    #[error("reward catalog unavailable: {0}")]
    Catalog(#[source] CatalogError),
    #[error(transparent)]
    Store(#[from] OrderStoreError),
    #[error(transparent)]
    PayPal(#[from] PayPalError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

impl From<CatalogError> for CheckoutError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::UnknownReward(_) | CatalogError::InvalidQuantity(_) => {
                CheckoutError::Validation(error.to_string())
            }
            CatalogError::Store(_) => CheckoutError::Catalog(error),
        }
    }
}

impl CheckoutError {
    pub fn validation(message: impl Into<String>) -> Self {
        CheckoutError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::Validation(_) => ErrorKind::Validation,
            CheckoutError::AmountMismatch { .. } => ErrorKind::Integrity,
            CheckoutError::UnknownSettlement(_) => ErrorKind::Integrity,
            CheckoutError::NotConfigured(_) => ErrorKind::NotConfigured,
            CheckoutError::Catalog(_) => ErrorKind::ExternalService,
            CheckoutError::Store(OrderStoreError::PartialCommit { .. }) => ErrorKind::PartialCommit,
            CheckoutError::Store(OrderStoreError::EmptyOrder) => ErrorKind::Validation,
            CheckoutError::Store(_) => ErrorKind::ExternalService,
            CheckoutError::PayPal(
                PayPalError::AmountMismatch { .. } | PayPalError::CaptureNotCompleted { .. },
            ) => ErrorKind::Integrity,
            CheckoutError::PayPal(_) => ErrorKind::ExternalService,
            CheckoutError::Settlement(SettlementError::NonceMismatch { .. }) => ErrorKind::Conflict,
            CheckoutError::Settlement(
                SettlementError::MissingFields(_)
                | SettlementError::InvalidField { .. }
                | SettlementError::MalformedSignature(_),
            ) => ErrorKind::Validation,
            CheckoutError::Settlement(e) if e.is_rejection() => ErrorKind::Integrity,
            CheckoutError::Settlement(_) => ErrorKind::ExternalService,
        }
    }

    /// Message safe to show to the backer. Provider details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            CheckoutError::Validation(message) => message.clone(),
            CheckoutError::AmountMismatch { .. } => "Payment amount mismatch".to_string(),
            CheckoutError::UnknownSettlement(_) => {
                "JPYC transaction is unknown or already recorded".to_string()
            }
            CheckoutError::NotConfigured(_) => self.to_string(),
            CheckoutError::Catalog(_) => "Failed to read the reward catalog".to_string(),
            CheckoutError::Store(OrderStoreError::EmptyOrder) => {
                "items must be a non-empty array".to_string()
            }
            CheckoutError::Store(_) => "Failed to create order".to_string(),
            CheckoutError::PayPal(PayPalError::AmountMismatch { .. }) => {
                "Payment amount mismatch".to_string()
            }
            CheckoutError::PayPal(PayPalError::CaptureNotCompleted { .. }) => {
                "Payment was not completed".to_string()
            }
            CheckoutError::PayPal(PayPalError::CredentialsMissing { .. }) => {
                "PayPal payments are not configured".to_string()
            }
            CheckoutError::PayPal(_) => "Failed to capture the PayPal payment".to_string(),
            CheckoutError::Settlement(e) => e.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use backing_store::{CommitStage, SheetStoreError};

    #[test]
    fn unknown_reward_is_a_validation_error() {
        let error = CheckoutError::from(CatalogError::UnknownReward("R999".into()));
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.user_message(), "unknown reward R999");
    }

    #[test]
    fn integrity_and_conflict_are_told_apart() {
        let mismatch = CheckoutError::AmountMismatch {
            expected: Yen::new(10500),
            submitted: Yen::new(100),
        };
        assert_eq!(mismatch.kind(), ErrorKind::Integrity);

        let nonce = CheckoutError::from(SettlementError::NonceMismatch {
            expected: U256::from(4u8),
            received: U256::from(3u8),
        });
        assert_eq!(nonce.kind(), ErrorKind::Conflict);

        let expired = CheckoutError::from(SettlementError::DeadlineExpired { deadline: 1, now: 2 });
        assert_eq!(expired.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn unclaimed_settlement_is_an_integrity_error() {
        let error = CheckoutError::UnknownSettlement(TxHash::repeat_byte(0xcd));
        assert_eq!(error.kind(), ErrorKind::Integrity);
        assert_eq!(error.user_message(), "JPYC transaction is unknown or already recorded");
        assert!(error.to_string().contains("0xcdcd"));
    }

    #[test]
    fn partial_commit_hides_store_details() {
        let error = CheckoutError::from(OrderStoreError::PartialCommit {
            backer_id: "B001".into(),
            backing_id: None,
            failed: CommitStage::Order,
            source: SheetStoreError::Unavailable("quota".into()),
        });
        assert_eq!(error.kind(), ErrorKind::PartialCommit);
        assert_eq!(error.user_message(), "Failed to create order");
    }
}
