//! EIP-712 permit types shared by the signing wallet and the relay.
//!
//! Both sides must build the digest byte-for-byte identically: the domain
//! embeds the chain id and the token address, so a signature produced for
//! another chain or another deployment recovers to a different address.

use alloy_primitives::{Address, B256, Signature, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};

sol! {
    /// ERC-2612 permit message as signed by the token owner.
    #[derive(Debug, PartialEq, Eq)]
    struct Permit {
        address owner;
        address spender;
        uint256 value;
        uint256 nonce;
        uint256 deadline;
    }
}

pub const JPYC_DOMAIN_NAME: &str = "JPY Coin";
pub const JPYC_DOMAIN_VERSION: &str = "1";

/// EIP-712 domain of the JPYC token at `token` on `chain_id`.
pub fn jpyc_domain(chain_id: u64, token: Address) -> Eip712Domain {
    eip712_domain! {
        name: JPYC_DOMAIN_NAME,
        version: JPYC_DOMAIN_VERSION,
        chain_id: chain_id,
        verifying_contract: token,
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PermitSignatureError {
    #[error("recovery id v={0} is not one of 0, 1, 27, 28")]
    RecoveryId(u64),
}

/// A permit signature split into the `(v, r, s)` triple `permit` takes.
///
/// `v` is kept in the 27/28 form the token contract expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitSignature {
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

impl PermitSignature {
    /// Accepts `v` as either a parity bit (0/1) or 27/28.
    pub fn new(v: u64, r: B256, s: B256) -> Result<Self, PermitSignatureError> {
        let v = match v {
            0 | 1 => v as u8 + 27,
            27 | 28 => v as u8,
            other => return Err(PermitSignatureError::RecoveryId(other)),
        };
        Ok(Self { v, r, s })
    }

    pub fn from_signature(signature: &Signature) -> Self {
        Self {
            v: 27 + u8::from(signature.v()),
            r: B256::from(signature.r().to_be_bytes::<32>()),
            s: B256::from(signature.s().to_be_bytes::<32>()),
        }
    }

    pub fn y_parity(&self) -> bool {
        self.v == 28
    }

    pub fn to_signature(&self) -> Signature {
        Signature::new(
            U256::from_be_bytes(self.r.0),
            U256::from_be_bytes(self.s.0),
            self.y_parity(),
        )
    }
}

/// A permit message together with its owner's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPermit {
    pub owner: Address,
    pub spender: Address,
    pub value: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub signature: PermitSignature,
}

impl SignedPermit {
    pub fn message(&self) -> Permit {
        Permit {
            owner: self.owner,
            spender: self.spender,
            value: self.value,
            nonce: self.nonce,
            deadline: self.deadline,
        }
    }

    pub fn signing_hash(&self, domain: &Eip712Domain) -> B256 {
        self.message().eip712_signing_hash(domain)
    }

    /// Address that produced the signature over this message in `domain`.
    pub fn recover_signer(
        &self,
        domain: &Eip712Domain,
    ) -> Result<Address, alloy_primitives::SignatureError> {
        let hash = self.signing_hash(domain);
        self.signature.to_signature().recover_address_from_prehash(&hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{JPYC_POLYGON, POLYGON_CHAIN_ID};
    use alloy_primitives::address;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    fn signed(signer: &PrivateKeySigner, domain: &Eip712Domain) -> SignedPermit {
        let message = Permit {
            owner: signer.address(),
            spender: address!("0x1111111111111111111111111111111111111111"),
            value: U256::from(10_000u64),
            nonce: U256::from(4u8),
            deadline: U256::from(1_900_000_000u64),
        };
        let signature = signer
            .sign_hash_sync(&message.eip712_signing_hash(domain))
            .unwrap();
        SignedPermit {
            owner: message.owner,
            spender: message.spender,
            value: message.value,
            nonce: message.nonce,
            deadline: message.deadline,
            signature: PermitSignature::from_signature(&signature),
        }
    }

    #[test]
    fn recovers_owner_in_same_domain() {
        let signer = PrivateKeySigner::random();
        let domain = jpyc_domain(POLYGON_CHAIN_ID, JPYC_POLYGON);
        let permit = signed(&signer, &domain);
        assert_eq!(permit.recover_signer(&domain).unwrap(), signer.address());
    }

    #[test]
    fn other_chain_recovers_someone_else() {
        let signer = PrivateKeySigner::random();
        let permit = signed(&signer, &jpyc_domain(80002, JPYC_POLYGON));
        let recovered = permit
            .recover_signer(&jpyc_domain(POLYGON_CHAIN_ID, JPYC_POLYGON))
            .unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn tampered_value_changes_signer() {
        let signer = PrivateKeySigner::random();
        let domain = jpyc_domain(POLYGON_CHAIN_ID, JPYC_POLYGON);
        let mut permit = signed(&signer, &domain);
        permit.value += U256::from(1u8);
        let recovered = permit.recover_signer(&domain).ok();
        assert_ne!(recovered, Some(signer.address()));
    }

    #[test]
    fn normalizes_recovery_id() {
        let r = B256::repeat_byte(1);
        let s = B256::repeat_byte(2);
        assert_eq!(PermitSignature::new(0, r, s).unwrap().v, 27);
        assert_eq!(PermitSignature::new(1, r, s).unwrap().v, 28);
        assert_eq!(PermitSignature::new(28, r, s).unwrap().v, 28);
        assert_eq!(
            PermitSignature::new(35, r, s),
            Err(PermitSignatureError::RecoveryId(35))
        );
    }

    #[test]
    fn split_signature_round_trips() {
        let signer = PrivateKeySigner::random();
        let signature = signer.sign_hash_sync(&B256::repeat_byte(7)).unwrap();
        let split = PermitSignature::from_signature(&signature);
        assert_eq!(split.to_signature(), signature);
    }
}
