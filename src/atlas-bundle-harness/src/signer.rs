//! Operation signing and signer recovery (secp256k1, Ethereum `r || s || v` layout).

use alloy_primitives::{keccak256, Address, Bytes, B256};
use k256::{
    ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey,
};

use crate::{
    bundle::{Signable, Signed},
    collaborators::VerificationRegistry,
    errors::SignerError,
};

/// Ethereum address of a secp256k1 public key: low 20 bytes of `keccak256(x || y)`.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = PublicKey::from(key).to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// A party able to authorize its part of a bundle.
#[derive(Clone)]
pub struct OperationSigner {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for OperationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl OperationSigner {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    pub fn from_slice(secret: &[u8]) -> Result<Self, SignerError> {
        let key = SigningKey::from_slice(secret).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(secret: &str) -> Result<Self, SignerError> {
        let trimmed = secret.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Deterministic identity derived from `keccak256(label)`, for sandboxes and tests.
    pub fn from_label(label: &str) -> Result<Self, SignerError> {
        Self::from_slice(keccak256(label.as_bytes()).as_slice())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte digest. Returns `r || s || v` with `v` in `{27, 28}`.
    pub fn sign_digest(&self, digest: B256) -> Result<Bytes, SignerError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        let (r, s) = signature.split_bytes();

        let mut sig_bytes = Vec::with_capacity(65);
        sig_bytes.extend_from_slice(r.as_slice());
        sig_bytes.extend_from_slice(s.as_slice());
        sig_bytes.push(27 + recovery_id.to_byte());
        Ok(sig_bytes.into())
    }

    /// Sign a record over its canonical payload. Only the signature slot is written; the signer
    /// does not check that the record names this signer.
    pub fn sign<T, R>(&self, registry: &R, mut record: T) -> Result<Signed<T>, SignerError>
    where
        T: Signable,
        R: VerificationRegistry + ?Sized,
    {
        let payload = record.payload(registry)?;
        let signature = self.sign_digest(payload)?;
        *record.signature_slot() = signature;
        tracing::debug!(
            kind = T::KIND,
            signer = %self.address,
            declared = %record.declared_signer(),
            payload = %payload,
            "signed operation"
        );
        Ok(Signed::new(record))
    }
}

/// Recover the address that produced `signature` over `digest`.
///
/// `v` is accepted as `{0, 1}` or `{27, 28}`.
pub fn recover_signer(digest: B256, signature: &[u8]) -> Result<Address, SignerError> {
    if signature.len() != 65 {
        return Err(SignerError::MalformedSignature(signature.len()));
    }
    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        _ => return Err(SignerError::RecoveryFailed),
    };
    let recovery_id = RecoveryId::from_byte(v).ok_or(SignerError::RecoveryFailed)?;
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| SignerError::RecoveryFailed)?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recovery_id)
        .map_err(|_| SignerError::RecoveryFailed)?;
    Ok(address_of(&key))
}
