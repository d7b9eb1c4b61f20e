//! ECDSA key pairs on secp256k1.
//!
//! Addresses are the lowercase hex of the uncompressed SEC1 public key, so a
//! signature can be checked against an address with no registry lookup.
//! All signing is over a precomputed 32-byte SHA-256 digest.

use crate::types::address::Address;
use crate::types::hash::Hash;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use stakechain_derive::{BinaryCodec, Error};
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("private key bytes are not a valid secp256k1 scalar")]
    InvalidPrivateKey,
    #[error("ecdsa signing failed: {0}")]
    Signing(String),
}

/// Secret signing key. Never serialized or sent over the wire.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

/// Verifying key together with the address derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
    address: Address,
}

/// DER-encoded ECDSA signature, hex in JSON.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Signature(Vec<u8>);

impl PrivateKey {
    /// Generates a key from OS entropy.
    pub fn new() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        SigningKey::from_slice(bytes)
            .map(|key| Self { key })
            .map_err(|_| CryptoError::InvalidPrivateKey)
    }

    /// Raw scalar, wiped on drop.
    pub(crate) fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.key.to_bytes().into())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(*self.key.verifying_key())
    }

    pub fn address(&self) -> Address {
        self.public_key().address
    }

    /// Signs a digest that was already computed by the caller.
    pub fn sign_digest(&self, digest: &Hash) -> Result<Signature, CryptoError> {
        let signature: EcdsaSignature = self
            .key
            .sign_prehash(digest.as_slice())
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(Signature(signature.to_der().as_bytes().to_vec()))
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey({})", self.address().short())
    }
}

impl PublicKey {
    fn from_verifying_key(key: VerifyingKey) -> Self {
        let encoded = key.to_encoded_point(false);
        let address = Address::new(hex::encode(encoded.as_bytes()));
        Self { key, address }
    }

    /// Recovers the public key an address was derived from.
    ///
    /// Returns `None` for reserved names and malformed hex.
    pub fn from_address(address: &Address) -> Option<Self> {
        let bytes = hex::decode(address.as_str()).ok()?;
        let key = VerifyingKey::from_sec1_bytes(&bytes).ok()?;
        Some(Self::from_verifying_key(key))
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Checks `signature` over `digest`. Malformed signatures are `false`.
    pub fn verify_digest(&self, digest: &Hash, signature: &Signature) -> bool {
        match EcdsaSignature::from_der(&signature.0) {
            Ok(sig) => self.key.verify_prehash(digest.as_slice(), &sig).is_ok(),
            Err(_) => false,
        }
    }
}

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_der(bytes: Vec<u8>) -> Self {
        Signature(bytes)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text)
            .map(Signature)
            .map_err(serde::de::Error::custom)
    }
}

/// Verifies `signature` over `digest` using `address` as the public key.
pub fn verify_with_address(address: &Address, digest: &Hash, signature: &Signature) -> bool {
    PublicKey::from_address(address)
        .map(|key| key.verify_digest(digest, signature))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(data: &[u8]) -> Hash {
        let mut h = Hash::sha256();
        h.update(data);
        h.finalize()
    }

    #[test]
    fn sign_verify_success() {
        let key = PrivateKey::new();
        let d = digest(b"hello");
        let sig = key.sign_digest(&d).unwrap();
        assert!(key.public_key().verify_digest(&d, &sig));
    }

    #[test]
    fn verify_fails_for_other_key() {
        let key = PrivateKey::new();
        let other = PrivateKey::new();
        let d = digest(b"hello");
        let sig = other.sign_digest(&d).unwrap();
        assert!(!key.public_key().verify_digest(&d, &sig));
    }

    #[test]
    fn verify_fails_for_tampered_digest() {
        let key = PrivateKey::new();
        let sig = key.sign_digest(&digest(b"hello")).unwrap();
        assert!(!key.public_key().verify_digest(&digest(b"hello!"), &sig));
    }

    #[test]
    fn malformed_signature_is_false_not_panic() {
        let key = PrivateKey::new();
        let bogus = Signature::from_der(vec![0x30, 0x01, 0xff]);
        assert!(!key.public_key().verify_digest(&digest(b"x"), &bogus));
    }

    #[test]
    fn address_is_uncompressed_sec1_hex() {
        let address = PrivateKey::new().address();
        assert_eq!(address.as_str().len(), 130);
        assert!(address.as_str().starts_with("04"));
    }

    #[test]
    fn address_round_trips_to_public_key() {
        let key = PrivateKey::new();
        let public = PublicKey::from_address(&key.address()).unwrap();
        assert_eq!(public, key.public_key());
    }

    #[test]
    fn reserved_address_has_no_public_key() {
        assert!(PublicKey::from_address(&Address::genesis()).is_none());
        let d = digest(b"x");
        let sig = PrivateKey::new().sign_digest(&d).unwrap();
        assert!(!verify_with_address(&Address::genesis(), &d, &sig));
    }

    #[test]
    fn from_bytes_is_deterministic() {
        let bytes = [7u8; 32];
        let a = PrivateKey::from_bytes(&bytes).unwrap();
        let b = PrivateKey::from_bytes(&bytes).unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn from_bytes_rejects_zero_scalar() {
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn signature_json_is_hex() {
        let sig = Signature::from_der(vec![0xab, 0xcd]);
        assert_eq!(serde_json::to_string(&sig).unwrap(), "\"abcd\"");
    }
}
