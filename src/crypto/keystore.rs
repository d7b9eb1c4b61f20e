//! Passphrase-encrypted storage for the node's proposer key.
//!
//! File layout: `[4B magic "SCPK"][1B version][32B salt][24B nonce][ciphertext + 16B tag]`.
//! The key is derived from the passphrase with Argon2id and the 32-byte scalar
//! is sealed with XChaCha20-Poly1305.

use crate::crypto::key_pair::PrivateKey;
use crate::info;
use argon2::Argon2;
use chacha20poly1305::XChaCha20Poly1305;
use chacha20poly1305::aead::{Aead, KeyInit};
use rand_core::{OsRng, RngCore};
use stakechain_derive::Error;
use std::fs;
use std::io;
use std::path::Path;
use zeroize::Zeroizing;

const MAGIC: &[u8; 4] = b"SCPK";
const VERSION: u8 = 1;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const HEADER_LEN: usize = MAGIC.len() + 1 + SALT_LEN + NONCE_LEN;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("key file i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("key file is truncated")]
    Truncated,
    #[error("not a proposer key file")]
    BadMagic,
    #[error("unsupported key file version {0}")]
    UnsupportedVersion(u8),
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("decryption failed: wrong passphrase or corrupt file")]
    Decryption,
    #[error("encryption failed")]
    Encryption,
    #[error("decrypted bytes are not a valid private key")]
    InvalidKey,
}

fn derive_key(passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(passphrase, salt, key.as_mut())
        .map_err(|e| KeystoreError::Kdf(e.to_string()))?;
    Ok(key)
}

pub fn save_encrypted_key(
    key: &PrivateKey,
    path: &Path,
    passphrase: &[u8],
) -> Result<(), KeystoreError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let derived = derive_key(passphrase, &salt)?;
    let cipher = XChaCha20Poly1305::new(derived.as_ref().into());
    let secret = key.to_bytes();
    let ciphertext = cipher
        .encrypt(nonce.as_ref().into(), secret.as_ref())
        .map_err(|_| KeystoreError::Encryption)?;

    let mut data = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    data.extend_from_slice(MAGIC);
    data.push(VERSION);
    data.extend_from_slice(&salt);
    data.extend_from_slice(&nonce);
    data.extend_from_slice(&ciphertext);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &data)?;
    Ok(())
}

pub fn load_encrypted_key(path: &Path, passphrase: &[u8]) -> Result<PrivateKey, KeystoreError> {
    let data = fs::read(path)?;
    if data.len() < HEADER_LEN + TAG_LEN {
        return Err(KeystoreError::Truncated);
    }
    if &data[..MAGIC.len()] != MAGIC {
        return Err(KeystoreError::BadMagic);
    }
    let version = data[MAGIC.len()];
    if version != VERSION {
        return Err(KeystoreError::UnsupportedVersion(version));
    }

    let salt_start = MAGIC.len() + 1;
    let salt = &data[salt_start..salt_start + SALT_LEN];
    let nonce = &data[salt_start + SALT_LEN..HEADER_LEN];

    let derived = derive_key(passphrase, salt)?;
    let cipher = XChaCha20Poly1305::new(derived.as_ref().into());
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(nonce.into(), &data[HEADER_LEN..])
            .map_err(|_| KeystoreError::Decryption)?,
    );

    PrivateKey::from_bytes(&plaintext).map_err(|_| KeystoreError::InvalidKey)
}

/// Loads the key at `path`, or generates and stores a new one.
pub fn load_or_generate_key(path: &Path, passphrase: &[u8]) -> Result<PrivateKey, KeystoreError> {
    if path.exists() {
        info!("Loading proposer key from {}", path.display());
        return load_encrypted_key(path, passphrase);
    }
    let key = PrivateKey::new();
    save_encrypted_key(&key, path, passphrase)?;
    info!(
        "Generated proposer key {} at {}",
        key.address().short(),
        path.display()
    );
    Ok(key)
}
