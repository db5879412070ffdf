//! Ed25519 signing behind a small `Signer` seam.
//!
//! Addresses are the lowercase hex encoding of the 32-byte verifying key, so a
//! verifier needs nothing beyond the transaction itself.

use std::fmt;

use ed25519_dalek::{
    Signature, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;

use crate::error::{LedgerError, LedgerResult};

/// Anything able to sign payloads on behalf of a ledger address.
pub trait Signer {
    fn address(&self) -> String;
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_hex(secret: &str) -> LedgerResult<Self> {
        let bytes = hex::decode(secret.trim()).map_err(|e| LedgerError::InvalidKey(e.to_string()))?;
        let bytes: [u8; SECRET_KEY_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
            LedgerError::InvalidKey(format!(
                "secret key must be {SECRET_KEY_LENGTH} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self {
            signing: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }
}

impl Signer for Keypair {
    fn address(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        ed25519_dalek::Signer::sign(&self.signing, payload)
            .to_bytes()
            .to_vec()
    }
}

impl fmt::Debug for Keypair {
    // never print the secret half
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish()
    }
}

pub fn decode_address(address: &str) -> LedgerResult<VerifyingKey> {
    let bytes = hex::decode(address).map_err(|e| LedgerError::InvalidKey(e.to_string()))?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
        LedgerError::InvalidKey(format!(
            "address must be {PUBLIC_KEY_LENGTH} bytes, got {}",
            v.len()
        ))
    })?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| LedgerError::InvalidKey(e.to_string()))
}

/// Checks `signature` over `payload` against the key encoded in `address`.
pub fn verify(address: &str, payload: &[u8], signature: &[u8]) -> LedgerResult<()> {
    let key = decode_address(address)?;
    let invalid = || LedgerError::SignatureInvalid {
        sender: address.to_string(),
    };
    let signature = Signature::from_slice(signature).map_err(|_| invalid())?;
    key.verify(payload, &signature).map_err(|_| invalid())
}
