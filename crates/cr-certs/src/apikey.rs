//! Per-domain shared secret used to gate private key downloads.
//!
//! A key is 32 raw bytes (the width of a SHA-256 digest) and travels as
//! 64 lowercase hex characters, both in config files and in the
//! `Authorization: Bearer` header.

use crate::types::{CertError, CertResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const API_KEY_SIZE: usize = 32;
pub const ENCODED_SIZE: usize = API_KEY_SIZE * 2;

#[derive(Clone, Copy)]
pub struct ApiKey([u8; API_KEY_SIZE]);

impl ApiKey {
    pub const fn from_bytes(bytes: [u8; API_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive a key from an operator passphrase (SHA-256 of its UTF-8 bytes).
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        Self(digest.into())
    }

    /// Decode the canonical hex form. Anything other than exactly
    /// 64 hex characters is rejected and no key is produced.
    pub fn decode(text: &str) -> CertResult<Self> {
        if text.len() != ENCODED_SIZE {
            return Err(CertError::InvalidKeyEncoding);
        }
        let mut bytes = [0u8; API_KEY_SIZE];
        hex::decode_to_slice(text, &mut bytes).map_err(|_| CertError::InvalidKeyEncoding)?;
        Ok(Self(bytes))
    }

    pub fn encode(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; API_KEY_SIZE] {
        &self.0
    }

    /// Compare two keys without branching on their contents, so the time
    /// taken does not depend on where the first differing byte is.
    pub fn ct_eq(&self, other: &ApiKey) -> bool {
        let diff = self
            .0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        std::hint::black_box(diff) == 0
    }
}

impl PartialEq for ApiKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other)
    }
}

impl Eq for ApiKey {}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl FromStr for ApiKey {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::decode(&text).map_err(serde::de::Error::custom)
    }
}
