//! MD5 content digests.

use crate::error::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated lowercase hex MD5 digest (32 chars).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Md5Hex(String);

impl Md5Hex {
    /// Parses a digest, accepting only `^[a-f0-9]{32}$`.
    pub fn parse(value: &str) -> CryptoResult<Self> {
        let valid = value.len() == 32
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(CryptoError::InvalidMd5(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw 16-byte digest.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        // Validated on construction.
        hex::decode_to_slice(&self.0, &mut out).unwrap_or_default();
        out
    }

    /// Base64 form used by the `Content-MD5` header.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }
}

impl fmt::Display for Md5Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Md5Hex {
    type Error = CryptoError;

    fn try_from(value: String) -> CryptoResult<Self> {
        Self::parse(&value)
    }
}

impl From<Md5Hex> for String {
    fn from(value: Md5Hex) -> Self {
        value.0
    }
}

/// Incremental MD5 over streamed chunks.
#[derive(Clone, Default)]
pub struct ContentDigest {
    hasher: Md5,
    bytes: u64,
}

impl ContentDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn bytes_digested(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> Md5Hex {
        Md5Hex(hex::encode(self.hasher.finalize()))
    }

    /// One-shot digest of an in-memory buffer.
    pub fn of(data: &[u8]) -> Md5Hex {
        let mut digest = Self::new();
        digest.update(data);
        digest.finalize()
    }
}
