//! Login token derivation and account secrets.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Number of hash rounds applied when deriving a login token.
pub const TOKEN_ROUNDS: usize = 1000;

/// Derives the login token for `username` and `password`.
///
/// Each round hashes the previous token and re-prefixes the username, so
/// the result always reads `"<username>:<64 hex chars>"`.
pub fn derive_login_token(username: &str, password: &str) -> String {
    let mut token = Zeroizing::new(format!("{username}:{password}"));
    for _ in 0..TOKEN_ROUNDS {
        let hashed = hex::encode(Sha256::digest(token.as_bytes()));
        token = Zeroizing::new(format!("{username}:{hashed}"));
    }
    token.to_string()
}

/// Returns the username embedded in a login token.
pub fn username_of(login_token: &str) -> CryptoResult<&str> {
    login_token
        .split_once(':')
        .map(|(user, _)| user)
        .ok_or(CryptoError::MalformedToken)
}

/// Checks `^[a-z][a-z0-9_]{2,}$`.
pub fn validate_username(username: &str) -> CryptoResult<()> {
    let mut chars = username.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && username.len() >= 3
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(CryptoError::InvalidUsername(username.to_string()))
    }
}

/// Generates a random 32-byte account password, hex encoded.
///
/// The password only lives long enough to derive a token from it.
pub fn generate_password() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(&mut bytes[..]);
    Zeroizing::new(hex::encode(&bytes[..]))
}

/// Generates a short random device identifier (4 bytes, hex encoded).
pub fn generate_device_id() -> String {
    let mut bytes = [0u8; 4];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
