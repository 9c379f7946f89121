//! Credential and digest primitives for handsync.
//!
//! Provides:
//! - Login token derivation (1000-round salted SHA-256 chain)
//! - Random account secrets and device identifiers
//! - Streaming MD5 content digests with hex/base64 forms
//!
//! # Login tokens
//!
//! A login token is `"<username>:<hex>"`, where the hex part is the result
//! of repeatedly hashing the previous token prefixed by the username. Only
//! the derived token is ever persisted or sent to the server; the password
//! it came from is discarded right after derivation.
//!
//! # Content digests
//!
//! Files are identified to the upload server by their MD5. The resumable
//! upload endpoint wants the same digest base64-encoded in a `Content-MD5`
//! header, so [`Md5Hex`] converts between both representations.

mod digest;
mod error;
mod token;

pub use digest::{ContentDigest, Md5Hex};
pub use error::{CryptoError, CryptoResult};
pub use token::{
    derive_login_token, generate_device_id, generate_password, username_of, validate_username,
    TOKEN_ROUNDS,
};
