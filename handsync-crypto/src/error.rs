use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by token and digest helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid md5 digest: {0:?}")]
    InvalidMd5(String),

    #[error("invalid username {0:?}: expected at least 3 lowercase alphanumeric or underscore characters starting with a letter")]
    InvalidUsername(String),

    #[error("malformed login token: missing username separator")]
    MalformedToken,
}
