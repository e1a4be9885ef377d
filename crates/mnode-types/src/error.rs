//! Error types for the mnode storage server.

use thiserror::Error;

/// Errors from the explicit single-encoding key parsers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    /// Input contained non-hex characters where hex was required.
    #[error("key data is invalid: data is not hex")]
    NotHex,

    /// Hex input had the wrong number of digits.
    #[error("key data is invalid: expected {expected} hex digits, received {actual}")]
    HexLength { expected: usize, actual: usize },

    /// Raw input had the wrong number of bytes.
    #[error("key data is invalid: expected {expected} bytes, received {actual}")]
    ByteLength { expected: usize, actual: usize },
}

/// Errors from channel encryption and decryption.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD authentication tag did not verify.
    #[error("decryption failed: authentication failed")]
    AuthFailed,

    /// CBC plaintext did not carry valid PKCS#7 padding.
    #[error("decryption failed: bad padding")]
    BadPadding,

    /// Key material was unusable for the requested operation.
    #[error("invalid key")]
    InvalidKey,
}

/// Errors from onion request processing. Each maps to an HTTP status for
/// the `[code, reason]` error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OnionError {
    /// The frame or an inner layer did not match the envelope grammar.
    #[error("invalid onion request")]
    Malformed,

    /// The layer ciphertext could not be decrypted.
    #[error("decrypt failed")]
    Decrypt,

    /// The hop counter reached the relay limit.
    #[error("hop limit exceeded")]
    HopLimit,

    /// The forward destination is not a known master node.
    #[error("unknown master node destination")]
    UnknownPeer,

    /// The routing control was structurally ambiguous or carried bad fields.
    #[error("invalid onion request control")]
    BadControl,

    /// The node is draining and no longer accepts requests.
    #[error("node is shutting down")]
    Shutdown,
}

impl OnionError {
    /// HTTP status carried in the `[code, reason]` error reply.
    pub fn status_code(&self) -> u16 {
        match self {
            OnionError::Malformed => 400,
            OnionError::Decrypt => 400,
            OnionError::HopLimit => 400,
            OnionError::BadControl => 400,
            OnionError::UnknownPeer => 502,
            OnionError::Shutdown => 503,
        }
    }
}

impl From<CryptoError> for OnionError {
    fn from(_: CryptoError) -> Self {
        OnionError::Decrypt
    }
}
