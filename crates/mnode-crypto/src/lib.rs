//! Channel encryption for the mnode storage server.
//!
//! This crate implements the symmetric ciphersuites used for onion request
//! layers and terminal responses, keyed through X25519 ECDH against a peer
//! pubkey.

mod channel;

pub use channel::{generate_x25519_keypair, ChannelEncryption, EncryptType};

pub use mnode_types::CryptoError;

/// Result type for channel encryption operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
