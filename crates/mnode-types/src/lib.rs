//! Core types for the mnode storage server.
//!
//! This crate provides the fundamental types used throughout the storage
//! server: the three flavors of node key material, user pubkeys with their
//! network prefix, node identity records, and the shared error taxonomy.

pub mod base32z;
mod error;
mod keys;
mod record;
mod user;

pub use error::*;
pub use keys::*;
pub use record::*;
pub use user::*;

/// Size constants for key material.
pub mod sizes {
    /// Size of any node public key (legacy, Ed25519, X25519) in bytes.
    pub const PUBKEY_SIZE: usize = 32;
    /// Size of a legacy or X25519 secret key in bytes.
    pub const SECKEY_SIZE: usize = 32;
    /// Size of an Ed25519 secret key in its expanded (seed + pubkey) form.
    pub const ED25519_SECKEY_SIZE: usize = 64;
    /// Size of a user pubkey in raw bytes: one netid byte + 32 key bytes.
    pub const USER_PUBKEY_SIZE_BYTES: usize = 33;
    /// Size of a user pubkey in prefixed hex.
    pub const USER_PUBKEY_SIZE_HEX: usize = 66;
    /// Length of a base32z-encoded 32-byte key.
    pub const BASE32Z_PUBKEY_LEN: usize = 52;
}
