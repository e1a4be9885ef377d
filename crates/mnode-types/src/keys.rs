//! Node key types.
//!
//! Each master node is identified by three keypairs: a legacy primary key
//! (an Ed25519 scalar used without clamping), a standard Ed25519 signing
//! key, and an X25519 key-exchange key. The pubkey flavors are distinct
//! types on purpose; a 32-byte legacy key and a 32-byte X25519 key must
//! never be interchangeable.

use std::fmt;

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use crate::base32z;
use crate::error::KeyParseError;
use crate::sizes::*;

fn hex_to_array<const N: usize>(input: &str) -> Result<[u8; N], KeyParseError> {
    if !input.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(KeyParseError::NotHex);
    }
    if input.len() != 2 * N {
        return Err(KeyParseError::HexLength {
            expected: 2 * N,
            actual: input.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(input, &mut out).map_err(|_| KeyParseError::NotHex)?;
    Ok(out)
}

fn bytes_to_array<const N: usize>(input: &[u8]) -> Result<[u8; N], KeyParseError> {
    if input.len() != N {
        return Err(KeyParseError::ByteLength {
            expected: N,
            actual: input.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(input);
    Ok(out)
}

/// Permissive multi-encoding pubkey decode: 32 raw bytes, 64 hex digits,
/// 43 (or 44 `=`-padded) base64 characters, or 52 base32z characters, in
/// that fingerprint order. `None` means no encoding matched; a warning is
/// logged because callers generally go on to treat the key as absent.
fn decode_pubkey(input: &[u8]) -> Option<[u8; PUBKEY_SIZE]> {
    if input.len() == PUBKEY_SIZE {
        let mut out = [0u8; PUBKEY_SIZE];
        out.copy_from_slice(input);
        return Some(out);
    }
    if let Ok(text) = std::str::from_utf8(input) {
        if text.len() == 2 * PUBKEY_SIZE && text.bytes().all(|c| c.is_ascii_hexdigit()) {
            return hex_to_array(text).ok();
        }
        let b64 = text.strip_suffix('=').unwrap_or(text);
        if text.len() == 43 || (text.len() == 44 && b64.len() == 43) {
            use base64::Engine as _;
            if let Ok(bytes) = base64::engine::general_purpose::STANDARD_NO_PAD.decode(b64) {
                if bytes.len() == PUBKEY_SIZE {
                    return bytes_to_array(&bytes).ok();
                }
            }
        }
        if text.len() == BASE32Z_PUBKEY_LEN && base32z::is_base32z(text) {
            if let Some(bytes) = base32z::decode(text) {
                if bytes.len() == PUBKEY_SIZE {
                    return bytes_to_array(&bytes).ok();
                }
            }
        }
    }
    tracing::warn!("Invalid public key: not valid bytes, hex, b64, or b32z encoded");
    tracing::debug!(size = input.len(), "Received unparseable public key value");
    None
}

macro_rules! impl_pubkey {
    ($name:ident) => {
        impl $name {
            /// Create from exactly 32 raw bytes.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyParseError> {
                bytes_to_array(bytes).map(Self)
            }

            /// Create from exactly 64 hex digits.
            pub fn from_hex(input: &str) -> Result<Self, KeyParseError> {
                hex_to_array(input).map(Self)
            }

            /// Get the raw key bytes.
            #[inline]
            pub fn as_bytes(&self) -> &[u8; PUBKEY_SIZE] {
                &self.0
            }

            /// Hex encoding of the key.
            pub fn hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; PUBKEY_SIZE]> for $name {
            fn from(bytes: [u8; PUBKEY_SIZE]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = KeyParseError;

            fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
                Self::from_bytes(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }
    };
}

macro_rules! impl_seckey {
    ($name:ident, $size:expr) => {
        impl $name {
            /// Create from raw bytes of exactly the key length.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyParseError> {
                bytes_to_array(bytes).map(Self)
            }

            /// Create from hex.
            pub fn from_hex(input: &str) -> Result<Self, KeyParseError> {
                hex_to_array(input).map(Self)
            }

            /// Get the raw key bytes.
            #[inline]
            pub fn as_bytes(&self) -> &[u8; $size] {
                &self.0
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                // Constant-time comparison for secret material
                let mut diff = 0u8;
                for (a, b) in self.0.iter().zip(other.0.iter()) {
                    diff |= a ^ b;
                }
                diff == 0
            }
        }

        impl Eq for $name {}

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "([REDACTED])"))
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                for byte in &mut self.0 {
                    unsafe {
                        std::ptr::write_volatile(byte, 0);
                    }
                }
                std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
            }
        }
    };
}

/// The legacy primary pubkey of a master node.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LegacyPubkey([u8; PUBKEY_SIZE]);

impl_pubkey!(LegacyPubkey);

impl LegacyPubkey {
    /// Textual node address: z-base-32 of the key followed by `.mnode`.
    pub fn mnode_address(&self) -> String {
        let mut addr = base32z::encode(&self.0);
        addr.push_str(".mnode");
        addr
    }
}

/// The Ed25519 identity pubkey of a master node.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ed25519Pubkey([u8; PUBKEY_SIZE]);

impl_pubkey!(Ed25519Pubkey);

impl Ed25519Pubkey {
    /// Textual node address: z-base-32 of the key followed by `.mnode`.
    pub fn mnode_address(&self) -> String {
        let mut addr = base32z::encode(&self.0);
        addr.push_str(".mnode");
        addr
    }
}

/// The X25519 key-exchange pubkey of a master node.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct X25519Pubkey([u8; PUBKEY_SIZE]);

impl_pubkey!(X25519Pubkey);

/// The legacy primary secret key: an Ed25519 scalar multiplied against the
/// base point without clamping.
#[derive(Clone)]
pub struct LegacySeckey([u8; SECKEY_SIZE]);

impl_seckey!(LegacySeckey, SECKEY_SIZE);

impl LegacySeckey {
    /// Derive the matching pubkey: no-clamp Ed25519 base-point scalar
    /// multiplication. Legacy secrets are already reduced scalars.
    pub fn pubkey(&self) -> LegacyPubkey {
        let scalar = Scalar::from_bytes_mod_order(self.0);
        let point = EdwardsPoint::mul_base(&scalar);
        LegacyPubkey(point.compress().to_bytes())
    }
}

/// An Ed25519 secret key in the 64-byte expanded (seed + pubkey) form.
#[derive(Clone)]
pub struct Ed25519Seckey([u8; ED25519_SECKEY_SIZE]);

impl_seckey!(Ed25519Seckey, ED25519_SECKEY_SIZE);

impl Ed25519Seckey {
    /// Generate a fresh signing key.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self(signing_key.to_keypair_bytes())
    }

    /// Derive the matching pubkey: the second half of the expanded secret.
    pub fn pubkey(&self) -> Ed25519Pubkey {
        let mut out = [0u8; PUBKEY_SIZE];
        out.copy_from_slice(&self.0[PUBKEY_SIZE..]);
        Ed25519Pubkey(out)
    }
}

/// An X25519 key-exchange secret key.
#[derive(Clone)]
pub struct X25519Seckey([u8; SECKEY_SIZE]);

impl_seckey!(X25519Seckey, SECKEY_SIZE);

impl X25519Seckey {
    /// Generate a fresh key-exchange key.
    pub fn generate() -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        Self(secret.to_bytes())
    }

    /// Derive the matching pubkey: Curve25519 base-point scalar
    /// multiplication.
    pub fn pubkey(&self) -> X25519Pubkey {
        let secret = x25519_dalek::StaticSecret::from(self.0);
        X25519Pubkey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }
}

/// Parse a legacy pubkey from any supported encoding.
pub fn parse_legacy_pubkey(input: &[u8]) -> Option<LegacyPubkey> {
    decode_pubkey(input).map(LegacyPubkey)
}

/// Parse an Ed25519 pubkey from any supported encoding.
pub fn parse_ed25519_pubkey(input: &[u8]) -> Option<Ed25519Pubkey> {
    decode_pubkey(input).map(Ed25519Pubkey)
}

/// Parse an X25519 pubkey from any supported encoding.
pub fn parse_x25519_pubkey(input: &[u8]) -> Option<X25519Pubkey> {
    decode_pubkey(input).map(X25519Pubkey)
}
