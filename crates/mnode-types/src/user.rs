//! User pubkeys.
//!
//! Client-facing pubkeys carry a one-byte network id prefix: 0 on mainnet,
//! 5 on testnet. Testnet additionally accepts the unprefixed forms, with
//! the netid implied.

use std::fmt;

use crate::sizes::{USER_PUBKEY_SIZE_BYTES, USER_PUBKEY_SIZE_HEX};

/// Mainnet network id prefix.
pub const NETID_MAINNET: u8 = 0;
/// Testnet network id prefix.
pub const NETID_TESTNET: u8 = 5;
/// Marker for a pubkey that failed to load.
const NETID_INVALID: u8 = 0xFF;

/// A user pubkey: network id byte plus 32 bytes of key material. An
/// unloadable input yields the invalid marker (netid `0xFF`, empty body).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UserPubkey {
    netid: u8,
    key: Vec<u8>,
}

impl UserPubkey {
    /// Load a user pubkey from one of the accepted shapes: 66 prefixed hex
    /// digits, 33 raw bytes, or (testnet only) 64 hex digits / 32 raw bytes
    /// with netid 5 implied.
    pub fn load(input: &[u8], mainnet: bool) -> Self {
        let text = std::str::from_utf8(input).ok().filter(|t| is_hex(t));
        if let Some(t) = text {
            if t.len() == USER_PUBKEY_SIZE_HEX {
                let mut netid = [0u8; 1];
                hex::decode_to_slice(&t[..2], &mut netid).expect("validated hex");
                return Self {
                    netid: netid[0],
                    key: hex::decode(&t[2..]).expect("validated hex"),
                };
            }
            if !mainnet && t.len() == USER_PUBKEY_SIZE_HEX - 2 {
                return Self {
                    netid: NETID_TESTNET,
                    key: hex::decode(t).expect("validated hex"),
                };
            }
        }
        if input.len() == USER_PUBKEY_SIZE_BYTES {
            return Self {
                netid: input[0],
                key: input[1..].to_vec(),
            };
        }
        if !mainnet && input.len() == USER_PUBKEY_SIZE_BYTES - 1 {
            return Self {
                netid: NETID_TESTNET,
                key: input.to_vec(),
            };
        }
        Self {
            netid: NETID_INVALID,
            key: Vec::new(),
        }
    }

    /// Whether the record loaded successfully.
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty()
    }

    /// The network id byte.
    pub fn netid(&self) -> u8 {
        self.netid
    }

    /// The key material without the network prefix.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Hex of the key material without the network prefix.
    pub fn hex(&self) -> String {
        hex::encode(&self.key)
    }

    /// Canonical prefixed hex. The netid prefix is carried unless it is 0
    /// on a non-mainnet network. Empty for an invalid record.
    pub fn prefixed_hex(&self, mainnet: bool) -> String {
        if self.key.is_empty() {
            return String::new();
        }
        let mut out = String::with_capacity(USER_PUBKEY_SIZE_HEX);
        if !(self.netid == 0 && !mainnet) {
            out.push_str(&hex::encode([self.netid]));
        }
        out.push_str(&hex::encode(&self.key));
        out
    }

    /// Raw netid byte followed by the key material. Empty for an invalid
    /// record.
    pub fn prefixed_raw(&self) -> Vec<u8> {
        if self.key.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(USER_PUBKEY_SIZE_BYTES);
        out.push(self.netid);
        out.extend_from_slice(&self.key);
        out
    }
}

fn is_hex(input: &str) -> bool {
    !input.is_empty() && input.bytes().all(|c| c.is_ascii_hexdigit())
}

impl fmt::Debug for UserPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "UserPubkey({:02x}, {})", self.netid, hex::encode(&self.key))
        } else {
            write!(f, "UserPubkey(invalid)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210";

    #[test]
    fn loads_prefixed_hex() {
        let pk = UserPubkey::load(format!("05{KEY_HEX}").as_bytes(), true);
        assert!(pk.is_valid());
        assert_eq!(pk.netid(), NETID_TESTNET);
        assert_eq!(pk.hex(), KEY_HEX);
        assert_eq!(pk.prefixed_hex(true), format!("05{KEY_HEX}"));
    }

    #[test]
    fn loads_raw_bytes() {
        let mut raw = vec![NETID_MAINNET];
        raw.extend_from_slice(&hex::decode(KEY_HEX).unwrap());
        let pk = UserPubkey::load(&raw, true);
        assert!(pk.is_valid());
        assert_eq!(pk.netid(), NETID_MAINNET);
        assert_eq!(pk.prefixed_raw(), raw);
    }

    #[test]
    fn testnet_accepts_unprefixed_forms() {
        let pk = UserPubkey::load(KEY_HEX.as_bytes(), false);
        assert!(pk.is_valid());
        assert_eq!(pk.netid(), NETID_TESTNET);

        let raw = hex::decode(KEY_HEX).unwrap();
        let pk = UserPubkey::load(&raw, false);
        assert!(pk.is_valid());
        assert_eq!(pk.netid(), NETID_TESTNET);

        // mainnet rejects the same shapes
        assert!(!UserPubkey::load(KEY_HEX.as_bytes(), true).is_valid());
        assert!(!UserPubkey::load(&raw, true).is_valid());
    }

    #[test]
    fn netid_zero_is_elided_off_mainnet() {
        let mut raw = vec![0u8];
        raw.extend_from_slice(&hex::decode(KEY_HEX).unwrap());
        let pk = UserPubkey::load(&raw, false);
        assert_eq!(pk.prefixed_hex(false), KEY_HEX);
        assert_eq!(pk.prefixed_hex(true), format!("00{KEY_HEX}"));
    }

    #[test]
    fn invalid_inputs_yield_the_invalid_marker() {
        let pk = UserPubkey::load(b"nonsense", true);
        assert!(!pk.is_valid());
        assert_eq!(pk.netid(), 0xFF);
        assert!(pk.prefixed_hex(true).is_empty());
        assert!(pk.prefixed_raw().is_empty());
    }
}
