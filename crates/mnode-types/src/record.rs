//! Master node identity records.

use crate::keys::{Ed25519Pubkey, LegacyPubkey, X25519Pubkey};

/// The public identity of a master node as tracked by the master-node
/// service. The core only reads these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Public IP address.
    pub ip: String,
    /// HTTPS (onion request) port.
    pub https_port: u16,
    /// Message-bus port.
    pub bus_port: u16,
    /// Legacy primary pubkey.
    pub pubkey_legacy: LegacyPubkey,
    /// Ed25519 identity pubkey.
    pub pubkey_ed25519: Ed25519Pubkey,
    /// X25519 key-exchange pubkey.
    pub pubkey_x25519: X25519Pubkey,
}
