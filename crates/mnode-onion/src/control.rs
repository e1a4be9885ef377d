//! Routing controls: the JSON tail attached to each onion layer.
//!
//! After a non-entry unwrap, exactly one of the forward / terminal / proxy
//! shapes must be present; the selector is structural. A control carrying
//! more than one selector key is rejected outright.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use mnode_crypto::EncryptType;
use mnode_types::{Ed25519Pubkey, OnionError, X25519Pubkey};

/// Outbound proxy scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// Default port for the scheme.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        })
    }
}

impl FromStr for Protocol {
    type Err = OnionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(OnionError::BadControl),
        }
    }
}

/// The outermost control: tells the entry node how to decrypt the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryControl {
    pub ephemeral_key: X25519Pubkey,
    pub enc_type: EncryptType,
}

/// A decrypted layer's routing control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnionControl {
    /// Hand the opaque blob to the next relay.
    Forward {
        destination: Ed25519Pubkey,
        ephemeral_key: X25519Pubkey,
        enc_type: EncryptType,
    },
    /// The blob is the request for this node; parse and handle it locally.
    Terminal,
    /// POST the blob to an outside HTTP(S) endpoint.
    Proxy {
        host: String,
        target: String,
        port: u16,
        protocol: Protocol,
    },
}

fn field_str<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn parse_enc_type(obj: &serde_json::Map<String, Value>) -> Result<EncryptType, OnionError> {
    match obj.get("enc_type") {
        // The wire default when unspecified
        None => Ok(EncryptType::AesGcm),
        Some(v) => v
            .as_str()
            .ok_or(OnionError::BadControl)?
            .parse()
            .map_err(|_| OnionError::BadControl),
    }
}

fn parse_ephemeral_key(obj: &serde_json::Map<String, Value>) -> Result<X25519Pubkey, OnionError> {
    let hex_key = field_str(obj, "ephemeral_key").ok_or(OnionError::BadControl)?;
    X25519Pubkey::from_hex(hex_key).map_err(|_| OnionError::BadControl)
}

/// Parse the entry control `{ "ephemeral_key": …, "enc_type": … }`.
pub fn parse_entry(tail: &Value) -> Result<EntryControl, OnionError> {
    let obj = tail.as_object().ok_or(OnionError::BadControl)?;
    Ok(EntryControl {
        ephemeral_key: parse_ephemeral_key(obj)?,
        enc_type: parse_enc_type(obj)?,
    })
}

/// Parse a post-unwrap routing control, dispatching structurally on which
/// selector key is present.
pub fn parse_control(tail: &Value) -> Result<OnionControl, OnionError> {
    let obj = tail.as_object().ok_or(OnionError::BadControl)?;

    let selectors = ["destination", "headers", "host"]
        .iter()
        .filter(|k| obj.contains_key(**k))
        .count();
    if selectors != 1 {
        return Err(OnionError::BadControl);
    }

    if let Some(dest) = obj.get("destination") {
        let dest = dest.as_str().ok_or(OnionError::BadControl)?;
        let destination = Ed25519Pubkey::from_hex(dest).map_err(|_| OnionError::BadControl)?;
        return Ok(OnionControl::Forward {
            destination,
            ephemeral_key: parse_ephemeral_key(obj)?,
            enc_type: parse_enc_type(obj)?,
        });
    }

    if obj.contains_key("headers") {
        return Ok(OnionControl::Terminal);
    }

    let host = field_str(obj, "host")
        .filter(|h| !h.is_empty())
        .ok_or(OnionError::BadControl)?
        .to_string();
    let target = field_str(obj, "target").ok_or(OnionError::BadControl)?;
    if !target.starts_with("/beldex/") || !target.ends_with("/lsrpc") {
        return Err(OnionError::BadControl);
    }
    let protocol = match obj.get("protocol") {
        None => Protocol::Https,
        Some(v) => v
            .as_str()
            .ok_or(OnionError::BadControl)?
            .parse::<Protocol>()?,
    };
    let port = match obj.get("port") {
        None => protocol.default_port(),
        Some(v) => v
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .ok_or(OnionError::BadControl)?,
    };
    Ok(OnionControl::Proxy {
        host,
        target: target.to_string(),
        port,
        protocol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EK: &str = "0101010101010101010101010101010101010101010101010101010101010101";
    const DEST: &str = "0202020202020202020202020202020202020202020202020202020202020202";

    #[test]
    fn entry_control_with_and_without_enc_type() {
        let entry = parse_entry(&json!({"ephemeral_key": EK, "enc_type": "xchacha20"})).unwrap();
        assert_eq!(entry.enc_type, EncryptType::XChaCha20);
        assert_eq!(entry.ephemeral_key.hex(), EK);

        let entry = parse_entry(&json!({"ephemeral_key": EK})).unwrap();
        assert_eq!(entry.enc_type, EncryptType::AesGcm);

        assert_eq!(
            parse_entry(&json!({"enc_type": "aes-gcm"})),
            Err(OnionError::BadControl)
        );
    }

    #[test]
    fn forward_control() {
        let control = parse_control(&json!({
            "destination": DEST,
            "ephemeral_key": EK,
            "enc_type": "aes-cbc",
        }))
        .unwrap();
        match control {
            OnionControl::Forward {
                destination,
                ephemeral_key,
                enc_type,
            } => {
                assert_eq!(destination.hex(), DEST);
                assert_eq!(ephemeral_key.hex(), EK);
                assert_eq!(enc_type, EncryptType::AesCbc);
            }
            other => panic!("wrong control: {other:?}"),
        }
    }

    #[test]
    fn terminal_control() {
        assert_eq!(
            parse_control(&json!({"headers": []})).unwrap(),
            OnionControl::Terminal
        );
    }

    #[test]
    fn proxy_control_defaults_and_validation() {
        let control = parse_control(&json!({
            "host": "example.com",
            "target": "/beldex/v1/lsrpc",
        }))
        .unwrap();
        assert_eq!(
            control,
            OnionControl::Proxy {
                host: "example.com".into(),
                target: "/beldex/v1/lsrpc".into(),
                port: 443,
                protocol: Protocol::Https,
            }
        );

        let control = parse_control(&json!({
            "host": "example.com",
            "target": "/beldex/lsrpc",
            "protocol": "http",
            "port": 8080,
        }))
        .unwrap();
        assert_eq!(
            control,
            OnionControl::Proxy {
                host: "example.com".into(),
                target: "/beldex/lsrpc".into(),
                port: 8080,
                protocol: Protocol::Http,
            }
        );

        // target outside the allowed namespace
        assert_eq!(
            parse_control(&json!({"host": "example.com", "target": "/etc/passwd"})),
            Err(OnionError::BadControl)
        );
        assert_eq!(
            parse_control(&json!({"host": "example.com", "target": "/beldex/other"})),
            Err(OnionError::BadControl)
        );
    }

    #[test]
    fn ambiguous_controls_are_rejected() {
        assert_eq!(
            parse_control(&json!({
                "destination": DEST,
                "ephemeral_key": EK,
                "headers": [],
            })),
            Err(OnionError::BadControl)
        );
        assert_eq!(
            parse_control(&json!({"headers": [], "host": "example.com", "target": "/beldex/lsrpc"})),
            Err(OnionError::BadControl)
        );
        assert_eq!(parse_control(&json!({})), Err(OnionError::BadControl));
        assert_eq!(parse_control(&json!([1, 2])), Err(OnionError::BadControl));
    }

    #[test]
    fn forward_with_bad_keys_is_rejected() {
        assert_eq!(
            parse_control(&json!({"destination": "zz", "ephemeral_key": EK})),
            Err(OnionError::BadControl)
        );
        assert_eq!(
            parse_control(&json!({"destination": DEST})),
            Err(OnionError::BadControl)
        );
        assert_eq!(
            parse_control(&json!({"destination": DEST, "ephemeral_key": EK, "enc_type": "rot13"})),
            Err(OnionError::BadControl)
        );
    }
}
