//! Relay role: unwrap one onion layer and decide what to do with it.

use base64::Engine as _;

use mnode_crypto::{ChannelEncryption, EncryptType};
use mnode_types::{CryptoError, Ed25519Pubkey, OnionError, X25519Pubkey};

use crate::control::{self, OnionControl, Protocol};
use crate::frame::parse_frame;

/// Requests whose hop counter reaches this value are refused.
pub const HOP_LIMIT: u16 = 16;

/// Per-layer decryption parameters: the originator's ephemeral key for
/// this hop, the suite, and the hop counter. Travels alongside the opaque
/// blob as `ek` / `et` / `nh` on the message bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionRequestMetadata {
    pub ephemeral_key: X25519Pubkey,
    pub enc_type: EncryptType,
    pub hop_no: u16,
}

/// What a relay must do with a decrypted layer.
#[derive(Debug)]
pub enum OnionAction {
    /// Hand the opaque payload to the named peer with the next hop's
    /// metadata.
    Forward {
        destination: Ed25519Pubkey,
        payload: Vec<u8>,
        next: OnionRequestMetadata,
    },
    /// This node is the terminal; `body` is the JSON request document.
    Terminal { body: Vec<u8> },
    /// POST `body` to an outside endpoint and relay its response.
    Proxy {
        host: String,
        target: String,
        port: u16,
        protocol: Protocol,
        body: Vec<u8>,
    },
}

/// Parse the raw HTTPS wire frame an entry node receives, yielding the
/// opaque blob and the first hop's metadata.
pub fn parse_entry_request(frame: &[u8]) -> Result<(Vec<u8>, OnionRequestMetadata), OnionError> {
    let (blob, tail) = parse_frame(frame)?;
    let entry = control::parse_entry(&tail)?;
    Ok((
        blob.to_vec(),
        OnionRequestMetadata {
            ephemeral_key: entry.ephemeral_key,
            enc_type: entry.enc_type,
            hop_no: 1,
        },
    ))
}

/// Unwrap one onion layer: decrypt the blob with this node's X25519 key
/// against the layer's ephemeral key, re-parse the inner frame, and
/// dispatch on its routing control.
pub fn process_layer(
    channel: &ChannelEncryption,
    blob: &[u8],
    meta: &OnionRequestMetadata,
) -> Result<OnionAction, OnionError> {
    if meta.hop_no >= HOP_LIMIT {
        tracing::debug!(hop_no = meta.hop_no, "Refusing onion request over the hop limit");
        return Err(OnionError::HopLimit);
    }

    let inner = channel
        .decrypt(meta.enc_type, blob, &meta.ephemeral_key)
        .map_err(|_| OnionError::Decrypt)?;
    let (inner_blob, tail) = parse_frame(&inner)?;

    match control::parse_control(&tail)? {
        OnionControl::Forward {
            destination,
            ephemeral_key,
            enc_type,
        } => {
            let next_hop = meta.hop_no + 1;
            if next_hop >= HOP_LIMIT {
                return Err(OnionError::HopLimit);
            }
            Ok(OnionAction::Forward {
                destination,
                payload: inner_blob.to_vec(),
                next: OnionRequestMetadata {
                    ephemeral_key,
                    enc_type,
                    hop_no: next_hop,
                },
            })
        }
        OnionControl::Terminal => Ok(OnionAction::Terminal {
            body: inner_blob.to_vec(),
        }),
        OnionControl::Proxy {
            host,
            target,
            port,
            protocol,
        } => Ok(OnionAction::Proxy {
            host,
            target,
            port,
            protocol,
            body: inner_blob.to_vec(),
        }),
    }
}

/// Encrypt a downstream body for the return trip using the derived key of
/// this layer's ephemeral. This happens exactly once, at the terminal;
/// every earlier relay passes the result back verbatim.
pub fn encrypt_response(
    channel: &ChannelEncryption,
    meta: &OnionRequestMetadata,
    body: &[u8],
    base64_encode: bool,
) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = channel.encrypt(meta.enc_type, body, &meta.ephemeral_key)?;
    if base64_encode {
        Ok(base64::engine::general_purpose::STANDARD
            .encode(ciphertext)
            .into_bytes())
    } else {
        Ok(ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{build_onion_request, PathHop};
    use mnode_crypto::generate_x25519_keypair;
    use mnode_types::{Ed25519Seckey, X25519Seckey};
    use serde_json::json;

    struct Relay {
        hop: PathHop,
        channel: ChannelEncryption,
    }

    fn test_relays(n: usize) -> Vec<Relay> {
        (0..n)
            .map(|_| {
                let ed = Ed25519Seckey::generate();
                let x = X25519Seckey::generate();
                let x_pub = x.pubkey();
                Relay {
                    hop: PathHop {
                        ed25519: ed.pubkey(),
                        x25519: x_pub,
                    },
                    channel: ChannelEncryption::new(x, x_pub, true),
                }
            })
            .collect()
    }

    /// Walk a built onion through every relay, asserting the routing at
    /// each hop, and return the terminal body plus the terminal relay's
    /// state for the response leg.
    fn walk<'a>(
        relays: &'a [Relay],
        wire: &[u8],
    ) -> (Vec<u8>, &'a Relay, OnionRequestMetadata) {
        let (mut blob, mut meta) = parse_entry_request(wire).unwrap();
        assert_eq!(meta.hop_no, 1);

        for (i, relay) in relays.iter().enumerate() {
            match process_layer(&relay.channel, &blob, &meta).unwrap() {
                OnionAction::Forward {
                    destination,
                    payload,
                    next,
                } => {
                    assert!(i + 1 < relays.len(), "forward past the terminal");
                    assert_eq!(destination, relays[i + 1].hop.ed25519);
                    assert_eq!(next.hop_no, meta.hop_no + 1);
                    blob = payload;
                    meta = next;
                }
                OnionAction::Terminal { body } => {
                    assert_eq!(i, relays.len() - 1, "terminal before the last hop");
                    return (body, relay, meta);
                }
                OnionAction::Proxy { .. } => panic!("unexpected proxy action"),
            }
        }
        unreachable!("no terminal action produced");
    }

    #[test]
    fn three_hop_roundtrip_xchacha20() {
        let relays = test_relays(3);
        let path: Vec<PathHop> = relays.iter().map(|r| r.hop.clone()).collect();
        let payload = br#"{"method":"info"}"#;
        let (wire, final_key) = build_onion_request(
            &path,
            payload,
            &json!({"headers": []}),
            Some(EncryptType::XChaCha20),
        )
        .unwrap();

        let (body, terminal, meta) = walk(&relays, &wire);
        assert_eq!(body, payload);
        assert_eq!(meta.hop_no, 3);
        assert_eq!(&meta.ephemeral_key, final_key.pubkey());

        // Response leg: encrypted once at the terminal, passed back
        // verbatim, decrypted by the originator.
        let response = encrypt_response(&terminal.channel, &meta, b"pong", false).unwrap();
        let plain = final_key
            .decrypt_response(&response, &terminal.hop.x25519)
            .unwrap();
        assert_eq!(plain, b"pong");
    }

    #[test]
    fn roundtrip_every_suite_and_depth() {
        for suite in [
            Some(EncryptType::AesCbc),
            Some(EncryptType::AesGcm),
            Some(EncryptType::XChaCha20),
            None, // random per hop
        ] {
            for depth in [1usize, 2, 5, 15] {
                let relays = test_relays(depth);
                let path: Vec<PathHop> = relays.iter().map(|r| r.hop.clone()).collect();
                let payload = b"payload across the swarm";
                let (wire, final_key) =
                    build_onion_request(&path, payload, &json!({"headers": []}), suite).unwrap();

                let (body, terminal, meta) = walk(&relays, &wire);
                assert_eq!(body, payload);
                assert_eq!(meta.hop_no as usize, depth);

                let response =
                    encrypt_response(&terminal.channel, &meta, b"reply body", true).unwrap();
                let plain = final_key
                    .decrypt_response(&response, &terminal.hop.x25519)
                    .unwrap();
                assert_eq!(plain, b"reply body");
            }
        }
    }

    #[test]
    fn hop_limit_is_refused_on_receipt() {
        let (pubkey, seckey) = generate_x25519_keypair();
        let channel = ChannelEncryption::new(seckey, pubkey, true);
        for hop_no in [16, 17, u16::MAX] {
            let meta = OnionRequestMetadata {
                ephemeral_key: pubkey,
                enc_type: EncryptType::AesGcm,
                hop_no,
            };
            match process_layer(&channel, b"whatever", &meta) {
                Err(OnionError::HopLimit) => {}
                other => panic!("expected hop limit refusal, got {other:?}"),
            }
        }
    }

    #[test]
    fn tampered_layer_fails_decrypt() {
        let relays = test_relays(2);
        let path: Vec<PathHop> = relays.iter().map(|r| r.hop.clone()).collect();
        let (wire, _) = build_onion_request(
            &path,
            b"{}",
            &json!({"headers": []}),
            Some(EncryptType::AesGcm),
        )
        .unwrap();

        let (mut blob, meta) = parse_entry_request(&wire).unwrap();
        let mid = blob.len() / 2;
        blob[mid] ^= 0x40;
        match process_layer(&relays[0].channel, &blob, &meta) {
            Err(OnionError::Decrypt) => {}
            other => panic!("expected decrypt failure, got {other:?}"),
        }
    }

    #[test]
    fn garbage_wire_frames_are_malformed() {
        assert!(matches!(
            parse_entry_request(b"\x00"),
            Err(OnionError::Malformed)
        ));
        assert!(matches!(
            parse_entry_request(b"\xff\xff\xff\xff trailing"),
            Err(OnionError::Malformed)
        ));
    }
}
