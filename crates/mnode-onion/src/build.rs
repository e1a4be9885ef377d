//! Originator role: build a nested onion request over an ordered relay
//! path.
//!
//! Construction runs from the terminal hop outward. Every layer gets a
//! fresh ephemeral X25519 keypair; the final hop's keypair is kept, since
//! the response comes back encrypted to it.

use base64::Engine as _;
use serde_json::json;

use mnode_crypto::{generate_x25519_keypair, ChannelEncryption, EncryptType};
use mnode_types::{CryptoError, Ed25519Pubkey, OnionError, X25519Pubkey, X25519Seckey};

use crate::frame::encode_frame;

/// One relay on the onion path.
#[derive(Debug, Clone)]
pub struct PathHop {
    pub ed25519: Ed25519Pubkey,
    pub x25519: X25519Pubkey,
}

/// The final hop's ephemeral keypair and suite, kept to decrypt the
/// terminal response.
pub struct FinalHopKey {
    seckey: X25519Seckey,
    pubkey: X25519Pubkey,
    enc_type: EncryptType,
}

impl FinalHopKey {
    /// The ephemeral pubkey the terminal node derives the response key
    /// from.
    pub fn pubkey(&self) -> &X25519Pubkey {
        &self.pubkey
    }

    /// The suite the terminal response is encrypted with.
    pub fn enc_type(&self) -> EncryptType {
        self.enc_type
    }

    /// Decrypt a response body from the final relay. Nothing on the wire
    /// says whether the body was base64-encoded for textual transport, so
    /// try the raw bytes first and fall back to base64-decoding them.
    pub fn decrypt_response(
        &self,
        body: &[u8],
        final_relay: &X25519Pubkey,
    ) -> Result<Vec<u8>, CryptoError> {
        let channel = ChannelEncryption::new(self.seckey.clone(), self.pubkey, false);
        match channel.decrypt(self.enc_type, body, final_relay) {
            Ok(plain) => Ok(plain),
            Err(err) => {
                let text = std::str::from_utf8(body).map_err(|_| err)?;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(text.trim_end())
                    .map_err(|_| err)?;
                channel.decrypt(self.enc_type, &decoded, final_relay)
            }
        }
    }
}

/// Build the wire payload for an onion request over `path`, carrying
/// `payload` and the terminal `control` JSON. A fixed `enc_type` applies
/// to every hop; `None` picks a suite independently per hop.
pub fn build_onion_request(
    path: &[PathHop],
    payload: &[u8],
    control: &serde_json::Value,
    enc_type: Option<EncryptType>,
) -> Result<(Vec<u8>, FinalHopKey), OnionError> {
    let last = path.last().ok_or(OnionError::Malformed)?;

    // Innermost layer: the terminal request and its control, encrypted for
    // the final hop.
    let (mut layer_pub, layer_sec) = generate_x25519_keypair();
    let mut layer_etype = enc_type.unwrap_or_else(EncryptType::random);
    let inner = encode_frame(payload, &control.to_string());
    let channel = ChannelEncryption::new(layer_sec.clone(), layer_pub, false);
    let mut blob = channel.encrypt(layer_etype, &inner, &last.x25519)?;

    let final_key = FinalHopKey {
        seckey: layer_sec,
        pubkey: layer_pub,
        enc_type: layer_etype,
    };

    // Wrap for each earlier hop, back to front. The routing tail names the
    // next hop and the ephemeral key that hop must use.
    for window in path.windows(2).rev() {
        let routing = json!({
            "destination": window[1].ed25519.hex(),
            "ephemeral_key": layer_pub.hex(),
            "enc_type": layer_etype.to_string(),
        });
        let wrapped = encode_frame(&blob, &routing.to_string());

        let (next_pub, next_sec) = generate_x25519_keypair();
        layer_pub = next_pub;
        layer_etype = enc_type.unwrap_or_else(EncryptType::random);
        let channel = ChannelEncryption::new(next_sec, layer_pub, false);
        blob = channel.encrypt(layer_etype, &wrapped, &window[0].x25519)?;
    }

    // Outermost wrapper tells the entry node how to decrypt.
    let entry = json!({
        "ephemeral_key": layer_pub.hex(),
        "enc_type": layer_etype.to_string(),
    });
    Ok((encode_frame(&blob, &entry.to_string()), final_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_frame;
    use mnode_types::Ed25519Seckey;

    fn test_path(n: usize) -> (Vec<PathHop>, Vec<X25519Seckey>) {
        let mut hops = Vec::new();
        let mut secrets = Vec::new();
        for _ in 0..n {
            let ed = Ed25519Seckey::generate();
            let x = X25519Seckey::generate();
            hops.push(PathHop {
                ed25519: ed.pubkey(),
                x25519: x.pubkey(),
            });
            secrets.push(x);
        }
        (hops, secrets)
    }

    #[test]
    fn empty_path_is_rejected() {
        let control = serde_json::json!({"headers": []});
        assert!(build_onion_request(&[], b"x", &control, None).is_err());
    }

    #[test]
    fn wire_payload_carries_an_entry_control() {
        let (path, _) = test_path(3);
        let control = serde_json::json!({"headers": []});
        let (wire, final_key) =
            build_onion_request(&path, b"{}", &control, Some(EncryptType::XChaCha20)).unwrap();

        let (blob, tail) = parse_frame(&wire).unwrap();
        assert!(!blob.is_empty());
        let obj = tail.as_object().unwrap();
        assert!(obj.contains_key("ephemeral_key"));
        assert_eq!(obj["enc_type"], "xchacha20");
        assert_eq!(final_key.enc_type(), EncryptType::XChaCha20);
    }

    #[test]
    fn single_hop_decrypts_straight_to_the_request() {
        let (path, secrets) = test_path(1);
        let control = serde_json::json!({"headers": []});
        let payload = br#"{"method":"info"}"#;
        let (wire, _) =
            build_onion_request(&path, payload, &control, Some(EncryptType::AesGcm)).unwrap();

        let (blob, tail) = parse_frame(&wire).unwrap();
        let entry = crate::control::parse_entry(&tail).unwrap();

        let relay = ChannelEncryption::new(secrets[0].clone(), path[0].x25519, true);
        let inner = relay
            .decrypt(entry.enc_type, blob, &entry.ephemeral_key)
            .unwrap();
        let (inner_blob, inner_tail) = parse_frame(&inner).unwrap();
        assert_eq!(inner_blob, payload);
        assert_eq!(inner_tail, control);
    }
}
