//! Bencoded payload framing for the `mn.onion_req_v2` inter-node call.
//!
//! The payload is a single bencoded dictionary
//! `{ d: blob, ek: bytes32, et: str, nh: int }`. Only the encoder and
//! decoder for this one shape live here; dictionary keys are emitted in
//! bencode's required lexicographic order.

use mnode_crypto::EncryptType;
use mnode_types::{OnionError, X25519Pubkey};

use crate::unwrap::OnionRequestMetadata;

/// Encode an onion payload and its metadata for the next relay.
pub fn encode_onion_data(payload: &[u8], meta: &OnionRequestMetadata) -> Vec<u8> {
    let et = meta.enc_type.to_string();
    let mut out = Vec::with_capacity(payload.len() + 64);
    out.push(b'd');
    write_bytes(&mut out, b"d");
    write_bytes(&mut out, payload);
    write_bytes(&mut out, b"ek");
    write_bytes(&mut out, meta.ephemeral_key.as_bytes());
    write_bytes(&mut out, b"et");
    write_bytes(&mut out, et.as_bytes());
    write_bytes(&mut out, b"nh");
    write_int(&mut out, meta.hop_no as u64);
    out.push(b'e');
    out
}

/// Decode an `mn.onion_req_v2` payload into the opaque blob and its
/// metadata. `d` and `ek` are required; `et` defaults to aes-gcm and `nh`
/// to the first hop.
pub fn decode_onion_data(data: &[u8]) -> Result<(Vec<u8>, OnionRequestMetadata), OnionError> {
    let mut rest = data;
    if take_byte(&mut rest)? != b'd' {
        return Err(OnionError::Malformed);
    }

    let mut payload: Option<Vec<u8>> = None;
    let mut ephemeral_key: Option<X25519Pubkey> = None;
    let mut enc_type = EncryptType::AesGcm;
    let mut hop_no: u16 = 1;

    loop {
        if rest.first() == Some(&b'e') {
            rest = &rest[1..];
            break;
        }
        let key = read_bytes(&mut rest)?;
        match key {
            b"d" => payload = Some(read_bytes(&mut rest)?.to_vec()),
            b"ek" => {
                let bytes = read_bytes(&mut rest)?;
                ephemeral_key =
                    Some(X25519Pubkey::from_bytes(bytes).map_err(|_| OnionError::Malformed)?);
            }
            b"et" => {
                let name =
                    std::str::from_utf8(read_bytes(&mut rest)?).map_err(|_| OnionError::Malformed)?;
                enc_type = name.parse().map_err(|_| OnionError::Malformed)?;
            }
            b"nh" => {
                hop_no = u16::try_from(read_int(&mut rest)?).map_err(|_| OnionError::Malformed)?;
            }
            _ => {
                // Unknown keys are skipped for forward compatibility.
                skip_value(&mut rest)?;
            }
        }
    }
    if !rest.is_empty() {
        return Err(OnionError::Malformed);
    }

    let payload = payload.ok_or(OnionError::Malformed)?;
    let ephemeral_key = ephemeral_key.ok_or(OnionError::Malformed)?;
    Ok((
        payload,
        OnionRequestMetadata {
            ephemeral_key,
            enc_type,
            hop_no,
        },
    ))
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn write_int(out: &mut Vec<u8>, value: u64) {
    out.push(b'i');
    out.extend_from_slice(value.to_string().as_bytes());
    out.push(b'e');
}

fn take_byte(data: &mut &[u8]) -> Result<u8, OnionError> {
    let (&first, rest) = data.split_first().ok_or(OnionError::Malformed)?;
    *data = rest;
    Ok(first)
}

fn read_bytes<'a>(data: &mut &'a [u8]) -> Result<&'a [u8], OnionError> {
    let colon = data
        .iter()
        .position(|&b| b == b':')
        .ok_or(OnionError::Malformed)?;
    let len: usize = std::str::from_utf8(&data[..colon])
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or(OnionError::Malformed)?;
    let rest = &data[colon + 1..];
    if rest.len() < len {
        return Err(OnionError::Malformed);
    }
    let (bytes, rest) = rest.split_at(len);
    *data = rest;
    Ok(bytes)
}

fn read_int(data: &mut &[u8]) -> Result<u64, OnionError> {
    if take_byte(data)? != b'i' {
        return Err(OnionError::Malformed);
    }
    let end = data
        .iter()
        .position(|&b| b == b'e')
        .ok_or(OnionError::Malformed)?;
    let value = std::str::from_utf8(&data[..end])
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or(OnionError::Malformed)?;
    *data = &data[end + 1..];
    Ok(value)
}

fn skip_value(data: &mut &[u8]) -> Result<(), OnionError> {
    match data.first() {
        Some(b'i') => {
            read_int(data)?;
        }
        Some(b'0'..=b'9') => {
            read_bytes(data)?;
        }
        _ => return Err(OnionError::Malformed),
    }
    Ok(())
}
