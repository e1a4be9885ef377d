//! Layer frame grammar: `size(u32 LE) || blob[size] || json_tail`.

use mnode_types::OnionError;

/// Encode a blob and its (already serialized) JSON tail into a layer frame.
pub fn encode_frame(blob: &[u8], tail: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + blob.len() + tail.len());
    out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
    out.extend_from_slice(blob);
    out.extend_from_slice(tail.as_bytes());
    out
}

/// Split a layer frame into its blob and parsed JSON tail.
pub fn parse_frame(data: &[u8]) -> Result<(&[u8], serde_json::Value), OnionError> {
    if data.len() < 4 {
        return Err(OnionError::Malformed);
    }
    let size = u32::from_le_bytes(data[..4].try_into().expect("4-byte prefix")) as usize;
    if size > data.len() - 4 {
        return Err(OnionError::Malformed);
    }
    let blob = &data[4..4 + size];
    let tail: serde_json::Value =
        serde_json::from_slice(&data[4 + size..]).map_err(|_| OnionError::Malformed)?;
    Ok((blob, tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let frame = encode_frame(b"payload bytes", r#"{"headers":[]}"#);
        let (blob, tail) = parse_frame(&frame).unwrap();
        assert_eq!(blob, b"payload bytes");
        assert_eq!(tail, serde_json::json!({"headers": []}));
    }

    #[test]
    fn empty_blob_is_legal() {
        let frame = encode_frame(b"", "{}");
        let (blob, tail) = parse_frame(&frame).unwrap();
        assert!(blob.is_empty());
        assert!(tail.as_object().unwrap().is_empty());
    }

    #[test]
    fn size_overrunning_the_frame_is_malformed() {
        let mut frame = encode_frame(b"abc", "{}");
        frame[0] = 0xFF; // size now far larger than the frame
        assert_eq!(parse_frame(&frame), Err(OnionError::Malformed));
    }

    #[test]
    fn short_and_junk_tails_are_malformed() {
        assert_eq!(parse_frame(b"\x01\x00"), Err(OnionError::Malformed));
        let frame = encode_frame(b"abc", "not json");
        assert_eq!(parse_frame(&frame), Err(OnionError::Malformed));
        // empty tail is not valid JSON either
        let frame = encode_frame(b"abc", "");
        assert_eq!(parse_frame(&frame), Err(OnionError::Malformed));
    }
}
