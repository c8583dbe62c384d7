//! JSON frame codec.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::Result;

/// Encode a frame as one JSON text message.
pub fn encode<F: Serialize>(frame: &F) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from a text message.
pub fn decode<F: DeserializeOwned>(text: &str) -> Result<F> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a frame from a binary message holding UTF-8 JSON.
pub fn decode_bytes<F: DeserializeOwned>(bytes: &[u8]) -> Result<F> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BridgeError;
    use crate::frame::{ClientFrame, HeartbeatFrame, ServerFrame};

    #[test]
    fn text_and_binary_decode_alike() {
        let text = encode(&ClientFrame::Heartbeat(HeartbeatFrame { nonce: "1".into() })).unwrap();
        let a: ClientFrame = decode(&text).unwrap();
        let b: ClientFrame = decode_bytes(text.as_bytes()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_frame_is_codec_error() {
        let err = decode::<ServerFrame>("{\"type\":\"nope\"}").unwrap_err();
        assert!(matches!(err, BridgeError::Codec(_)));
        let err = decode_bytes::<ServerFrame>(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, BridgeError::Codec(_)));
    }
}
