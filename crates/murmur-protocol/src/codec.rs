//! Codecs for encoding and decoding Murmur frames.
//!
//! Two encodings are supported:
//!
//! - **JSON**, one frame per WebSocket text message (browser clients).
//! - **MessagePack** with length-prefixed framing, carried in binary
//!   messages. A binary message may hold several frames, and a frame may be
//!   split across messages.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Frame encoding negotiated per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON text frames.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary frames.
    MessagePack,
}

/// Encode a frame to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode<T: Serialize>(frame: &T) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into<T: Serialize>(frame: &T, buf: &mut BytesMut) -> Result<(), CodecError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    let length = match frame_length(data)? {
        Some(length) => length,
        None => return Err(CodecError::Incomplete(LENGTH_PREFIX_SIZE - data.len())),
    };

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(CodecError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
/// A frame whose body fails to decode is still consumed, so the
/// buffer stays aligned on the next frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, CodecError> {
    let length = match frame_length(buf)? {
        Some(length) => length,
        None => return Ok(None),
    };

    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

/// Read the length prefix, if enough bytes are present.
fn frame_length(data: &[u8]) -> Result<Option<usize>, CodecError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(length));
    }
    Ok(Some(length))
}

/// Encode a frame as a JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json<T: Serialize>(frame: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from a JSON string.
///
/// # Errors
///
/// Returns an error if the text is not a valid frame.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{ClientFrame, ServerFrame};

    #[test]
    fn test_binary_and_json_agree() {
        let frame = ClientFrame::private("alice", "bob", "hey");

        let binary: ClientFrame = decode(&encode(&frame).unwrap()).unwrap();
        let text: ClientFrame = decode_json(&encode_json(&frame).unwrap()).unwrap();

        assert_eq!(binary, frame);
        assert_eq!(text, frame);
    }

    #[test]
    fn test_server_frame_binary() {
        let frame = ServerFrame::Users {
            destination: crate::destinations::USERS.to_string(),
            version: 3,
            users: vec!["alice".into(), "bob".into()],
        };
        let decoded: ServerFrame = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&ClientFrame::register("alice")).unwrap();

        match decode::<ClientFrame>(&encoded[..5]) {
            Err(CodecError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let frame = ClientFrame::chat("alice", "x".repeat(MAX_FRAME_SIZE + 1));

        match encode(&frame) {
            Err(CodecError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);

        assert!(matches!(
            decode_from::<ClientFrame>(&mut buf),
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = ClientFrame::register("alice");
        let frame2 = ClientFrame::chat("alice", "hi");

        let mut stream = BytesMut::new();
        encode_into(&frame1, &mut stream).unwrap();
        encode_into(&frame2, &mut stream).unwrap();

        // Feed the second frame in two pieces.
        let split = stream.len() - 3;
        let tail = stream.split_off(split);
        let mut buf = stream;

        let decoded1: ClientFrame = decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(decoded1, frame1);
        assert!(decode_from::<ClientFrame>(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&tail);
        let decoded2: ClientFrame = decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(decoded2, frame2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            decode_json::<ClientFrame>(r#"{"type":"shout","sender":"alice"}"#),
            Err(CodecError::Json(_))
        ));
    }
}
