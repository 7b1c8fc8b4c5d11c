//! Length-prefixed transport codec for JSON-RPC messages.
//!
//! Frames are delimited by a 4-byte big-endian length prefix and carry one
//! JSON document each:
//!
//! ```text
//! +----------------+------------------+
//! |  4 bytes       |  N bytes         |
//! |  (length BE)   |  (JSON payload)  |
//! +----------------+------------------+
//! ```
//!
//! Framing itself is delegated to [`LengthDelimitedCodec`]; this module only
//! layers the JSON (de)serialization and error mapping on top.

use bytes::{Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec, length_delimited};

use crate::protocol::Message;

/// Maximum frame payload (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Codec turning a byte stream into [`Message`]s and back.
#[derive(Debug)]
pub struct MessageCodec {
    frames: LengthDelimitedCodec,
}

impl MessageCodec {
    #[must_use]
    pub fn new() -> Self {
        let frames = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .big_endian()
            .max_frame_length(MAX_FRAME_SIZE)
            .new_codec();
        Self { frames }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.frames.decode(src).map_err(CodecError::from_frame_error)? else {
            return Ok(None);
        };

        let json = std::str::from_utf8(&frame)?;
        Ok(Some(serde_json::from_str(json)?))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(payload.len()));
        }

        self.frames
            .encode(Bytes::from(payload), dst)
            .map_err(CodecError::from_frame_error)
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Size is 0 when the peer announced an oversized frame we refused to buffer.
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),
}

impl CodecError {
    fn from_frame_error(err: io::Error) -> Self {
        let oversized = err
            .get_ref()
            .is_some_and(|inner| inner.is::<length_delimited::LengthDelimitedCodecError>());
        if oversized {
            CodecError::FrameTooLarge(0)
        } else {
            CodecError::Io(err)
        }
    }
}
