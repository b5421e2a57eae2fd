//! Binary frame codec for the voice-service connection.
//!
//! Every frame starts with a 4-byte header:
//!
//! | byte | high nibble       | low nibble      |
//! |------|-------------------|-----------------|
//! | 0    | protocol version  | header size / 4 |
//! | 1    | message type      | type flags      |
//! | 2    | serialization     | compression     |
//! | 3    | reserved          |                 |
//!
//! followed by optional fields selected by the flags and a length-prefixed
//! payload. All integers are big-endian. The layout is fixed by the remote
//! service and must be reproduced byte for byte.

use crate::event::{InboundEvent, MessageKind, Payload, codes};
use bytes::{BufMut, Bytes, BytesMut};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::Serialize;
use std::io::{Read, Write};

pub const PROTOCOL_VERSION: u8 = 0b0001;
pub const HEADER_WORDS: u8 = 0b0001;

pub const CLIENT_FULL_REQUEST: u8 = 0b0001;
pub const CLIENT_AUDIO_ONLY_REQUEST: u8 = 0b0010;
pub const SERVER_FULL_RESPONSE: u8 = 0b1001;
pub const SERVER_ACK: u8 = 0b1011;
pub const SERVER_ERROR_RESPONSE: u8 = 0b1111;

pub const FLAG_SEQUENCE_MASK: u8 = 0b0011;
pub const FLAG_WITH_EVENT: u8 = 0b0100;

pub const NO_SERIALIZATION: u8 = 0b0000;
pub const JSON: u8 = 0b0001;

pub const NO_COMPRESSION: u8 = 0b0000;
pub const GZIP: u8 = 0b0001;

/// Failures while building or reading a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame truncated: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("unsupported message type {0:#06b}")]
    UnsupportedMessageType(u8),
    #[error("field too large for a 32-bit length prefix")]
    TooLarge,
    #[error("gzip failure: {0}")]
    Compression(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Body of a ChatTTSText request.
#[derive(Serialize)]
struct TtsText<'a> {
    start: bool,
    content: &'a str,
    end: bool,
}

/// Builds the fixed 4-byte protocol header.
pub fn header(message_type: u8, flags: u8, serialization: u8, compression: u8) -> [u8; 4] {
    [
        (PROTOCOL_VERSION << 4) | HEADER_WORDS,
        (message_type << 4) | flags,
        (serialization << 4) | compression,
        0x00,
    ]
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

fn put_prefixed(buf: &mut BytesMut, data: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(data.len()).map_err(|_| CodecError::TooLarge)?;
    buf.put_u32(len);
    buf.put_slice(data);
    Ok(())
}

/// Encodes a connection-scoped event (no session id) with a gzip'd JSON body.
pub fn encode_connection_event(event: u32, json: &[u8]) -> Result<Bytes, CodecError> {
    let payload = gzip(json)?;
    let mut buf = BytesMut::with_capacity(12 + payload.len());
    buf.put_slice(&header(CLIENT_FULL_REQUEST, FLAG_WITH_EVENT, JSON, GZIP));
    buf.put_u32(event);
    put_prefixed(&mut buf, &payload)?;
    Ok(buf.freeze())
}

/// Encodes a session-scoped event with a gzip'd JSON body.
pub fn encode_session_event(event: u32, session_id: &str, json: &[u8]) -> Result<Bytes, CodecError> {
    let payload = gzip(json)?;
    let mut buf = BytesMut::with_capacity(16 + session_id.len() + payload.len());
    buf.put_slice(&header(CLIENT_FULL_REQUEST, FLAG_WITH_EVENT, JSON, GZIP));
    buf.put_u32(event);
    put_prefixed(&mut buf, session_id.as_bytes())?;
    put_prefixed(&mut buf, &payload)?;
    Ok(buf.freeze())
}

/// Encodes a chunk of microphone audio (raw PCM, gzip'd, no serialization).
pub fn encode_audio(session_id: &str, pcm: &[u8]) -> Result<Bytes, CodecError> {
    let payload = gzip(pcm)?;
    let mut buf = BytesMut::with_capacity(16 + session_id.len() + payload.len());
    buf.put_slice(&header(
        CLIENT_AUDIO_ONLY_REQUEST,
        FLAG_WITH_EVENT,
        NO_SERIALIZATION,
        GZIP,
    ));
    buf.put_u32(codes::TASK_REQUEST);
    put_prefixed(&mut buf, session_id.as_bytes())?;
    put_prefixed(&mut buf, &payload)?;
    Ok(buf.freeze())
}

/// Encodes one ChatTTSText chunk: `{start, content, end}` for event 500.
pub fn encode_tts_chunk(
    session_id: &str,
    content: &str,
    start: bool,
    end: bool,
) -> Result<Bytes, CodecError> {
    let body = serde_json::to_vec(&TtsText { start, content, end })?;
    encode_session_event(codes::CHAT_TTS_TEXT, session_id, &body)
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.offset.checked_add(n).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed: n,
            });
        };
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.u32()? as i32)
    }
}

/// Decodes one server frame into an [`InboundEvent`].
pub fn decode_server_frame(frame: &[u8]) -> Result<InboundEvent, CodecError> {
    let mut cursor = Cursor {
        data: frame,
        offset: 0,
    };
    let head = cursor.take(4)?;
    let header_len = usize::from(head[0] & 0x0f) * 4;
    let message_type = head[1] >> 4;
    let flags = head[1] & 0x0f;
    let serialization = head[2] >> 4;
    let compression = head[2] & 0x0f;
    // Skip header extensions, if any.
    cursor.take(header_len.saturating_sub(4))?;

    let mut event = InboundEvent {
        kind: MessageKind::FullResponse,
        event: None,
        error_code: None,
        sequence: None,
        session_id: None,
        payload: Payload::Empty,
    };

    let body = match message_type {
        SERVER_FULL_RESPONSE | SERVER_ACK => {
            if message_type == SERVER_ACK {
                event.kind = MessageKind::Ack;
            }
            if flags & FLAG_SEQUENCE_MASK != 0 {
                event.sequence = Some(cursor.i32()?);
            }
            if flags & FLAG_WITH_EVENT != 0 {
                event.event = Some(cursor.u32()?);
            }
            let id_len = cursor.i32()?.max(0) as usize;
            let id = cursor.take(id_len)?;
            event.session_id = Some(String::from_utf8_lossy(id).into_owned());
            let size = cursor.u32()? as usize;
            cursor.take(size)?
        }
        SERVER_ERROR_RESPONSE => {
            event.kind = MessageKind::Error;
            event.error_code = Some(cursor.u32()?);
            let size = cursor.u32()? as usize;
            cursor.take(size)?
        }
        other => return Err(CodecError::UnsupportedMessageType(other)),
    };

    if body.is_empty() {
        return Ok(event);
    }
    let body = if compression == GZIP {
        gunzip(body)?
    } else {
        body.to_vec()
    };
    event.payload = match serialization {
        JSON => Payload::Json(serde_json::from_slice(&body)?),
        NO_SERIALIZATION => Payload::Binary(Bytes::from(body)),
        _ => Payload::Text(String::from_utf8(body)?),
    };
    Ok(event)
}
