//! Wire layout of the relay slot
//!
//! ```text
//! [0, 4)     process id, little-endian i32
//! [4, 4096)  message bytes, NUL-terminated unless they fill the slot
//! ```

use crate::names::RELAY_BUFFER_SIZE;
use serde::Deserialize;

/// Offset of the message text
const TEXT_OFFSET: usize = 4;

/// Longest text `encode` writes, leaving room for the terminator
pub const MAX_TEXT_LEN: usize = RELAY_BUFFER_SIZE - TEXT_OFFSET - 1;

/// Character set shared by producers and the listener
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TextEncoding {
    /// UTF-8; invalid sequences become U+FFFD
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// ISO-8859-1; every byte maps to the code point of the same value
    #[serde(rename = "latin-1", alias = "latin1")]
    Latin1,
}

impl TextEncoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

/// One message taken out of the slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub process_id: i32,
    pub text: String,
}

/// Decode a slot snapshot. Never fails: a zeroed slot is pid 0 with empty text.
pub fn decode(buf: &[u8; RELAY_BUFFER_SIZE], encoding: TextEncoding) -> DecodedMessage {
    let process_id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);

    // The terminator search starts past the pid so its zero bytes never count
    let body = &buf[TEXT_OFFSET..];
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());

    DecodedMessage {
        process_id,
        text: encoding.decode(&body[..end]),
    }
}

/// Lay out a message the way a producer writes it.
///
/// Text longer than [`MAX_TEXT_LEN`] encoded bytes is cut so the terminator fits.
pub fn encode(process_id: i32, text: &str, encoding: TextEncoding) -> [u8; RELAY_BUFFER_SIZE] {
    let mut buf = [0u8; RELAY_BUFFER_SIZE];
    buf[..TEXT_OFFSET].copy_from_slice(&process_id.to_le_bytes());

    let bytes = encoding.encode(text);
    let len = bytes.len().min(MAX_TEXT_LEN);
    buf[TEXT_OFFSET..TEXT_OFFSET + len].copy_from_slice(&bytes[..len]);
    buf
}
