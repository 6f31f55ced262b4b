//! Line-delimited framing.
//!
//! Most readers speak a text protocol: one command or response per line,
//! terminated by a fixed delimiter (usually `"\r\n"`). [`LineFramer`] frames
//! such a stream in a configurable [`Charset`].
//!
//! Some readers also need single raw bytes exchanged (sync/ack handshakes).
//! In *bytewise* mode every buffered byte is a message of its own, mapped to
//! a one-character string through ISO-8859-1, and the delimiter is ignored.
//!
//! # Limitations
//!
//! Offsets are computed in characters and reported as byte counts, so a
//! charset with multi-byte characters misframes lines that contain them.
//! All bundled readers use single-byte charsets.
//!
//! Bytes a charset cannot decode become U+FFFD in the framed line; they never
//! hold back the stream.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::engine::Framer;
use crate::session::SerialSession;
use crate::{ProtocolError, Result};

/// Character set of a line protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    /// 7-bit US-ASCII. Bytes above `0x7F` do not decode.
    Ascii,
    /// Latin-1. Every byte maps to the code point of the same value.
    Iso8859_1,
    Utf8,
}

impl Charset {
    /// Decode bytes, replacing anything invalid with U+FFFD.
    ///
    /// ASCII replaces each byte above `0x7F`; UTF-8 replaces each maximal
    /// invalid sequence.
    pub fn decode_lossy(self, bytes: &[u8]) -> String {
        match self {
            Charset::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
            Charset::Iso8859_1 => bytes.iter().copied().map(char::from).collect(),
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Encode text, failing on the first character this charset lacks.
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            Charset::Ascii => {
                if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
                    return Err(ProtocolError::encoding(format!(
                        "character {c:?} is not ASCII"
                    )));
                }
                Ok(text.as_bytes().to_vec())
            }
            Charset::Iso8859_1 => text.chars().map(latin1_byte).collect(),
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Charset::Ascii => write!(f, "US-ASCII"),
            Charset::Iso8859_1 => write!(f, "ISO-8859-1"),
            Charset::Utf8 => write!(f, "UTF-8"),
        }
    }
}

impl FromStr for Charset {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('_', "-").as_str() {
            "ASCII" | "US-ASCII" => Ok(Charset::Ascii),
            "ISO-8859-1" | "LATIN1" | "LATIN-1" => Ok(Charset::Iso8859_1),
            "UTF-8" | "UTF8" => Ok(Charset::Utf8),
            _ => Err(ProtocolError::encoding(format!("unsupported charset: {s}"))),
        }
    }
}

fn latin1_byte(c: char) -> Result<u8> {
    u8::try_from(u32::from(c))
        .map_err(|_| ProtocolError::encoding(format!("character {c:?} is not ISO-8859-1")))
}

/// Framer for delimiter-terminated text lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFramer {
    delimiter: String,
    /// The delimiter as it appears on the wire.
    delimiter_bytes: Vec<u8>,
    charset: Charset,
    bytewise: bool,
}

impl LineFramer {
    pub fn new(delimiter: impl Into<String>, charset: Charset) -> Self {
        let delimiter = delimiter.into();
        // A delimiter outside the charset is matched by its UTF-8 bytes.
        let delimiter_bytes = charset
            .encode(&delimiter)
            .unwrap_or_else(|_| delimiter.as_bytes().to_vec());

        Self {
            delimiter,
            delimiter_bytes,
            charset,
            bytewise: false,
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Switch between line and single-byte framing.
    ///
    /// Affects later extractions only; bytes already consumed stay consumed.
    pub fn set_bytewise(&mut self, bytewise: bool) {
        self.bytewise = bytewise;
    }

    pub fn is_bytewise(&self) -> bool {
        self.bytewise
    }
}

impl Framer for LineFramer {
    type Message = String;

    fn slice_incoming(&self, buf: &[u8]) -> Option<(String, usize)> {
        if self.bytewise {
            let first = *buf.first()?;
            return Some((char::from(first).to_string(), 1));
        }

        let end = find(buf, &self.delimiter_bytes)?;
        let line = self.charset.decode_lossy(&buf[..end]);
        let consumed = line.chars().count() + self.delimiter.chars().count();
        Some((line, consumed))
    }

    fn format_outgoing(&self, message: &String) -> Result<Vec<u8>> {
        if self.bytewise {
            let first = message
                .chars()
                .next()
                .ok_or_else(|| ProtocolError::encoding("empty bytewise message"))?;
            return Ok(vec![latin1_byte(first)?]);
        }

        let mut line = String::with_capacity(message.len() + self.delimiter.len());
        line.push_str(message);
        line.push_str(&self.delimiter);
        self.charset.encode(&line)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A session speaking a line protocol.
pub type LineSession = SerialSession<LineFramer>;

impl SerialSession<LineFramer> {
    /// Switch the session's framer between line and bytewise mode.
    pub fn set_bytewise(&self, bytewise: bool) {
        debug!(session = %self.name(), bytewise, "Switching framing mode");
        self.engine().framer_mut().set_bytewise(bytewise);
    }

    pub fn is_bytewise(&self) -> bool {
        self.engine().framer().is_bytewise()
    }

    /// Send one line of text.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        self.send(&line.to_owned()).await
    }

    /// Send a single raw byte.
    ///
    /// Requires bytewise mode to arrive as exactly one byte on the wire.
    pub async fn send_byte(&self, byte: u8) -> Result<()> {
        self.send(&char::from(byte).to_string()).await
    }

    /// Receive a message and return its first byte.
    ///
    /// Characters up to U+00FF map to their Latin-1 byte; anything else
    /// yields the first byte of its UTF-8 encoding.
    pub async fn receive_byte(&self, timeout: Duration) -> Result<u8> {
        let message = self.receive(timeout).await?;
        let first = message
            .chars()
            .next()
            .ok_or_else(|| ProtocolError::invalid_data("empty message"))?;
        Ok(latin1_byte(first).unwrap_or_else(|_| message.as_bytes()[0]))
    }
}
