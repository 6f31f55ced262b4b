//! Tokio codec adapter for framers.
//!
//! [`FramingCodec`] lets any [`Framer`] drive a `tokio_util::codec::Framed`
//! stream. The session uses its own engine and pump; the codec serves the
//! other end of the wire, such as simulated readers.
//!
//! ```
//! use bytes::BytesMut;
//! use tokio_util::codec::Decoder;
//! use walrus_protocol::{Charset, FramingCodec, LineFramer};
//!
//! let mut codec = FramingCodec::new(LineFramer::new("\r\n", Charset::Ascii));
//! let mut buffer = BytesMut::from(&b"UID?\r\n"[..]);
//!
//! assert_eq!(codec.decode(&mut buffer).unwrap(), Some("UID?".to_string()));
//! assert!(buffer.is_empty());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::engine::Framer;
use crate::ProtocolError;

#[derive(Debug, Clone)]
pub struct FramingCodec<F> {
    framer: F,
}

impl<F: Framer> FramingCodec<F> {
    pub fn new(framer: F) -> Self {
        Self { framer }
    }

    pub fn framer(&self) -> &F {
        &self.framer
    }

    pub fn framer_mut(&mut self) -> &mut F {
        &mut self.framer
    }
}

impl<F: Framer> Decoder for FramingCodec<F> {
    type Item = F::Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<F::Message>, ProtocolError> {
        if src.is_empty() {
            return Ok(None);
        }

        match self.framer.slice_incoming(src) {
            Some((message, consumed)) => {
                let _ = src.split_to(consumed.min(src.len()));
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }
}

impl<F: Framer> Encoder<F::Message> for FramingCodec<F> {
    type Error = ProtocolError;

    fn encode(&mut self, item: F::Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let bytes = self.framer.format_outgoing(&item)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Charset, LineFramer};

    fn codec() -> FramingCodec<LineFramer> {
        FramingCodec::new(LineFramer::new("\r\n", Charset::Iso8859_1))
    }

    #[test]
    fn test_decode_partial() {
        let mut codec = codec();
        let mut buffer = BytesMut::from(&b"CONFIG"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        assert_eq!(&buffer[..], b"CONFIG");
    }

    #[test]
    fn test_decode_multiple() {
        let mut codec = codec();
        let mut buffer = BytesMut::from(&b"101:OK WITH TEXT\r\nHID_PROX\r\n"[..]);

        assert_eq!(
            codec.decode(&mut buffer).unwrap().as_deref(),
            Some("101:OK WITH TEXT")
        );
        assert_eq!(codec.decode(&mut buffer).unwrap().as_deref(), Some("HID_PROX"));
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_decode_bytewise() {
        let mut codec = codec();
        codec.framer_mut().set_bytewise(true);
        let mut buffer = BytesMut::from(&[0x55u8][..]);

        assert_eq!(codec.decode(&mut buffer).unwrap().as_deref(), Some("\u{55}"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_encode() {
        let mut codec = codec();
        let mut buffer = BytesMut::new();
        codec.encode("100:OK".to_string(), &mut buffer).unwrap();

        assert_eq!(&buffer[..], b"100:OK\r\n");
    }

    #[test]
    fn test_encode_error() {
        let mut codec = codec();
        let mut buffer = BytesMut::new();
        let err = codec.encode("\u{2603}".to_string(), &mut buffer).unwrap_err();

        assert!(matches!(err, ProtocolError::Encoding(_)));
        assert!(buffer.is_empty());
    }
}
