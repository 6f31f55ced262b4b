//! Incremental message framing over an unbounded byte stream.
//!
//! A [`Framer`] knows one wire format: how to recognise a complete message at
//! the front of a byte buffer and how to serialise an outgoing message. The
//! [`FramingEngine`] owns the buffer and applies the framer to it.
//!
//! ```text
//!  chunk ──feed──> [ buffered bytes ........ ]
//!                    │
//!                    └─ try_extract_next ──> (message, consumed)
//!                                            buffer.split_to(consumed)
//! ```
//!
//! Bytes leave the buffer only from the front, and only once a message has
//! been recognised, so no byte is decoded twice.
//!
//! # Example
//!
//! ```
//! use walrus_protocol::{Charset, FramingEngine, LineFramer};
//!
//! let mut engine = FramingEngine::new(LineFramer::new("\r\n", Charset::Ascii));
//! engine.feed(b"AB");
//! assert!(engine.try_extract_next().is_none());
//!
//! engine.feed(b"C\r\n");
//! assert_eq!(engine.try_extract_next(), Some(("ABC".to_string(), 5)));
//! assert_eq!(engine.buffered_len(), 0);
//! ```

use bytes::BytesMut;

use crate::Result;

/// Initial capacity of the framing buffer.
const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// A wire format.
///
/// Implementations are pure: they inspect bytes and produce messages, they do
/// not own or mutate the buffer.
pub trait Framer: Send + 'static {
    type Message: Send + 'static;

    /// Recognise a complete message at the front of `buf`.
    ///
    /// Returns the message and the number of leading bytes it occupies
    /// (including any delimiter), or `None` if `buf` does not yet start with
    /// a complete message.
    fn slice_incoming(&self, buf: &[u8]) -> Option<(Self::Message, usize)>;

    /// Serialise a message, delimiter included.
    fn format_outgoing(&self, message: &Self::Message) -> Result<Vec<u8>>;
}

/// Buffer plus framer.
#[derive(Debug)]
pub struct FramingEngine<F: Framer> {
    framer: F,
    buffer: BytesMut,
}

impl<F: Framer> FramingEngine<F> {
    pub fn new(framer: F) -> Self {
        Self {
            framer,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Append inbound bytes. Never decodes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extract the next complete message, if any.
    ///
    /// On success the consumed bytes are removed from the front of the buffer.
    /// On `None` the buffer is left untouched.
    pub fn try_extract_next(&mut self) -> Option<(F::Message, usize)> {
        if self.buffer.is_empty() {
            return None;
        }

        let (message, consumed) = self.framer.slice_incoming(&self.buffer)?;
        let consumed = consumed.min(self.buffer.len());
        let _ = self.buffer.split_to(consumed);
        Some((message, consumed))
    }

    /// Serialise an outgoing message.
    pub fn encode(&self, message: &F::Message) -> Result<Vec<u8>> {
        self.framer.format_outgoing(message)
    }

    /// Number of unconsumed bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all unconsumed bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn framer(&self) -> &F {
        &self.framer
    }

    pub fn framer_mut(&mut self) -> &mut F {
        &mut self.framer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-size records, for exercising the engine without line semantics.
    struct FixedFramer(usize);

    impl Framer for FixedFramer {
        type Message = Vec<u8>;

        fn slice_incoming(&self, buf: &[u8]) -> Option<(Vec<u8>, usize)> {
            (buf.len() >= self.0).then(|| (buf[..self.0].to_vec(), self.0))
        }

        fn format_outgoing(&self, message: &Vec<u8>) -> Result<Vec<u8>> {
            Ok(message.clone())
        }
    }

    #[test]
    fn test_empty_engine_yields_nothing() {
        let mut engine = FramingEngine::new(FixedFramer(2));
        assert!(engine.try_extract_next().is_none());
        assert_eq!(engine.buffered_len(), 0);
    }

    #[test]
    fn test_zero_length_feed() {
        let mut engine = FramingEngine::new(FixedFramer(1));
        engine.feed(&[]);
        assert!(engine.try_extract_next().is_none());
    }

    #[test]
    fn test_incomplete_leaves_buffer_untouched() {
        let mut engine = FramingEngine::new(FixedFramer(4));
        engine.feed(&[1, 2, 3]);
        assert!(engine.try_extract_next().is_none());
        assert_eq!(engine.buffered_len(), 3);
    }

    #[test]
    fn test_extracts_in_order() {
        let mut engine = FramingEngine::new(FixedFramer(2));
        engine.feed(&[1, 2, 3]);
        engine.feed(&[4, 5]);

        assert_eq!(engine.try_extract_next(), Some((vec![1, 2], 2)));
        assert_eq!(engine.try_extract_next(), Some((vec![3, 4], 2)));
        assert!(engine.try_extract_next().is_none());
        assert_eq!(engine.buffered_len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut engine = FramingEngine::new(FixedFramer(8));
        engine.feed(&[0; 5]);
        engine.clear();
        assert_eq!(engine.buffered_len(), 0);
    }

    #[test]
    fn test_framer_mut() {
        let mut engine = FramingEngine::new(FixedFramer(4));
        engine.feed(&[9, 9]);
        assert!(engine.try_extract_next().is_none());

        engine.framer_mut().0 = 1;
        assert_eq!(engine.framer().0, 1);
        assert_eq!(engine.try_extract_next(), Some((vec![9], 1)));
    }
}
