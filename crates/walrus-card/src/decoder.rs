//! Payload decoders keyed by technology.
//!
//! New card technologies plug in by implementing [`CardDecoder`] and
//! registering it; existing variants are never modified.
//!
//! ```
//! use walrus_card::{CardData, CardDecoder, CardTechnology, DecoderRegistry, Result};
//! # use walrus_card::EmCardData;
//!
//! struct IndalaDecoder;
//!
//! impl CardDecoder for IndalaDecoder {
//!     fn technology(&self) -> CardTechnology {
//!         CardTechnology::from("INDALA")
//!     }
//!
//!     fn decode(&self, payload: &[u8]) -> Result<Box<dyn CardData>> {
//!         # let _ = payload;
//!         # Ok(Box::new(EmCardData::new(0, 0)))
//!     }
//! }
//!
//! let mut registry = DecoderRegistry::with_defaults();
//! registry.register(IndalaDecoder);
//! assert!(registry.supports(&CardTechnology::from("INDALA")));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::data::CardData;
use crate::em::EmDecoder;
use crate::hid::HidDecoder;
use crate::technology::CardTechnology;
use crate::{CardError, Result};

/// Turns raw payload bytes into card data for one technology.
pub trait CardDecoder: Send + Sync {
    fn technology(&self) -> CardTechnology;

    /// # Errors
    ///
    /// Returns `CardError::InvalidPayload` if `payload` is not a valid
    /// encoding for this technology.
    fn decode(&self, payload: &[u8]) -> Result<Box<dyn CardData>>;
}

/// Registry of decoders, shared by all card devices.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<CardTechnology, Arc<dyn CardDecoder>>,
}

impl DecoderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the EM and HID decoders.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EmDecoder);
        registry.register(HidDecoder);
        registry
    }

    /// Register a decoder, replacing any previous one for its technology.
    pub fn register<D: CardDecoder + 'static>(&mut self, decoder: D) -> &mut Self {
        self.decoders.insert(decoder.technology(), Arc::new(decoder));
        self
    }

    pub fn supports(&self, technology: &CardTechnology) -> bool {
        self.decoders.contains_key(technology)
    }

    /// Registered technologies, sorted by name.
    pub fn technologies(&self) -> Vec<CardTechnology> {
        let mut technologies: Vec<_> = self.decoders.keys().cloned().collect();
        technologies.sort_by(|a, b| a.name().cmp(b.name()));
        technologies
    }

    /// Decode a payload with the decoder registered for `technology`.
    ///
    /// # Errors
    ///
    /// Returns `CardError::UnknownTechnology` if no decoder is registered,
    /// otherwise whatever the decoder returns.
    pub fn decode(
        &self,
        technology: &CardTechnology,
        payload: &[u8],
    ) -> Result<Box<dyn CardData>> {
        let decoder = self
            .decoders
            .get(technology)
            .ok_or_else(|| CardError::UnknownTechnology(technology.to_string()))?;
        decoder.decode(payload)
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("technologies", &self.technologies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmCardData;

    struct ReversedEmDecoder;

    impl CardDecoder for ReversedEmDecoder {
        fn technology(&self) -> CardTechnology {
            CardTechnology::Em
        }

        fn decode(&self, payload: &[u8]) -> Result<Box<dyn CardData>> {
            let reversed: Vec<u8> = payload.iter().rev().copied().collect();
            Ok(Box::new(EmCardData::from_payload(&reversed)?))
        }
    }

    #[test]
    fn test_defaults() {
        let registry = DecoderRegistry::with_defaults();
        assert_eq!(
            registry.technologies(),
            vec![CardTechnology::Em, CardTechnology::Hid]
        );
    }

    #[test]
    fn test_decode_dispatch() {
        let registry = DecoderRegistry::with_defaults();

        let em = registry
            .decode(&CardTechnology::Em, &[0x01, 0x02, 0x03, 0x04, 0x05])
            .unwrap();
        assert_eq!(em.technology(), CardTechnology::Em);

        let hid = registry
            .decode(&CardTechnology::Hid, &[0x20, 0x04, 0xA3, 0xC1, 0xF3])
            .unwrap();
        assert_eq!(hid.technology(), CardTechnology::Hid);
    }

    #[test]
    fn test_unknown_technology() {
        let registry = DecoderRegistry::with_defaults();
        let err = registry
            .decode(&CardTechnology::from("AWID"), &[0x01])
            .unwrap_err();
        assert!(matches!(err, CardError::UnknownTechnology(name) if name == "AWID"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = DecoderRegistry::new();
        assert!(!registry.supports(&CardTechnology::Em));
        assert!(registry.technologies().is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = DecoderRegistry::with_defaults();
        registry.register(ReversedEmDecoder);

        let card = registry
            .decode(&CardTechnology::Em, &[0x05, 0x04, 0x03, 0x02, 0x01])
            .unwrap();
        assert_eq!(card.summary(), "0102030405");
        assert_eq!(registry.technologies().len(), 2);
    }
}
