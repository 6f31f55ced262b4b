//! EM4100 tags.
//!
//! An EM4100 tag carries 40 data bits: an 8-bit customer (version) id
//! followed by a 32-bit unique id. Readers report these as 5 bytes.

use std::any::Any;

use crate::data::CardData;
use crate::decoder::CardDecoder;
use crate::technology::CardTechnology;
use crate::{CardError, Result};

/// Payload length of an EM4100 tag in bytes.
pub const EM_PAYLOAD_LENGTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmCardData {
    raw: [u8; EM_PAYLOAD_LENGTH],
    customer_id: u8,
    unique_id: u32,
}

impl EmCardData {
    pub fn new(customer_id: u8, unique_id: u32) -> Self {
        let mut raw = [0u8; EM_PAYLOAD_LENGTH];
        raw[0] = customer_id;
        raw[1..].copy_from_slice(&unique_id.to_be_bytes());
        Self {
            raw,
            customer_id,
            unique_id,
        }
    }

    /// Decode a 5-byte payload.
    ///
    /// # Errors
    ///
    /// Returns `CardError::InvalidPayload` for any other length.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let raw: [u8; EM_PAYLOAD_LENGTH] = payload.try_into().map_err(|_| {
            CardError::invalid_payload(
                CardTechnology::Em,
                format!(
                    "expected {EM_PAYLOAD_LENGTH} bytes, got {}",
                    payload.len()
                ),
            )
        })?;

        Ok(Self {
            raw,
            customer_id: raw[0],
            unique_id: u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]),
        })
    }

    pub fn customer_id(&self) -> u8 {
        self.customer_id
    }

    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// The full 40-bit tag id.
    pub fn tag_id(&self) -> u64 {
        (u64::from(self.customer_id) << 32) | u64::from(self.unique_id)
    }
}

impl CardData for EmCardData {
    fn technology(&self) -> CardTechnology {
        CardTechnology::Em
    }

    fn raw(&self) -> &[u8] {
        &self.raw
    }

    fn summary(&self) -> String {
        format!("{:010X}", self.tag_id())
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("customer_id", format!("{:02X}", self.customer_id)),
            ("unique_id", self.unique_id.to_string()),
        ]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decoder for [`EmCardData`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EmDecoder;

impl CardDecoder for EmDecoder {
    fn technology(&self) -> CardTechnology {
        CardTechnology::Em
    }

    fn decode(&self, payload: &[u8]) -> Result<Box<dyn CardData>> {
        Ok(Box::new(EmCardData::from_payload(payload)?))
    }
}
