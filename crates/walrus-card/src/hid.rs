//! HID Prox credentials.
//!
//! Readers report a HID Prox credential as up to 8 big-endian bytes holding
//! the Wiegand frame plus marker bits. Bit 37 is the long-format sentinel;
//! below it, the highest set bit marks the frame length and everything
//! beneath that bit is the Wiegand frame itself.
//!
//! ```text
//!  bit 37     bit N           bit 0
//!  [sentinel]..[1][ N Wiegand bits ]
//! ```
//!
//! The 26-bit H10301 format is further split into facility code and card
//! number:
//!
//! ```text
//!  25   24..17    16..1   0
//!  [E] [ FC:8 ] [ CN:16 ] [O]
//! ```
//!
//! `E` is even parity over bits 25..13 and `O` odd parity over bits 12..0.

use std::any::Any;

use crate::data::CardData;
use crate::decoder::CardDecoder;
use crate::technology::CardTechnology;
use crate::{CardError, Result};

/// Maximum payload length in bytes.
pub const HID_MAX_PAYLOAD: usize = 8;

/// Bit length of the H10301 format.
pub const H10301_LENGTH: u8 = 26;

/// Bits below the long-format sentinel.
const SENTINEL_MASK: u64 = (1 << 37) - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidCardData {
    raw: Vec<u8>,
    format_length: u8,
    wiegand: u64,
    facility_code: Option<u8>,
    card_number: Option<u16>,
}

impl HidCardData {
    /// Build a 26-bit H10301 credential with correct parity.
    pub fn h10301(facility_code: u8, card_number: u16) -> Self {
        let mut wiegand = ((u64::from(facility_code) << 16) | u64::from(card_number)) << 1;
        if (wiegand >> 13).count_ones() % 2 != 0 {
            wiegand |= 1 << 25;
        }
        if (wiegand & 0x1FFF).count_ones() % 2 == 0 {
            wiegand |= 1;
        }

        let value = (1u64 << 37) | (1u64 << H10301_LENGTH) | wiegand;
        Self {
            raw: value.to_be_bytes()[3..].to_vec(),
            format_length: H10301_LENGTH,
            wiegand,
            facility_code: Some(facility_code),
            card_number: Some(card_number),
        }
    }

    /// Decode a reader payload.
    ///
    /// # Errors
    ///
    /// Returns `CardError::InvalidPayload` if the payload is empty or longer
    /// than 8 bytes, carries no length marker, or is a 26-bit frame with
    /// bad parity.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() || payload.len() > HID_MAX_PAYLOAD {
            return Err(CardError::invalid_payload(
                CardTechnology::Hid,
                format!(
                    "expected 1 to {HID_MAX_PAYLOAD} bytes, got {}",
                    payload.len()
                ),
            ));
        }

        let value = payload
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        let marked = value & SENTINEL_MASK;
        if marked <= 1 {
            return Err(CardError::invalid_payload(
                CardTechnology::Hid,
                "no format length marker",
            ));
        }

        let format_length = (63 - marked.leading_zeros()) as u8;
        let wiegand = marked & ((1u64 << format_length) - 1);

        let (facility_code, card_number) = if format_length == H10301_LENGTH {
            check_h10301_parity(wiegand)?;
            (
                Some(((wiegand >> 17) & 0xFF) as u8),
                Some(((wiegand >> 1) & 0xFFFF) as u16),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            raw: payload.to_vec(),
            format_length,
            wiegand,
            facility_code,
            card_number,
        })
    }

    /// Wiegand frame length in bits.
    pub fn format_length(&self) -> u8 {
        self.format_length
    }

    /// The Wiegand frame, parity bits included.
    pub fn wiegand(&self) -> u64 {
        self.wiegand
    }

    /// Facility code, for 26-bit credentials.
    pub fn facility_code(&self) -> Option<u8> {
        self.facility_code
    }

    /// Card number, for 26-bit credentials.
    pub fn card_number(&self) -> Option<u16> {
        self.card_number
    }
}

fn check_h10301_parity(wiegand: u64) -> Result<()> {
    let even_ok = (wiegand >> 13).count_ones() % 2 == 0;
    let odd_ok = (wiegand & 0x1FFF).count_ones() % 2 == 1;
    if even_ok && odd_ok {
        Ok(())
    } else {
        Err(CardError::invalid_payload(
            CardTechnology::Hid,
            format!("26-bit parity check failed for {wiegand:07X}"),
        ))
    }
}

impl CardData for HidCardData {
    fn technology(&self) -> CardTechnology {
        CardTechnology::Hid
    }

    fn raw(&self) -> &[u8] {
        &self.raw
    }

    fn summary(&self) -> String {
        match (self.facility_code, self.card_number) {
            (Some(fc), Some(cn)) => format!("FC {fc} CN {cn} ({}-bit)", self.format_length),
            _ => format!("{}-bit {:X}", self.format_length, self.wiegand),
        }
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("format_length", self.format_length.to_string()),
            ("wiegand", format!("{:X}", self.wiegand)),
        ];
        if let Some(fc) = self.facility_code {
            fields.push(("facility_code", fc.to_string()));
        }
        if let Some(cn) = self.card_number {
            fields.push(("card_number", cn.to_string()));
        }
        fields
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decoder for [`HidCardData`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HidDecoder;

impl CardDecoder for HidDecoder {
    fn technology(&self) -> CardTechnology {
        CardTechnology::Hid
    }

    fn decode(&self, payload: &[u8]) -> Result<Box<dyn CardData>> {
        Ok(Box::new(HidCardData::from_payload(payload)?))
    }
}
