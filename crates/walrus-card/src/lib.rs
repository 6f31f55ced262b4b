//! Card data model for the Walrus reader core.
//!
//! Readers report scanned credentials as a technology tag plus raw payload
//! bytes. A [`DecoderRegistry`] turns those into [`CardData`] values: one
//! concrete type per technology ([`EmCardData`], [`HidCardData`]), used
//! through the trait object `Box<dyn CardData>`.
//!
//! ```
//! use walrus_card::{CardTechnology, DecoderRegistry, parse_hex};
//!
//! let registry = DecoderRegistry::with_defaults();
//! let payload = parse_hex("0F0012D687").unwrap();
//! let card = registry.decode(&CardTechnology::Em, &payload).unwrap();
//!
//! assert_eq!(card.to_string(), "EM 0F0012D687");
//! assert_eq!(card.to_record().raw, "0F0012D687");
//! ```

pub mod data;
pub mod decoder;
pub mod em;
pub mod error;
pub mod hex;
pub mod hid;
pub mod record;
pub mod technology;

pub use data::CardData;
pub use decoder::{CardDecoder, DecoderRegistry};
pub use em::{EM_PAYLOAD_LENGTH, EmCardData, EmDecoder};
pub use error::{CardError, Result};
pub use hex::{parse_hex, to_hex};
pub use hid::{H10301_LENGTH, HID_MAX_PAYLOAD, HidCardData, HidDecoder};
pub use record::CardRecord;
pub use technology::CardTechnology;
