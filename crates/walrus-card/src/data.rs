use std::any::Any;
use std::fmt;

use crate::hex::to_hex;
use crate::record::CardRecord;
use crate::technology::CardTechnology;

/// Decoded card, independent of technology.
///
/// Values are immutable once constructed. Technology-specific accessors are
/// reached by downcasting:
///
/// ```
/// use walrus_card::{CardData, DecoderRegistry, CardTechnology, HidCardData};
///
/// let registry = DecoderRegistry::with_defaults();
/// let card = registry
///     .decode(&CardTechnology::Hid, &[0x20, 0x04, 0xA3, 0xC1, 0xF3])
///     .unwrap();
///
/// assert_eq!(card.summary(), "FC 81 CN 57593 (26-bit)");
/// let hid = card.downcast_ref::<HidCardData>().unwrap();
/// assert_eq!(hid.facility_code(), Some(81));
/// ```
pub trait CardData: fmt::Debug + Send + Sync + 'static {
    fn technology(&self) -> CardTechnology;

    /// Payload bytes exactly as scanned.
    fn raw(&self) -> &[u8];

    /// One-line human-readable description.
    fn summary(&self) -> String;

    /// Technology-specific fields as (name, value) pairs.
    fn fields(&self) -> Vec<(&'static str, String)>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn CardData {
    /// Downcast to a concrete card type.
    pub fn downcast_ref<T: CardData>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Raw payload as upper-case hex.
    pub fn raw_hex(&self) -> String {
        to_hex(self.raw())
    }

    /// Export as a serializable record stamped with the current time.
    pub fn to_record(&self) -> CardRecord {
        CardRecord::from_card(self)
    }
}

impl fmt::Display for dyn CardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.technology(), self.summary())
    }
}
