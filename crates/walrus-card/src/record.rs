use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::CardData;
use crate::hex::to_hex;
use crate::technology::CardTechnology;

/// Serializable export of a decoded card.
///
/// This is the form handed to storage and display code outside the reader
/// core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub technology: CardTechnology,

    /// Raw payload as upper-case hex.
    pub raw: String,

    pub summary: String,

    pub fields: BTreeMap<String, String>,

    /// When the card was read.
    pub read_at: DateTime<Utc>,
}

impl CardRecord {
    /// Build a record from decoded card data, stamped with the current time.
    pub fn from_card(card: &dyn CardData) -> Self {
        Self {
            technology: card.technology(),
            raw: to_hex(card.raw()),
            summary: card.summary(),
            fields: card
                .fields()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            read_at: Utc::now(),
        }
    }

    /// Override the read timestamp.
    pub fn with_read_at(mut self, read_at: DateTime<Utc>) -> Self {
        self.read_at = read_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HidCardData;
    use chrono::TimeZone;

    #[test]
    fn test_from_card() {
        let card = HidCardData::h10301(81, 57593);
        let record = CardRecord::from_card(&card);

        assert_eq!(record.technology, CardTechnology::Hid);
        assert_eq!(record.raw, "2004A3C1F3");
        assert_eq!(record.summary, "FC 81 CN 57593 (26-bit)");
        assert_eq!(record.fields["facility_code"], "81");
        assert_eq!(record.fields["card_number"], "57593");
    }

    #[test]
    fn test_json_export() {
        let read_at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        let card: Box<dyn CardData> = Box::new(crate::EmCardData::new(0x0F, 0x0012D687));
        let record = card.to_record().with_read_at(read_at);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["technology"], "EM");
        assert_eq!(json["raw"], "0F0012D687");
        assert_eq!(json["summary"], "0F0012D687");
        assert_eq!(json["fields"]["unique_id"], "1234567");
        assert_eq!(json["read_at"], "2025-03-14T09:26:53Z");

        let back: CardRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
