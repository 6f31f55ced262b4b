use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Card technology tag.
///
/// Identifies which decoder produced a [`CardData`](crate::CardData) value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CardTechnology {
    /// EM4100/EM4102 125 kHz read-only tags.
    Em,

    /// HID Prox 125 kHz credentials.
    Hid,

    /// A technology registered outside this crate.
    Custom(String),
}

impl CardTechnology {
    /// Get the tag's canonical name.
    pub fn name(&self) -> &str {
        match self {
            Self::Em => "EM",
            Self::Hid => "HID",
            Self::Custom(name) => name,
        }
    }

    /// Check if this is one of the built-in technologies.
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for CardTechnology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CardTechnology {
    type Err = std::convert::Infallible;

    /// Parse a technology tag. `"EM"` and `"HID"` match case-insensitively;
    /// anything else becomes `Custom`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(if s.eq_ignore_ascii_case("EM") {
            Self::Em
        } else if s.eq_ignore_ascii_case("HID") {
            Self::Hid
        } else {
            Self::Custom(s.to_string())
        })
    }
}

impl From<&str> for CardTechnology {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(technology) => technology,
            Err(never) => match never {},
        }
    }
}

impl Serialize for CardTechnology {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for CardTechnology {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(CardTechnology::from(name.as_str()))
    }
}
