//! Hex helpers for reader payloads.

use crate::{CardError, Result};

/// Parse a hex string as reported by a reader.
///
/// Surrounding whitespace, inner spaces and colons are ignored, as is an
/// optional `0x` prefix. Both cases are accepted.
///
/// ```
/// use walrus_card::parse_hex;
///
/// assert_eq!(parse_hex("0x2004A3c1f3").unwrap(), vec![0x20, 0x04, 0xA3, 0xC1, 0xF3]);
/// assert_eq!(parse_hex("01:02 03").unwrap(), vec![1, 2, 3]);
/// assert!(parse_hex("ABC").is_err());
/// ```
pub fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let digits: Vec<u8> = trimmed
        .bytes()
        .filter(|b| !matches!(b, b' ' | b':'))
        .collect();

    if digits.is_empty() {
        return Err(CardError::InvalidHex("empty payload".to_string()));
    }
    if digits.len() % 2 != 0 {
        return Err(CardError::InvalidHex(format!(
            "odd number of digits in {input:?}"
        )));
    }

    digits
        .chunks(2)
        .map(|pair| -> Result<u8> {
            Ok((nibble(pair[0], input)? << 4) | nibble(pair[1], input)?)
        })
        .collect()
}

/// Format bytes as upper-case hex without separators.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn nibble(digit: u8, input: &str) -> Result<u8> {
    char::from(digit)
        .to_digit(16)
        .map(|d| d as u8)
        .ok_or_else(|| CardError::InvalidHex(format!("invalid digit in {input:?}")))
}
