//! UUID helpers
//! Requests carry UUIDs as free-form strings. They are handed to the radio
//! untouched; these helpers exist for backends that need a parsed UUID and
//! for comparing advertised services against a scan filter.

use uuid::Uuid;

use crate::core::bluetooth::constants::BLUETOOTH_BASE_UUID;

/// Parses a full 128-bit UUID or 16/32-bit shorthand ("180A", "0000180a").
pub fn parse_uuid(raw: &str) -> Option<Uuid> {
    let trimmed = raw.trim().trim_start_matches("0x").trim_start_matches("0X");
    let is_hex = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_hexdigit());

    if is_hex && (trimmed.len() == 4 || trimmed.len() == 8) {
        let short = u32::from_str_radix(trimmed, 16).ok()?;
        return Some(Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96)));
    }
    Uuid::parse_str(trimmed).ok()
}

/// Compares two UUID strings, treating shorthand and full forms as equal.
/// Unparseable inputs fall back to a case-insensitive string comparison.
pub fn uuids_match(a: &str, b: &str) -> bool {
    match (parse_uuid(a), parse_uuid(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.trim().eq_ignore_ascii_case(b.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_sixteen_bit_shorthand() {
        let uuid = parse_uuid("180A").unwrap();
        assert_eq!(uuid.to_string(), "0000180a-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn expands_thirty_two_bit_shorthand() {
        let uuid = parse_uuid("0x12345678").unwrap();
        assert_eq!(uuid.to_string(), "12345678-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn parses_full_uuid() {
        let raw = "4f63756c-7573-2054-6872-65656d6f7465";
        assert_eq!(parse_uuid(raw).unwrap().to_string(), raw);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_uuid("not-a-uuid").is_none());
        assert!(parse_uuid("").is_none());
    }

    #[test]
    fn shorthand_matches_full_form() {
        assert!(uuids_match("180a", "0000180A-0000-1000-8000-00805F9B34FB"));
        assert!(!uuids_match("180a", "180f"));
    }

    #[test]
    fn malformed_uuids_compare_as_text() {
        assert!(uuids_match("Heart-Rate", "heart-rate"));
        assert!(!uuids_match("heart-rate", "180d"));
    }
}
