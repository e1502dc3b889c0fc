//! Stream identifier rules.

use pebble_common::{Error, Result};

pub const MIN_LEN: usize = 3;
pub const MAX_LEN: usize = 20;

/// 8 lowercase hex characters from 4 random bytes.
pub fn generate() -> String {
    hex::encode(rand::random::<[u8; 4]>())
}

/// 3 to 20 characters, ASCII alphanumerics and `-` only.
pub fn validate(stream_id: &str) -> Result<()> {
    let len = stream_id.chars().count();
    if !(MIN_LEN..=MAX_LEN).contains(&len) {
        return Err(Error::validation(format!(
            "stream id must be {}-{} characters, got {}",
            MIN_LEN, MAX_LEN, len
        )));
    }
    if !stream_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(Error::validation(
            "stream id may only contain letters, digits and hyphens",
        ));
    }
    Ok(())
}

/// Validates a caller-supplied id; absent or empty input yields a fresh one.
pub fn resolve(requested: Option<&str>) -> Result<String> {
    match requested {
        Some(id) if !id.is_empty() => {
            validate(id)?;
            Ok(id.to_string())
        }
        _ => Ok(generate()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pebble_common::ErrorKind;
    use std::collections::HashSet;

    #[test]
    fn test_validate_length_bounds() {
        assert!(validate("ab").is_err());
        assert!(validate("abc").is_ok());
        assert!(validate("a2345678901234567890").is_ok());
        assert!(validate("a23456789012345678901").is_err());
    }

    #[test]
    fn test_validate_character_set() {
        assert!(validate("abc-123").is_ok());
        assert!(validate("My-Room-01").is_ok());
        assert!(validate("abc_123").is_err());
        assert!(validate("abc 123").is_err());
        assert!(validate("abc/123").is_err());
        assert!(validate("caf\u{e9}-1").is_err());
    }

    #[test]
    fn test_validation_error_kind() {
        let err = validate("ab").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_empty_id_generates() {
        let id = resolve(Some("")).expect("resolve");
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let id = resolve(None).expect("resolve");
        assert_eq!(id.len(), 8);
    }

    #[test]
    fn test_resolve_keeps_valid_custom_id() {
        assert_eq!(resolve(Some("my-room")).expect("resolve"), "my-room");
        assert!(resolve(Some("x")).is_err());
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let ids: HashSet<String> = (0..100).map(|_| generate()).collect();
        assert_eq!(ids.len(), 100);
        for id in &ids {
            assert!(validate(id).is_ok());
        }
    }
}
