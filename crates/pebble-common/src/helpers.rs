//! Environment variable helpers shared by the settings layers.

use std::time::Duration;

/// Non-empty, trimmed value of `name`.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn env_u16(name: &str, default: u16) -> u16 {
    env_string(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

pub fn env_u32(name: &str, default: u32) -> u32 {
    env_string(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Reads a millisecond count; unparsable values fall back to `default`.
pub fn env_duration_ms(name: &str, default: Duration) -> Duration {
    env_string(name)
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_string_ignores_blank() {
        std::env::set_var("PEBBLE_TEST_BLANK", "   ");
        assert_eq!(env_string("PEBBLE_TEST_BLANK"), None);

        std::env::set_var("PEBBLE_TEST_HOST", " relay.example ");
        assert_eq!(env_string("PEBBLE_TEST_HOST").as_deref(), Some("relay.example"));
    }

    #[test]
    fn test_env_numbers_fall_back_on_garbage() {
        std::env::set_var("PEBBLE_TEST_PORT", "not-a-port");
        assert_eq!(env_u16("PEBBLE_TEST_PORT", 8889), 8889);

        std::env::set_var("PEBBLE_TEST_ATTEMPTS", "12");
        assert_eq!(env_u32("PEBBLE_TEST_ATTEMPTS", 60), 12);

        std::env::set_var("PEBBLE_TEST_INTERVAL", "250");
        assert_eq!(
            env_duration_ms("PEBBLE_TEST_INTERVAL", Duration::from_secs(1)),
            Duration::from_millis(250)
        );
    }
}
