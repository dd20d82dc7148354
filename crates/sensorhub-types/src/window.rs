//! Aggregation window tokens.

use core::fmt;
use core::str::FromStr;

use time::Duration;

use crate::error::ParseError;

/// A fixed aggregation window such as `5m` or `1h`.
///
/// Tokens are a positive integer followed by `m` (minutes) or `h` (hours).
/// The original token is kept as the label written to aggregate records.
///
/// ```
/// use sensorhub_types::WindowSpec;
/// use time::Duration;
///
/// let window: WindowSpec = "15m".parse().unwrap();
/// assert_eq!(window.duration(), Duration::minutes(15));
/// assert_eq!(window.label(), "15m");
///
/// assert!("15s".parse::<WindowSpec>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    label: String,
    duration: Duration,
}

impl WindowSpec {
    /// Parse a window token.
    pub fn parse(token: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidWindowSpec(token.to_string());
        let trimmed = token.trim();

        let (digits, unit) = match trimmed.char_indices().last() {
            Some((idx, _)) => trimmed.split_at(idx),
            None => return Err(invalid()),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount: i64 = digits.parse().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }

        let seconds_per_unit = match unit {
            "m" => 60,
            "h" => 3600,
            _ => return Err(invalid()),
        };
        let duration = amount
            .checked_mul(seconds_per_unit)
            .map(Duration::seconds)
            .ok_or_else(invalid)?;

        Ok(Self {
            label: trimmed.to_string(),
            duration,
        })
    }

    /// The token as supplied, used as the aggregate record label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Length of the window.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl FromStr for WindowSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes() {
        let window = WindowSpec::parse("5m").unwrap();
        assert_eq!(window.duration(), Duration::minutes(5));
        assert_eq!(window.label(), "5m");
    }

    #[test]
    fn test_hours() {
        let window = WindowSpec::parse("1h").unwrap();
        assert_eq!(window.duration(), Duration::hours(1));
        assert_eq!(window.to_string(), "1h");
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let window = WindowSpec::parse(" 24h ").unwrap();
        assert_eq!(window.label(), "24h");
        assert_eq!(window.duration(), Duration::hours(24));
    }

    #[test]
    fn test_rejects_unknown_suffix() {
        for token in ["5s", "2d", "1w", "10"] {
            let err = WindowSpec::parse(token).unwrap_err();
            assert_eq!(err, ParseError::InvalidWindowSpec(token.to_string()));
        }
    }

    #[test]
    fn test_rejects_malformed_amount() {
        for token in ["", "m", "h", "-5m", "1.5h", "0m", "five m", "+5m"] {
            assert!(WindowSpec::parse(token).is_err(), "{token:?} should be rejected");
        }
    }

    #[test]
    fn test_rejects_overflowing_amount() {
        assert!(WindowSpec::parse("99999999999999999999m").is_err());
        assert!(WindowSpec::parse(&format!("{}h", i64::MAX)).is_err());
    }

    #[test]
    fn test_rejects_multibyte_suffix() {
        assert!(WindowSpec::parse("5µ").is_err());
    }
}
