use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::ConfigError;

/// Bound used for negative timeouts. Kept for compatibility with existing
/// configurations; a negative timeout is not an infinite wait.
pub const ONE_WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const DEFAULT_TIMEOUT: &str = "30s";
pub const DEFAULT_POLL_INTERVAL: &str = "5s";

/// How long a wait may run, as parsed from a signed duration string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// `0`: evaluate exactly once.
    Once,
    /// Positive durations.
    Within(Duration),
    /// Any negative duration: wait up to [`ONE_WEEK`].
    Week,
}

impl Timeout {
    /// Deadline offset from the start of the wait.
    pub fn budget(&self) -> Duration {
        match self {
            Timeout::Once => Duration::ZERO,
            Timeout::Within(d) => *d,
            Timeout::Week => ONE_WEEK,
        }
    }

    pub fn is_single_check(&self) -> bool {
        matches!(self, Timeout::Once)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (negative, d) = parse_signed("timeout", raw)?;
        Ok(match (negative, d.is_zero()) {
            (_, true) => Timeout::Once,
            (true, false) => Timeout::Week,
            (false, false) => Timeout::Within(d),
        })
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Timeout::Within(Duration::from_secs(30))
    }
}

impl FromStr for Timeout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeout::parse(s)
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Once => f.write_str("0s"),
            Timeout::Within(d) => write!(f, "{}", humantime::format_duration(*d)),
            Timeout::Week => f.write_str("-1s (bounded at 7d)"),
        }
    }
}

/// Poll intervals must be strictly positive.
pub fn parse_poll_interval(raw: &str) -> Result<Duration, ConfigError> {
    let (negative, d) = parse_signed("poll_interval", raw)?;
    if negative || d.is_zero() {
        return Err(ConfigError::Duration {
            field: "poll_interval",
            value: raw.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(d)
}

/// Accepts humantime durations (`30s`, `1m30s`, `2h 5m`) with an optional sign.
fn parse_signed(field: &'static str, raw: &str) -> Result<(bool, Duration), ConfigError> {
    let trimmed = raw.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed).trim_start()),
    };
    if body == "0" {
        return Ok((negative, Duration::ZERO));
    }
    humantime::parse_duration(body)
        .map(|d| (negative, d))
        .map_err(|e| ConfigError::Duration { field, value: raw.to_string(), reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_single_check() {
        for raw in ["0", "0s", "-0s", "+0s", " 0ms "] {
            let t = Timeout::parse(raw).unwrap();
            assert_eq!(t, Timeout::Once, "raw {raw:?}");
            assert!(t.is_single_check());
            assert_eq!(t.budget(), Duration::ZERO);
        }
    }

    #[test]
    fn negative_is_bounded_at_one_week() {
        for raw in ["-1s", "-30m", "- 2h"] {
            let t = Timeout::parse(raw).unwrap();
            assert_eq!(t, Timeout::Week, "raw {raw:?}");
            assert_eq!(t.budget(), Duration::from_secs(604_800));
        }
    }

    #[test]
    fn positive_durations() {
        assert_eq!(Timeout::parse("30s").unwrap(), Timeout::Within(Duration::from_secs(30)));
        assert_eq!(Timeout::parse("1m30s").unwrap().budget(), Duration::from_secs(90));
        assert_eq!(Timeout::parse(DEFAULT_TIMEOUT).unwrap(), Timeout::default());
    }

    #[test]
    fn garbage_is_a_config_error() {
        let err = Timeout::parse("soon").unwrap_err();
        assert!(matches!(err, ConfigError::Duration { field: "timeout", .. }));
        assert!(Timeout::parse("").is_err());
    }

    #[test]
    fn poll_interval_must_be_positive() {
        assert_eq!(parse_poll_interval(DEFAULT_POLL_INTERVAL).unwrap(), Duration::from_secs(5));
        assert!(parse_poll_interval("0s").is_err());
        assert!(parse_poll_interval("-1s").is_err());
    }
}
