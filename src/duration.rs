//! Parsing for human-readable durations like "10s" or "2m" in config and CLI.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

/// Parse a duration string like "90s", "10m", "2h", "1d".
///
/// Case-insensitive; surrounding whitespace is ignored.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    let (num, unit) = if let Some(n) = s.strip_suffix('d') {
        (n, "d")
    } else if let Some(n) = s.strip_suffix('h') {
        (n, "h")
    } else if let Some(n) = s.strip_suffix('m') {
        (n, "m")
    } else if let Some(n) = s.strip_suffix('s') {
        (n, "s")
    } else {
        anyhow::bail!("duration must end with d, h, m, or s");
    };

    let num: u64 = num.parse().context("invalid number in duration")?;

    let secs = match unit {
        "d" => num.checked_mul(24 * 60 * 60).context("duration is too large")?,
        "h" => num.checked_mul(60 * 60).context("duration is too large")?,
        "m" => num.checked_mul(60).context("duration is too large")?,
        _ => num,
    };

    Ok(Duration::from_secs(secs))
}

/// Serde deserializer for duration strings.
///
/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}
