use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// HumanDuration
// ---------------------------------------------------------------------------

/// A duration parsed from a human-readable string like `"30s"`, `"5m"`, `"1h"`, `"2d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(Duration);

impl HumanDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// The same span as a signed [`chrono::TimeDelta`], saturating on overflow.
    pub fn as_time_delta(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::from_std(self.0).unwrap_or(chrono::TimeDelta::MAX)
    }
}

impl From<HumanDuration> for Duration {
    fn from(hd: HumanDuration) -> Self {
        hd.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl FromStr for HumanDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.starts_with('-') {
            anyhow::bail!("negative duration not allowed here: {s:?}");
        }
        let secs = parse_secs(s)?;
        Ok(Self(Duration::from_secs(secs)))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_secs(f, self.0.as_secs())
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// SignedDuration
// ---------------------------------------------------------------------------

/// A signed offset such as `"3d"` or `"-2h"`. Used for a drip's base offset
/// and for relative time literals, which may point either way from "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignedDuration(i64);

impl SignedDuration {
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// Saturates at `TimeDelta::MIN`/`MAX`; parsed values are always in range.
    pub fn as_time_delta(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::try_seconds(self.0).unwrap_or(if self.0 < 0 {
            chrono::TimeDelta::MIN
        } else {
            chrono::TimeDelta::MAX
        })
    }
}

impl FromStr for SignedDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let secs = i64::try_from(parse_secs(body)?)
            .ok()
            .filter(|secs| chrono::TimeDelta::try_seconds(*secs).is_some())
            .ok_or_else(|| anyhow::anyhow!("duration out of range: {s:?}"))?;
        Ok(Self(if negative { -secs } else { secs }))
    }
}

impl fmt::Display for SignedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            f.write_str("-")?;
        }
        write_secs(f, self.0.unsigned_abs())
    }
}

impl Serialize for SignedDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SignedDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn parse_secs(s: &str) -> anyhow::Result<u64> {
    if s.is_empty() {
        anyhow::bail!("empty duration string");
    }

    let (num_part, suffix) = split_number_suffix(s)?;
    let value: u64 = num_part
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid number in duration: {s:?}"))?;

    let factor = match suffix {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 7 * 86400,
        _ => {
            anyhow::bail!("unsupported duration suffix {suffix:?} in {s:?} (expected s/m/h/d/w)")
        }
    };

    value
        .checked_mul(factor)
        .ok_or_else(|| anyhow::anyhow!("duration out of range: {s:?}"))
}

fn write_secs(f: &mut fmt::Formatter<'_>, secs: u64) -> fmt::Result {
    if secs == 0 {
        return write!(f, "0s");
    }
    if secs.is_multiple_of(86400) {
        write!(f, "{}d", secs / 86400)
    } else if secs.is_multiple_of(3600) {
        write!(f, "{}h", secs / 3600)
    } else if secs.is_multiple_of(60) {
        write!(f, "{}m", secs / 60)
    } else {
        write!(f, "{secs}s")
    }
}

/// Split a string like `"30s"` into `("30", "s")`.
/// Returns an error if the string is all-digits or all-letters.
fn split_number_suffix(s: &str) -> anyhow::Result<(&str, &str)> {
    let idx = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow::anyhow!("missing suffix in {s:?}"))?;
    if idx == 0 {
        anyhow::bail!("missing numeric part in {s:?}");
    }
    Ok((&s[..idx], &s[idx..]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- HumanDuration --

    #[test]
    fn duration_seconds() {
        let d: HumanDuration = "30s".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(30));
        assert_eq!(d.to_string(), "30s");
    }

    #[test]
    fn duration_hours_normalize_to_days() {
        let d: HumanDuration = "48h".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(48 * 3600));
        assert_eq!(d.to_string(), "2d");
    }

    #[test]
    fn duration_weeks() {
        let d: HumanDuration = "1w".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(7 * 86400));
        assert_eq!(d.to_string(), "7d");
    }

    #[test]
    fn duration_rejects_negative() {
        assert!("-1d".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn duration_error_cases() {
        assert!("".parse::<HumanDuration>().is_err());
        assert!("30".parse::<HumanDuration>().is_err());
        assert!("30x".parse::<HumanDuration>().is_err());
        assert!("s".parse::<HumanDuration>().is_err());
    }

    // -- SignedDuration --

    #[test]
    fn signed_positive_and_negative() {
        let p: SignedDuration = "3d".parse().unwrap();
        assert_eq!(p.as_secs(), 3 * 86400);
        let n: SignedDuration = "-2h".parse().unwrap();
        assert_eq!(n.as_secs(), -7200);
        assert_eq!(n.to_string(), "-2h");
        assert_eq!(n.as_time_delta(), chrono::TimeDelta::hours(-2));
    }

    #[test]
    fn signed_explicit_plus() {
        let p: SignedDuration = "+90s".parse().unwrap();
        assert_eq!(p.as_secs(), 90);
        assert_eq!(p.to_string(), "90s");
    }

    #[test]
    fn signed_error_cases() {
        assert!("-".parse::<SignedDuration>().is_err());
        assert!("--1d".parse::<SignedDuration>().is_err());
    }

    #[test]
    fn signed_rejects_values_beyond_time_delta() {
        assert!("10000000000000000s".parse::<SignedDuration>().is_err());
        assert!("-10000000000000000s".parse::<SignedDuration>().is_err());
        assert!("100000000d".parse::<SignedDuration>().is_ok());
    }

    #[test]
    fn signed_time_delta_saturates() {
        assert_eq!(SignedDuration::from_secs(i64::MAX).as_time_delta(), chrono::TimeDelta::MAX);
        assert_eq!(SignedDuration::from_secs(i64::MIN).as_time_delta(), chrono::TimeDelta::MIN);
    }

    #[test]
    fn serde_roundtrip_signed() {
        let d: SignedDuration = "-5m".parse().unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"-5m\"");
        let d2: SignedDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(d, d2);
    }
}
