//! Duration parsing for configuration fields.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Parse a duration string (e.g. "500ms", "30s", "2m", "1h").
/// Returns None for "off", "0", or an empty string.
pub fn parse_duration(s: &str) -> Result<Option<Duration>, String> {
    let s = s.trim().to_lowercase();

    if s == "off" || s == "0" || s.is_empty() {
        return Ok(None);
    }

    let (num_str, unit) = if let Some(v) = s.strip_suffix("ms") {
        (v, "ms")
    } else if let Some(v) = s.strip_suffix('s') {
        (v, "s")
    } else if let Some(v) = s.strip_suffix('m') {
        (v, "m")
    } else if let Some(v) = s.strip_suffix('h') {
        (v, "h")
    } else {
        // Plain number is taken as seconds.
        return s
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| format!("invalid duration: {}", s));
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        _ => return Err(format!("invalid unit: {}", unit)),
    };

    Ok(Some(duration))
}

/// A duration written either as a bare number of seconds or as a string
/// with a unit suffix.
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Seconds(u64),
    Text(String),
}

/// Deserialize an optional duration field.
/// Zero and absent both deserialize to None so defaults apply downstream.
pub fn de_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<DurationValue>::deserialize(deserializer)? {
        None | Some(DurationValue::Seconds(0)) => Ok(None),
        Some(DurationValue::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(DurationValue::Text(s)) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("off").unwrap(), None);
        assert_eq!(parse_duration("0").unwrap(), None);
        assert_eq!(parse_duration("").unwrap(), None);

        assert_eq!(
            parse_duration("250ms").unwrap(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            parse_duration("30s").unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_duration("2m").unwrap(),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            parse_duration("1h").unwrap(),
            Some(Duration::from_secs(3600))
        );

        // Plain seconds
        assert_eq!(
            parse_duration("120").unwrap(),
            Some(Duration::from_secs(120))
        );

        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("1.5s").is_err());
    }
}
