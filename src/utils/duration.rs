//! Compound duration strings for configuration values.
//!
//! Accepts the usual `"200ms"`, `"20s"`, `"5m"`, `"168h"` forms, including
//! compounds like `"1h30m"`. Fractional values (`"1.5h"`) are supported.

use std::time::Duration;

use crate::{Error, Result};

/// Parse a duration string such as `"5m"` or `"1h30m"`.
pub fn parse(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Error::config("empty duration"));
    }

    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| Error::config(format!("missing unit in duration {raw:?}")))?;
        if num_end == 0 {
            return Err(Error::config(format!("invalid duration {raw:?}")));
        }

        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| Error::config(format!("invalid number in duration {raw:?}")))?;

        let unit_end = rest[num_end..]
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .map(|i| num_end + i)
            .unwrap_or(rest.len());

        let unit_secs = match &rest[num_end..unit_end] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            unit => {
                return Err(Error::config(format!(
                    "unknown unit {unit:?} in duration {raw:?}"
                )));
            }
        };

        total += Duration::from_secs_f64(value * unit_secs);
        rest = &rest[unit_end..];
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse("20s").unwrap(), Duration::from_secs(20));
        assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse("168h").unwrap(), Duration::from_secs(168 * 3600));
    }

    #[test]
    fn parses_compounds() {
        assert_eq!(parse("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse("1m30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn parses_fractions_and_zero() {
        assert_eq!(parse("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(parse("").is_err());
        assert!(parse("5").is_err());
        assert!(parse("m5").is_err());
        assert!(parse("5parsecs").is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn composed_strings_parse_to_their_total(h in 0u64..100, m in 0u64..60, s in 0u64..60) {
                let raw = format!("{h}h{m}m{s}s");
                let expected = Duration::from_secs(h * 3600 + m * 60 + s);
                prop_assert_eq!(parse(&raw).unwrap(), expected);
            }

            #[test]
            fn plain_seconds_round_trip(s in 0u64..1_000_000) {
                prop_assert_eq!(parse(&format!("{s}s")).unwrap(), Duration::from_secs(s));
            }
        }
    }
}
