use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, bail};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

const NANOS_PER_MILLI: i128 = 1_000_000;
const UNIX_EPOCH_UTC: &str = "1970-01-01T00:00:00.000Z";

#[must_use]
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}

#[must_use]
pub fn now_utc() -> String {
    format_unix_ms(unix_timestamp_ms())
}

/// Renders unix milliseconds as a fixed-width RFC 3339 UTC string with
/// millisecond precision, e.g. `2026-02-05T07:00:03.042Z`.
#[must_use]
pub fn format_unix_ms(timestamp_unix_ms: u64) -> String {
    let nanos = i128::from(timestamp_unix_ms)
        .checked_mul(NANOS_PER_MILLI)
        .unwrap_or(i128::MAX);
    let Ok(dt) = OffsetDateTime::from_unix_timestamp_nanos(nanos) else {
        return UNIX_EPOCH_UTC.to_string();
    };
    let dt = dt.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    )
}

pub fn parse_timestamp_to_unix_ms(raw: &str) -> Result<u64> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        bail!("timestamp input is empty");
    }

    let parsed = OffsetDateTime::parse(candidate, &Rfc3339)
        .map_err(|error| anyhow::anyhow!("unsupported timestamp format `{candidate}`: {error}"))?;
    if parsed.unix_timestamp() < 0 {
        bail!("timestamps before 1970-01-01T00:00:00Z are not supported");
    }

    u64::try_from(parsed.unix_timestamp_nanos() / NANOS_PER_MILLI)
        .map_err(|_| anyhow::anyhow!("timestamp exceeds supported unix millisecond range"))
}

#[cfg(test)]
mod tests {
    use super::{format_unix_ms, now_utc, parse_timestamp_to_unix_ms};

    #[test]
    fn formats_fixed_width_utc_millis() {
        assert_eq!(format_unix_ms(1_770_274_803_042), "2026-02-05T07:00:03.042Z");
        assert_eq!(format_unix_ms(0), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let as_utc = parse_timestamp_to_unix_ms("2026-02-05T09:00:03+02:00")
            .expect("timestamp should parse");
        assert_eq!(as_utc, 1_770_274_803_000);
    }

    #[test]
    fn formatted_now_round_trips_through_parser() {
        let now = now_utc();
        assert!(now.ends_with('Z'));
        assert!(parse_timestamp_to_unix_ms(&now).is_ok());
    }

    #[test]
    fn rejects_unsupported_string() {
        let err =
            parse_timestamp_to_unix_ms("next friday").expect_err("unsupported string should fail");
        assert!(err.to_string().contains("unsupported timestamp format"));
    }
}
