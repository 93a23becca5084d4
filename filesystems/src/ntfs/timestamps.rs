use chrono::{DateTime, TimeZone, Utc};

/// FILETIME epoch (1601-01-01 UTC) expressed in seconds before the Unix
/// epoch, and the tick granularity (100 ns) that FILETIME counts in.
const FILETIME_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Converts an NTFS FILETIME (100-ns ticks since 1601-01-01 UTC) into a
/// `DateTime<Utc>`. Out-of-range values (a handful of corrupt images carry
/// these) fall back to the Unix epoch rather than panicking.
pub fn filetime_to_datetime(ticks: u64) -> DateTime<Utc> {
    let ticks = ticks as i64;
    let unix_secs = ticks / TICKS_PER_SECOND - FILETIME_EPOCH_OFFSET_SECS;
    let subsec_ticks = ticks % TICKS_PER_SECOND;
    let nanos = (subsec_ticks * 100) as u32;
    Utc.timestamp_opt(unix_secs, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_filetime_is_1601() {
        let dt = filetime_to_datetime(0);
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "1601-01-01");
    }

    #[test]
    fn unix_epoch_filetime_value() {
        let ticks = (FILETIME_EPOCH_OFFSET_SECS as u64) * TICKS_PER_SECOND as u64;
        let dt = filetime_to_datetime(ticks);
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "1970-01-01");
    }
}
