// =============================================================================
// Daily shard naming — Beijing-time (UTC+8) dates over Unix-ms columns
// =============================================================================
//
// Shard tables are named by the Beijing-time date of the row's timestamp
// while the timestamp columns themselves stay Unix milliseconds (UTC).  The
// mismatch is deliberate and must be preserved: operators reason about
// shards in their local (UTC+8) day, so a snapshot taken exactly at Beijing
// midnight belongs to the NEW day's shard.
// =============================================================================

use chrono::{Datelike, FixedOffset, NaiveDate, TimeZone, Utc};

/// Fixed UTC+8 offset used for every shard-name computation.
pub fn beijing_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid offset")
}

/// The Beijing-time calendar date containing `timestamp_ms`.
pub fn beijing_date(timestamp_ms: i64) -> NaiveDate {
    let utc = Utc
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
    utc.with_timezone(&beijing_offset()).date_naive()
}

/// `YYYYMMDD` suffix for a shard table name.
pub fn date_suffix(date: NaiveDate) -> String {
    format!("{:04}{:02}{:02}", date.year(), date.month(), date.day())
}

/// Table name of the OI snapshot shard for the given Beijing date.
pub fn snapshot_shard(date: NaiveDate) -> String {
    format!("open_interest_snapshots_{}", date_suffix(date))
}

/// Table name of the candle shard for (interval, Beijing date).
pub fn candle_shard(interval: &str, date: NaiveDate) -> String {
    format!("candles_{}_{}", interval, date_suffix(date))
}

/// Legacy unified snapshot table, used as a read fallback when every daily
/// shard intersecting a range is missing.
pub const LEGACY_SNAPSHOT_TABLE: &str = "open_interest_snapshots";

/// All Beijing dates whose shard could hold rows in `[start_ms, end_ms]`,
/// oldest first. An inverted or empty range yields the single start date.
pub fn dates_for_range(start_ms: i64, end_ms: i64) -> Vec<NaiveDate> {
    let start = beijing_date(start_ms);
    let end = beijing_date(end_ms.max(start_ms));

    let mut dates = Vec::new();
    let mut d = start;
    while d <= end {
        dates.push(d);
        d = match d.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    dates
}

/// Parse the `YYYYMMDD` suffix out of a shard table name with the given
/// prefix (e.g. `open_interest_snapshots_`). Returns `None` for names that
/// do not carry a valid date suffix.
pub fn parse_suffix(table: &str, prefix: &str) -> Option<NaiveDate> {
    let suffix = table.strip_prefix(prefix)?;
    if suffix.len() != 8 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = suffix[0..4].parse().ok()?;
    let month: u32 = suffix[4..6].parse().ok()?;
    let day: u32 = suffix[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// 2024-03-10 00:00:00 Beijing == 2024-03-09 16:00:00 UTC.
    const BEIJING_MIDNIGHT_MS: i64 = 1_710_000_000_000;

    #[test]
    fn beijing_midnight_rolls_to_new_day() {
        // One ms before Beijing midnight is still the old day.
        let before = beijing_date(BEIJING_MIDNIGHT_MS - 1);
        let at = beijing_date(BEIJING_MIDNIGHT_MS);
        assert_eq!(before, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(at, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
    }

    #[test]
    fn shard_names() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(snapshot_shard(d), "open_interest_snapshots_20240310");
        assert_eq!(candle_shard("5m", d), "candles_5m_20240310");
    }

    #[test]
    fn range_enumeration_spans_days() {
        // 3 hours straddling Beijing midnight -> two dates.
        let start = BEIJING_MIDNIGHT_MS - 2 * 3600 * 1000;
        let end = BEIJING_MIDNIGHT_MS + 3600 * 1000;
        let dates = dates_for_range(start, end);
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(dates[1], NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
    }

    #[test]
    fn range_single_day() {
        let dates = dates_for_range(BEIJING_MIDNIGHT_MS, BEIJING_MIDNIGHT_MS + 1000);
        assert_eq!(dates.len(), 1);
    }

    #[test]
    fn inverted_range_yields_start_date() {
        let dates = dates_for_range(BEIJING_MIDNIGHT_MS, BEIJING_MIDNIGHT_MS - 5000);
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0], beijing_date(BEIJING_MIDNIGHT_MS));
    }

    #[test]
    fn suffix_parse_roundtrip() {
        let d = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let table = snapshot_shard(d);
        assert_eq!(parse_suffix(&table, "open_interest_snapshots_"), Some(d));
        assert_eq!(parse_suffix("open_interest_snapshots", "open_interest_snapshots_"), None);
        assert_eq!(parse_suffix("open_interest_snapshots_2024", "open_interest_snapshots_"), None);
        assert_eq!(parse_suffix("open_interest_snapshots_abcdefgh", "open_interest_snapshots_"), None);
    }
}
