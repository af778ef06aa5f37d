use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

const KYIV_OFFSET_SECS: i32 = 3 * 3600;

/// Salon-local wall time. A fixed UTC+3 offset is good enough here: the
/// business runs on one clock and DST drift of an hour does not change
/// which calendar day "tomorrow" is for the reminder sweep.
pub fn kyiv_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&FixedOffset::east_opt(KYIV_OFFSET_SECS).unwrap())
}

pub fn kyiv_today() -> NaiveDate {
    kyiv_now().date_naive()
}

pub fn kyiv_tomorrow() -> NaiveDate {
    kyiv_today() + Duration::days(1)
}
