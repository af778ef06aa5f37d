//! Slot generation and availability math.
//!
//! Everything here is pure: the handlers fetch busy intervals and the
//! day-off flag, this module decides which start times remain bookable.
//! The result is advisory only — the database triggers are the authority
//! at write time.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

/// First bookable start time of a working day.
const OPEN_HOUR: u32 = 9;
/// Last bookable start time (inclusive) is 19:30.
const CLOSE_HOUR: u32 = 19;
/// Slot granularity in minutes.
const SLOT_STEP_MIN: u32 = 30;

pub const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// All candidate start times for one working day: 09:00, 09:30, ... 19:30.
/// Identical for every calendar date.
pub fn generate_time_slots() -> Vec<NaiveTime> {
    let mut slots = Vec::new();
    for hour in OPEN_HOUR..=CLOSE_HOUR {
        for minute in (0..60).step_by(SLOT_STEP_MIN as usize) {
            slots.push(NaiveTime::from_hms_opt(hour, minute, 0).unwrap());
        }
    }
    slots
}

/// Half-open interval overlap: [a0,a1) and [b0,b1) overlap iff
/// a0 < b1 && b0 < a1. Touching endpoints do not conflict.
pub fn overlaps(a0: NaiveDateTime, a1: NaiveDateTime, b0: NaiveDateTime, b1: NaiveDateTime) -> bool {
    a0 < b1 && b0 < a1
}

/// The start times still bookable on `date` for a service of
/// `duration_minutes`, given the employee's busy intervals.
///
/// A day off empties the list regardless of busy intervals. A slot whose
/// interval runs past 19:30 is still offered — the grid bounds start times,
/// not end times.
pub fn available_starts(
    date: NaiveDate,
    duration_minutes: i64,
    busy: &[(NaiveDateTime, NaiveDateTime)],
    day_off: bool,
) -> Vec<NaiveTime> {
    if day_off {
        return Vec::new();
    }

    let duration = TimeDelta::minutes(duration_minutes);
    generate_time_slots()
        .into_iter()
        .filter(|slot| {
            let start = date.and_time(*slot);
            let end = start + duration;
            !busy.iter().any(|(b0, b1)| overlaps(start, end, *b0, *b1))
        })
        .collect()
}

/// Parse a 'YYYY-MM-DD HH:MM:SS' local-time string as stored in SQLite.
pub fn parse_local(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FMT).ok()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn dt(s: &str) -> NaiveDateTime {
        parse_local(s).unwrap()
    }

    fn busy(ranges: &[(&str, &str)]) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        ranges.iter().map(|(a, b)| (dt(a), dt(b))).collect()
    }

    // ── generate_time_slots ──

    #[test]
    fn test_grid_bounds() {
        let slots = generate_time_slots();
        assert_eq!(slots.first().unwrap().to_string(), "09:00:00");
        assert_eq!(slots.last().unwrap().to_string(), "19:30:00");
        assert_eq!(slots.len(), 22);
    }

    #[test]
    fn test_grid_strictly_increasing_evenly_spaced() {
        let slots = generate_time_slots();
        for pair in slots.windows(2) {
            assert_eq!(pair[1] - pair[0], TimeDelta::minutes(30));
        }
    }

    // ── overlaps ──

    #[test]
    fn test_overlap_plain() {
        assert!(overlaps(
            dt("2026-03-01 10:00:00"),
            dt("2026-03-01 11:00:00"),
            dt("2026-03-01 10:30:00"),
            dt("2026-03-01 11:30:00"),
        ));
    }

    #[test]
    fn test_touching_intervals_do_not_overlap() {
        assert!(!overlaps(
            dt("2026-03-01 10:00:00"),
            dt("2026-03-01 11:00:00"),
            dt("2026-03-01 11:00:00"),
            dt("2026-03-01 12:00:00"),
        ));
    }

    #[test]
    fn test_containment_overlaps() {
        assert!(overlaps(
            dt("2026-03-01 10:00:00"),
            dt("2026-03-01 13:00:00"),
            dt("2026-03-01 11:00:00"),
            dt("2026-03-01 11:30:00"),
        ));
    }

    // ── available_starts ──

    #[test]
    fn test_no_busy_full_grid() {
        let avail = available_starts(d("2026-03-01"), 30, &[], false);
        assert_eq!(avail.len(), 22);
    }

    #[test]
    fn test_busy_interval_excludes_covered_starts() {
        // 10:00–11:00 busy; a 30-min candidate at 10:00 and 10:30 conflicts,
        // 09:30 and 11:00 do not.
        let b = busy(&[("2026-03-01 10:00:00", "2026-03-01 11:00:00")]);
        let avail = available_starts(d("2026-03-01"), 30, &b, false);
        let strs: Vec<String> = avail.iter().map(|t| t.format("%H:%M").to_string()).collect();
        assert!(strs.contains(&"09:30".to_string()));
        assert!(!strs.contains(&"10:00".to_string()));
        assert!(!strs.contains(&"10:30".to_string()));
        assert!(strs.contains(&"11:00".to_string()));
    }

    #[test]
    fn test_longer_duration_excludes_earlier_starts() {
        // 90-min candidate at 09:00 runs into an 10:00 booking.
        let b = busy(&[("2026-03-01 10:00:00", "2026-03-01 10:30:00")]);
        let avail = available_starts(d("2026-03-01"), 90, &b, false);
        let strs: Vec<String> = avail.iter().map(|t| t.format("%H:%M").to_string()).collect();
        assert!(!strs.contains(&"09:00".to_string()));
        assert!(!strs.contains(&"09:30".to_string()));
        assert!(strs.contains(&"10:30".to_string()));
    }

    #[test]
    fn test_last_slot_not_clipped_by_duration() {
        // 120 minutes starting 19:30 runs past close — still offered.
        let avail = available_starts(d("2026-03-01"), 120, &[], false);
        assert_eq!(avail.last().unwrap().to_string(), "19:30:00");
    }

    #[test]
    fn test_day_off_empties_regardless_of_busy() {
        let avail = available_starts(d("2026-03-01"), 30, &[], true);
        assert!(avail.is_empty());
    }

    #[test]
    fn test_idempotent_on_same_snapshot() {
        let b = busy(&[
            ("2026-03-01 09:00:00", "2026-03-01 10:00:00"),
            ("2026-03-01 14:00:00", "2026-03-01 15:30:00"),
        ]);
        let a1 = available_starts(d("2026-03-01"), 60, &b, false);
        let a2 = available_starts(d("2026-03-01"), 60, &b, false);
        assert_eq!(a1, a2);
    }

    #[test]
    fn test_exclusion_matches_overlap_predicate() {
        // s excluded iff ∃ b: s.start < b.end && b.start < s.start + d
        let b = busy(&[("2026-03-01 12:00:00", "2026-03-01 13:00:00")]);
        let duration = 60;
        let avail = available_starts(d("2026-03-01"), duration, &b, false);
        for slot in generate_time_slots() {
            let start = d("2026-03-01").and_time(slot);
            let end = start + TimeDelta::minutes(duration);
            let excluded = b.iter().any(|(b0, b1)| start < *b1 && *b0 < end);
            assert_eq!(avail.contains(&slot), !excluded, "slot {}", slot);
        }
    }

    #[test]
    fn test_fully_booked_day() {
        let b = busy(&[("2026-03-01 09:00:00", "2026-03-01 20:00:00")]);
        assert!(available_starts(d("2026-03-01"), 30, &b, false).is_empty());
    }

    // ── parse_local ──

    #[test]
    fn test_parse_local_roundtrip() {
        let t = dt("2026-03-01 14:30:00");
        assert_eq!(t.format(DATETIME_FMT).to_string(), "2026-03-01 14:30:00");
    }

    #[test]
    fn test_parse_local_rejects_garbage() {
        assert!(parse_local("not-a-time").is_none());
    }
}
