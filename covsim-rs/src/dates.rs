//! The engine reports days as integer offsets from a fixed reference date.

use chrono::{NaiveDate, TimeDelta};

pub const EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2019, 1, 1) {
    Some(date) => date,
    None => panic!("invalid epoch"),
};

/// Calendar date of an engine day index, or `None` outside the representable range.
pub fn date_from_day_index(day: i64) -> Option<NaiveDate> {
    EPOCH.checked_add_signed(TimeDelta::try_days(day)?)
}

pub fn day_index(date: NaiveDate) -> i64 {
    (date - EPOCH).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_epoch_is_day_zero() {
        assert_eq!(date_from_day_index(0), Some(date(2019, 1, 1)));
        assert_eq!(day_index(date(2019, 1, 1)), 0);
    }

    #[test]
    fn test_day_index_spans_leap_year() {
        // 2020 is a leap year
        let d = date(2021, 1, 1);
        assert_eq!(day_index(d), 365 + 366);
        assert_eq!(date_from_day_index(731), Some(d));
    }

    #[test]
    fn test_negative_days() {
        assert_eq!(date_from_day_index(-1), Some(date(2018, 12, 31)));
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(date_from_day_index(i64::MAX), None);
    }
}
