// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::consts::{SECONDS_PER_DAY, SECONDS_PER_MINUTE, TICKS_PER_SECOND};

/// On-disk timestamp: days since 1978-01-01, minutes since midnight and
/// ticks (1/50 s) within the minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FsTime {
    pub days: u32,
    pub mins: u32,
    pub ticks: u32,
}

fn amiga_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1978, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl FsTime {
    pub fn new(days: u32, mins: u32, ticks: u32) -> Self {
        FsTime { days, mins, ticks }
    }

    pub fn now() -> Self {
        Self::from_datetime(Local::now().naive_local())
    }

    pub fn from_datetime(time: NaiveDateTime) -> Self {
        let secs = (time - amiga_epoch()).num_seconds().max(0);
        FsTime {
            days: (secs / SECONDS_PER_DAY) as u32,
            mins: ((secs % SECONDS_PER_DAY) / SECONDS_PER_MINUTE) as u32,
            ticks: ((secs % SECONDS_PER_MINUTE) * TICKS_PER_SECOND) as u32,
        }
    }

    /// Calendar time of the stamp, `None` when a damaged stamp lies outside
    /// the range chrono can represent.
    pub fn to_datetime(self) -> Option<NaiveDateTime> {
        let secs = self.days as i64 * SECONDS_PER_DAY
            + self.mins as i64 * SECONDS_PER_MINUTE
            + self.ticks as i64 / TICKS_PER_SECOND;
        amiga_epoch().checked_add_signed(TimeDelta::try_seconds(secs)?)
    }

    pub fn to_local(self) -> Option<DateTime<Local>> {
        self.to_datetime()?.and_local_timezone(Local).single()
    }
}

impl std::fmt::Display for FsTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(time) => write!(f, "{}", time.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "day {} min {} tick {}", self.days, self.mins, self.ticks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_zero() {
        assert_eq!(FsTime::from_datetime(amiga_epoch()), FsTime::new(0, 0, 0));
    }

    #[test]
    fn converts_both_ways() {
        let time = NaiveDate::from_ymd_opt(1985, 7, 23)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap();
        let stamp = FsTime::from_datetime(time);
        assert_eq!(stamp.mins, 13 * 60 + 45);
        assert_eq!(stamp.ticks, 30 * 50);
        assert_eq!(stamp.to_datetime(), Some(time));
    }

    #[test]
    fn out_of_range_stamps_print_raw_fields() {
        let stamp = FsTime::new(u32::MAX, 0, 0);
        assert_eq!(stamp.to_datetime(), None);
        assert_eq!(stamp.to_local(), None);
        assert_eq!(stamp.to_string(), format!("day {} min 0 tick 0", u32::MAX));
        assert_eq!(FsTime::new(0, 61, 0).to_string(), "1978-01-01 01:01:00");
    }
}
