use chrono::{DateTime, Days, NaiveTime, TimeDelta, TimeZone};

/// A wall-clock time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    time: NaiveTime,
}

impl DailySchedule {
    /// `None` unless `hour < 24` and `minute < 60`.
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|time| Self { time })
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    /// First occurrence strictly after `now`, in `now`'s time zone.
    ///
    /// A time skipped by a clock change moves to the next day.
    pub fn next_run_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let today = now.date_naive();
        for offset in 0..=2 {
            let Some(day) = today.checked_add_days(Days::new(offset)) else {
                break;
            };
            let Some(candidate) = now
                .timezone()
                .from_local_datetime(&day.and_time(self.time))
                .earliest()
            else {
                continue;
            };
            if candidate > *now {
                return candidate;
            }
        }
        now.clone() + TimeDelta::days(1)
    }
}
