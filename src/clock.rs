//! ISO calendar arithmetic: every cohort is keyed by an ISO (year, week).

use std::fmt;

use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// An ISO-8601 year/week pair.
///
/// Always valid: week 53 only exists for long ISO years, and the
/// constructor rejects anything `chrono` cannot place on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawYearWeek")]
pub struct YearWeek {
    year: i32,
    week: u32,
}

#[derive(Deserialize)]
struct RawYearWeek {
    year: i32,
    week: u32,
}

impl TryFrom<RawYearWeek> for YearWeek {
    type Error = String;

    fn try_from(raw: RawYearWeek) -> Result<Self, Self::Error> {
        YearWeek::new(raw.year, raw.week)
            .ok_or_else(|| format!("{}-W{:02} is not an ISO week", raw.year, raw.week))
    }
}

impl YearWeek {
    /// Build a year/week pair, returning `None` when the week does not exist.
    pub fn new(year: i32, week: u32) -> Option<Self> {
        NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).map(|_| Self { year, week })
    }

    /// The ISO week containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn week(&self) -> u32 {
        self.week
    }

    /// Monday of this week.
    pub fn monday(&self) -> NaiveDate {
        NaiveDate::from_isoywd_opt(self.year, self.week, Weekday::Mon).unwrap_or_default()
    }

    /// First and last day (Monday, Sunday) of this week.
    pub fn boundaries(&self) -> (NaiveDate, NaiveDate) {
        let monday = self.monday();
        (monday, monday + Duration::days(6))
    }

    /// `"dd.mm.yy - dd.mm.yy"`, as shown to participants.
    pub fn boundaries_readable(&self) -> String {
        let (from, to) = self.boundaries();
        format!("{} - {}", from.format("%d.%m.%y"), to.format("%d.%m.%y"))
    }

    pub fn previous(&self) -> Self {
        Self::of(self.monday() - Duration::days(7))
    }

    pub fn next(&self) -> Self {
        Self::of(self.monday() + Duration::days(7))
    }
}

impl fmt::Display for YearWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.year, self.week)
    }
}

/// Wall-clock entry points. All of them read the local date.
pub struct Clock;

impl Clock {
    pub fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    pub fn current_week() -> YearWeek {
        YearWeek::of(Self::today())
    }

    pub fn previous_week() -> YearWeek {
        YearWeek::of(Self::today() - Duration::days(7))
    }

    pub fn next_week() -> YearWeek {
        YearWeek::of(Self::today() + Duration::days(7))
    }
}
