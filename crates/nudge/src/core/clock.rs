use chrono::{Datelike, Local, NaiveDate};

/// Source of "today" for weekday-dependent habit columns.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;

    /// Days since Sunday, so Sunday is 0 and Saturday is 6.
    fn weekday_from_sunday(&self) -> usize {
        self.today().weekday().num_days_from_sunday() as usize
    }
}

/// The host's local calendar date.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Always reports the same date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
