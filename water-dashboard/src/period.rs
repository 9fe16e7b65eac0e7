use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Granularity used to bucket telemetry queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    #[default]
    Day,
    Month,
    Year,
}

impl TimeFilter {
    pub const ALL: [TimeFilter; 3] = [TimeFilter::Day, TimeFilter::Month, TimeFilter::Year];

    pub fn label(self) -> &'static str {
        match self {
            TimeFilter::Day => "Day",
            TimeFilter::Month => "Month",
            TimeFilter::Year => "Year",
        }
    }

    pub fn index(self) -> usize {
        match self {
            TimeFilter::Day => 0,
            TimeFilter::Month => 1,
            TimeFilter::Year => 2,
        }
    }

    pub fn next(self) -> Self {
        match self {
            TimeFilter::Day => TimeFilter::Month,
            TimeFilter::Month => TimeFilter::Year,
            TimeFilter::Year => TimeFilter::Day,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            TimeFilter::Day => TimeFilter::Year,
            TimeFilter::Month => TimeFilter::Day,
            TimeFilter::Year => TimeFilter::Month,
        }
    }
}

/// Moves `date` by `steps` units of `filter`. Month and year steps clamp to the
/// last valid day of the target month. Returns `date` unchanged on overflow.
pub fn step_date(filter: TimeFilter, date: NaiveDate, steps: i32) -> NaiveDate {
    let magnitude = steps.unsigned_abs();
    let moved = match filter {
        TimeFilter::Day => {
            let days = Days::new(u64::from(magnitude));
            if steps >= 0 {
                date.checked_add_days(days)
            } else {
                date.checked_sub_days(days)
            }
        }
        TimeFilter::Month | TimeFilter::Year => {
            let per_step = if filter == TimeFilter::Year { 12 } else { 1 };
            let months = Months::new(magnitude.saturating_mul(per_step));
            if steps >= 0 {
                date.checked_add_months(months)
            } else {
                date.checked_sub_months(months)
            }
        }
    };
    moved.unwrap_or(date)
}

/// Renders the selection the way the date picker for `filter` shows it.
pub fn describe(filter: TimeFilter, date: NaiveDate) -> String {
    match filter {
        TimeFilter::Day => date.format("%Y-%m-%d").to_string(),
        TimeFilter::Month => date.format("%B %Y").to_string(),
        TimeFilter::Year => date.year().to_string(),
    }
}

/// Wire format of `targetDate`.
pub fn target_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parses the go-to-date prompt: `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
pub fn parse_date_input(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date);
    }

    let mut parts = input.split('-');
    let year = parts.next()?.parse::<i32>().ok()?;
    let month = match parts.next() {
        Some(m) => m.parse::<u32>().ok()?,
        None => 1,
    };
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, 1)
}
