//! Calendar value objects: accounting periods and inclusive date ranges.

use core::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;

/// A calendar month (`YYYY-MM`), the budgeting and numbering period.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, DomainError> {
        if !(1..=12).contains(&month) {
            return Err(DomainError::validation(format!(
                "period month must be 1-12, got {month}"
            )));
        }
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(DomainError::validation(format!("period year {year} is out of range")));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// `YYYYMM`, as embedded in journal numbers.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    pub fn range(&self) -> DateRange {
        DateRange::between(self.first_day(), self.last_day())
    }
}

impl core::fmt::Display for Period {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("period must be YYYY-MM, got {s:?}"));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Period::new(year, month)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive date range; an open start means "since the beginning".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn up_to(end: NaiveDate) -> Self {
        Self { start: None, end }
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| start <= date) && date <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_some_and(|start| start > self.end)
    }
}

/// The day before `date`, saturating at the calendar minimum.
pub fn day_before(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(1)).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_and_formats_year_month() {
        let period: Period = "2025-01".parse().unwrap();
        assert_eq!(period.to_string(), "2025-01");
        assert_eq!(period.compact(), "202501");
        assert!("2025-13".parse::<Period>().is_err());
        assert!("2025/01".parse::<Period>().is_err());
        assert!("25-01".parse::<Period>().is_err());
    }

    #[test]
    fn month_bounds_handle_leap_years_and_december() {
        assert_eq!(Period::new(2024, 2).unwrap().last_day(), date(2024, 2, 29));
        assert_eq!(Period::new(2025, 2).unwrap().last_day(), date(2025, 2, 28));
        assert_eq!(Period::new(2025, 12).unwrap().last_day(), date(2025, 12, 31));
        assert_eq!(Period::of(date(2025, 7, 19)).first_day(), date(2025, 7, 1));
    }

    #[test]
    fn ranges_are_inclusive() {
        let range = DateRange::between(date(2025, 1, 1), date(2025, 1, 31));
        assert!(range.contains(date(2025, 1, 1)));
        assert!(range.contains(date(2025, 1, 31)));
        assert!(!range.contains(date(2025, 2, 1)));
        assert!(DateRange::up_to(date(2025, 1, 31)).contains(date(1999, 5, 5)));
        assert!(DateRange::between(date(2025, 2, 1), date(2025, 1, 1)).is_empty());
    }

    #[test]
    fn serializes_as_string() {
        let period = Period::new(2025, 3).unwrap();
        assert_eq!(serde_json::to_string(&period).unwrap(), "\"2025-03\"");
        let back: Period = serde_json::from_str("\"2025-03\"").unwrap();
        assert_eq!(back, period);
    }
}
