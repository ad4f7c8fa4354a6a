use crate::error::FormulaError;
use chrono::{DateTime, Datelike};

const SECONDS_PER_DAY: i64 = 86_400;

/// Update frequency of a gated formula.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Periodicity {
    /// Every distinct timestamp is its own bucket.
    #[default]
    Tick,
    Day,
    /// ISO week.
    Week,
    Month,
}

impl Periodicity {
    pub fn parse(indicator: &str, raw: &str) -> Result<Self, FormulaError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "tick" => Ok(Self::Tick),
            "day" | "1d" | "d" => Ok(Self::Day),
            "week" | "1w" | "w" => Ok(Self::Week),
            "month" | "1m" | "m" => Ok(Self::Month),
            _ => Err(FormulaError::invalid(
                indicator,
                "Period",
                raw,
                "expected one of tick, day, week, month",
            )),
        }
    }

    /// Bucket key of a Unix-seconds timestamp (UTC calendar).
    pub fn bucket(self, ts: i64) -> i64 {
        match self {
            Self::Tick => ts,
            Self::Day => ts.div_euclid(SECONDS_PER_DAY),
            Self::Week => match DateTime::from_timestamp(ts, 0) {
                Some(dt) => {
                    let week = dt.iso_week();
                    i64::from(week.year()) * 100 + i64::from(week.week())
                }
                None => ts.div_euclid(7 * SECONDS_PER_DAY),
            },
            Self::Month => match DateTime::from_timestamp(ts, 0) {
                Some(dt) => i64::from(dt.year()) * 12 + i64::from(dt.month0()),
                None => ts.div_euclid(30 * SECONDS_PER_DAY),
            },
        }
    }
}
