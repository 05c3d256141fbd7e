use crate::error::{DebtorsError, Result};
use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .ok_or_else(|| DebtorsError::DateError(format!("Invalid month {}-{:02}", year, month)))
}

pub fn first_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| DebtorsError::DateError(format!("Invalid month {}-{:02}", year, month)))
}

pub fn is_in_month(date: NaiveDate, year: i32, month: u32) -> bool {
    date.year() == year && date.month() == month
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Percentages are reported with two decimals, half away from zero.
pub fn round_percent(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
pub enum PeriodType {
    #[serde(rename = "dia")]
    Day,
    #[serde(rename = "semana")]
    Week,
    #[serde(rename = "mes")]
    Month,
}

impl PeriodType {
    /// Query-string value used by the backend's `tipo` parameter.
    pub fn as_query_value(&self) -> &'static str {
        match self {
            PeriodType::Day => "dia",
            PeriodType::Week => "semana",
            PeriodType::Month => "mes",
        }
    }
}

/// A day, ISO week or calendar month, anchored on its first day.
///
/// Renders as `YYYY-MM-DD`, `YYYY-Www` or `YYYY-MM` respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodKey {
    period_type: PeriodType,
    start: NaiveDate,
}

impl PeriodKey {
    /// The period of `period_type` containing `reference`.
    pub fn containing(period_type: PeriodType, reference: NaiveDate) -> Self {
        let start = match period_type {
            PeriodType::Day => reference,
            PeriodType::Week => {
                let offset = reference.weekday().num_days_from_monday() as u64;
                reference - Days::new(offset)
            }
            PeriodType::Month => reference.with_day(1).unwrap_or(reference),
        };
        Self { period_type, start }
    }

    /// Parses `YYYY-MM-DD`, `YYYY-Www` or `YYYY-MM`.
    pub fn parse(key: &str) -> Result<Self> {
        let key = key.trim();

        if let Some((year, week)) = key.split_once("-W") {
            let year: i32 = year
                .parse()
                .map_err(|_| DebtorsError::InvalidPeriod(format!("Invalid ISO week key: {}", key)))?;
            let week: u32 = week
                .parse()
                .map_err(|_| DebtorsError::InvalidPeriod(format!("Invalid ISO week key: {}", key)))?;
            let start = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).ok_or_else(|| {
                DebtorsError::InvalidPeriod(format!("ISO week out of range: {}", key))
            })?;
            return Ok(Self {
                period_type: PeriodType::Week,
                start,
            });
        }

        if let Ok(day) = NaiveDate::parse_from_str(key, "%Y-%m-%d") {
            return Ok(Self {
                period_type: PeriodType::Day,
                start: day,
            });
        }

        let month_start = NaiveDate::parse_from_str(&format!("{}-01", key), "%Y-%m-%d").map_err(
            |_| {
                DebtorsError::InvalidPeriod(format!(
                    "Invalid period key: {}. Expected YYYY-MM-DD, YYYY-Www or YYYY-MM",
                    key
                ))
            },
        )?;
        Ok(Self {
            period_type: PeriodType::Month,
            start: month_start,
        })
    }

    pub fn period_type(&self) -> PeriodType {
        self.period_type
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the period, inclusive.
    pub fn end(&self) -> Result<NaiveDate> {
        match self.period_type {
            PeriodType::Day => Ok(self.start),
            PeriodType::Week => Ok(self.start + Days::new(6)),
            PeriodType::Month => last_day_of_month(self.start.year(), self.start.month()),
        }
    }

    /// The immediately preceding period: one day, seven days or one
    /// calendar month back.
    pub fn previous(&self) -> Result<Self> {
        let start = match self.period_type {
            PeriodType::Day => self.start.checked_sub_days(Days::new(1)),
            PeriodType::Week => self.start.checked_sub_days(Days::new(7)),
            PeriodType::Month => self.start.checked_sub_months(Months::new(1)),
        }
        .ok_or_else(|| DebtorsError::DateError(format!("No period before {}", self)))?;

        Ok(Self {
            period_type: self.period_type,
            start,
        })
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period_type {
            PeriodType::Day => write!(f, "{}", self.start.format("%Y-%m-%d")),
            PeriodType::Week => {
                let week = self.start.iso_week();
                write!(f, "{}-W{:02}", week.year(), week.week())
            }
            PeriodType::Month => write!(f, "{}", self.start.format("%Y-%m")),
        }
    }
}

impl Serialize for PeriodKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeriodKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PeriodKey::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for PeriodKey {
    fn schema_name() -> String {
        "PeriodKey".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

/// Every calendar day of the period, in ascending order.
pub fn expand_period_to_days(key: &PeriodKey) -> Result<Vec<NaiveDate>> {
    let end = key.end()?;
    Ok(key.start().iter_days().take_while(|d| *d <= end).collect())
}
