use crate::error::AppError;
use crate::models::{CostEntry, CostSummary, ServiceTotal};
use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open `[start, end)` window of calendar days, as billing APIs use it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CostWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CostWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AppError> {
        if start >= end {
            return Err(AppError::InvalidRequest(format!(
                "cost window start {start} must be before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn trailing_days(days: u32, today: NaiveDate) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days.max(1))))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// Trailing window ending on today's UTC date, evaluated at call time.
    pub fn trailing_from_now(days: u32) -> Self {
        Self::trailing_days(days, Utc::now().date_naive())
    }

    /// Both bounds or neither: a missing bound falls back to the default window.
    pub fn from_query(
        start: Option<&str>,
        end: Option<&str>,
        default_days: u32,
    ) -> Result<Self, AppError> {
        match (non_empty(start), non_empty(end)) {
            (Some(start), Some(end)) => Self::new(parse_date(start)?, parse_date(end)?),
            _ => Ok(Self::trailing_from_now(default_days)),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
        AppError::InvalidRequest(format!("'{raw}' is not a YYYY-MM-DD date"))
    })
}

/// Orders entries by (date, service) and totals them per service and unit
/// without leaving decimal arithmetic.
pub fn summarize(window: CostWindow, mut entries: Vec<CostEntry>) -> CostSummary {
    entries.sort_by(|a, b| (a.date, &a.service).cmp(&(b.date, &b.service)));

    let mut sums: BTreeMap<(String, String), Decimal> = BTreeMap::new();
    for entry in &entries {
        match Decimal::from_str(entry.amount.trim()) {
            Ok(amount) => {
                *sums
                    .entry((entry.service.clone(), entry.unit.clone()))
                    .or_default() += amount;
            }
            Err(err) => warn!(
                service = %entry.service,
                amount = %entry.amount,
                error = %err,
                "cost amount is not a decimal; excluded from totals"
            ),
        }
    }

    let mut totals: Vec<(Decimal, ServiceTotal)> = sums
        .into_iter()
        .map(|((service, unit), amount)| {
            (
                amount,
                ServiceTotal {
                    service,
                    amount: amount.to_string(),
                    unit,
                },
            )
        })
        .collect();
    totals.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.service.cmp(&b.1.service)));

    CostSummary {
        start: window.start,
        end: window.end,
        entries,
        totals: totals.into_iter().map(|(_, t)| t).collect(),
    }
}

pub fn empty_summary(window: CostWindow) -> CostSummary {
    summarize(window, Vec::new())
}
