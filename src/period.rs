use crate::aggregation::{sum_by, ticket_average};
use crate::ingestion::{Metric, SalesRow};
use crate::schema::PeriodFilter;
use chrono::{Days, NaiveDate};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Inclusive date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodSplit {
    pub current: Vec<SalesRow>,
    pub previous: Vec<SalesRow>,
    pub current_window: Option<DateWindow>,
    pub previous_window: Option<DateWindow>,
}

pub fn max_date(rows: &[SalesRow]) -> Option<NaiveDate> {
    rows.iter().filter_map(|r| r.date).max()
}

/// Derives the current window (ending at the latest date) and the previous
/// window of identical length right before it.
pub fn period_windows(latest: NaiveDate, days: u32) -> Option<(DateWindow, DateWindow)> {
    if days == 0 {
        return None;
    }
    let span = Days::new(u64::from(days) - 1);
    let current_start = latest.checked_sub_days(span)?;
    let previous_end = current_start.pred_opt()?;
    let previous_start = previous_end.checked_sub_days(span)?;

    Some((
        DateWindow {
            start: current_start,
            end: latest,
        },
        DateWindow {
            start: previous_start,
            end: previous_end,
        },
    ))
}

/// Splits rows into the current and previous windows of `filter`.
///
/// `PeriodFilter::All` keeps every row as current and leaves previous empty.
/// So does a bounded filter over rows that carry no date at all. Otherwise
/// rows without a date fall outside both windows.
pub fn split_by_period(rows: &[SalesRow], filter: PeriodFilter) -> PeriodSplit {
    let days = match filter.days() {
        Some(days) => days,
        None => {
            return PeriodSplit {
                current: rows.to_vec(),
                ..Default::default()
            }
        }
    };

    let windows = max_date(rows).and_then(|latest| period_windows(latest, days));
    let Some((current_window, previous_window)) = windows else {
        debug!("No dated rows; every row counts as current");
        return PeriodSplit {
            current: rows.to_vec(),
            ..Default::default()
        };
    };

    debug!(
        "Period split: current {}..={}, previous {}..={}",
        current_window.start, current_window.end, previous_window.start, previous_window.end
    );

    let in_window = |window: &DateWindow| -> Vec<SalesRow> {
        rows.iter()
            .filter(|r| r.date.is_some_and(|d| window.contains(d)))
            .cloned()
            .collect()
    };

    PeriodSplit {
        current: in_window(&current_window),
        previous: in_window(&previous_window),
        current_window: Some(current_window),
        previous_window: Some(previous_window),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ComparisonKind {
    #[serde(rename = "normal")]
    Normal,
    /// Previous value was zero and current is positive.
    #[serde(rename = "novo", alias = "new")]
    New,
    #[serde(rename = "zero")]
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComparisonResult {
    pub current_value: f64,
    pub previous_value: f64,
    /// `f64::INFINITY` for `ComparisonKind::New`; serializes as `null`.
    pub delta_percent: f64,
    pub kind: ComparisonKind,
}

impl ComparisonResult {
    pub fn between(current_value: f64, previous_value: f64) -> Self {
        let (delta_percent, kind) = delta_between(current_value, previous_value);
        Self {
            current_value,
            previous_value,
            delta_percent,
            kind,
        }
    }
}

/// Percent change from `previous` to `current`, with the two degenerate
/// zero-baseline cases named.
pub fn delta_between(current: f64, previous: f64) -> (f64, ComparisonKind) {
    if previous == 0.0 {
        if current == 0.0 {
            (0.0, ComparisonKind::Zero)
        } else if current > 0.0 {
            (f64::INFINITY, ComparisonKind::New)
        } else {
            (f64::NEG_INFINITY, ComparisonKind::Normal)
        }
    } else {
        (
            (current - previous) / previous.abs() * 100.0,
            ComparisonKind::Normal,
        )
    }
}

fn compare_with<F>(current: &[SalesRow], previous: &[SalesRow], measure: F) -> Option<ComparisonResult>
where
    F: Fn(&[SalesRow]) -> f64,
{
    if current.is_empty() || previous.is_empty() {
        return None;
    }
    Some(ComparisonResult::between(measure(current), measure(previous)))
}

pub fn compare_revenue(current: &[SalesRow], previous: &[SalesRow]) -> Option<ComparisonResult> {
    compare_with(current, previous, |rows| sum_by(rows, Metric::Value))
}

pub fn compare_sales(current: &[SalesRow], previous: &[SalesRow]) -> Option<ComparisonResult> {
    compare_with(current, previous, |rows| rows.len() as f64)
}

pub fn compare_ticket(current: &[SalesRow], previous: &[SalesRow]) -> Option<ComparisonResult> {
    compare_with(current, previous, ticket_average)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PeriodComparisons {
    pub revenue: Option<ComparisonResult>,
    pub sales: Option<ComparisonResult>,
    pub ticket: Option<ComparisonResult>,
}

impl PeriodComparisons {
    pub fn compute(split: &PeriodSplit) -> Self {
        Self {
            revenue: compare_revenue(&split.current, &split.previous),
            sales: compare_sales(&split.current, &split.previous),
            ticket: compare_ticket(&split.current, &split.previous),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dated(y: i32, m: u32, d: u32, value: f64) -> SalesRow {
        SalesRow {
            date: NaiveDate::from_ymd_opt(y, m, d),
            value,
            quantity: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_period_windows_have_equal_length() {
        let latest = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let (current, previous) = period_windows(latest, 7).unwrap();
        assert_eq!(current.start, NaiveDate::from_ymd_opt(2024, 3, 25).unwrap());
        assert_eq!(previous.end, NaiveDate::from_ymd_opt(2024, 3, 24).unwrap());
        assert_eq!(previous.start, NaiveDate::from_ymd_opt(2024, 3, 18).unwrap());
        assert_eq!(current.days(), 7);
        assert_eq!(previous.days(), 7);
        assert!(period_windows(latest, 0).is_none());
    }

    #[test]
    fn test_split_by_period() {
        let rows = vec![
            dated(2024, 3, 31, 100.0),
            dated(2024, 3, 25, 50.0),
            dated(2024, 3, 24, 80.0),
            dated(2024, 3, 10, 999.0),
            SalesRow {
                value: 5.0,
                ..Default::default()
            },
        ];

        let split = split_by_period(&rows, PeriodFilter::Last7Days);
        assert_eq!(split.current.len(), 2);
        assert_eq!(split.previous.len(), 1);
        assert_eq!(split.previous[0].value, 80.0);

        let all = split_by_period(&rows, PeriodFilter::All);
        assert_eq!(all.current.len(), 5);
        assert!(all.previous.is_empty());
        assert!(all.current_window.is_none());
    }

    #[test]
    fn test_split_without_dates_keeps_every_row() {
        let rows = vec![
            SalesRow {
                value: 5.0,
                ..Default::default()
            },
            SalesRow {
                value: 7.0,
                ..Default::default()
            },
        ];
        let split = split_by_period(&rows, PeriodFilter::Last30Days);
        assert_eq!(split.current.len(), 2);
        assert!(split.previous.is_empty());
        assert!(split.current_window.is_none());
        assert!(PeriodComparisons::compute(&split).revenue.is_none());
    }

    #[test]
    fn test_comparisons() {
        let current = vec![dated(2024, 3, 31, 100.0), dated(2024, 3, 30, 50.0)];
        let previous = vec![dated(2024, 3, 20, 100.0)];

        let revenue = compare_revenue(&current, &previous).unwrap();
        assert_eq!(revenue.current_value, 150.0);
        assert_eq!(revenue.previous_value, 100.0);
        assert!((revenue.delta_percent - 50.0).abs() < 1e-9);
        assert_eq!(revenue.kind, ComparisonKind::Normal);

        let sales = compare_sales(&current, &previous).unwrap();
        assert!((sales.delta_percent - 100.0).abs() < 1e-9);

        let ticket = compare_ticket(&current, &previous).unwrap();
        assert!((ticket.delta_percent + 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_comparison_skipped_when_subset_empty() {
        let current = vec![dated(2024, 3, 31, 100.0)];
        assert!(compare_revenue(&current, &[]).is_none());
        assert!(compare_ticket(&[], &current).is_none());
    }

    #[test]
    fn test_zero_baselines() {
        let new = ComparisonResult::between(150.0, 0.0);
        assert_eq!(new.kind, ComparisonKind::New);
        assert!(new.delta_percent.is_infinite() && new.delta_percent > 0.0);

        let zero = ComparisonResult::between(0.0, 0.0);
        assert_eq!(zero.kind, ComparisonKind::Zero);
        assert_eq!(zero.delta_percent, 0.0);

        let json = serde_json::to_string(&new).unwrap();
        assert!(json.contains("\"novo\""));
    }
}
