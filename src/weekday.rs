use crate::ingestion::SalesRow;
use crate::utils::{percentage_of, weekday_name, BUSINESS_WEEK};
use chrono::{Datelike, Weekday};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeekdayBucket {
    pub day: String,
    /// 0 = Monday … 6 = Sunday.
    pub day_index: u32,
    pub value: f64,
    pub count: usize,
    pub percentage: f64,
}

impl WeekdayBucket {
    pub fn weekday(&self) -> Option<Weekday> {
        BUSINESS_WEEK.get(self.day_index as usize).copied()
    }

    pub fn is_active(&self) -> bool {
        self.count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeekdayPerformance {
    /// Always seven buckets, Monday first.
    pub buckets: Vec<WeekdayBucket>,
    pub total_value: f64,
    pub best_day: Option<String>,
    pub worst_day: Option<String>,
    pub active_days: usize,
    pub average_per_active_day: f64,
}

impl WeekdayPerformance {
    pub fn analyze(rows: &[SalesRow]) -> Self {
        let mut value = [0.0f64; 7];
        let mut count = [0usize; 7];

        for row in rows {
            if let Some(date) = row.date {
                let idx = date.weekday().num_days_from_monday() as usize;
                value[idx] += row.value;
                count[idx] += 1;
            }
        }

        let total_value: f64 = value.iter().sum();
        let buckets: Vec<WeekdayBucket> = BUSINESS_WEEK
            .iter()
            .enumerate()
            .map(|(idx, day)| WeekdayBucket {
                day: weekday_name(*day).to_string(),
                day_index: idx as u32,
                value: value[idx],
                count: count[idx],
                percentage: percentage_of(value[idx], total_value),
            })
            .collect();

        Self::from_buckets(buckets)
    }

    /// Derives the insights from buckets already in Monday-first order.
    pub fn from_buckets(buckets: Vec<WeekdayBucket>) -> Self {
        let total_value: f64 = buckets.iter().map(|b| b.value).sum();
        let active: Vec<&WeekdayBucket> = buckets.iter().filter(|b| b.is_active()).collect();

        // First maximum/minimum in Monday-first order wins a tie.
        let best_day = active
            .iter()
            .copied()
            .fold(None::<&WeekdayBucket>, |best, b| match best {
                Some(current) if current.value >= b.value => Some(current),
                _ => Some(b),
            })
            .map(|b| b.day.clone());
        let worst_day = active
            .iter()
            .copied()
            .fold(None::<&WeekdayBucket>, |worst, b| match worst {
                Some(current) if current.value <= b.value => Some(current),
                _ => Some(b),
            })
            .map(|b| b.day.clone());

        let active_days = active.len();
        let average_per_active_day = if active_days > 0 {
            total_value / active_days as f64
        } else {
            0.0
        };

        Self {
            buckets,
            total_value,
            best_day,
            worst_day,
            active_days,
            average_per_active_day,
        }
    }

    pub fn bucket(&self, day: Weekday) -> Option<&WeekdayBucket> {
        self.buckets
            .iter()
            .find(|b| b.day_index == day.num_days_from_monday())
    }
}
