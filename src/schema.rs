use crate::error::{Result, SalesAuditError};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single cell as handed over by the file parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Bool(bool),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::Date(value)
    }
}

pub type RawRecord = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RawDataset {
    #[schemars(description = "Column headers exactly as they appeared in the uploaded file, in file order")]
    pub headers: Vec<String>,

    #[schemars(description = "One mapping per data row, keyed by header")]
    pub rows: Vec<RawRecord>,
}

impl RawDataset {
    pub fn new(headers: Vec<String>, rows: Vec<RawRecord>) -> Self {
        Self { headers, rows }
    }

    /// Builds a dataset from rows alone, taking headers in first-seen order.
    pub fn from_rows(rows: Vec<RawRecord>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
        Self { headers, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PeriodFilter {
    #[schemars(description = "Last 7 days ending at the most recent transaction")]
    Last7Days,
    Last15Days,
    Last30Days,
    Last60Days,
    Last90Days,
    Last180Days,
    Last365Days,
    #[schemars(description = "Arbitrary window length in days")]
    Custom { days: u32 },
    #[schemars(description = "The whole dataset; no previous window is derived")]
    All,
}

impl Default for PeriodFilter {
    fn default() -> Self {
        Self::Last30Days
    }
}

impl PeriodFilter {
    pub fn days(&self) -> Option<u32> {
        match self {
            PeriodFilter::Last7Days => Some(7),
            PeriodFilter::Last15Days => Some(15),
            PeriodFilter::Last30Days => Some(30),
            PeriodFilter::Last60Days => Some(60),
            PeriodFilter::Last90Days => Some(90),
            PeriodFilter::Last180Days => Some(180),
            PeriodFilter::Last365Days => Some(365),
            PeriodFilter::Custom { days } => Some(*days),
            PeriodFilter::All => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct AbcThresholds {
    #[schemars(description = "Cumulative share (percent) covered by class A")]
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl AbcThresholds {
    pub const fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    pub const fn category_default() -> Self {
        Self::new(50.0, 25.0, 15.0, 10.0)
    }

    pub const fn product_default() -> Self {
        Self::new(70.0, 10.0, 10.0, 10.0)
    }

    pub fn sum(&self) -> f64 {
        self.a + self.b + self.c + self.d
    }

    pub fn validate(&self) -> Result<()> {
        let sum = self.sum();
        let all_finite = [self.a, self.b, self.c, self.d]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0);
        if !all_finite || (sum - 100.0).abs() > 0.01 {
            return Err(SalesAuditError::InvalidThresholds {
                a: self.a,
                b: self.b,
                c: self.c,
                d: self.d,
                sum,
            });
        }
        Ok(())
    }

    /// Inclusive upper bounds of classes A, B and C on the cumulative axis.
    pub fn bounds(&self) -> (f64, f64, f64) {
        (self.a, self.a + self.b, self.a + self.b + self.c)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct RowFilters {
    #[schemars(description = "Keep only rows of this category (exact, case-insensitive)")]
    pub category: Option<String>,
    pub supplier: Option<String>,
    pub seller: Option<String>,
}

impl RowFilters {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.supplier.is_none() && self.seller.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct StockSettings {
    #[schemars(description = "A product whose stock is at or below this level is a stockout (ruptura)")]
    pub stockout_threshold: f64,

    #[schemars(
        description = "A product whose stock covers more than this many days of sales is slow-moving (encalhe)"
    )]
    pub slow_moving_days: f64,
}

impl Default for StockSettings {
    fn default() -> Self {
        Self {
            stockout_threshold: 0.0,
            slow_moving_days: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    #[schemars(description = "Length of the current analysis window")]
    pub period: PeriodFilter,

    #[schemars(description = "Row filters applied before any aggregation")]
    pub filters: RowFilters,

    #[schemars(
        description = "Category whose products are classified at product level. When absent, all products are classified."
    )]
    pub product_category: Option<String>,

    pub category_thresholds: AbcThresholds,

    pub product_thresholds: AbcThresholds,

    #[schemars(description = "Absolute tolerance (currency units) for recomputed aggregates")]
    pub tolerance: f64,

    #[schemars(description = "Size of every top/worst ranking")]
    pub top_n: usize,

    pub stock: StockSettings,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            period: PeriodFilter::default(),
            filters: RowFilters::default(),
            product_category: None,
            category_thresholds: AbcThresholds::category_default(),
            product_thresholds: AbcThresholds::product_default(),
            tolerance: crate::audit::DEFAULT_TOLERANCE,
            top_n: 10,
            stock: StockSettings::default(),
        }
    }
}

impl AnalysisConfig {
    /// Rejects settings that make the run meaningless. Threshold sums are not
    /// checked here: they surface as critical findings in the audit report.
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(SalesAuditError::InvalidTolerance(self.tolerance));
        }
        if let PeriodFilter::Custom { days } = self.period {
            if days == 0 {
                return Err(SalesAuditError::InvalidPeriodLength(days));
            }
        }
        if self.top_n == 0 {
            return Err(SalesAuditError::InvalidTopN(self.top_n));
        }
        if !self.stock.slow_moving_days.is_finite() || self.stock.slow_moving_days <= 0.0 {
            return Err(SalesAuditError::InvalidStockSettings(format!(
                "slow_moving_days must be positive (got {})",
                self.stock.slow_moving_days
            )));
        }
        if !self.stock.stockout_threshold.is_finite() {
            return Err(SalesAuditError::InvalidStockSettings(
                "stockout_threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AnalysisConfig)
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = Self::generate_json_schema();
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
