//! # Sales Diagnostics
//!
//! A library for turning raw retail sales exports (spreadsheet rows with
//! arbitrary column names) into dashboard aggregates, and for auditing those
//! aggregates against an independent recomputation before they are shown.
//!
//! ## Core Concepts
//!
//! - **Field resolution**: headers such as "Valor Total" or "qtd" are mapped
//!   once to canonical roles (value, quantity, date, product, ...)
//! - **Aggregates**: KPIs and rankings, period-over-period comparisons, ABC
//!   curves for categories and products, weekday performance, stock health
//! - **Audit**: every aggregate is recomputed from strictly validated rows;
//!   disagreements become graded findings and the recomputed value wins
//! - **Approval**: a run is approved when no critical or grave finding exists
//!
//! ## Example
//!
//! ```rust,ignore
//! use sales_diagnostics::*;
//!
//! let dataset: RawDataset = serde_json::from_str(&uploaded_json)?;
//! let config = AnalysisConfig {
//!     period: PeriodFilter::Last30Days,
//!     ..Default::default()
//! };
//!
//! let output = SalesDiagnostics::run(&dataset, &config)?;
//! println!("{}", output.report.summary());
//! println!("Revenue: {:.2}", output.corrected.kpis.revenue);
//! ```

pub mod abc;
pub mod aggregation;
pub mod audit;
pub mod error;
pub mod fields;
pub mod ingestion;
pub mod kpi;
pub mod period;
pub mod report;
pub mod schema;
pub mod stock;
pub mod utils;
pub mod weekday;

pub use abc::{
    classify_buckets, classify_categories, classify_products, AbcClass, AbcClassification,
    AbcItem, AbcLevel, ClassSummary,
};
pub use aggregation::{aggregate, top_n, worst_n, AggregateBucket, Direction};
pub use audit::{
    audit, validate_abc, validate_aggregate, validate_comparison, validate_raw_data,
    validate_ticket, AggregateKind, AuditOutcome, RawDataStats, RawDataValidation,
};
pub use error::{Result, SalesAuditError};
pub use fields::{CanonicalField, CanonicalFieldMap};
pub use ingestion::{
    apply_filters, canonicalize, collapse_duplicates, duplicate_key, Dimension, Metric, SalesRow,
    UNINFORMED_LABEL,
};
pub use kpi::{AvailableDimensions, DashboardKpis, RankingSpec};
pub use period::{
    split_by_period, ComparisonKind, ComparisonResult, DateWindow, PeriodComparisons, PeriodSplit,
};
pub use report::{AuditFinding, AuditReport, Correction, Severity, ValidationRecord};
pub use schema::*;
pub use stock::{StockCondition, StockReport, StockStatus};
pub use weekday::{WeekdayBucket, WeekdayPerformance};

use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Everything the primary pipeline computes for one dataset and config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SalesAggregates {
    pub kpis: DashboardKpis,
    pub comparisons: PeriodComparisons,
    pub category_abc: AbcClassification,
    pub product_abc: AbcClassification,
    pub weekday: WeekdayPerformance,
    /// Present only when a stock column was resolved.
    pub stock: Option<StockReport>,
    pub current_window: Option<DateWindow>,
    pub previous_window: Option<DateWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DiagnosticsOutput {
    pub field_map: CanonicalFieldMap,
    /// Aggregates as the primary pipeline produced them.
    pub produced: SalesAggregates,
    /// Aggregates after every audit correction; this is what gets displayed.
    pub corrected: SalesAggregates,
    pub raw_stats: RawDataStats,
    pub report: AuditReport,
}

impl DiagnosticsOutput {
    pub fn is_approved(&self) -> bool {
        self.report.approved
    }
}

pub struct SalesDiagnostics;

impl SalesDiagnostics {
    /// Runs the full pipeline. Only an invalid configuration is an `Err`;
    /// problems in the data itself end up in the audit report.
    pub fn run(dataset: &RawDataset, config: &AnalysisConfig) -> Result<DiagnosticsOutput> {
        config.validate()?;

        info!(
            "Running sales diagnostics over {} rows ({} columns)",
            dataset.len(),
            dataset.headers.len()
        );

        let field_map = CanonicalFieldMap::resolve(&dataset.headers);
        debug!(
            "Resolved {} of {} canonical fields; missing: {:?}",
            field_map.len(),
            CanonicalField::ALL.len(),
            field_map.missing()
        );

        let produced = Self::compute(dataset, &field_map, config);
        let outcome = audit(dataset, &field_map, config, &produced);

        if outcome.report.approved {
            info!("Diagnostics approved: {}", outcome.report.summary());
        } else {
            warn!("Diagnostics rejected: {}", outcome.report.summary());
        }

        Ok(DiagnosticsOutput {
            field_map,
            produced,
            corrected: outcome.corrected,
            raw_stats: outcome.stats,
            report: outcome.report,
        })
    }

    /// The primary pipeline without the audit.
    pub fn compute(
        dataset: &RawDataset,
        field_map: &CanonicalFieldMap,
        config: &AnalysisConfig,
    ) -> SalesAggregates {
        let (rows, dropped) = collapse_duplicates(canonicalize(&dataset.rows, field_map));
        if dropped > 0 {
            debug!("Collapsed {} duplicate rows", dropped);
        }
        let filtered = apply_filters(&rows, &config.filters);
        if !config.filters.is_empty() {
            debug!("Filters kept {} of {} rows", filtered.len(), rows.len());
        }

        let split = split_by_period(&filtered, config.period);
        let current = &split.current;

        let available = AvailableDimensions {
            product: field_map.has(CanonicalField::Product),
            category: field_map.has(CanonicalField::Category),
            supplier: field_map.has(CanonicalField::Supplier),
            seller: field_map.has(CanonicalField::Seller),
        };

        let category_abc = if available.category {
            classify_categories(current, &config.category_thresholds).unwrap_or_else(|e| {
                debug!("Category classification skipped: {}", e);
                AbcClassification::empty(AbcLevel::Category, None, config.category_thresholds)
            })
        } else {
            AbcClassification::empty(AbcLevel::Category, None, config.category_thresholds)
        };

        let scope = config.product_category.clone();
        let product_abc = if available.product {
            classify_products(current, scope.as_deref(), &config.product_thresholds)
                .unwrap_or_else(|e| {
                    debug!("Product classification skipped: {}", e);
                    AbcClassification::empty(AbcLevel::Product, scope.clone(), config.product_thresholds)
                })
        } else {
            AbcClassification::empty(AbcLevel::Product, scope.clone(), config.product_thresholds)
        };

        SalesAggregates {
            kpis: DashboardKpis::compute(current, config.top_n, available),
            comparisons: PeriodComparisons::compute(&split),
            category_abc,
            product_abc,
            weekday: WeekdayPerformance::analyze(current),
            stock: StockReport::analyze(&filtered, &config.stock),
            current_window: split.current_window,
            previous_window: split.previous_window,
        }
    }
}

pub fn run_diagnostics(dataset: &RawDataset, config: &AnalysisConfig) -> Result<DiagnosticsOutput> {
    SalesDiagnostics::run(dataset, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(date: &str, value: f64, product: &str, category: &str) -> RawRecord {
        let mut record = RawRecord::new();
        record.insert("Data".to_string(), CellValue::from(date));
        record.insert("Valor Total".to_string(), CellValue::from(value));
        record.insert("Qtd".to_string(), CellValue::from(1.0));
        record.insert("Produto".to_string(), CellValue::from(product));
        record.insert("Categoria".to_string(), CellValue::from(category));
        record
    }

    fn dataset() -> RawDataset {
        RawDataset::from_rows(vec![
            row("2024-05-01", 500.0, "Arroz", "Mercearia"),
            row("2024-05-02", 300.0, "Sabao", "Limpeza"),
            row("2024-05-03", 200.0, "Suco", "Bebidas"),
            row("2024-04-10", 400.0, "Arroz", "Mercearia"),
        ])
    }

    #[test]
    fn test_clean_dataset_is_approved() {
        let config = AnalysisConfig {
            period: PeriodFilter::All,
            ..Default::default()
        };
        let output = SalesDiagnostics::run(&dataset(), &config).unwrap();

        assert!(output.is_approved(), "{}", output.report.to_markdown());
        assert_eq!(output.produced, output.corrected);
        assert_eq!(output.corrected.kpis.revenue, 1400.0);
        assert_eq!(output.corrected.kpis.sales_count, 4);
        assert_eq!(output.field_map.get(CanonicalField::Value), Some("Valor Total"));
        assert!(output.corrected.stock.is_none());
    }

    #[test]
    fn test_period_split_feeds_comparisons() {
        let config = AnalysisConfig {
            period: PeriodFilter::Last15Days,
            ..Default::default()
        };
        let output = run_diagnostics(&dataset(), &config).unwrap();

        // Current window is 2024-04-19..=2024-05-03; 2024-04-10 is previous.
        assert_eq!(output.corrected.kpis.revenue, 1000.0);
        let revenue = output.corrected.comparisons.revenue.unwrap();
        assert_eq!(revenue.previous_value, 400.0);
        assert_eq!(revenue.kind, ComparisonKind::Normal);
        assert!((revenue.delta_percent - 150.0).abs() < 1e-9);
        assert!(output.is_approved());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let config = AnalysisConfig {
            top_n: 0,
            ..Default::default()
        };
        let result = SalesDiagnostics::run(&dataset(), &config);
        assert!(matches!(result, Err(SalesAuditError::InvalidTopN(0))));
    }

    #[test]
    fn test_empty_dataset_is_rejected_not_an_error() {
        let output = SalesDiagnostics::run(&RawDataset::default(), &AnalysisConfig::default()).unwrap();
        assert!(!output.is_approved());
        assert_eq!(output.report.critical_errors.len(), 1);
    }
}
