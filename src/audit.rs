//! Shadow computation of every produced aggregate.
//!
//! The audit treats the primary pipeline output as untrusted. It re-reads the
//! raw rows with strict coercion, recomputes each number on its own and
//! compares the two. Findings are graded:
//!
//! - **critical**: malformed input or an impossible computation. The value is
//!   forced to a safe default.
//! - **grave**: a produced number disagrees with its recomputation beyond
//!   tolerance. The recomputed value replaces it.
//! - **warning**: auto-corrected or unusual data that does not block approval.
//!
//! [`audit`] is a pure function: it returns a fresh [`AuditOutcome`] and keeps
//! no state between calls.

use crate::abc::{classify_buckets, AbcClass, AbcClassification, AbcItem, AbcLevel, CRITICAL_SHARE};
use crate::aggregation::{buckets, AggregateBucket};
use crate::fields::{CanonicalField, CanonicalFieldMap};
use crate::ingestion::{apply_filters, duplicate_key, Dimension, Metric, SalesRow};
use crate::kpi::DashboardKpis;
use crate::period::{split_by_period, ComparisonKind, ComparisonResult, PeriodComparisons};
use crate::report::{AuditFinding, AuditReport, Correction, ReportBuilder, Severity};
use crate::schema::{AbcThresholds, AnalysisConfig, RawDataset};
use crate::stock::StockReport;
use crate::utils::{
    coerce_date, coerce_label, coerce_number, fold_text, round2, round_to, sanitize_amount,
    sanitize_units, NumberCoercion,
};
use crate::weekday::WeekdayPerformance;
use crate::SalesAggregates;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_TOLERANCE: f64 = 0.02;
/// Allowed gap between the last accumulated ABC share and 100%.
pub const ABC_CLOSURE_TOLERANCE: f64 = 0.5;
/// Allowed gap between a grouping's summed percentages and 100%.
pub const PERCENT_CLOSURE_TOLERANCE: f64 = 0.1;
/// Percentage drift below this is rounding noise.
pub const PERCENT_TOLERANCE: f64 = 0.01;
pub const EXTREME_DELTA_PERCENT: f64 = 500.0;
pub const TICKET_HIGH: f64 = 100_000.0;
pub const TICKET_LOW: f64 = 1.0;

const CHECK_RAW: &str = "raw_data";
const CHECK_REVENUE: &str = "revenue";
const CHECK_SALES: &str = "sales_count";
const CHECK_QUANTITY: &str = "quantity_total";
const CHECK_TICKET: &str = "ticket_average";
const CHECK_ABC_CATEGORY: &str = "abc_category";
const CHECK_ABC_PRODUCT: &str = "abc_product";
const CHECK_WEEKDAY: &str = "weekday";
const CHECK_STOCK: &str = "stock";

/// True when `delta` is larger than `tolerance`, ignoring float noise.
fn exceeds(delta: f64, tolerance: f64) -> bool {
    !delta.is_finite() || round_to(delta.abs(), 6) > tolerance
}

// ============================================================================
// RAW DATA
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawDataStats {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub duplicates: usize,
    pub negatives_corrected: usize,
    pub invalid_values: usize,
    pub invalid_dates: usize,
    pub missing_values: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDataValidation {
    pub valid: bool,
    pub corrected_rows: Vec<SalesRow>,
    pub stats: RawDataStats,
    pub findings: Vec<AuditFinding>,
}

impl RawDataValidation {
    fn rejected(stats: RawDataStats, finding: AuditFinding) -> Self {
        Self {
            valid: false,
            corrected_rows: Vec::new(),
            stats,
            findings: vec![finding],
        }
    }
}

/// Strict re-read of the raw rows.
///
/// Values are rounded to cents and quantities to whole units. Negative
/// numbers are clamped to zero (warning), non-numeric ones zeroed (critical),
/// rows with an unreadable date dropped (grave), and rows repeating an
/// earlier `date|value|quantity` collapsed into the first one.
pub fn validate_raw_data(dataset: &RawDataset, fields: &CanonicalFieldMap) -> RawDataValidation {
    let mut stats = RawDataStats {
        total_rows: dataset.rows.len(),
        ..Default::default()
    };

    if dataset.rows.is_empty() {
        return RawDataValidation::rejected(
            stats,
            AuditFinding::critical(CHECK_RAW, "Dataset has no rows"),
        );
    }

    let Some(value_column) = fields.get(CanonicalField::Value) else {
        return RawDataValidation::rejected(
            stats,
            AuditFinding::critical(
                CHECK_RAW,
                format!(
                    "No value column among headers [{}]; nothing can be computed",
                    dataset.headers.join(", ")
                ),
            ),
        );
    };
    let date_column = fields.get(CanonicalField::Date);
    let quantity_column = fields.get(CanonicalField::Quantity);
    let label = |record: &crate::schema::RawRecord, field: CanonicalField| {
        coerce_label(fields.get(field).and_then(|c| record.get(c)))
    };

    let mut findings = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut corrected_rows = Vec::with_capacity(dataset.rows.len());

    for (idx, record) in dataset.rows.iter().enumerate() {
        let line = idx + 1;

        let date = match date_column {
            Some(column) => match coerce_date(record.get(column)) {
                Some(date) => Some(date),
                None => {
                    stats.invalid_dates += 1;
                    findings.push(AuditFinding::grave(
                        CHECK_RAW,
                        format!(
                            "Row {}: unreadable date '{}' in column '{}'; row dropped",
                            line,
                            record.get(column).map(|c| c.to_string()).unwrap_or_default(),
                            column
                        ),
                    ));
                    continue;
                }
            },
            None => None,
        };

        let value = match coerce_number(record.get(value_column)) {
            NumberCoercion::Valid(v) => {
                if round2(v) < 0.0 {
                    stats.negatives_corrected += 1;
                    findings.push(AuditFinding::warning(
                        CHECK_RAW,
                        format!("Row {}: negative value {:.2} corrected to 0", line, v),
                    ));
                }
                sanitize_amount(v)
            }
            NumberCoercion::Invalid => {
                stats.invalid_values += 1;
                findings.push(AuditFinding::critical(
                    CHECK_RAW,
                    format!(
                        "Row {}: value '{}' in column '{}' is not a number; set to 0",
                        line,
                        record.get(value_column).map(|c| c.to_string()).unwrap_or_default(),
                        value_column
                    ),
                ));
                0.0
            }
            NumberCoercion::Missing => {
                stats.missing_values += 1;
                0.0
            }
        };

        let quantity = match quantity_column {
            None => 1.0,
            Some(column) => match coerce_number(record.get(column)) {
                NumberCoercion::Valid(q) => {
                    if q.round() < 0.0 {
                        stats.negatives_corrected += 1;
                        findings.push(AuditFinding::warning(
                            CHECK_RAW,
                            format!("Row {}: negative quantity {} corrected to 0", line, q),
                        ));
                    }
                    sanitize_units(q)
                }
                NumberCoercion::Invalid => {
                    stats.invalid_values += 1;
                    findings.push(AuditFinding::critical(
                        CHECK_RAW,
                        format!(
                            "Row {}: quantity '{}' in column '{}' is not a number; set to 0",
                            line,
                            record.get(column).map(|c| c.to_string()).unwrap_or_default(),
                            column
                        ),
                    ));
                    0.0
                }
                NumberCoercion::Missing => {
                    stats.missing_values += 1;
                    0.0
                }
            },
        };

        if !seen.insert(duplicate_key(date, value, quantity)) {
            stats.duplicates += 1;
            continue;
        }

        corrected_rows.push(SalesRow {
            date,
            value,
            quantity,
            product: label(record, CanonicalField::Product),
            category: label(record, CanonicalField::Category),
            supplier: label(record, CanonicalField::Supplier),
            seller: label(record, CanonicalField::Seller),
            stock: fields
                .get(CanonicalField::Stock)
                .map(|c| coerce_number(record.get(c)).or_zero()),
        });
    }

    if stats.duplicates > 0 {
        findings.push(AuditFinding::warning(
            CHECK_RAW,
            format!(
                "{} duplicate row(s) with the same date, value and quantity collapsed",
                stats.duplicates
            ),
        ));
    }

    stats.valid_rows = corrected_rows.len();
    let valid = !corrected_rows.is_empty()
        && findings.iter().all(|f| f.severity != Severity::Critical);

    RawDataValidation {
        valid,
        corrected_rows,
        stats,
        findings,
    }
}

// ============================================================================
// AGGREGATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Sum,
    Average,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateValidation {
    pub valid: bool,
    pub expected: f64,
    pub produced: f64,
    pub delta: f64,
    pub finding: Option<AuditFinding>,
}

impl AggregateValidation {
    fn correction(&self, check: &str, target: &str) -> Option<Correction> {
        if self.valid {
            return None;
        }
        Some(
            Correction::new(
                check,
                target,
                format!("{} replaced by recomputed {:.2}", target, self.expected),
            )
            .values(self.produced, self.expected),
        )
    }
}

fn metric_of(row: &SalesRow, metric: Metric) -> f64 {
    match metric {
        Metric::Value => row.value,
        Metric::Quantity => row.quantity,
    }
}

/// Recomputes a sum or average over `rows` and compares it to `produced`.
pub fn validate_aggregate(
    check: &str,
    rows: &[SalesRow],
    metric: Metric,
    kind: AggregateKind,
    produced: f64,
    tolerance: f64,
) -> AggregateValidation {
    let mut total = 0.0;
    for row in rows {
        total += metric_of(row, metric);
    }
    let expected = match kind {
        AggregateKind::Sum => total,
        AggregateKind::Average if rows.is_empty() => 0.0,
        AggregateKind::Average => total / rows.len() as f64,
    };
    compare_to_expected(check, expected, produced, tolerance)
}

/// Compares a produced number against its recomputation.
pub fn compare_to_expected(
    check: &str,
    expected: f64,
    produced: f64,
    tolerance: f64,
) -> AggregateValidation {
    if !produced.is_finite() {
        return AggregateValidation {
            valid: false,
            expected,
            produced,
            delta: f64::NAN,
            finding: Some(AuditFinding::critical(
                check,
                format!(
                    "Produced value {} is not a finite number; replaced by recomputed {:.2}",
                    produced, expected
                ),
            )),
        };
    }

    let delta = produced - expected;
    if exceeds(delta, tolerance) {
        return AggregateValidation {
            valid: false,
            expected,
            produced,
            delta,
            finding: Some(AuditFinding::grave(
                check,
                format!(
                    "Produced {:.2} differs from recomputed {:.2} by {:.2} (tolerance {:.2}); corrected to {:.2}",
                    produced,
                    expected,
                    delta.abs(),
                    tolerance,
                    expected
                ),
            )),
        };
    }

    AggregateValidation {
        valid: true,
        expected,
        produced,
        delta,
        finding: None,
    }
}

// ============================================================================
// ABC
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AbcValidation {
    pub valid: bool,
    pub corrected_items: Vec<AbcItem>,
    pub corrections: Vec<Correction>,
    pub findings: Vec<AuditFinding>,
}

impl AbcValidation {
    fn rejected(finding: AuditFinding) -> Self {
        Self {
            valid: false,
            corrected_items: Vec::new(),
            corrections: Vec::new(),
            findings: vec![finding],
        }
    }
}

/// Re-derives share, accumulated share and class for each item in value
/// order. Divergences become corrections; an unclosed curve is grave.
pub fn validate_abc(
    check: &str,
    items: &[AbcItem],
    thresholds: &AbcThresholds,
    level: AbcLevel,
) -> AbcValidation {
    if let Err(e) = thresholds.validate() {
        return AbcValidation::rejected(AuditFinding::critical(
            check,
            format!("{}; no classification performed", e),
        ));
    }
    if items.is_empty() {
        return AbcValidation::rejected(AuditFinding::critical(
            check,
            "No items to classify; classification impossible",
        ));
    }

    let total: f64 = items.iter().map(|i| i.value).sum();
    if !total.is_finite() || total <= 0.0 {
        return AbcValidation::rejected(AuditFinding::critical(
            check,
            "Total value is zero; classification impossible",
        ));
    }

    let mut findings = Vec::new();
    let mut corrections = Vec::new();

    let last_accumulated = items.last().map_or(0.0, |i| i.accumulated_percentage);
    if exceeds(last_accumulated - 100.0, ABC_CLOSURE_TOLERANCE) {
        findings.push(AuditFinding::grave(
            check,
            format!(
                "Final accumulated percentage is {:.2}%, expected 100% (tolerance {}); corrected to 100.00%",
                last_accumulated, ABC_CLOSURE_TOLERANCE
            ),
        ));
    }

    let mut ordered: Vec<&AbcItem> = items.iter().collect();
    ordered.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if ordered.iter().zip(items).any(|(a, b)| a.name != b.name) {
        corrections.push(Correction::new(
            check,
            "order",
            "Items were not sorted by value descending; re-sorted",
        ));
    }

    let mut running = 0.0;
    let mut corrected_items = Vec::with_capacity(items.len());
    for item in ordered {
        running += item.value;
        let percentage = item.value / total * 100.0;
        let accumulated = running / total * 100.0;
        let class = AbcClass::for_accumulated(accumulated, thresholds);
        let is_critical =
            level == AbcLevel::Product && class == AbcClass::D && percentage < CRITICAL_SHARE;

        if exceeds(item.percentage - percentage, PERCENT_TOLERANCE) {
            corrections.push(
                Correction::new(
                    check,
                    item.name.as_str(),
                    format!(
                        "Share {:.2}% recomputed as {:.2}%",
                        item.percentage, percentage
                    ),
                )
                .values(item.percentage, percentage),
            );
        }
        if exceeds(item.accumulated_percentage - accumulated, PERCENT_TOLERANCE) {
            corrections.push(
                Correction::new(
                    check,
                    item.name.as_str(),
                    format!(
                        "Accumulated share {:.2}% recomputed as {:.2}%",
                        item.accumulated_percentage, accumulated
                    ),
                )
                .values(item.accumulated_percentage, accumulated),
            );
        }
        if item.class != class {
            corrections.push(Correction::new(
                check,
                item.name.as_str(),
                format!(
                    "Class {} reclassified as {} (accumulated {:.2}%)",
                    item.class, class, accumulated
                ),
            ));
        }
        if item.is_critical != is_critical {
            corrections.push(Correction::new(
                check,
                item.name.as_str(),
                format!("Critical flag {} corrected to {}", item.is_critical, is_critical),
            ));
        }

        corrected_items.push(AbcItem {
            name: item.name.clone(),
            value: item.value,
            quantity: item.quantity,
            count: item.count,
            percentage,
            accumulated_percentage: accumulated,
            class,
            is_critical,
        });
    }

    AbcValidation {
        valid: findings.is_empty(),
        corrected_items,
        corrections,
        findings,
    }
}

// ============================================================================
// COMPARISONS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonValidation {
    pub valid: bool,
    pub kind: ComparisonKind,
    pub delta_percent: f64,
    pub findings: Vec<AuditFinding>,
    pub corrections: Vec<Correction>,
}

impl ComparisonValidation {
    pub fn result(&self, current: f64, previous: f64) -> ComparisonResult {
        ComparisonResult {
            current_value: current,
            previous_value: previous,
            delta_percent: self.delta_percent,
            kind: self.kind,
        }
    }
}

/// Recomputes the period delta from the two period values and, when given,
/// checks a produced comparison against it.
pub fn validate_comparison(
    check: &str,
    current: f64,
    previous: f64,
    produced: Option<&ComparisonResult>,
    tolerance: f64,
) -> ComparisonValidation {
    let mut findings = Vec::new();
    let mut corrections = Vec::new();

    if !current.is_finite() || !previous.is_finite() {
        findings.push(AuditFinding::critical(
            check,
            format!(
                "Period values are not finite (current {}, previous {}); delta set to 0",
                current, previous
            ),
        ));
        return ComparisonValidation {
            valid: false,
            kind: ComparisonKind::Zero,
            delta_percent: 0.0,
            findings,
            corrections,
        };
    }

    let (delta_percent, kind) = if previous == 0.0 && current == 0.0 {
        (0.0, ComparisonKind::Zero)
    } else if previous == 0.0 && current > 0.0 {
        (f64::INFINITY, ComparisonKind::New)
    } else if previous == 0.0 {
        (f64::NEG_INFINITY, ComparisonKind::Normal)
    } else {
        ((current - previous) / previous.abs() * 100.0, ComparisonKind::Normal)
    };

    if kind == ComparisonKind::Normal
        && delta_percent.is_finite()
        && delta_percent.abs() > EXTREME_DELTA_PERCENT
    {
        findings.push(AuditFinding::warning(
            check,
            format!(
                "Variation of {:+.1}% between periods exceeds {}%; verify manually",
                delta_percent, EXTREME_DELTA_PERCENT
            ),
        ));
    }

    if let Some(produced) = produced {
        for (target, produced_value, expected) in [
            ("current_value", produced.current_value, current),
            ("previous_value", produced.previous_value, previous),
        ] {
            let comparison = compare_to_expected(check, expected, produced_value, tolerance);
            if let Some(finding) = comparison.finding.clone() {
                findings.push(finding);
            }
            if let Some(correction) = comparison.correction(check, target) {
                corrections.push(correction);
            }
        }

        let same_delta = if delta_percent.is_finite() {
            !exceeds(produced.delta_percent - delta_percent, PERCENT_TOLERANCE)
        } else {
            produced.delta_percent == delta_percent
        };
        if produced.kind != kind || !same_delta {
            findings.push(AuditFinding::grave(
                check,
                format!(
                    "Produced delta {:.2}% ({:?}) differs from recomputed {:.2}% ({:?})",
                    produced.delta_percent, produced.kind, delta_percent, kind
                ),
            ));
            corrections.push(Correction::new(
                check,
                "delta_percent",
                format!(
                    "Delta {:.2}% replaced by recomputed {:.2}%",
                    produced.delta_percent, delta_percent
                ),
            ));
        }
    }

    ComparisonValidation {
        valid: findings.iter().all(|f| f.severity == Severity::Warning),
        kind,
        delta_percent,
        findings,
        corrections,
    }
}

// ============================================================================
// TICKET
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TicketValidation {
    pub valid: bool,
    pub ticket: f64,
    pub findings: Vec<AuditFinding>,
}

/// Recomputes `total / count`. Implausible tickets are warnings only.
pub fn validate_ticket(
    total: f64,
    count: usize,
    produced: Option<f64>,
    tolerance: f64,
) -> TicketValidation {
    let mut findings = Vec::new();

    if !total.is_finite() {
        findings.push(AuditFinding::critical(
            CHECK_TICKET,
            format!("Total {} is not a finite number; ticket set to 0", total),
        ));
        return TicketValidation {
            valid: false,
            ticket: 0.0,
            findings,
        };
    }

    let ticket = if count == 0 { 0.0 } else { total / count as f64 };

    if ticket > TICKET_HIGH {
        findings.push(AuditFinding::warning(
            CHECK_TICKET,
            format!("Ticket average {:.2} is implausibly high", ticket),
        ));
    } else if ticket < TICKET_LOW && total > 0.0 {
        findings.push(AuditFinding::warning(
            CHECK_TICKET,
            format!("Ticket average {:.2} is implausibly low", ticket),
        ));
    }

    if let Some(produced) = produced {
        if let Some(finding) = compare_to_expected(CHECK_TICKET, ticket, produced, tolerance).finding {
            findings.push(finding);
        }
    }

    TicketValidation {
        valid: findings.iter().all(|f| f.severity == Severity::Warning),
        ticket,
        findings,
    }
}

// ============================================================================
// FULL AUDIT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditOutcome {
    pub report: AuditReport,
    pub stats: RawDataStats,
    /// The produced aggregates with every correction applied.
    pub corrected: SalesAggregates,
}

#[derive(Debug, Clone, Copy, Default)]
struct GroupTotals {
    value: f64,
    quantity: f64,
    count: usize,
}

impl GroupTotals {
    fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Value => self.value,
            Metric::Quantity => self.quantity,
        }
    }
}

fn group_totals(rows: &[SalesRow], dimension: Dimension) -> HashMap<String, GroupTotals> {
    let mut groups: HashMap<String, GroupTotals> = HashMap::new();
    for row in rows {
        let entry = groups.entry(row.dimension_key(dimension).to_string()).or_default();
        entry.value += row.value;
        entry.quantity += row.quantity;
        entry.count += 1;
    }
    groups
}

/// Audits `produced` against an independent recomputation from `dataset`.
pub fn audit(
    dataset: &RawDataset,
    fields: &CanonicalFieldMap,
    config: &AnalysisConfig,
    produced: &SalesAggregates,
) -> AuditOutcome {
    let mut builder = ReportBuilder::default();
    let mut corrected = produced.clone();
    let tolerance = config.tolerance;

    let raw = validate_raw_data(dataset, fields);
    builder.extend(raw.findings);
    builder.record(
        CHECK_RAW,
        raw.valid,
        format!(
            "{} of {} rows usable ({} duplicates, {} negatives clamped, {} invalid values, {} bad dates)",
            raw.stats.valid_rows,
            raw.stats.total_rows,
            raw.stats.duplicates,
            raw.stats.negatives_corrected,
            raw.stats.invalid_values,
            raw.stats.invalid_dates
        ),
    );

    if raw.corrected_rows.is_empty() {
        info!("Audit stopped early: no usable rows");
        return AuditOutcome {
            report: builder.finish(),
            stats: raw.stats,
            corrected,
        };
    }

    let filtered = apply_filters(&raw.corrected_rows, &config.filters);
    let split = split_by_period(&filtered, config.period);
    let current = &split.current;
    debug!(
        "Shadow rows: {} filtered, {} current, {} previous",
        filtered.len(),
        current.len(),
        split.previous.len()
    );

    audit_kpis(&mut builder, current, &produced.kpis, &mut corrected.kpis, config);
    audit_comparisons(
        &mut builder,
        &split.current,
        &split.previous,
        &produced.comparisons,
        &mut corrected.comparisons,
        tolerance,
    );

    if fields.has(CanonicalField::Category) {
        corrected.category_abc = audit_abc(
            &mut builder,
            CHECK_ABC_CATEGORY,
            AbcLevel::Category,
            current,
            &produced.category_abc,
            &config.category_thresholds,
            tolerance,
        );
    }

    if fields.has(CanonicalField::Product) {
        let scoped: Vec<SalesRow> = match &config.product_category {
            Some(wanted) => {
                let wanted = fold_text(wanted);
                current
                    .iter()
                    .filter(|r| r.category.as_deref().is_some_and(|c| fold_text(c) == wanted))
                    .cloned()
                    .collect()
            }
            None => current.clone(),
        };
        corrected.product_abc = audit_abc(
            &mut builder,
            CHECK_ABC_PRODUCT,
            AbcLevel::Product,
            &scoped,
            &produced.product_abc,
            &config.product_thresholds,
            tolerance,
        );
    }

    if fields.has(CanonicalField::Date) {
        if let Some(weekday) = audit_weekday(&mut builder, current, &produced.weekday, tolerance) {
            corrected.weekday = weekday;
        }
    }

    if let Some(stock) = &produced.stock {
        if let Some(replacement) = audit_stock(&mut builder, &filtered, stock, config, tolerance) {
            corrected.stock = Some(replacement);
        }
    }

    let report = builder.finish();
    info!("Audit finished: {}", report.summary());

    AuditOutcome {
        report,
        stats: raw.stats,
        corrected,
    }
}

fn audit_kpis(
    builder: &mut ReportBuilder,
    rows: &[SalesRow],
    produced: &DashboardKpis,
    corrected: &mut DashboardKpis,
    config: &AnalysisConfig,
) {
    let tolerance = config.tolerance;

    let revenue = validate_aggregate(
        CHECK_REVENUE,
        rows,
        Metric::Value,
        AggregateKind::Sum,
        produced.revenue,
        tolerance,
    );
    apply_aggregate(builder, CHECK_REVENUE, "revenue", &revenue, &mut corrected.revenue);

    let quantity = validate_aggregate(
        CHECK_QUANTITY,
        rows,
        Metric::Quantity,
        AggregateKind::Sum,
        produced.quantity_total,
        tolerance,
    );
    apply_aggregate(
        builder,
        CHECK_QUANTITY,
        "quantity_total",
        &quantity,
        &mut corrected.quantity_total,
    );

    if produced.sales_count != rows.len() {
        builder.push(AuditFinding::grave(
            CHECK_SALES,
            format!(
                "Produced {} sales but {} were recomputed; corrected to {}",
                produced.sales_count,
                rows.len(),
                rows.len()
            ),
        ));
        builder.correct(
            Correction::new(CHECK_SALES, "sales_count", "Sales count replaced by recount")
                .values(produced.sales_count as f64, rows.len() as f64),
        );
        corrected.sales_count = rows.len();
    }
    builder.record(
        CHECK_SALES,
        produced.sales_count == rows.len(),
        format!("recounted {} sales", rows.len()),
    );

    let ticket = validate_ticket(revenue.expected, rows.len(), Some(produced.ticket_average), tolerance);
    let ticket_ok = ticket.valid;
    builder.extend(ticket.findings);
    if !ticket_ok {
        builder.correct(
            Correction::new(CHECK_TICKET, "ticket_average", "Ticket average replaced by recomputed")
                .values(produced.ticket_average, ticket.ticket),
        );
        corrected.ticket_average = ticket.ticket;
    }
    builder.record(
        CHECK_TICKET,
        ticket_ok,
        format!("recomputed {:.2}", ticket.ticket),
    );

    for (spec, buckets) in produced.rankings() {
        if buckets.is_empty() {
            continue;
        }
        let check = format!("ranking_{}", spec.name);
        let groups = group_totals(rows, spec.dimension);
        let metric_total: f64 = groups.values().map(|g| g.metric(spec.metric)).sum();

        let mut consistent = true;
        for bucket in buckets {
            let expected = groups.get(&bucket.dimension_value).copied().unwrap_or_default();
            consistent &= audit_bucket(builder, &check, bucket, &expected, tolerance);

            let expected_share = if metric_total > 0.0 {
                expected.metric(spec.metric) / metric_total * 100.0
            } else {
                0.0
            };
            if exceeds(bucket.percentage - expected_share, PERCENT_TOLERANCE) {
                builder.correct(
                    Correction::new(
                        &check,
                        bucket.dimension_value.as_str(),
                        format!(
                            "Share {:.2}% recomputed as {:.2}%",
                            bucket.percentage, expected_share
                        ),
                    )
                    .values(bucket.percentage, expected_share),
                );
                consistent = false;
            }
        }

        if !consistent {
            if let Some(ranking) = corrected.ranking_mut(spec.name) {
                *ranking = spec.build(rows, config.top_n);
            }
        }
        builder.record(
            &check,
            consistent,
            format!("{} buckets checked", buckets.len()),
        );
    }
}

fn apply_aggregate(
    builder: &mut ReportBuilder,
    check: &str,
    target: &str,
    validation: &AggregateValidation,
    slot: &mut f64,
) {
    if let Some(finding) = validation.finding.clone() {
        builder.push(finding);
    }
    if let Some(correction) = validation.correction(check, target) {
        builder.correct(correction);
        *slot = validation.expected;
    }
    builder.record(
        check,
        validation.valid,
        format!("recomputed {:.2}", validation.expected),
    );
}

/// Returns false when the bucket disagrees with its recomputation.
fn audit_bucket(
    builder: &mut ReportBuilder,
    check: &str,
    bucket: &AggregateBucket,
    expected: &GroupTotals,
    tolerance: f64,
) -> bool {
    let mut ok = true;
    for (field, produced, recomputed) in [
        ("value", bucket.value_sum, expected.value),
        ("quantity", bucket.quantity_sum, expected.quantity),
        ("count", bucket.count as f64, expected.count as f64),
    ] {
        if exceeds(produced - recomputed, tolerance) {
            builder.push(AuditFinding::grave(
                check,
                format!(
                    "'{}' {} is {:.2} but recomputes to {:.2} (delta {:.2})",
                    bucket.dimension_value,
                    field,
                    produced,
                    recomputed,
                    (produced - recomputed).abs()
                ),
            ));
            builder.correct(
                Correction::new(
                    check,
                    format!("{}.{}", bucket.dimension_value, field),
                    format!("{} replaced by recomputed {:.2}", field, recomputed),
                )
                .values(produced, recomputed),
            );
            ok = false;
        }
    }
    ok
}

fn audit_comparisons(
    builder: &mut ReportBuilder,
    current: &[SalesRow],
    previous: &[SalesRow],
    produced: &PeriodComparisons,
    corrected: &mut PeriodComparisons,
    tolerance: f64,
) {
    let has_both = !current.is_empty() && !previous.is_empty();
    let revenue = |rows: &[SalesRow]| rows.iter().map(|r| r.value).sum::<f64>();
    let ticket = |rows: &[SalesRow]| {
        if rows.is_empty() {
            0.0
        } else {
            revenue(rows) / rows.len() as f64
        }
    };

    let recomputed = [
        ("comparison_revenue", revenue(current), revenue(previous)),
        ("comparison_sales", current.len() as f64, previous.len() as f64),
        ("comparison_ticket", ticket(current), ticket(previous)),
    ];
    let slots = [
        (&produced.revenue, &mut corrected.revenue),
        (&produced.sales, &mut corrected.sales),
        (&produced.ticket, &mut corrected.ticket),
    ];

    for ((check, cur, prev), (produced, slot)) in recomputed.into_iter().zip(slots) {
        match (produced, has_both) {
            (Some(p), true) => {
                let validation = validate_comparison(check, cur, prev, Some(p), tolerance);
                let valid = validation.valid;
                if !valid {
                    *slot = Some(validation.result(cur, prev));
                }
                builder.extend(validation.findings);
                for correction in validation.corrections {
                    builder.correct(correction);
                }
                builder.record(check, valid, format!("current {:.2}, previous {:.2}", cur, prev));
            }
            (None, true) => {
                let validation = validate_comparison(check, cur, prev, None, tolerance);
                builder.correct(Correction::new(
                    check,
                    "comparison",
                    "Comparison missing although both periods have data; filled in",
                ));
                *slot = Some(validation.result(cur, prev));
                builder.extend(validation.findings);
                builder.record(check, true, "filled in from recomputation");
            }
            (Some(_), false) => {
                builder.correct(Correction::new(
                    check,
                    "comparison",
                    "Comparison produced although a period has no rows; removed",
                ));
                *slot = None;
                builder.record(check, true, "removed: a period has no rows");
            }
            (None, false) => builder.record(check, true, "skipped: a period has no rows"),
        }
    }
}

fn audit_abc(
    builder: &mut ReportBuilder,
    check: &str,
    level: AbcLevel,
    rows: &[SalesRow],
    produced: &AbcClassification,
    thresholds: &AbcThresholds,
    tolerance: f64,
) -> AbcClassification {
    let dimension = match level {
        AbcLevel::Category => Dimension::Category,
        AbcLevel::Product => Dimension::Product,
    };
    let empty = || AbcClassification::empty(level, produced.scope.clone(), *thresholds);
    let shadow = || -> crate::error::Result<AbcClassification> {
        let items = classify_buckets(buckets(rows, dimension, Metric::Value), thresholds, level)?;
        Ok(AbcClassification {
            level,
            scope: produced.scope.clone(),
            thresholds: *thresholds,
            total_value: items.iter().map(|i| i.value).sum(),
            items,
        })
    };

    if let Err(e) = thresholds.validate() {
        builder.push(AuditFinding::critical(
            check,
            format!("{}; no classification performed", e),
        ));
        builder.record(check, false, "thresholds rejected");
        return empty();
    }

    if produced.items.is_empty() {
        return match shadow() {
            Ok(recomputed) => {
                builder.push(AuditFinding::grave(
                    check,
                    format!(
                        "Classification missing although {} items can be classified; recomputed",
                        recomputed.items.len()
                    ),
                ));
                builder.correct(Correction::new(
                    check,
                    "items",
                    "Missing classification replaced by recomputation",
                ));
                builder.record(check, false, "recomputed from scratch");
                recomputed
            }
            Err(e) => {
                builder.push(AuditFinding::critical(check, e.to_string()));
                builder.record(check, false, "classification impossible");
                empty()
            }
        };
    }

    let validation = validate_abc(check, &produced.items, thresholds, level);
    let mut consistent = validation.valid;
    let corrected_any = !validation.corrections.is_empty();
    builder.extend(validation.findings);
    for correction in validation.corrections {
        builder.correct(correction);
    }

    let groups = group_totals(rows, dimension);
    for item in &produced.items {
        let expected = groups.get(&item.name).copied().unwrap_or_default();
        consistent &= audit_bucket(builder, check, &item.to_bucket(), &expected, tolerance);
    }
    let produced_names: HashSet<&str> = produced.items.iter().map(|i| i.name.as_str()).collect();
    for (name, totals) in &groups {
        if totals.value > 0.0 && !produced_names.contains(name.as_str()) {
            builder.push(AuditFinding::grave(
                check,
                format!("'{}' ({:.2}) is missing from the classification", name, totals.value),
            ));
            consistent = false;
        }
    }

    builder.record(
        check,
        consistent,
        format!("{} items checked", produced.items.len()),
    );

    if consistent && !corrected_any {
        return produced.clone();
    }
    if consistent {
        return AbcClassification {
            total_value: validation.corrected_items.iter().map(|i| i.value).sum(),
            items: validation.corrected_items,
            ..produced.clone()
        };
    }
    match shadow() {
        Ok(recomputed) => recomputed,
        Err(e) => {
            builder.push(AuditFinding::critical(check, e.to_string()));
            empty()
        }
    }
}

/// Returns a replacement when the produced weekday figures are wrong.
fn audit_weekday(
    builder: &mut ReportBuilder,
    rows: &[SalesRow],
    produced: &WeekdayPerformance,
    tolerance: f64,
) -> Option<WeekdayPerformance> {
    let recomputed = WeekdayPerformance::analyze(rows);
    let mut consistent = true;

    if produced.buckets.len() != 7 {
        builder.push(AuditFinding::grave(
            CHECK_WEEKDAY,
            format!("Expected 7 weekday buckets, found {}", produced.buckets.len()),
        ));
        consistent = false;
    }

    let mut value = [0.0f64; 7];
    let mut count = [0usize; 7];
    for row in rows {
        if let Some(date) = row.date {
            let idx = chrono::Datelike::weekday(&date).num_days_from_monday() as usize;
            value[idx] += row.value;
            count[idx] += 1;
        }
    }
    let total: f64 = value.iter().sum();

    for bucket in &produced.buckets {
        let idx = bucket.day_index as usize;
        if idx >= 7 {
            builder.push(AuditFinding::grave(
                CHECK_WEEKDAY,
                format!("Unknown weekday index {} for '{}'", bucket.day_index, bucket.day),
            ));
            consistent = false;
            continue;
        }
        let expected = GroupTotals {
            value: value[idx],
            quantity: 0.0,
            count: count[idx],
        };
        let as_bucket = AggregateBucket {
            dimension_value: bucket.day.clone(),
            value_sum: bucket.value,
            quantity_sum: 0.0,
            count: bucket.count,
            percentage: bucket.percentage,
            accumulated_percentage: None,
        };
        consistent &= audit_bucket(builder, CHECK_WEEKDAY, &as_bucket, &expected, tolerance);

        let expected_share = if total > 0.0 { value[idx] / total * 100.0 } else { 0.0 };
        if exceeds(bucket.percentage - expected_share, PERCENT_TOLERANCE) {
            builder.correct(
                Correction::new(
                    CHECK_WEEKDAY,
                    bucket.day.as_str(),
                    format!(
                        "Share {:.2}% recomputed as {:.2}%",
                        bucket.percentage, expected_share
                    ),
                )
                .values(bucket.percentage, expected_share),
            );
            consistent = false;
        }
    }

    if total > 0.0 {
        let closure: f64 = produced.buckets.iter().map(|b| b.percentage).sum();
        if exceeds(closure - 100.0, PERCENT_CLOSURE_TOLERANCE) {
            builder.push(AuditFinding::grave(
                CHECK_WEEKDAY,
                format!("Weekday shares sum to {:.2}%, expected 100%", closure),
            ));
            consistent = false;
        }
    }

    if produced.best_day != recomputed.best_day || produced.worst_day != recomputed.worst_day {
        builder.correct(Correction::new(
            CHECK_WEEKDAY,
            "best_worst_day",
            format!(
                "Best/worst day {:?}/{:?} recomputed as {:?}/{:?}",
                produced.best_day, produced.worst_day, recomputed.best_day, recomputed.worst_day
            ),
        ));
        consistent = false;
    }
    if exceeds(
        produced.average_per_active_day - recomputed.average_per_active_day,
        tolerance,
    ) {
        builder.correct(
            Correction::new(
                CHECK_WEEKDAY,
                "average_per_active_day",
                "Average per active day replaced by recomputed",
            )
            .values(
                produced.average_per_active_day,
                recomputed.average_per_active_day,
            ),
        );
        consistent = false;
    }

    builder.record(CHECK_WEEKDAY, consistent, format!("total {:.2}", total));
    if consistent {
        None
    } else {
        Some(recomputed)
    }
}

/// Checks units sold per product; returns a replacement report on mismatch.
fn audit_stock(
    builder: &mut ReportBuilder,
    rows: &[SalesRow],
    produced: &StockReport,
    config: &AnalysisConfig,
    tolerance: f64,
) -> Option<StockReport> {
    let groups = group_totals(rows, Dimension::Product);
    let mut consistent = true;

    for status in &produced.products {
        let expected = groups
            .get(&status.product)
            .map_or(0.0, |g| g.quantity.max(0.0));
        if exceeds(status.units_sold - expected, tolerance) {
            builder.push(AuditFinding::grave(
                CHECK_STOCK,
                format!(
                    "'{}' units sold {:.2} but recomputes to {:.2}",
                    status.product, status.units_sold, expected
                ),
            ));
            consistent = false;
        }
    }

    builder.record(
        CHECK_STOCK,
        consistent,
        format!("{} products checked", produced.products.len()),
    );
    if consistent {
        return None;
    }
    builder.correct(Correction::new(
        CHECK_STOCK,
        "products",
        "Stock diagnostics recomputed from validated rows",
    ));
    StockReport::analyze(rows, &config.stock)
}
