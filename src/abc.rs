//! ABC concentration curve.
//!
//! Items are ranked by value, a running cumulative share is computed, and each
//! item takes the first class whose inclusive upper bound covers its
//! cumulative share. With thresholds A=50, B=25, C=15, D=10 the bounds are
//! 50, 75 and 90; anything beyond 90 is D.

use crate::aggregation::{buckets, sort_desc, AggregateBucket};
use crate::error::{Result, SalesAuditError};
use crate::ingestion::{Dimension, Metric, SalesRow};
use crate::schema::AbcThresholds;
use crate::utils::{fold_text, percentage_of};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Absorbs floating-point noise when a cumulative share lands on a bound.
const BOUND_EPSILON: f64 = 1e-9;

/// Individual share (percent) below which a class D product is critical.
pub const CRITICAL_SHARE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AbcClass {
    A,
    B,
    C,
    D,
}

impl AbcClass {
    pub const ALL: [AbcClass; 4] = [AbcClass::A, AbcClass::B, AbcClass::C, AbcClass::D];

    pub fn for_accumulated(accumulated: f64, thresholds: &AbcThresholds) -> Self {
        let (a, b, c) = thresholds.bounds();
        if accumulated <= a + BOUND_EPSILON {
            AbcClass::A
        } else if accumulated <= b + BOUND_EPSILON {
            AbcClass::B
        } else if accumulated <= c + BOUND_EPSILON {
            AbcClass::C
        } else {
            AbcClass::D
        }
    }
}

impl fmt::Display for AbcClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            AbcClass::A => "A",
            AbcClass::B => "B",
            AbcClass::C => "C",
            AbcClass::D => "D",
        };
        f.write_str(letter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AbcLevel {
    Category,
    Product,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AbcItem {
    pub name: String,
    pub value: f64,
    pub quantity: f64,
    pub count: usize,
    pub percentage: f64,
    pub accumulated_percentage: f64,
    pub class: AbcClass,
    /// Product level only: class D with an individual share under 1%.
    pub is_critical: bool,
}

impl AbcItem {
    pub fn to_bucket(&self) -> AggregateBucket {
        AggregateBucket {
            dimension_value: self.name.clone(),
            value_sum: self.value,
            quantity_sum: self.quantity,
            count: self.count,
            percentage: self.percentage,
            accumulated_percentage: Some(self.accumulated_percentage),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClassSummary {
    pub items: usize,
    pub value: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AbcClassification {
    pub level: AbcLevel,
    /// Category the product curve was restricted to, if any.
    pub scope: Option<String>,
    pub thresholds: AbcThresholds,
    pub total_value: f64,
    pub items: Vec<AbcItem>,
}

impl AbcClassification {
    pub fn empty(level: AbcLevel, scope: Option<String>, thresholds: AbcThresholds) -> Self {
        Self {
            level,
            scope,
            thresholds,
            total_value: 0.0,
            items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn summary(&self, class: AbcClass) -> ClassSummary {
        let members: Vec<&AbcItem> = self.items.iter().filter(|i| i.class == class).collect();
        let value: f64 = members.iter().map(|i| i.value).sum();
        ClassSummary {
            items: members.len(),
            value,
            percentage: percentage_of(value, self.total_value),
        }
    }

    /// Stock-reduction candidates.
    pub fn critical_items(&self) -> Vec<&AbcItem> {
        self.items.iter().filter(|i| i.is_critical).collect()
    }

    pub fn find(&self, name: &str) -> Option<&AbcItem> {
        self.items.iter().find(|i| i.name == name)
    }
}

/// Classifies pre-aggregated buckets. Buckets are re-sorted by value
/// descending (stable) before the curve is computed.
pub fn classify_buckets(
    mut items: Vec<AggregateBucket>,
    thresholds: &AbcThresholds,
    level: AbcLevel,
) -> Result<Vec<AbcItem>> {
    thresholds.validate()?;

    let total: f64 = items.iter().map(|b| b.value_sum).sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(SalesAuditError::ZeroTotal(match level {
            AbcLevel::Category => "categories".to_string(),
            AbcLevel::Product => "products".to_string(),
        }));
    }

    sort_desc(&mut items, Metric::Value);

    let mut running = 0.0;
    let classified = items
        .into_iter()
        .map(|bucket| {
            running += bucket.value_sum;
            let percentage = percentage_of(bucket.value_sum, total);
            let accumulated = percentage_of(running, total);
            let class = AbcClass::for_accumulated(accumulated, thresholds);
            AbcItem {
                is_critical: level == AbcLevel::Product
                    && class == AbcClass::D
                    && percentage < CRITICAL_SHARE,
                name: bucket.dimension_value,
                value: bucket.value_sum,
                quantity: bucket.quantity_sum,
                count: bucket.count,
                percentage,
                accumulated_percentage: accumulated,
                class,
            }
        })
        .collect();

    Ok(classified)
}

/// Category-level curve over every category in `rows`.
pub fn classify_categories(rows: &[SalesRow], thresholds: &AbcThresholds) -> Result<AbcClassification> {
    let grouped = buckets(rows, Dimension::Category, Metric::Value);
    let items = classify_buckets(grouped, thresholds, AbcLevel::Category)?;
    debug!("Classified {} categories", items.len());

    Ok(AbcClassification {
        level: AbcLevel::Category,
        scope: None,
        thresholds: *thresholds,
        total_value: items.iter().map(|i| i.value).sum(),
        items,
    })
}

/// Product-level curve, restricted to `category` when one is selected.
pub fn classify_products(
    rows: &[SalesRow],
    category: Option<&str>,
    thresholds: &AbcThresholds,
) -> Result<AbcClassification> {
    let scoped: Vec<SalesRow> = match category {
        Some(wanted) => {
            let wanted = fold_text(wanted);
            rows.iter()
                .filter(|r| r.category.as_deref().is_some_and(|c| fold_text(c) == wanted))
                .cloned()
                .collect()
        }
        None => rows.to_vec(),
    };

    let grouped = buckets(&scoped, Dimension::Product, Metric::Value);
    let items = classify_buckets(grouped, thresholds, AbcLevel::Product)?;
    debug!(
        "Classified {} products (scope: {})",
        items.len(),
        category.unwrap_or("all")
    );

    Ok(AbcClassification {
        level: AbcLevel::Product,
        scope: category.map(|c| c.to_string()),
        thresholds: *thresholds,
        total_value: items.iter().map(|i| i.value).sum(),
        items,
    })
}
