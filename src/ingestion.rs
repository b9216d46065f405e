use crate::fields::{CanonicalField, CanonicalFieldMap};
use crate::schema::{RawRecord, RowFilters};
use crate::utils::{
    coerce_date, coerce_label, coerce_number, fold_text, sanitize_amount, sanitize_units,
};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Label used when a row carries no value for a grouping dimension.
pub const UNINFORMED_LABEL: &str = "Não informado";

/// A transaction row expressed in canonical fields only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SalesRow {
    pub date: Option<NaiveDate>,
    pub value: f64,
    pub quantity: f64,
    pub product: Option<String>,
    pub category: Option<String>,
    pub supplier: Option<String>,
    pub seller: Option<String>,
    pub stock: Option<f64>,
}

impl SalesRow {
    pub fn dimension(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Product => self.product.as_deref(),
            Dimension::Category => self.category.as_deref(),
            Dimension::Supplier => self.supplier.as_deref(),
            Dimension::Seller => self.seller.as_deref(),
        }
    }

    /// Grouping key: the dimension value or the "not informed" label.
    pub fn dimension_key(&self, dimension: Dimension) -> &str {
        self.dimension(dimension).unwrap_or(UNINFORMED_LABEL)
    }

    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Value => self.value,
            Metric::Quantity => self.quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Product,
    Category,
    Supplier,
    Seller,
}

impl Dimension {
    pub fn field(&self) -> CanonicalField {
        match self {
            Dimension::Product => CanonicalField::Product,
            Dimension::Category => CanonicalField::Category,
            Dimension::Supplier => CanonicalField::Supplier,
            Dimension::Seller => CanonicalField::Seller,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Value,
    Quantity,
}

/// Reads raw records through the field map, coercing leniently: anything
/// that is not a usable number counts as zero and bad dates become `None`.
/// Values are kept to the cent and quantities to whole units, both clamped
/// at zero. A dataset without a quantity column counts each row as one unit.
pub fn canonicalize(rows: &[RawRecord], fields: &CanonicalFieldMap) -> Vec<SalesRow> {
    rows.iter().map(|row| canonicalize_row(row, fields)).collect()
}

pub fn canonicalize_row(row: &RawRecord, fields: &CanonicalFieldMap) -> SalesRow {
    let cell = |field: CanonicalField| fields.get(field).and_then(|column| row.get(column));

    let quantity = if fields.has(CanonicalField::Quantity) {
        sanitize_units(coerce_number(cell(CanonicalField::Quantity)).or_zero())
    } else {
        1.0
    };

    SalesRow {
        date: coerce_date(cell(CanonicalField::Date)),
        value: sanitize_amount(coerce_number(cell(CanonicalField::Value)).or_zero()),
        quantity,
        product: coerce_label(cell(CanonicalField::Product)),
        category: coerce_label(cell(CanonicalField::Category)),
        supplier: coerce_label(cell(CanonicalField::Supplier)),
        seller: coerce_label(cell(CanonicalField::Seller)),
        stock: if fields.has(CanonicalField::Stock) {
            Some(coerce_number(cell(CanonicalField::Stock)).or_zero())
        } else {
            None
        },
    }
}

/// Identity of a sale for duplicate detection: same day, amount and units.
pub fn duplicate_key(date: Option<NaiveDate>, value: f64, quantity: f64) -> String {
    format!(
        "{}|{:.2}|{}",
        date.map(|d| d.to_string()).unwrap_or_default(),
        value,
        quantity
    )
}

/// Keeps the first of each group of rows sharing a [`duplicate_key`] and
/// returns how many were dropped.
pub fn collapse_duplicates(rows: Vec<SalesRow>) -> (Vec<SalesRow>, usize) {
    let mut seen = HashSet::new();
    let before = rows.len();
    let kept: Vec<SalesRow> = rows
        .into_iter()
        .filter(|r| seen.insert(duplicate_key(r.date, r.value, r.quantity)))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

fn label_matches(actual: Option<&str>, wanted: &Option<String>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => actual.is_some_and(|a| fold_text(a) == fold_text(wanted)),
    }
}

/// Keeps the rows that satisfy every active filter.
pub fn apply_filters(rows: &[SalesRow], filters: &RowFilters) -> Vec<SalesRow> {
    if filters.is_empty() {
        return rows.to_vec();
    }
    rows.iter()
        .filter(|r| {
            label_matches(r.category.as_deref(), &filters.category)
                && label_matches(r.supplier.as_deref(), &filters.supplier)
                && label_matches(r.seller.as_deref(), &filters.seller)
        })
        .cloned()
        .collect()
}
