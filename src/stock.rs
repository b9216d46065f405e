use crate::aggregation::group_by;
use crate::ingestion::{SalesRow, UNINFORMED_LABEL};
use crate::schema::StockSettings;
use crate::utils::round2;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StockCondition {
    /// Ruptura: stock at or below the stockout threshold.
    Stockout,
    /// Encalhe: stock that would take too long to sell at the current pace.
    SlowMoving,
    Healthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StockStatus {
    pub product: String,
    pub stock: f64,
    pub units_sold: f64,
    pub daily_velocity: f64,
    /// `None` when nothing sold in the span.
    pub coverage_days: Option<f64>,
    pub condition: StockCondition,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StockReport {
    pub span_days: i64,
    pub products: Vec<StockStatus>,
}

impl StockReport {
    /// Returns `None` when the rows carry no stock column.
    pub fn analyze(rows: &[SalesRow], settings: &StockSettings) -> Option<Self> {
        if rows.iter().all(|r| r.stock.is_none()) {
            return None;
        }

        let dates: Vec<NaiveDate> = rows.iter().filter_map(|r| r.date).collect();
        let span_days = match (dates.iter().min(), dates.iter().max()) {
            (Some(first), Some(last)) => (*last - *first).num_days() + 1,
            _ => 1,
        };

        let groups = group_by(rows, |r| {
            r.product.clone().unwrap_or_else(|| UNINFORMED_LABEL.to_string())
        });

        let products = groups
            .into_iter()
            .map(|(product, members)| {
                let stock = latest_stock(&members);
                let units_sold: f64 = members.iter().map(|r| r.quantity.max(0.0)).sum();
                let daily_velocity = units_sold / span_days as f64;
                let coverage_days = if daily_velocity > 0.0 {
                    Some(round2(stock / daily_velocity))
                } else {
                    None
                };

                let condition = if stock <= settings.stockout_threshold {
                    StockCondition::Stockout
                } else if coverage_days.map_or(true, |days| days > settings.slow_moving_days) {
                    StockCondition::SlowMoving
                } else {
                    StockCondition::Healthy
                };

                StockStatus {
                    product,
                    stock,
                    units_sold,
                    daily_velocity,
                    coverage_days,
                    condition,
                }
            })
            .collect();

        Some(Self {
            span_days,
            products,
        })
    }

    pub fn stockouts(&self) -> Vec<&StockStatus> {
        self.with_condition(StockCondition::Stockout)
    }

    pub fn slow_moving(&self) -> Vec<&StockStatus> {
        self.with_condition(StockCondition::SlowMoving)
    }

    fn with_condition(&self, condition: StockCondition) -> Vec<&StockStatus> {
        self.products
            .iter()
            .filter(|p| p.condition == condition)
            .collect()
    }
}

/// Stock on the most recent dated row; the last row seen when none is dated.
fn latest_stock(rows: &[&SalesRow]) -> f64 {
    let dated = rows
        .iter()
        .filter(|r| r.date.is_some())
        .fold(None::<&SalesRow>, |latest, r| match latest {
            Some(current) if current.date > r.date => Some(current),
            _ => Some(*r),
        });

    dated
        .or_else(|| rows.last().copied())
        .and_then(|r| r.stock)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(product: &str, day: u32, quantity: f64, stock: f64) -> SalesRow {
        SalesRow {
            date: NaiveDate::from_ymd_opt(2024, 4, day),
            value: quantity * 10.0,
            quantity,
            product: Some(product.to_string()),
            stock: Some(stock),
            ..Default::default()
        }
    }

    #[test]
    fn test_stock_conditions() {
        let rows = vec![
            row("Arroz", 1, 5.0, 20.0),
            row("Arroz", 10, 5.0, 0.0),
            row("Feijao", 1, 1.0, 500.0),
            row("Oleo", 1, 10.0, 30.0),
            row("Oleo", 10, 10.0, 10.0),
        ];
        let report = StockReport::analyze(&rows, &StockSettings::default()).unwrap();
        assert_eq!(report.span_days, 10);

        let arroz = &report.products[0];
        assert_eq!(arroz.stock, 0.0);
        assert_eq!(arroz.condition, StockCondition::Stockout);

        let feijao = &report.products[1];
        assert_eq!(feijao.daily_velocity, 0.1);
        assert_eq!(feijao.coverage_days, Some(5000.0));
        assert_eq!(feijao.condition, StockCondition::SlowMoving);

        let oleo = &report.products[2];
        assert_eq!(oleo.stock, 10.0);
        assert_eq!(oleo.coverage_days, Some(5.0));
        assert_eq!(oleo.condition, StockCondition::Healthy);

        assert_eq!(report.stockouts().len(), 1);
        assert_eq!(report.slow_moving().len(), 1);
    }

    #[test]
    fn test_no_stock_column() {
        let rows = vec![SalesRow {
            value: 1.0,
            ..Default::default()
        }];
        assert!(StockReport::analyze(&rows, &StockSettings::default()).is_none());
    }
}
