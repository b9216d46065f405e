use crate::aggregation::{sum_by, ticket_average, top_n, AggregateBucket, Direction};
use crate::ingestion::{Dimension, Metric, SalesRow};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Headline numbers and rankings for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DashboardKpis {
    pub revenue: f64,
    pub sales_count: usize,
    pub quantity_total: f64,
    pub ticket_average: f64,
    pub top_products: Vec<AggregateBucket>,
    pub worst_products: Vec<AggregateBucket>,
    pub top_products_by_quantity: Vec<AggregateBucket>,
    pub top_categories: Vec<AggregateBucket>,
    pub top_suppliers: Vec<AggregateBucket>,
    pub top_sellers: Vec<AggregateBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingSpec {
    pub name: &'static str,
    pub dimension: Dimension,
    pub metric: Metric,
    pub direction: Direction,
}

impl RankingSpec {
    pub const ALL: [RankingSpec; 6] = [
        RankingSpec::new("top_products", Dimension::Product, Metric::Value, Direction::Desc),
        RankingSpec::new("worst_products", Dimension::Product, Metric::Value, Direction::Asc),
        RankingSpec::new(
            "top_products_by_quantity",
            Dimension::Product,
            Metric::Quantity,
            Direction::Desc,
        ),
        RankingSpec::new("top_categories", Dimension::Category, Metric::Value, Direction::Desc),
        RankingSpec::new("top_suppliers", Dimension::Supplier, Metric::Value, Direction::Desc),
        RankingSpec::new("top_sellers", Dimension::Seller, Metric::Value, Direction::Desc),
    ];

    const fn new(name: &'static str, dimension: Dimension, metric: Metric, direction: Direction) -> Self {
        Self {
            name,
            dimension,
            metric,
            direction,
        }
    }

    pub fn build(&self, rows: &[SalesRow], n: usize) -> Vec<AggregateBucket> {
        top_n(rows, self.dimension, n, self.metric, self.direction)
    }
}

/// Which dimensions have a resolved column; unresolved ones get no ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvailableDimensions {
    pub product: bool,
    pub category: bool,
    pub supplier: bool,
    pub seller: bool,
}

impl AvailableDimensions {
    pub fn all() -> Self {
        Self {
            product: true,
            category: true,
            supplier: true,
            seller: true,
        }
    }

    pub fn has(&self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::Product => self.product,
            Dimension::Category => self.category,
            Dimension::Supplier => self.supplier,
            Dimension::Seller => self.seller,
        }
    }
}

impl DashboardKpis {
    pub fn compute(rows: &[SalesRow], top: usize, available: AvailableDimensions) -> Self {
        let mut kpis = Self {
            revenue: sum_by(rows, Metric::Value),
            sales_count: rows.len(),
            quantity_total: sum_by(rows, Metric::Quantity),
            ticket_average: ticket_average(rows),
            ..Default::default()
        };

        for spec in RankingSpec::ALL {
            if !available.has(spec.dimension) {
                continue;
            }
            if let Some(ranking) = kpis.ranking_mut(spec.name) {
                *ranking = spec.build(rows, top);
            }
        }

        kpis
    }

    /// Every ranking with the recipe it was built from.
    pub fn rankings(&self) -> Vec<(RankingSpec, &[AggregateBucket])> {
        RankingSpec::ALL
            .iter()
            .filter_map(|spec| {
                let buckets = match spec.name {
                    "top_products" => &self.top_products,
                    "worst_products" => &self.worst_products,
                    "top_products_by_quantity" => &self.top_products_by_quantity,
                    "top_categories" => &self.top_categories,
                    "top_suppliers" => &self.top_suppliers,
                    "top_sellers" => &self.top_sellers,
                    _ => return None,
                };
                Some((*spec, buckets.as_slice()))
            })
            .collect()
    }

    pub fn ranking_mut(&mut self, name: &str) -> Option<&mut Vec<AggregateBucket>> {
        match name {
            "top_products" => Some(&mut self.top_products),
            "worst_products" => Some(&mut self.worst_products),
            "top_products_by_quantity" => Some(&mut self.top_products_by_quantity),
            "top_categories" => Some(&mut self.top_categories),
            "top_suppliers" => Some(&mut self.top_suppliers),
            "top_sellers" => Some(&mut self.top_sellers),
            _ => None,
        }
    }
}
