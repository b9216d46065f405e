use crate::ingestion::{Dimension, Metric, SalesRow};
use crate::utils::percentage_of;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// One distinct value of a grouping dimension with its totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AggregateBucket {
    pub dimension_value: String,
    pub value_sum: f64,
    pub quantity_sum: f64,
    pub count: usize,
    pub percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulated_percentage: Option<f64>,
}

impl AggregateBucket {
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Value => self.value_sum,
            Metric::Quantity => self.quantity_sum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Desc,
    Asc,
}

/// Groups items by key, keeping groups in the order their key first appeared.
pub fn group_by<'a, T, K, F>(items: &'a [T], key: F) -> Vec<(K, Vec<&'a T>)>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<&'a T>)> = Vec::new();

    for item in items {
        let k = key(item);
        match index.get(&k) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![item]));
            }
        }
    }

    groups
}

pub fn sum_by(rows: &[SalesRow], metric: Metric) -> f64 {
    rows.iter()
        .map(|r| r.metric(metric))
        .filter(|v| v.is_finite())
        .fold(0.0, |acc, v| acc + v)
}

pub fn average_by(rows: &[SalesRow], metric: Metric) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    sum_by(rows, metric) / rows.len() as f64
}

pub fn count(rows: &[SalesRow]) -> usize {
    rows.len()
}

/// Total value divided by number of sales; zero when there are no sales.
pub fn ticket_average(rows: &[SalesRow]) -> f64 {
    if rows.is_empty() {
        0.0
    } else {
        sum_by(rows, Metric::Value) / rows.len() as f64
    }
}

/// Builds unsorted buckets, one per distinct dimension value, in first-seen
/// order. Percentages are relative to `share_of` over all buckets.
pub fn buckets(rows: &[SalesRow], dimension: Dimension, share_of: Metric) -> Vec<AggregateBucket> {
    let groups = group_by(rows, |r| r.dimension_key(dimension).to_string());

    let mut buckets: Vec<AggregateBucket> = groups
        .into_iter()
        .map(|(name, members)| AggregateBucket {
            dimension_value: name,
            value_sum: members.iter().map(|r| r.value).sum(),
            quantity_sum: members.iter().map(|r| r.quantity).sum(),
            count: members.len(),
            percentage: 0.0,
            accumulated_percentage: None,
        })
        .collect();

    let total: f64 = buckets.iter().map(|b| b.metric(share_of)).sum();
    for bucket in &mut buckets {
        bucket.percentage = percentage_of(bucket.metric(share_of), total);
    }

    buckets
}

/// Stable descending sort by metric; ties keep first-seen order.
pub fn sort_desc(buckets: &mut [AggregateBucket], metric: Metric) {
    buckets.sort_by(|a, b| {
        b.metric(metric)
            .partial_cmp(&a.metric(metric))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Every bucket of a dimension, sorted by value descending, with percentages
/// and running accumulated percentages. Percentages close to 100.
pub fn aggregate(rows: &[SalesRow], dimension: Dimension) -> Vec<AggregateBucket> {
    let mut all = buckets(rows, dimension, Metric::Value);
    sort_desc(&mut all, Metric::Value);

    let total: f64 = all.iter().map(|b| b.value_sum).sum();
    let mut running = 0.0;
    for bucket in &mut all {
        running += bucket.value_sum;
        bucket.accumulated_percentage = Some(percentage_of(running, total));
    }

    all
}

/// Ranks the dimension by `by` and keeps `n` buckets.
///
/// `Desc` returns the best `n`. `Asc` takes the full descending ranking,
/// reverses it and keeps the first `n`, so tied buckets appear last-seen
/// first. Each percentage is relative to the metric over every group, not
/// only the returned ones.
pub fn top_n(
    rows: &[SalesRow],
    dimension: Dimension,
    n: usize,
    by: Metric,
    direction: Direction,
) -> Vec<AggregateBucket> {
    let mut ranked = buckets(rows, dimension, by);
    sort_desc(&mut ranked, by);

    if direction == Direction::Asc {
        ranked.reverse();
    }
    ranked.truncate(n);
    ranked
}

pub fn worst_n(rows: &[SalesRow], dimension: Dimension, n: usize, by: Metric) -> Vec<AggregateBucket> {
    top_n(rows, dimension, n, by, Direction::Asc)
}
