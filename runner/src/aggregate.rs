//! Multi-run aggregation.
//!
//! Only PASSED records contribute. Records are grouped, every metric is summarised over the
//! records that actually carry it, and a metric no record carries stays unavailable instead of
//! averaging to zero. Values are sorted before they are summed, so the result does not depend
//! on the order the records were appended in.

use crate::{
    database::{Metric, MetricSet, RunRecord},
    matrix::BinaryRole,
};
use std::collections::BTreeMap;

pub const SINGLE_INSTANCE_CASE: &str = "BenchMark Test (Single LRU)";
pub const SHARDED_CASE: &str = "Randomized Mixed Operations Test (SegLRUCache)";

/// Implementation family a test case measures, derived from the binary and the test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    SingleInstance,
    Sharded,
    ShardedTableVariant,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SingleInstance => "Single LRU",
            Self::Sharded => "SegLRU",
            Self::ShardedTableVariant => "SegLRU HT",
        }
    }

    /// First matching rule wins, anything else is not aggregated. Test case names only have to
    /// contain the marker name, decorations such as a thread count are ignored.
    pub fn classify(role: BinaryRole, test_case: &str) -> Option<Self> {
        match role {
            BinaryRole::Baseline if test_case.contains(SINGLE_INSTANCE_CASE) => {
                Some(Self::SingleInstance)
            }
            BinaryRole::Baseline if test_case.contains(SHARDED_CASE) => Some(Self::Sharded),
            BinaryRole::TableVariant if test_case.contains(SHARDED_CASE) => {
                Some(Self::ShardedTableVariant)
            }
            _ => None,
        }
    }

    /// the sharded cache measured by a binary of `role`
    pub fn sharded(role: BinaryRole) -> Self {
        match role {
            BinaryRole::Baseline => Self::Sharded,
            BinaryRole::TableVariant => Self::ShardedTableVariant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSummary {
    pub mean: f64,
    // sample standard deviation, 0 for a single value
    pub std_dev: f64,
    pub count: usize,
}

impl MetricSummary {
    /// None if there are no values to summarise
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        values.sort_by(f64::total_cmp);

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let std_dev = if count > 1 {
            let squares = values
                .iter()
                .map(|value| (value - mean).powi(2))
                .sum::<f64>();

            (squares / (count - 1) as f64).sqrt()
        } else {
            0.0
        };

        Some(Self {
            mean,
            std_dev,
            count,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateResult {
    pub throughput: Option<MetricSummary>,
    pub hit_ratio: Option<MetricSummary>,
    pub elapsed: Option<MetricSummary>,
    // PASSED records in the group, with or without metrics
    pub samples: usize,
}

impl AggregateResult {
    pub fn from_sets(sets: &[MetricSet]) -> Self {
        let summary = |metric: Metric| {
            MetricSummary::from_values(sets.iter().filter_map(|set| set.get(metric)).collect())
        };

        Self {
            throughput: summary(Metric::Throughput),
            hit_ratio: summary(Metric::HitRatio),
            elapsed: summary(Metric::Elapsed),
            samples: sets.len(),
        }
    }

    pub fn get(&self, metric: Metric) -> Option<&MetricSummary> {
        match metric {
            Metric::Throughput => self.throughput.as_ref(),
            Metric::HitRatio => self.hit_ratio.as_ref(),
            Metric::Elapsed => self.elapsed.as_ref(),
        }
    }
}

pub type Aggregates = BTreeMap<(Category, String), AggregateResult>;

/// Group PASSED records by `key`, records mapped to None are skipped
fn group_by<'a, K, I, F>(records: I, key: F) -> BTreeMap<K, AggregateResult>
where
    K: Ord,
    I: IntoIterator<Item = &'a RunRecord>,
    F: Fn(&RunRecord) -> Option<K>,
{
    let mut groups: BTreeMap<K, Vec<MetricSet>> = BTreeMap::new();

    for record in records.into_iter().filter(|record| record.is_passed()) {
        if let Some(key) = key(record) {
            groups
                .entry(key)
                .or_default()
                .push(record.metrics.unwrap_or_default());
        }
    }

    groups
        .into_iter()
        .map(|(key, sets)| (key, AggregateResult::from_sets(&sets)))
        .collect()
}

/// Aggregate per (category, configuration); `role_of` maps a binary name to its role
pub fn aggregate<'a, I, F>(records: I, role_of: F) -> Aggregates
where
    I: IntoIterator<Item = &'a RunRecord>,
    F: Fn(&str) -> Option<BinaryRole>,
{
    group_by(records, |record| {
        let category = Category::classify(role_of(record.binary.as_str())?, &record.test_case)?;

        Some((category, record.configuration.clone()))
    })
}
