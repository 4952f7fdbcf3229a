//! Bucketing of the transaction ledger into per-category time series.

use crate::schema::{Frequency, GapFill, Transaction, TransactionType};
use crate::utils::{period_start, periods_between, title_case};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const TOTAL_INCOME: &str = "Total Income";

/// Ordered `(period_start, value)` pairs for one category at one frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    frequency: Frequency,
    points: BTreeMap<NaiveDate, f64>,
    observed_periods: usize,
}

impl Series {
    /// A series where every point is an observed period.
    pub fn from_points(
        frequency: Frequency,
        points: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) -> Self {
        let points: BTreeMap<NaiveDate, f64> = points
            .into_iter()
            .map(|(date, value)| (period_start(date, frequency), value))
            .collect();
        let observed_periods = points.len();
        Self {
            frequency,
            points,
            observed_periods,
        }
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Periods that actually had transactions; zero-filled gaps are not counted.
    pub fn observed_periods(&self) -> usize {
        self.observed_periods
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.keys().copied().collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.values().copied().collect()
    }

    pub fn last(&self) -> Option<(NaiveDate, f64)> {
        self.points.iter().next_back().map(|(d, v)| (*d, *v))
    }

    /// The trailing `n` points, oldest first.
    pub fn tail(&self, n: usize) -> Vec<(NaiveDate, f64)> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).map(|(d, v)| (*d, *v)).collect()
    }

    /// Sum of the last `n` values, or of every value when fewer exist.
    pub fn trailing_sum(&self, n: usize) -> f64 {
        self.tail(n).iter().map(|(_, v)| v).sum()
    }

    fn from_buckets(
        frequency: Frequency,
        buckets: BTreeMap<NaiveDate, f64>,
        gap_fill: GapFill,
    ) -> Self {
        let observed_periods = buckets.len();
        let points = match (gap_fill, buckets.keys().next(), buckets.keys().next_back()) {
            (GapFill::Zero, Some(&first), Some(&last)) => periods_between(first, last, frequency)
                .into_iter()
                .map(|period| (period, buckets.get(&period).copied().unwrap_or(0.0)))
                .collect(),
            _ => buckets,
        };
        Self {
            frequency,
            points,
            observed_periods,
        }
    }
}

/// Result of aggregating one transaction type at one frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub kind: TransactionType,
    pub frequency: Frequency,
    /// Forecastable per-category series, keyed by normalized category.
    pub series: BTreeMap<String, Series>,
    /// Sum across all categories, over every period the type was observed in.
    pub total: Series,
    /// Categories skipped for having too few observed periods, with their count.
    pub insufficient: BTreeMap<String, usize>,
}

impl Aggregation {
    pub fn categories(&self) -> Vec<String> {
        let mut all: BTreeSet<String> = self.series.keys().cloned().collect();
        all.extend(self.insufficient.keys().cloned());
        all.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    pub gap_fill: GapFill,
    pub min_periods: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            gap_fill: GapFill::Zero,
            min_periods: 3,
        }
    }
}

impl Aggregator {
    pub fn new(gap_fill: GapFill, min_periods: usize) -> Self {
        Self {
            gap_fill,
            min_periods,
        }
    }

    pub fn aggregate(
        &self,
        transactions: &[Transaction],
        kind: TransactionType,
        frequency: Frequency,
    ) -> Aggregation {
        let mut per_category: BTreeMap<String, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
        let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();

        for tx in transactions.iter().filter(|t| t.kind == kind) {
            let period = period_start(tx.date, frequency);
            *per_category
                .entry(title_case(&tx.category))
                .or_default()
                .entry(period)
                .or_insert(0.0) += tx.amount;
            *totals.entry(period).or_insert(0.0) += tx.amount;
        }

        let mut series = BTreeMap::new();
        let mut insufficient = BTreeMap::new();

        for (category, buckets) in per_category {
            let s = Series::from_buckets(frequency, buckets, self.gap_fill);
            if s.observed_periods() < self.min_periods {
                debug!(
                    "{} '{}' at {:?}: {} observed periods, skipping",
                    kind,
                    category,
                    frequency,
                    s.observed_periods()
                );
                insufficient.insert(category, s.observed_periods());
            } else {
                series.insert(category, s);
            }
        }

        Aggregation {
            kind,
            frequency,
            series,
            total: Series::from_buckets(frequency, totals, self.gap_fill),
            insufficient,
        }
    }
}

/// Monthly income minus expense over every month that saw any transaction.
pub fn aggregate_monthly_net(transactions: &[Transaction]) -> Series {
    let mut net: BTreeMap<NaiveDate, f64> = BTreeMap::new();

    for tx in transactions {
        let month = period_start(tx.date, Frequency::Month);
        let signed = match tx.kind {
            TransactionType::Income => tx.amount,
            TransactionType::Expense => -tx.amount,
        };
        *net.entry(month).or_insert(0.0) += signed;
    }

    Series::from_points(Frequency::Month, net)
}
