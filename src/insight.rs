//! Qualitative reading of a forecast: direction, uncertainty tier and the
//! sentences shown next to the chart.

use crate::aggregator::TOTAL_INCOME;
use crate::scheduler::ForecastResult;
use crate::schema::InsightThresholds;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Increase,
    Decrease,
    Stable,
}

impl Trend {
    pub fn phrase(&self) -> &'static str {
        match self {
            Trend::Increase => "increase",
            Trend::Decrease => "decrease",
            Trend::Stable => "remain stable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UncertaintyTier {
    Low,
    Moderate,
    High,
}

impl UncertaintyTier {
    pub fn from_ratio(uncertainty: f64, thresholds: &InsightThresholds) -> Self {
        if uncertainty >= thresholds.high {
            UncertaintyTier::High
        } else if uncertainty >= thresholds.moderate {
            UncertaintyTier::Moderate
        } else {
            UncertaintyTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UncertaintyTier::Low => "low",
            UncertaintyTier::Moderate => "moderate",
            UncertaintyTier::High => "high",
        }
    }

    pub fn note(&self) -> &'static str {
        match self {
            UncertaintyTier::Low => "highly consistent",
            UncertaintyTier::Moderate => "reasonably predictable",
            UncertaintyTier::High => "volatile",
        }
    }
}

impl fmt::Display for UncertaintyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub trend: Trend,
    /// Band width relative to the first predicted value.
    pub uncertainty: f64,
    pub tier: UncertaintyTier,
}

/// Compares the first forecast period against the last actual value.
/// Equality is exact: no tolerance is applied.
pub fn classify(
    history_last_value: f64,
    forecast_first_value: f64,
    forecast_first_lower: f64,
    forecast_first_upper: f64,
) -> Insight {
    classify_with(
        history_last_value,
        forecast_first_value,
        forecast_first_lower,
        forecast_first_upper,
        &InsightThresholds::default(),
    )
}

pub fn classify_with(
    history_last_value: f64,
    forecast_first_value: f64,
    forecast_first_lower: f64,
    forecast_first_upper: f64,
    thresholds: &InsightThresholds,
) -> Insight {
    let trend = if forecast_first_value > history_last_value {
        Trend::Increase
    } else if forecast_first_value < history_last_value {
        Trend::Decrease
    } else {
        Trend::Stable
    };

    let uncertainty = if forecast_first_value != 0.0 {
        (forecast_first_upper - forecast_first_lower) / forecast_first_value.abs()
    } else {
        0.0
    };

    Insight {
        trend,
        uncertainty,
        tier: UncertaintyTier::from_ratio(uncertainty, thresholds),
    }
}

impl Insight {
    /// `None` when the result carries no history or an empty forecast.
    pub fn for_result(result: &ForecastResult, thresholds: &InsightThresholds) -> Option<Self> {
        let last = result.last_actual()?;
        let (point, lower, upper) = result.forecast.first()?;
        Some(classify_with(last, point, lower, upper, thresholds))
    }
}

/// Horizon-level totals shown as the headline metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub predicted_total: f64,
    pub lower_total: f64,
    pub upper_total: f64,
    /// Percent change against the same number of trailing actual periods;
    /// 0 when that total is not positive.
    pub change_pct: f64,
}

impl ForecastSummary {
    pub fn from_result(result: &ForecastResult) -> Self {
        let predicted_total = result.forecast.total();
        let change_pct = if result.last_actual_total > 0.0 {
            (predicted_total - result.last_actual_total) / result.last_actual_total * 100.0
        } else {
            0.0
        };

        Self {
            predicted_total,
            lower_total: result.forecast.lower_total(),
            upper_total: result.forecast.upper_total(),
            change_pct,
        }
    }
}

/// The two insight sentences for a category over a horizon.
pub fn narrative(category: &str, horizon_label: &str, insight: &Insight) -> String {
    let horizon = horizon_label.to_lowercase();
    let trend = insight.trend.phrase();
    let tier = insight.tier.as_str();
    let note = insight.tier.note();

    if category == TOTAL_INCOME {
        format!(
            "Total income is projected to **{}** over the next **{}**.\n\nWith **{}** uncertainty, the forecast is **{}**.",
            trend, horizon, tier, note
        )
    } else {
        format!(
            "**{}** is projected to **{}** over the next **{}**.\n\nThe **{}** uncertainty indicates **{}** spending behavior.",
            category, trend, horizon, tier, note
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Forecast;
    use crate::scheduler::ForecastKey;
    use crate::schema::{Frequency, TransactionType};
    use chrono::NaiveDate;

    fn result(history: &[f64], point: &[f64], last_actual_total: f64) -> ForecastResult {
        let d = |m: u32| NaiveDate::from_ymd_opt(2024, m, 1).unwrap();
        ForecastResult {
            key: ForecastKey::new("2 Months", TransactionType::Expense, "Food"),
            frequency: Frequency::Month,
            forecast: Forecast {
                dates: (0..point.len()).map(|i| d(7 + i as u32)).collect(),
                point: point.to_vec(),
                lower: point.iter().map(|p| p - 10.0).collect(),
                upper: point.iter().map(|p| p + 10.0).collect(),
            },
            history: history
                .iter()
                .enumerate()
                .map(|(i, v)| (d(3 + i as u32), *v))
                .collect(),
            last_actual_total,
        }
    }

    #[test]
    fn test_equal_values_are_stable() {
        let insight = classify(500.0, 500.0, 490.0, 510.0);
        assert_eq!(insight.trend, Trend::Stable);
        assert_eq!(classify(500.0, 500.01, 490.0, 510.0).trend, Trend::Increase);
        assert_eq!(classify(500.0, 499.99, 490.0, 510.0).trend, Trend::Decrease);
    }

    #[test]
    fn test_tier_boundaries_are_inclusive() {
        // (upper - lower) / |point| == 0.10 exactly
        assert_eq!(classify(0.0, 100.0, 95.0, 105.0).tier, UncertaintyTier::Moderate);
        // == 0.25 exactly
        assert_eq!(classify(0.0, 100.0, 87.5, 112.5).tier, UncertaintyTier::High);
        assert_eq!(classify(0.0, 100.0, 96.0, 104.0).tier, UncertaintyTier::Low);
    }

    #[test]
    fn test_zero_point_has_zero_uncertainty() {
        let insight = classify(10.0, 0.0, -5.0, 5.0);
        assert_eq!(insight.uncertainty, 0.0);
        assert_eq!(insight.tier, UncertaintyTier::Low);
        assert_eq!(insight.trend, Trend::Decrease);
    }

    #[test]
    fn test_negative_point_uses_magnitude() {
        let insight = classify(-100.0, -100.0, -115.0, -85.0);
        assert!((insight.uncertainty - 0.3).abs() < 1e-12);
        assert_eq!(insight.tier, UncertaintyTier::High);
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = InsightThresholds {
            moderate: 0.5,
            high: 1.0,
        };
        let insight = classify_with(0.0, 100.0, 80.0, 120.0, &thresholds);
        assert_eq!(insight.tier, UncertaintyTier::Low);
    }

    #[test]
    fn test_summary_change_pct() {
        let summary = ForecastSummary::from_result(&result(&[100.0, 100.0], &[110.0, 130.0], 200.0));
        assert!((summary.predicted_total - 240.0).abs() < 1e-9);
        assert!((summary.lower_total - 220.0).abs() < 1e-9);
        assert!((summary.upper_total - 260.0).abs() < 1e-9);
        assert!((summary.change_pct - 20.0).abs() < 1e-9);

        let no_baseline = ForecastSummary::from_result(&result(&[0.0], &[50.0], 0.0));
        assert_eq!(no_baseline.change_pct, 0.0);
    }

    #[test]
    fn test_insight_for_result_uses_last_history_value() {
        let r = result(&[100.0, 120.0], &[130.0, 140.0], 220.0);
        let insight = Insight::for_result(&r, &InsightThresholds::default()).unwrap();
        assert_eq!(insight.trend, Trend::Increase);

        let empty = result(&[], &[130.0], 0.0);
        assert!(Insight::for_result(&empty, &InsightThresholds::default()).is_none());
    }

    #[test]
    fn test_narrative_wording() {
        let insight = classify(100.0, 120.0, 110.0, 130.0);
        let total = narrative(TOTAL_INCOME, "4 Months", &insight);
        assert!(total.starts_with("Total income is projected to **increase** over the next **4 months**."));
        assert!(total.contains("With **moderate** uncertainty, the forecast is **reasonably predictable**."));

        let food = narrative("Food", "1 Year", &classify(100.0, 100.0, 99.0, 101.0));
        assert!(food.starts_with("**Food** is projected to **remain stable** over the next **1 year**."));
        assert!(food.contains("The **low** uncertainty indicates **highly consistent** spending behavior."));
    }
}
