use crate::error::{ForecastError, Result};
use crate::utils::safe_file_component;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    #[schemars(description = "Money received (salary, allowance, refunds)")]
    Income,

    #[schemars(description = "Money spent")]
    Expense,
}

impl TransactionType {
    pub const ALL: [TransactionType; 2] = [TransactionType::Income, TransactionType::Expense];

    /// Case-insensitive parse of the ledger's `type` column.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "INCOME" => Some(Self::Income),
            "EXPENSE" => Some(Self::Expense),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated ledger entry. Amounts are already in the reporting currency
/// once they reach the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub date: NaiveDate,
    pub amount: f64,
    pub kind: TransactionType,
    pub category: String,
    pub title: Option<String>,
    pub account: Option<String>,
    pub currency: Option<String>,
    pub is_recurring: bool,
    pub interval: Option<String>,
}

impl Transaction {
    pub fn new(
        date: NaiveDate,
        amount: f64,
        kind: TransactionType,
        category: impl Into<String>,
    ) -> Self {
        Self {
            date,
            amount,
            kind,
            category: category.into(),
            title: None,
            account: None,
            currency: None,
            is_recurring: false,
            interval: None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
#[serde(rename_all = "PascalCase")]
pub enum Frequency {
    #[schemars(description = "Calendar day buckets")]
    Day,

    #[schemars(description = "ISO week buckets starting on Monday")]
    Week,

    #[schemars(description = "Calendar month buckets starting on the 1st")]
    Month,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct Horizon {
    #[schemars(description = "Display label, e.g. '4 Months'")]
    pub label: String,

    #[schemars(description = "Number of future periods to predict (must be > 0)")]
    pub period_count: usize,

    #[schemars(description = "Bucket size of the series forecast for this horizon")]
    pub frequency: Frequency,
}

impl Horizon {
    pub fn new(label: impl Into<String>, period_count: usize, frequency: Frequency) -> Self {
        Self {
            label: label.into(),
            period_count,
            frequency,
        }
    }

    /// The fixed horizon set shown on the trends page and in the batch report.
    pub fn standard() -> Vec<Horizon> {
        vec![
            Horizon::new("4 Days", 4, Frequency::Day),
            Horizon::new("4 Weeks", 4, Frequency::Week),
            Horizon::new("2 Months", 2, Frequency::Month),
            Horizon::new("4 Months", 4, Frequency::Month),
            Horizon::new("1 Year", 12, Frequency::Month),
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum GapFill {
    #[schemars(
        description = "Periods between a series' first and last observation with no transactions are present with value 0"
    )]
    #[default]
    Zero,

    #[schemars(description = "Only periods that had transactions are kept")]
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ModelKind {
    #[schemars(description = "Additive linear trend plus Fourier seasonality")]
    #[default]
    TrendSeasonal,

    #[schemars(description = "Holt's linear (double exponential smoothing) method")]
    HoltLinear,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct SeasonalitySettings {
    pub weekly: bool,
    pub yearly: bool,
}

impl SeasonalitySettings {
    pub const NONE: SeasonalitySettings = SeasonalitySettings {
        weekly: false,
        yearly: false,
    };
}

/// Which seasonal components are fitted at each bucket frequency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct SeasonalityPolicy {
    pub day: SeasonalitySettings,
    pub week: SeasonalitySettings,
    pub month: SeasonalitySettings,
}

impl Default for SeasonalityPolicy {
    fn default() -> Self {
        Self {
            day: SeasonalitySettings {
                weekly: true,
                yearly: true,
            },
            week: SeasonalitySettings {
                weekly: false,
                yearly: true,
            },
            month: SeasonalitySettings::NONE,
        }
    }
}

impl SeasonalityPolicy {
    pub fn for_frequency(&self, frequency: Frequency) -> SeasonalitySettings {
        match frequency {
            Frequency::Day => self.day,
            Frequency::Week => self.week,
            Frequency::Month => self.month,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct ForecastSettings {
    #[schemars(description = "Forecasting algorithm used for every series")]
    pub model: ModelKind,

    #[schemars(description = "Probability mass inside the confidence band (0 < w < 1)")]
    pub interval_width: f64,

    #[schemars(description = "Minimum number of observed periods before a series is forecast")]
    pub min_periods: usize,

    #[schemars(description = "Monte-Carlo draws used to estimate the confidence band")]
    pub uncertainty_samples: usize,

    #[schemars(description = "Seed for the band simulation")]
    pub seed: u64,

    pub seasonality: SeasonalityPolicy,

    #[schemars(description = "Seasonality applied to the monthly net-balance series")]
    pub net_seasonality: SeasonalitySettings,

    #[schemars(
        description = "Ridge penalty on seasonal coefficients; larger values shrink seasonality toward zero"
    )]
    pub seasonality_prior: f64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            model: ModelKind::TrendSeasonal,
            interval_width: 0.8,
            min_periods: 3,
            uncertainty_samples: 1000,
            seed: 42,
            seasonality: SeasonalityPolicy::default(),
            net_seasonality: SeasonalitySettings {
                weekly: false,
                yearly: true,
            },
            seasonality_prior: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct InsightThresholds {
    #[schemars(description = "Relative band width at which uncertainty becomes Moderate")]
    pub moderate: f64,

    #[schemars(description = "Relative band width at which uncertainty becomes High")]
    pub high: f64,
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.10,
            high: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct ForecastConfig {
    #[schemars(description = "Currency the ledger is recorded in")]
    pub base_currency: String,

    #[schemars(description = "Currency all amounts are converted to before aggregation")]
    pub target_currency: String,

    pub horizons: Vec<Horizon>,

    pub gap_fill: GapFill,

    pub forecast: ForecastSettings,

    #[schemars(description = "Number of trailing actual periods kept with each forecast")]
    pub history_window: usize,

    #[schemars(description = "Months forecast for the net balance (income minus expense)")]
    pub net_balance_months: usize,

    pub insight: InsightThresholds,

    #[schemars(description = "Worker threads used for fitting; 1 runs sequentially")]
    pub workers: usize,

    #[schemars(description = "Freshness window of cached forecast runs, in seconds")]
    pub cache_ttl_secs: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            base_currency: "MYR".to_string(),
            target_currency: "MYR".to_string(),
            horizons: Horizon::standard(),
            gap_fill: GapFill::Zero,
            forecast: ForecastSettings::default(),
            history_window: 4,
            net_balance_months: 6,
            insight: InsightThresholds::default(),
            workers: 1,
            cache_ttl_secs: 3600,
        }
    }
}

impl ForecastConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ForecastConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let settings = &self.forecast;
        if !(settings.interval_width > 0.0 && settings.interval_width < 1.0) {
            return Err(ForecastError::InvalidConfig(format!(
                "interval_width {} must be strictly between 0 and 1",
                settings.interval_width
            )));
        }
        if settings.min_periods < 2 {
            return Err(ForecastError::InvalidConfig(format!(
                "min_periods {} must be at least 2",
                settings.min_periods
            )));
        }
        if settings.uncertainty_samples == 0 {
            return Err(ForecastError::InvalidConfig(
                "uncertainty_samples must be positive".to_string(),
            ));
        }
        if settings.seasonality_prior < 0.0 || !settings.seasonality_prior.is_finite() {
            return Err(ForecastError::InvalidConfig(format!(
                "seasonality_prior {} must be a non-negative number",
                settings.seasonality_prior
            )));
        }
        if let Some(h) = self.horizons.iter().find(|h| h.period_count == 0) {
            return Err(ForecastError::InvalidConfig(format!(
                "horizon '{}' has a period_count of 0",
                h.label
            )));
        }
        let mut labels = BTreeMap::new();
        for horizon in &self.horizons {
            let file_label = safe_file_component(&horizon.label);
            if let Some(previous) = labels.insert(file_label, &horizon.label) {
                return Err(ForecastError::InvalidConfig(format!(
                    "horizon labels '{}' and '{}' collide; labels must be unique",
                    previous, horizon.label
                )));
            }
        }
        if self.net_balance_months == 0 {
            return Err(ForecastError::InvalidConfig(
                "net_balance_months must be positive".to_string(),
            ));
        }
        if !(self.insight.moderate >= 0.0 && self.insight.moderate <= self.insight.high) {
            return Err(ForecastError::InvalidConfig(format!(
                "insight thresholds must satisfy 0 <= moderate ({}) <= high ({})",
                self.insight.moderate, self.insight.high
            )));
        }
        if self.workers == 0 {
            return Err(ForecastError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ForecastConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = ForecastConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("target_currency"));
        assert!(schema_json.contains("horizons"));
        assert!(schema_json.contains("interval_width"));
    }

    #[test]
    fn test_standard_horizons() {
        let horizons = Horizon::standard();
        let labels: Vec<&str> = horizons.iter().map(|h| h.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["4 Days", "4 Weeks", "2 Months", "4 Months", "1 Year"]
        );
        assert_eq!(horizons[4].period_count, 12);
        assert_eq!(horizons[4].frequency, Frequency::Month);
    }

    #[test]
    fn test_transaction_type_parse() {
        assert_eq!(TransactionType::parse(" income "), Some(TransactionType::Income));
        assert_eq!(TransactionType::parse("Expense"), Some(TransactionType::Expense));
        assert_eq!(TransactionType::parse("transfer"), None);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = ForecastConfig::from_json_str(r#"{ "target_currency": "USD" }"#).unwrap();
        assert_eq!(config.target_currency, "USD");
        assert_eq!(config.base_currency, "MYR");
        assert_eq!(config.horizons.len(), 5);
        assert!((config.forecast.interval_width - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_interval_width_rejected() {
        let result = ForecastConfig::from_json_str(r#"{ "forecast": { "interval_width": 1.5 } }"#);
        assert!(matches!(result, Err(ForecastError::InvalidConfig(_))));
    }

    #[test]
    fn test_duplicate_horizon_labels_rejected() {
        let config = ForecastConfig {
            horizons: vec![
                Horizon::new("Next", 4, Frequency::Week),
                Horizon::new("Next", 2, Frequency::Month),
            ],
            ..ForecastConfig::default()
        };
        assert!(matches!(config.validate(), Err(ForecastError::InvalidConfig(_))));

        let same_file = ForecastConfig {
            horizons: vec![
                Horizon::new("4 Months", 4, Frequency::Month),
                Horizon::new("4 Months!", 16, Frequency::Week),
            ],
            ..ForecastConfig::default()
        };
        assert!(matches!(same_file.validate(), Err(ForecastError::InvalidConfig(_))));
    }

    #[test]
    fn test_seasonality_policy_defaults() {
        let policy = SeasonalityPolicy::default();
        assert!(policy.for_frequency(Frequency::Day).weekly);
        assert!(policy.for_frequency(Frequency::Day).yearly);
        assert!(!policy.for_frequency(Frequency::Week).weekly);
        assert!(policy.for_frequency(Frequency::Week).yearly);
        assert_eq!(policy.for_frequency(Frequency::Month), SeasonalitySettings::NONE);
    }
}
