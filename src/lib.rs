//! # Finance Forecast
//!
//! Turns a personal income/expense ledger into per-category, multi-horizon
//! forecasts with confidence bands, and into the CSV and markdown artifacts of
//! the batch forecast report.
//!
//! ## Core Concepts
//!
//! - **Series**: transactions summed per period (day, ISO week or month) and category
//! - **Horizon**: a named future window, e.g. "4 Months" = 4 monthly periods
//! - **Forecast**: point predictions plus an 80% confidence band for every future period
//! - **Insight**: trend direction and an uncertainty tier read off the first forecast period
//! - **Currency**: amounts are converted once up front; a failed rate lookup falls back
//!   to 1.0 and is reported as a warning
//!
//! ## Example
//!
//! ```rust,ignore
//! use finance_forecast::*;
//!
//! let records = RecordSet::from_csv_path("transactions.csv")?;
//! let output = run_forecast(&ForecastConfig::default(), &records, &FixedRates::new())?;
//!
//! let artifacts = ReportAssembler::new().assemble(&output)?;
//! artifacts.write_to_dir("forecast_output")?;
//! ```

pub mod aggregator;
pub mod currency;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod insight;
pub mod report;
pub mod scheduler;
pub mod schema;
pub mod seasonality;
pub mod utils;

pub use aggregator::{aggregate_monthly_net, Aggregation, Aggregator, Series, TOTAL_INCOME};
pub use currency::{currency_symbol, CurrencyContext, FixedRates, RateLookup, SUPPORTED_CURRENCIES};
#[cfg(feature = "live-rates")]
pub use currency::ExchangeRateApi;
pub use engine::{
    Forecast, ForecastModel, Forecaster, HoltLinearModel, Prediction, TrainedForecastModel,
    TrendSeasonalModel,
};
pub use error::{ForecastError, Result};
pub use ingestion::{convert_amounts, ingest, Ingested, IngestionStats, RawTransaction, RecordSet};
pub use insight::{classify, narrative, ForecastSummary, Insight, Trend, UncertaintyTier};
pub use report::{CsvTable, ReportArtifacts, ReportAssembler};
pub use scheduler::{
    ForecastCache, ForecastKey, ForecastResult, ForecastRun, HorizonScheduler,
    NetBalanceForecast, SkipReason, SkippedSeries,
};
pub use schema::*;

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub income_entries: usize,
    pub expense_entries: usize,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub ingestion: IngestionStats,
}

impl DatasetSummary {
    fn from_ingested(ingested: &Ingested) -> Self {
        Self {
            income_entries: ingested.count(TransactionType::Income),
            expense_entries: ingested.count(TransactionType::Expense),
            date_range: ingested.date_range(),
            ingestion: ingested.stats.clone(),
        }
    }
}

/// Everything a forecasting run hands to the report and presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub config: ForecastConfig,
    pub currency: CurrencyContext,
    pub dataset: DatasetSummary,
    pub run: ForecastRun,
    /// Conditions the caller should see, e.g. an exchange-rate fallback.
    pub warnings: Vec<String>,
}

impl PipelineOutput {
    pub fn insight(&self, key: &ForecastKey) -> Option<Insight> {
        Insight::for_result(self.run.results.get(key)?, &self.config.insight)
    }

    pub fn narrative(&self, key: &ForecastKey) -> Option<String> {
        let insight = self.insight(key)?;
        Some(narrative(&key.category, &key.horizon, &insight))
    }
}

pub struct ForecastPipeline;

impl ForecastPipeline {
    pub fn run(
        config: &ForecastConfig,
        records: &RecordSet,
        rates: &dyn RateLookup,
    ) -> Result<PipelineOutput> {
        Self::execute(config, records, rates, Schedule::Until(None))
    }

    /// Series not started before `deadline` are reported as skipped.
    pub fn run_until(
        config: &ForecastConfig,
        records: &RecordSet,
        rates: &dyn RateLookup,
        deadline: Instant,
    ) -> Result<PipelineOutput> {
        Self::execute(config, records, rates, Schedule::Until(Some(deadline)))
    }

    /// Reuses a fresh run from `cache` for the same converted snapshot.
    pub fn run_cached(
        config: &ForecastConfig,
        records: &RecordSet,
        rates: &dyn RateLookup,
        cache: &mut ForecastCache,
    ) -> Result<PipelineOutput> {
        Self::execute(config, records, rates, Schedule::Cached(cache))
    }

    fn execute(
        config: &ForecastConfig,
        records: &RecordSet,
        rates: &dyn RateLookup,
        schedule: Schedule<'_>,
    ) -> Result<PipelineOutput> {
        config.validate()?;

        let mut ingested = ingest(records)?;
        let dataset = DatasetSummary::from_ingested(&ingested);

        info!(
            "Forecasting {} income and {} expense entries in {}",
            dataset.income_entries, dataset.expense_entries, config.target_currency
        );

        let currency =
            CurrencyContext::resolve(&config.base_currency, &config.target_currency, rates);
        let mut warnings = Vec::new();
        if let Some(warning) = &currency.fallback_warning {
            warnings.push(warning.clone());
        }
        if dataset.ingestion.dropped() > 0 {
            let message = format!(
                "{} of {} records could not be parsed and were dropped",
                dataset.ingestion.dropped(),
                dataset.ingestion.total_rows
            );
            warn!("{}", message);
            warnings.push(message);
        }

        convert_amounts(&mut ingested.transactions, currency.rate);

        let run = match config.forecast.model {
            ModelKind::TrendSeasonal => schedule.drive(
                &HorizonScheduler::from_config(config),
                config,
                &currency,
                &ingested.transactions,
            ),
            ModelKind::HoltLinear => {
                let model = HoltLinearModel::from_settings(&config.forecast);
                schedule.drive(
                    &HorizonScheduler::with_models(config, model.clone(), model),
                    config,
                    &currency,
                    &ingested.transactions,
                )
            }
        };

        debug!(
            "Run produced {} results, {} skipped series",
            run.results.len(),
            run.skipped.len()
        );

        Ok(PipelineOutput {
            config: config.clone(),
            currency,
            dataset,
            run,
            warnings,
        })
    }
}

enum Schedule<'a> {
    Until(Option<Instant>),
    Cached(&'a mut ForecastCache),
}

impl Schedule<'_> {
    fn drive<M: ForecastModel + Sync>(
        self,
        scheduler: &HorizonScheduler<M>,
        config: &ForecastConfig,
        currency: &CurrencyContext,
        transactions: &[Transaction],
    ) -> ForecastRun {
        match self {
            Schedule::Until(deadline) => {
                scheduler.build_all_until(transactions, &config.horizons, deadline)
            }
            Schedule::Cached(cache) => {
                scheduler.build_all_cached(cache, config, &currency.target, transactions)
            }
        }
    }
}

pub fn run_forecast(
    config: &ForecastConfig,
    records: &RecordSet,
    rates: &dyn RateLookup,
) -> Result<PipelineOutput> {
    ForecastPipeline::run(config, records, rates)
}

pub fn run_forecast_from_csv(
    config: &ForecastConfig,
    path: impl AsRef<Path>,
    rates: &dyn RateLookup,
) -> Result<PipelineOutput> {
    let records = RecordSet::from_csv_path(path)?;
    ForecastPipeline::run(config, &records, rates)
}
