//! Drives aggregation and fitting for every (horizon, type, category).

use crate::aggregator::{aggregate_monthly_net, Aggregation, Aggregator, Series, TOTAL_INCOME};
use crate::engine::{Forecast, ForecastModel, Forecaster, TrendSeasonalModel};
use crate::error::ForecastError;
use crate::schema::{ForecastConfig, Frequency, Horizon, Transaction, TransactionType};
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForecastKey {
    pub horizon: String,
    pub kind: TransactionType,
    pub category: String,
}

impl ForecastKey {
    pub fn new(horizon: impl Into<String>, kind: TransactionType, category: impl Into<String>) -> Self {
        Self {
            horizon: horizon.into(),
            kind,
            category: category.into(),
        }
    }
}

impl fmt::Display for ForecastKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} / {}", self.horizon, self.kind, self.category)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub key: ForecastKey,
    pub frequency: Frequency,
    pub forecast: Forecast,
    /// The last few actual periods, oldest first.
    pub history: Vec<(NaiveDate, f64)>,
    /// Sum of the last `period_count` actual values, or all of them when fewer exist.
    pub last_actual_total: f64,
}

impl ForecastResult {
    pub fn last_actual(&self) -> Option<f64> {
        self.history.last().map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    InsufficientData { observed: usize, required: usize },
    FitFailure(String),
    DeadlineExceeded,
}

impl From<ForecastError> for SkipReason {
    fn from(err: ForecastError) -> Self {
        match err {
            ForecastError::InsufficientData { observed, required } => {
                SkipReason::InsufficientData { observed, required }
            }
            ForecastError::FitFailure(reason) => SkipReason::FitFailure(reason),
            other => SkipReason::FitFailure(other.to_string()),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientData { observed, required } => write!(
                f,
                "insufficient data ({} observed periods, {} required)",
                observed, required
            ),
            SkipReason::FitFailure(reason) => write!(f, "model fit failed: {}", reason),
            SkipReason::DeadlineExceeded => f.write_str("run deadline exceeded before fitting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSeries {
    pub key: ForecastKey,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetBalanceForecast {
    pub forecast: Forecast,
    pub history: Vec<(NaiveDate, f64)>,
}

/// Everything one scheduling run produced. Entries are either complete or absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastRun {
    pub results: BTreeMap<ForecastKey, ForecastResult>,
    /// Sorted by key.
    pub skipped: Vec<SkippedSeries>,
    pub net_balance: Option<NetBalanceForecast>,
    pub net_balance_skip: Option<SkipReason>,
}

impl ForecastRun {
    pub fn get(&self, horizon: &str, kind: TransactionType, category: &str) -> Option<&ForecastResult> {
        self.results.get(&ForecastKey::new(horizon, kind, category))
    }

    /// Results for one horizon and type, alphabetically by category.
    pub fn results_for<'a>(
        &'a self,
        horizon: &'a str,
        kind: TransactionType,
    ) -> impl Iterator<Item = &'a ForecastResult> + 'a {
        self.results
            .values()
            .filter(move |r| r.key.horizon == horizon && r.key.kind == kind)
    }

    pub fn skip_reason(&self, key: &ForecastKey) -> Option<&SkipReason> {
        self.skipped.iter().find(|s| &s.key == key).map(|s| &s.reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub history_window: usize,
    pub net_balance_months: usize,
    pub workers: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            history_window: 4,
            net_balance_months: 6,
            workers: 1,
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &ForecastConfig) -> Self {
        Self {
            history_window: config.history_window,
            net_balance_months: config.net_balance_months,
            workers: config.workers.max(1),
        }
    }
}

struct Job<'a> {
    key: ForecastKey,
    horizon: &'a Horizon,
    series: &'a Series,
}

type Outcome = (ForecastKey, std::result::Result<ForecastResult, SkipReason>);

#[derive(Debug, Clone)]
pub struct HorizonScheduler<M: ForecastModel = TrendSeasonalModel> {
    aggregator: Aggregator,
    forecaster: Forecaster<M>,
    net_forecaster: Forecaster<M>,
    options: SchedulerOptions,
}

impl HorizonScheduler<TrendSeasonalModel> {
    pub fn from_config(config: &ForecastConfig) -> Self {
        let settings = &config.forecast;
        Self::with_models(
            config,
            TrendSeasonalModel::new(settings),
            TrendSeasonalModel::new(settings).with_seasonality(settings.net_seasonality),
        )
    }
}

impl<M: ForecastModel + Sync> HorizonScheduler<M> {
    pub fn new(
        aggregator: Aggregator,
        forecaster: Forecaster<M>,
        net_forecaster: Forecaster<M>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            aggregator,
            forecaster,
            net_forecaster,
            options,
        }
    }

    /// `series_model` fits every category series, `net_model` the net balance.
    pub fn with_models(config: &ForecastConfig, series_model: M, net_model: M) -> Self {
        let min_periods = config.forecast.min_periods;
        Self::new(
            Aggregator::new(config.gap_fill, min_periods),
            Forecaster::new(series_model, min_periods),
            Forecaster::new(net_model, min_periods),
            SchedulerOptions::from_config(config),
        )
    }

    pub fn build_all(&self, transactions: &[Transaction], horizons: &[Horizon]) -> ForecastRun {
        self.build_all_until(transactions, horizons, None)
    }

    /// Like [`build_all`](Self::build_all); jobs that have not started by
    /// `deadline` are recorded as [`SkipReason::DeadlineExceeded`].
    pub fn build_all_until(
        &self,
        transactions: &[Transaction],
        horizons: &[Horizon],
        deadline: Option<Instant>,
    ) -> ForecastRun {
        let started = Instant::now();
        let mut run = ForecastRun::default();
        let mut skipped: BTreeMap<ForecastKey, SkipReason> = BTreeMap::new();

        let mut aggregations: BTreeMap<(Frequency, TransactionType), Aggregation> = BTreeMap::new();
        for horizon in horizons {
            for kind in TransactionType::ALL {
                aggregations
                    .entry((horizon.frequency, kind))
                    .or_insert_with(|| self.aggregator.aggregate(transactions, kind, horizon.frequency));
            }
        }

        let mut jobs = Vec::new();
        for horizon in horizons {
            for kind in TransactionType::ALL {
                let Some(aggregation) = aggregations.get(&(horizon.frequency, kind)) else {
                    continue;
                };

                if kind == TransactionType::Income && aggregation.total.observed_periods() > 0 {
                    jobs.push(Job {
                        key: ForecastKey::new(&horizon.label, kind, TOTAL_INCOME),
                        horizon,
                        series: &aggregation.total,
                    });
                }

                for (category, series) in &aggregation.series {
                    if kind == TransactionType::Income && category == TOTAL_INCOME {
                        warn!(
                            "Income category named '{}' collides with the aggregate series, skipping it",
                            TOTAL_INCOME
                        );
                        continue;
                    }
                    jobs.push(Job {
                        key: ForecastKey::new(&horizon.label, kind, category),
                        horizon,
                        series,
                    });
                }

                for (category, observed) in &aggregation.insufficient {
                    skipped.insert(
                        ForecastKey::new(&horizon.label, kind, category),
                        SkipReason::InsufficientData {
                            observed: *observed,
                            required: self.forecaster.min_periods(),
                        },
                    );
                }
            }
        }

        debug!(
            "Scheduling {} forecast jobs across {} horizons with {} worker(s)",
            jobs.len(),
            horizons.len(),
            self.options.workers
        );

        let (outcomes, net) = if self.options.workers > 1 && jobs.len() > 1 {
            self.run_parallel(&jobs, transactions, deadline)
        } else {
            let outcomes = jobs.iter().map(|job| self.run_job(job, deadline)).collect();
            (outcomes, self.net_balance(transactions, deadline))
        };

        for (key, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    run.results.insert(key, result);
                }
                Err(reason) => {
                    skipped.insert(key, reason);
                }
            }
        }

        // Anything a panicking worker never reported
        for job in &jobs {
            if !run.results.contains_key(&job.key) && !skipped.contains_key(&job.key) {
                skipped.insert(
                    job.key.clone(),
                    SkipReason::FitFailure("worker terminated before reporting".to_string()),
                );
            }
        }

        match net {
            Ok(net) => run.net_balance = Some(net),
            Err(reason) => {
                warn!("Net balance forecast skipped: {}", reason);
                run.net_balance_skip = Some(reason);
            }
        }

        run.skipped = skipped
            .into_iter()
            .map(|(key, reason)| SkippedSeries { key, reason })
            .collect();

        info!(
            "Forecast run finished in {:.2?}: {} series forecast, {} skipped",
            started.elapsed(),
            run.results.len(),
            run.skipped.len()
        );

        run
    }

    fn run_parallel(
        &self,
        jobs: &[Job<'_>],
        transactions: &[Transaction],
        deadline: Option<Instant>,
    ) -> (Vec<Outcome>, std::result::Result<NetBalanceForecast, SkipReason>) {
        let next = &AtomicUsize::new(0);
        let workers = self.options.workers.min(jobs.len());
        let (sender, receiver) = mpsc::channel::<Outcome>();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let sender = sender.clone();
                    scope.spawn(move || loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(job) = jobs.get(index) else {
                            break;
                        };
                        if sender.send(self.run_job(job, deadline)).is_err() {
                            break;
                        }
                    })
                })
                .collect();
            drop(sender);

            let net = self.net_balance(transactions, deadline);

            for handle in handles {
                if handle.join().is_err() {
                    warn!("A forecast worker panicked; its unfinished series are skipped");
                }
            }
            // Every sender is gone once the workers have exited
            (receiver.into_iter().collect(), net)
        })
    }

    fn run_job(&self, job: &Job<'_>, deadline: Option<Instant>) -> Outcome {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return (job.key.clone(), Err(SkipReason::DeadlineExceeded));
        }

        let outcome = match self.forecaster.try_forecast(job.series, job.horizon) {
            Ok(forecast) => Ok(ForecastResult {
                key: job.key.clone(),
                frequency: job.series.frequency(),
                forecast,
                history: job.series.tail(self.options.history_window),
                last_actual_total: job.series.trailing_sum(job.horizon.period_count),
            }),
            Err(e) => {
                debug!("Skipping {}: {}", job.key, e);
                Err(SkipReason::from(e))
            }
        };

        (job.key.clone(), outcome)
    }

    fn net_balance(
        &self,
        transactions: &[Transaction],
        deadline: Option<Instant>,
    ) -> std::result::Result<NetBalanceForecast, SkipReason> {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SkipReason::DeadlineExceeded);
        }

        let net = aggregate_monthly_net(transactions);
        let forecast = self
            .net_forecaster
            .forecast_periods(&net, self.options.net_balance_months)?;

        Ok(NetBalanceForecast {
            forecast,
            history: net.tail(self.options.history_window),
        })
    }

    /// Returns the cached run for this snapshot and configuration if it is
    /// still fresh, otherwise builds it and stores it in `cache`.
    pub fn build_all_cached(
        &self,
        cache: &mut ForecastCache,
        config: &ForecastConfig,
        currency: &str,
        transactions: &[Transaction],
    ) -> ForecastRun {
        let fingerprint = match snapshot_fingerprint(config, transactions) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!("Could not fingerprint forecast settings, bypassing cache: {}", e);
                return self.build_all(transactions, &config.horizons);
            }
        };

        let key = CacheKey::new(currency, fingerprint);
        if let Some(run) = cache.get(&key) {
            debug!("Using cached forecast run for {}", currency);
            return run.clone();
        }

        let run = self.build_all(transactions, &config.horizons);
        cache.insert(key, run.clone());
        run
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub currency: String,
    pub fingerprint: u64,
}

impl CacheKey {
    pub fn new(currency: &str, fingerprint: u64) -> Self {
        Self {
            currency: currency.to_uppercase(),
            fingerprint,
        }
    }
}

/// Hash of the transaction snapshot plus every setting that shapes a run.
pub fn snapshot_fingerprint(
    config: &ForecastConfig,
    transactions: &[Transaction],
) -> serde_json::Result<u64> {
    let mut hasher = DefaultHasher::new();
    transactions.len().hash(&mut hasher);
    for tx in transactions {
        tx.date.hash(&mut hasher);
        tx.amount.to_bits().hash(&mut hasher);
        tx.kind.hash(&mut hasher);
        tx.category.hash(&mut hasher);
    }

    let settings = serde_json::to_string(&(
        &config.horizons,
        &config.forecast,
        config.gap_fill,
        config.history_window,
        config.net_balance_months,
    ))?;
    settings.hash(&mut hasher);

    Ok(hasher.finish())
}

#[derive(Debug, Clone)]
struct CachedRun {
    stored_at: Instant,
    run: ForecastRun,
}

/// Caller-owned store of recent runs with a freshness window.
#[derive(Debug, Clone)]
pub struct ForecastCache {
    ttl: Duration,
    entries: HashMap<CacheKey, CachedRun>,
}

impl ForecastCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn from_config(config: &ForecastConfig) -> Self {
        Self::new(Duration::from_secs(config.cache_ttl_secs))
    }

    pub fn get(&self, key: &CacheKey) -> Option<&ForecastRun> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<&ForecastRun> {
        self.entries
            .get(key)
            .filter(|entry| now.saturating_duration_since(entry.stored_at) < self.ttl)
            .map(|entry| &entry.run)
    }

    pub fn insert(&mut self, key: CacheKey, run: ForecastRun) {
        self.insert_at(key, run, Instant::now());
    }

    pub fn insert_at(&mut self, key: CacheKey, run: ForecastRun, now: Instant) {
        self.entries.insert(key, CachedRun { stored_at: now, run });
    }

    /// Drops every entry, e.g. after the ledger changed.
    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    pub fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
