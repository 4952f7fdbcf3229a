//! Forecasting engine: the model capability traits, the two bundled models and
//! the [`Forecaster`] that turns a fitted model into a [`Forecast`].

use crate::aggregator::Series;
use crate::error::{ForecastError, Result};
use crate::schema::{ForecastSettings, Horizon, SeasonalityPolicy, SeasonalitySettings};
use crate::seasonality::{components_for, epoch_days, fourier_features, SeasonalComponent};
use crate::utils::future_periods;
use chrono::NaiveDate;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Point forecast with its confidence band, one entry per future period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub dates: Vec<NaiveDate>,
    pub point: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Forecast {
    pub fn len(&self) -> usize {
        self.point.len()
    }

    pub fn is_empty(&self) -> bool {
        self.point.is_empty()
    }

    /// `(point, lower, upper)` of the first forecast period.
    pub fn first(&self) -> Option<(f64, f64, f64)> {
        Some((
            *self.point.first()?,
            *self.lower.first()?,
            *self.upper.first()?,
        ))
    }

    pub fn total(&self) -> f64 {
        self.point.iter().sum()
    }

    pub fn lower_total(&self) -> f64 {
        self.lower.iter().sum()
    }

    pub fn upper_total(&self) -> f64 {
        self.upper.iter().sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, f64, f64, f64)> + '_ {
        self.dates
            .iter()
            .zip(self.point.iter())
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|((d, p), (l, u))| (*d, *p, *l, *u))
    }
}

/// Raw model output for a set of future dates.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub point: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// A forecasting algorithm that can be fitted to a series.
pub trait ForecastModel: Debug {
    type Trained: TrainedForecastModel;

    fn fit(&self, series: &Series) -> Result<Self::Trained>;

    fn name(&self) -> &str;
}

/// A fitted model, able to predict any future dates of its series.
pub trait TrainedForecastModel: Debug {
    /// `dates` are the contiguous future periods following the last observation.
    fn predict(&self, dates: &[NaiveDate]) -> Result<Prediction>;
}

/// Monte-Carlo estimate of a central confidence band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandSimulator {
    pub interval_width: f64,
    pub samples: usize,
    pub seed: u64,
}

impl BandSimulator {
    pub fn from_settings(settings: &ForecastSettings) -> Self {
        Self {
            interval_width: settings.interval_width,
            samples: settings.uncertainty_samples,
            seed: settings.seed,
        }
    }

    /// Each sample path draws one slope error, applied proportionally to
    /// `slope_steps[i]`, plus independent noise with standard deviation
    /// `noise_sd[i]` at every index.
    pub fn simulate(
        &self,
        point: &[f64],
        slope_steps: &[f64],
        slope_sd: f64,
        noise_sd: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        if slope_sd == 0.0 && noise_sd.iter().all(|sd| *sd == 0.0) {
            return Ok((point.to_vec(), point.to_vec()));
        }

        let slope_dist = normal(slope_sd)?;
        let noise_dists = noise_sd
            .iter()
            .map(|sd| normal(*sd))
            .collect::<Result<Vec<_>>>()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut paths: Vec<Vec<f64>> = vec![Vec::with_capacity(self.samples); point.len()];

        for _ in 0..self.samples {
            let slope_error = slope_dist.sample(&mut rng);
            for (i, path) in paths.iter_mut().enumerate() {
                let noise = noise_dists[i].sample(&mut rng);
                path.push(point[i] + slope_error * slope_steps[i] + noise);
            }
        }

        let tail = (1.0 - self.interval_width) / 2.0;
        let mut lower = Vec::with_capacity(point.len());
        let mut upper = Vec::with_capacity(point.len());
        for mut path in paths {
            path.sort_by(|a, b| a.total_cmp(b));
            lower.push(quantile(&path, tail));
            upper.push(quantile(&path, 1.0 - tail));
        }

        Ok((lower, upper))
    }
}

fn normal(sd: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, sd)
        .map_err(|e| ForecastError::FitFailure(format!("invalid band spread {}: {}", sd, e)))
}

/// Linear-interpolated quantile of an ascending slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Additive linear trend plus Fourier seasonality, fitted by ridge-penalized
/// least squares on scaled time and values.
#[derive(Debug, Clone)]
pub struct TrendSeasonalModel {
    policy: SeasonalityPolicy,
    fixed_seasonality: Option<SeasonalitySettings>,
    seasonality_prior: f64,
    band: BandSimulator,
}

#[derive(Debug, Clone)]
pub struct TrainedTrendSeasonal {
    coefficients: Vec<f64>,
    components: Vec<SeasonalComponent>,
    t0: f64,
    span: f64,
    y_scale: f64,
    last_x: f64,
    sigma: f64,
    slope_se: f64,
    band: BandSimulator,
}

// Trend columns are effectively unpenalized.
const TREND_PENALTY: f64 = 1e-8;

impl TrendSeasonalModel {
    pub fn new(settings: &ForecastSettings) -> Self {
        Self {
            policy: settings.seasonality,
            fixed_seasonality: None,
            seasonality_prior: settings.seasonality_prior,
            band: BandSimulator::from_settings(settings),
        }
    }

    /// Uses `settings` for every series regardless of its frequency.
    pub fn with_seasonality(mut self, settings: SeasonalitySettings) -> Self {
        self.fixed_seasonality = Some(settings);
        self
    }

    fn seasonality_for(&self, series: &Series) -> SeasonalitySettings {
        self.fixed_seasonality
            .unwrap_or_else(|| self.policy.for_frequency(series.frequency()))
    }

    fn design_row(&self, date: NaiveDate, t0: f64, span: f64, components: &[SeasonalComponent]) -> Vec<f64> {
        let mut row = vec![1.0, (epoch_days(date) - t0) / span];
        row.extend(fourier_features(date, components));
        row
    }
}

impl ForecastModel for TrendSeasonalModel {
    type Trained = TrainedTrendSeasonal;

    fn fit(&self, series: &Series) -> Result<Self::Trained> {
        let dates = series.dates();
        let values = series.values();
        if values.len() < 2 {
            return Err(ForecastError::InsufficientData {
                observed: values.len(),
                required: 2,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::FitFailure(
                "series contains non-finite values".to_string(),
            ));
        }

        let t0 = epoch_days(dates[0]);
        let span = epoch_days(dates[dates.len() - 1]) - t0;
        if span <= 0.0 {
            return Err(ForecastError::FitFailure(
                "series spans a single period".to_string(),
            ));
        }

        let y_scale = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };
        let y: Vec<f64> = values.iter().map(|v| v / y_scale).collect();

        let components = components_for(self.seasonality_for(series));
        let rows: Vec<Vec<f64>> = dates
            .iter()
            .map(|d| self.design_row(*d, t0, span, &components))
            .collect();
        let width = rows[0].len();

        let mut penalties = vec![self.seasonality_prior; width];
        penalties[0] = TREND_PENALTY;
        penalties[1] = TREND_PENALTY;

        let coefficients = ridge_solve(&rows, &y, &penalties).ok_or_else(|| {
            ForecastError::FitFailure("normal equations are not positive definite".to_string())
        })?;

        let n = y.len();
        let ssr: f64 = rows
            .iter()
            .zip(y.iter())
            .map(|(row, actual)| (actual - dot(row, &coefficients)).powi(2))
            .sum();
        let sigma = (ssr / (n.saturating_sub(2).max(1)) as f64).sqrt();

        let xs: Vec<f64> = rows.iter().map(|r| r[1]).collect();
        let x_mean = xs.iter().sum::<f64>() / n as f64;
        let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
        let slope_se = if sxx > 0.0 { sigma / sxx.sqrt() } else { 0.0 };

        debug!(
            "Fitted trend+seasonal model on {} points ({} seasonal terms), sigma={:.4}",
            n,
            width - 2,
            sigma * y_scale
        );

        Ok(TrainedTrendSeasonal {
            coefficients,
            components,
            t0,
            span,
            y_scale,
            last_x: xs[n - 1],
            sigma,
            slope_se,
            band: self.band,
        })
    }

    fn name(&self) -> &str {
        "Additive trend + seasonality"
    }
}

impl TrainedForecastModel for TrainedTrendSeasonal {
    fn predict(&self, dates: &[NaiveDate]) -> Result<Prediction> {
        let mut point = Vec::with_capacity(dates.len());
        let mut steps = Vec::with_capacity(dates.len());

        for date in dates {
            let mut row = vec![1.0, (epoch_days(*date) - self.t0) / self.span];
            row.extend(fourier_features(*date, &self.components));
            point.push(dot(&row, &self.coefficients) * self.y_scale);
            steps.push(row[1] - self.last_x);
        }

        let noise = vec![self.sigma * self.y_scale; dates.len()];
        let (lower, upper) =
            self.band
                .simulate(&point, &steps, self.slope_se * self.y_scale, &noise)?;

        Ok(Prediction {
            point,
            lower,
            upper,
        })
    }
}

/// Holt's linear method (double exponential smoothing).
#[derive(Debug, Clone)]
pub struct HoltLinearModel {
    alpha: f64,
    beta: f64,
    band: BandSimulator,
}

#[derive(Debug, Clone)]
pub struct TrainedHoltLinear {
    alpha: f64,
    beta: f64,
    level: f64,
    trend: f64,
    sigma: f64,
    band: BandSimulator,
}

impl HoltLinearModel {
    pub fn new(alpha: f64, beta: f64, settings: &ForecastSettings) -> Result<Self> {
        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(ForecastError::InvalidConfig(
                "Alpha must be between 0 and 1 (exclusive)".to_string(),
            ));
        }
        if beta <= 0.0 || beta >= 1.0 {
            return Err(ForecastError::InvalidConfig(
                "Beta must be between 0 and 1 (exclusive)".to_string(),
            ));
        }
        Ok(Self {
            alpha,
            beta,
            band: BandSimulator::from_settings(settings),
        })
    }

    pub fn from_settings(settings: &ForecastSettings) -> Self {
        Self {
            alpha: 0.5,
            beta: 0.3,
            band: BandSimulator::from_settings(settings),
        }
    }
}

impl ForecastModel for HoltLinearModel {
    type Trained = TrainedHoltLinear;

    fn fit(&self, series: &Series) -> Result<Self::Trained> {
        let values = series.values();
        if values.len() < 2 {
            return Err(ForecastError::InsufficientData {
                observed: values.len(),
                required: 2,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::FitFailure(
                "series contains non-finite values".to_string(),
            ));
        }

        let mut level = values[0];
        let mut trend = values[1] - values[0];
        let mut squared_errors = 0.0;

        for &value in &values[1..] {
            let expected = level + trend;
            squared_errors += (value - expected).powi(2);

            let new_level = self.alpha * value + (1.0 - self.alpha) * expected;
            trend = self.beta * (new_level - level) + (1.0 - self.beta) * trend;
            level = new_level;
        }

        let sigma = (squared_errors / (values.len() - 1) as f64).sqrt();

        Ok(TrainedHoltLinear {
            alpha: self.alpha,
            beta: self.beta,
            level,
            trend,
            sigma,
            band: self.band,
        })
    }

    fn name(&self) -> &str {
        "Holt linear"
    }
}

impl TrainedForecastModel for TrainedHoltLinear {
    fn predict(&self, dates: &[NaiveDate]) -> Result<Prediction> {
        let point: Vec<f64> = (1..=dates.len())
            .map(|h| self.level + h as f64 * self.trend)
            .collect();

        // Variance of the h-step error for additive-error Holt
        let noise: Vec<f64> = (1..=dates.len())
            .map(|h| {
                let growth: f64 = (1..h)
                    .map(|j| (self.alpha * (1.0 + j as f64 * self.beta)).powi(2))
                    .sum();
                self.sigma * (1.0 + growth).sqrt()
            })
            .collect();

        let steps = vec![0.0; dates.len()];
        let (lower, upper) = self.band.simulate(&point, &steps, 0.0, &noise)?;

        Ok(Prediction {
            point,
            lower,
            upper,
        })
    }
}

/// Wraps a model with the minimum-history rule and the forecast invariants.
#[derive(Debug, Clone)]
pub struct Forecaster<M: ForecastModel = TrendSeasonalModel> {
    model: M,
    min_periods: usize,
}

impl Forecaster<TrendSeasonalModel> {
    pub fn from_settings(settings: &ForecastSettings) -> Self {
        Self::new(TrendSeasonalModel::new(settings), settings.min_periods)
    }
}

impl<M: ForecastModel> Forecaster<M> {
    pub fn new(model: M, min_periods: usize) -> Self {
        Self { model, min_periods }
    }

    pub fn min_periods(&self) -> usize {
        self.min_periods
    }

    /// `None` when the series is too short or the model cannot be fitted.
    pub fn forecast(&self, series: &Series, horizon: &Horizon) -> Option<Forecast> {
        match self.try_forecast(series, horizon) {
            Ok(forecast) => Some(forecast),
            Err(e) => {
                debug!("No forecast for horizon '{}': {}", horizon.label, e);
                None
            }
        }
    }

    pub fn try_forecast(&self, series: &Series, horizon: &Horizon) -> Result<Forecast> {
        self.forecast_periods(series, horizon.period_count)
    }

    /// Forecasts `periods` future periods at the series' own frequency.
    pub fn forecast_periods(&self, series: &Series, periods: usize) -> Result<Forecast> {
        if series.observed_periods() < self.min_periods {
            return Err(ForecastError::InsufficientData {
                observed: series.observed_periods(),
                required: self.min_periods,
            });
        }

        let (last, _) = series.last().ok_or(ForecastError::InsufficientData {
            observed: 0,
            required: self.min_periods,
        })?;

        let trained = self.model.fit(series)?;
        let dates = future_periods(last, series.frequency(), periods)?;
        let prediction = trained.predict(&dates)?;

        if prediction.point.len() != periods
            || prediction.lower.len() != periods
            || prediction.upper.len() != periods
        {
            return Err(ForecastError::FitFailure(format!(
                "{} returned {} points for {} periods",
                self.model.name(),
                prediction.point.len(),
                periods
            )));
        }

        let all_finite = prediction
            .point
            .iter()
            .chain(prediction.lower.iter())
            .chain(prediction.upper.iter())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(ForecastError::FitFailure(format!(
                "{} produced non-finite predictions",
                self.model.name()
            )));
        }

        let lower = prediction
            .lower
            .iter()
            .zip(prediction.point.iter())
            .map(|(l, p)| l.min(*p))
            .collect();
        let upper = prediction
            .upper
            .iter()
            .zip(prediction.point.iter())
            .map(|(u, p)| u.max(*p))
            .collect();

        Ok(Forecast {
            dates,
            point: prediction.point,
            lower,
            upper,
        })
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Solves `(XᵀX + diag(penalties)) β = Xᵀy` by Cholesky decomposition.
fn ridge_solve(rows: &[Vec<f64>], y: &[f64], penalties: &[f64]) -> Option<Vec<f64>> {
    let p = penalties.len();
    let mut a = vec![vec![0.0; p]; p];
    let mut b = vec![0.0; p];

    for (row, target) in rows.iter().zip(y.iter()) {
        for i in 0..p {
            b[i] += row[i] * target;
            for j in 0..=i {
                a[i][j] += row[i] * row[j];
            }
        }
    }
    for (i, penalty) in penalties.iter().enumerate() {
        a[i][i] += penalty;
    }

    // Lower-triangular factor, in place
    for j in 0..p {
        let mut diag = a[j][j];
        for k in 0..j {
            diag -= a[j][k] * a[j][k];
        }
        if !(diag > 1e-12) {
            return None;
        }
        let diag = diag.sqrt();
        a[j][j] = diag;
        for i in (j + 1)..p {
            let mut value = a[i][j];
            for k in 0..j {
                value -= a[i][k] * a[j][k];
            }
            a[i][j] = value / diag;
        }
    }

    let mut z = vec![0.0; p];
    for i in 0..p {
        let mut value = b[i];
        for k in 0..i {
            value -= a[i][k] * z[k];
        }
        z[i] = value / a[i][i];
    }

    let mut beta = vec![0.0; p];
    for i in (0..p).rev() {
        let mut value = z[i];
        for k in (i + 1)..p {
            value -= a[k][i] * beta[k];
        }
        beta[i] = value / a[i][i];
    }

    Some(beta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Frequency;
    use chrono::Datelike;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn monthly(values: &[f64]) -> Series {
        Series::from_points(
            Frequency::Month,
            values.iter().enumerate().map(|(i, v)| {
                let date = d(2023, 1, 1)
                    .checked_add_months(chrono::Months::new(i as u32))
                    .unwrap();
                (date, *v)
            }),
        )
    }

    fn forecaster() -> Forecaster {
        Forecaster::from_settings(&ForecastSettings::default())
    }

    #[test]
    fn test_flat_series_gives_flat_forecast() {
        let series = monthly(&[1000.0; 10]);
        let horizon = Horizon::new("4 Months", 4, Frequency::Month);
        let forecast = forecaster().forecast(&series, &horizon).unwrap();

        assert_eq!(forecast.len(), 4);
        assert_eq!(forecast.dates[0], d(2023, 11, 1));
        assert_eq!(forecast.dates[3], d(2024, 2, 1));
        for (_, point, lower, upper) in forecast.rows() {
            assert!((point - 1000.0).abs() <= 50.0, "point {} not near 1000", point);
            assert!(lower <= point && point <= upper);
        }
    }

    #[test]
    fn test_linear_trend_is_extrapolated() {
        let values: Vec<f64> = (1..=12).map(|i| 100.0 * i as f64).collect();
        let series = monthly(&values);
        let forecast = forecaster()
            .forecast(&series, &Horizon::new("2 Months", 2, Frequency::Month))
            .unwrap();

        assert!((forecast.point[0] - 1300.0).abs() / 1300.0 < 0.03);
        assert!(forecast.point[1] > forecast.point[0]);
    }

    #[test]
    fn test_short_series_is_skipped() {
        let series = monthly(&[10.0, 20.0]);
        let horizon = Horizon::new("4 Months", 4, Frequency::Month);
        assert!(forecaster().forecast(&series, &horizon).is_none());
        assert!(matches!(
            forecaster().try_forecast(&series, &horizon),
            Err(ForecastError::InsufficientData {
                observed: 2,
                required: 3
            })
        ));
    }

    #[test]
    fn test_non_finite_series_is_a_fit_failure() {
        let series = monthly(&[10.0, f64::NAN, 30.0, 40.0]);
        let horizon = Horizon::new("2 Months", 2, Frequency::Month);
        assert!(matches!(
            forecaster().try_forecast(&series, &horizon),
            Err(ForecastError::FitFailure(_))
        ));
    }

    #[test]
    fn test_noisy_daily_series_respects_band_invariant() {
        let values: Vec<(NaiveDate, f64)> = (0..60)
            .map(|i| {
                let date = d(2024, 1, 1) + chrono::Days::new(i);
                let weekend = matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun);
                let base = if weekend { 80.0 } else { 40.0 };
                (date, base + (i % 5) as f64 * 3.0)
            })
            .collect();
        let series = Series::from_points(Frequency::Day, values);

        for horizon in Horizon::standard()
            .into_iter()
            .filter(|h| h.frequency == Frequency::Day)
        {
            let forecast = forecaster().forecast(&series, &horizon).unwrap();
            assert_eq!(forecast.len(), horizon.period_count);
            assert_eq!(forecast.dates[0], d(2024, 3, 1));
            for (_, point, lower, upper) in forecast.rows() {
                assert!(lower <= point && point <= upper);
                assert!(upper > lower, "noisy series should have a non-degenerate band");
            }
        }
    }

    #[test]
    fn test_forecast_is_deterministic() {
        let series = monthly(&[120.0, 80.0, 150.0, 90.0, 130.0, 110.0]);
        let horizon = Horizon::new("4 Months", 4, Frequency::Month);
        let a = forecaster().forecast(&series, &horizon).unwrap();
        let b = forecaster().forecast(&series, &horizon).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_holt_linear_substitutes_behind_same_contract() {
        let settings = ForecastSettings::default();
        let holt = Forecaster::new(HoltLinearModel::from_settings(&settings), settings.min_periods);
        let values: Vec<f64> = (1..=8).map(|i| 50.0 + 10.0 * i as f64).collect();
        let forecast = holt
            .forecast(&monthly(&values), &Horizon::new("4 Months", 4, Frequency::Month))
            .unwrap();

        assert_eq!(forecast.len(), 4);
        assert!((forecast.point[0] - 140.0).abs() < 1.0);
        for (_, point, lower, upper) in forecast.rows() {
            assert!(lower <= point && point <= upper);
        }
    }

    #[test]
    fn test_holt_rejects_bad_parameters() {
        let settings = ForecastSettings::default();
        assert!(HoltLinearModel::new(1.5, 0.2, &settings).is_err());
        assert!(HoltLinearModel::new(0.5, 0.0, &settings).is_err());
    }

    #[test]
    fn test_band_quantiles() {
        let sim = BandSimulator {
            interval_width: 0.8,
            samples: 4000,
            seed: 7,
        };
        let (lower, upper) = sim.simulate(&[100.0], &[0.0], 0.0, &[10.0]).unwrap();
        // 80% central interval of N(100, 10) is roughly 100 ± 12.8
        assert!((lower[0] - 87.2).abs() < 1.5, "lower {}", lower[0]);
        assert!((upper[0] - 112.8).abs() < 1.5, "upper {}", upper[0]);
    }

    #[test]
    fn test_ridge_solve_exact_line() {
        let rows = vec![vec![1.0, 0.0], vec![1.0, 1.0], vec![1.0, 2.0]];
        let y = vec![1.0, 3.0, 5.0];
        let beta = ridge_solve(&rows, &y, &[0.0, 0.0]).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-9);
        assert!((beta[1] - 2.0).abs() < 1e-9);
    }
}
