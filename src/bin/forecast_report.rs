use anyhow::Context;
use clap::Parser;
use finance_forecast::{
    CurrencyContext, ForecastConfig, ForecastPipeline, RateLookup, RecordSet, ReportAssembler,
};
use log::{info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "forecast_report",
    version,
    about = "Forecast income and spending from a transaction export and write the report files"
)]
struct Cli {
    /// Transaction CSV with at least date, amount, type and category columns
    #[arg(short = 'i', long = "input", required_unless_present = "print_schema")]
    input: Option<PathBuf>,

    /// Directory the CSV tables and markdown report are written to
    #[arg(short = 'o', long = "output", default_value = "forecast_output")]
    output: PathBuf,

    /// JSON configuration file; defaults apply to anything it leaves out
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Forecast currency (overrides FORECAST_CURRENCY and the config file)
    #[arg(long = "currency")]
    currency: Option<String>,

    /// Worker threads used for model fitting
    #[arg(long = "workers")]
    workers: Option<usize>,

    /// Give up on series not started within this many seconds
    #[arg(long = "timeout-secs")]
    timeout_secs: Option<u64>,

    /// Also write the full run as JSON
    #[arg(long = "json")]
    json: bool,

    /// Stamp the report with the current time
    #[arg(long = "stamp")]
    stamp: bool,

    /// Print the configuration JSON schema and exit
    #[arg(long = "print-schema")]
    print_schema: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.print_schema {
        println!("{}", ForecastConfig::schema_as_json()?);
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => ForecastConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ForecastConfig::default(),
    };

    let env_currency = std::env::var("FORECAST_CURRENCY").ok();
    if let Some(currency) = cli.currency.clone().or(env_currency) {
        config.target_currency = currency.trim().to_uppercase();
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    let input = cli.input.as_ref().context("--input is required")?;
    let records = RecordSet::from_csv_path(input)
        .with_context(|| format!("reading transactions from {}", input.display()))?;

    let rates = rate_source();
    let output = match cli.timeout_secs {
        Some(secs) => ForecastPipeline::run_until(
            &config,
            &records,
            rates.as_ref(),
            Instant::now() + Duration::from_secs(secs),
        )?,
        None => ForecastPipeline::run(&config, &records, rates.as_ref())?,
    };

    info!("Exchange rate: {}", describe(&output.currency));
    for warning in &output.warnings {
        warn!("{}", warning);
    }

    let mut assembler = ReportAssembler::new().with_json(cli.json);
    if cli.stamp {
        assembler = assembler.with_generated_at(chrono::Local::now().naive_local());
    }
    let artifacts = assembler.assemble(&output)?;
    let written = artifacts
        .write_to_dir(&cli.output)
        .with_context(|| format!("writing report to {}", cli.output.display()))?;

    info!(
        "{} series forecast, {} skipped",
        output.run.results.len(),
        output.run.skipped.len()
    );
    println!(
        "Report: {}",
        cli.output.join(&artifacts.markdown_name).display()
    );
    println!("{} files written", written.len());

    Ok(())
}

#[cfg(feature = "live-rates")]
fn rate_source() -> Box<dyn RateLookup> {
    use finance_forecast::{ExchangeRateApi, ForecastError};

    match ExchangeRateApi::new() {
        Ok(api) => Box::new(api),
        Err(e) => {
            warn!("Exchange rate client unavailable: {}", e);
            let reason = e.to_string();
            Box::new(move |_: &str, _: &str| -> finance_forecast::Result<f64> {
                Err(ForecastError::ExternalService(reason.clone()))
            })
        }
    }
}

#[cfg(not(feature = "live-rates"))]
fn rate_source() -> Box<dyn RateLookup> {
    info!("Built without live-rates; conversions fall back to rate 1.0");
    Box::new(finance_forecast::FixedRates::new())
}

fn describe(ctx: &CurrencyContext) -> String {
    format!("1 {} = {:.4} {}", ctx.base, ctx.rate, ctx.target)
}
