//! CSV tables and the markdown summary built from a pipeline run.

use crate::aggregator::TOTAL_INCOME;
use crate::error::{ForecastError, Result};
use crate::insight::{ForecastSummary, Insight};
use crate::scheduler::ForecastResult;
use crate::schema::{Frequency, TransactionType};
use crate::utils::{format_period, round_to, safe_file_component};
use crate::PipelineOutput;
use chrono::NaiveDateTime;
use log::{debug, info};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvTable {
    pub file_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    fn new(file_name: String, headers: &[&str]) -> Self {
        Self {
            file_name,
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ForecastError::IoError(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| {
            ForecastError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifacts {
    pub tables: Vec<CsvTable>,
    pub markdown_name: String,
    pub markdown: String,
    /// `(file name, contents)` of the serialized run, when requested.
    pub json: Option<(String, String)>,
}

impl ReportArtifacts {
    pub fn table(&self, file_name: &str) -> Option<&CsvTable> {
        self.tables.iter().find(|t| t.file_name == file_name)
    }

    /// Writes every artifact into `dir`, replacing files from earlier runs.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| ForecastError::Output {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::with_capacity(self.tables.len() + 2);
        for table in &self.tables {
            written.push(write_file(dir, &table.file_name, &table.to_csv_string()?)?);
        }
        written.push(write_file(dir, &self.markdown_name, &self.markdown)?);
        if let Some((name, contents)) = &self.json {
            written.push(write_file(dir, name, contents)?);
        }

        info!("Wrote {} report artifacts to {}", written.len(), dir.display());
        Ok(written)
    }
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents).map_err(|source| ForecastError::Output {
        path: path.clone(),
        source,
    })?;
    debug!("Wrote {}", path.display());
    Ok(path)
}

#[derive(Debug, Clone, Default)]
pub struct ReportAssembler {
    generated_at: Option<NaiveDateTime>,
    notes: Vec<String>,
    include_json: bool,
}

impl ReportAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps the markdown report. Without it, identical runs render identically.
    pub fn with_generated_at(mut self, generated_at: NaiveDateTime) -> Self {
        self.generated_at = Some(generated_at);
        self
    }

    /// Appends a line to the report's notes section, e.g. a downstream prediction.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_json(mut self, include_json: bool) -> Self {
        self.include_json = include_json;
        self
    }

    pub fn assemble(&self, output: &PipelineOutput) -> Result<ReportArtifacts> {
        let suffix = if output.currency.is_converted() {
            format!("_{}", output.currency.target)
        } else {
            String::new()
        };

        let mut tables = Vec::new();
        for horizon in &output.config.horizons {
            let label = safe_file_component(&horizon.label);
            for kind in TransactionType::ALL {
                let results: Vec<&ForecastResult> =
                    output.run.results_for(&horizon.label, kind).collect();
                tables.extend(horizon_tables(&label, kind, &results, &suffix));
            }
        }

        let net_months = output.config.net_balance_months;
        let mut net = CsvTable::new(
            format!("NET_BALANCE_{}_MONTHS{}.csv", net_months, suffix),
            &["Month", "Predicted_Net"],
        );
        if let Some(forecast) = output.run.net_balance.as_ref().map(|n| &n.forecast) {
            for (date, point, _, _) in forecast.rows() {
                net.rows
                    .push(vec![format_period(date, Frequency::Month), amount(point)]);
            }
        }
        tables.push(net);

        let markdown = self.markdown(output);
        let json = if self.include_json {
            Some((
                format!("FORECAST_RUN{}.json", suffix),
                serde_json::to_string_pretty(&output.run)?,
            ))
        } else {
            None
        };

        debug!("Assembled {} CSV tables", tables.len());

        Ok(ReportArtifacts {
            tables,
            markdown_name: format!("FULL_FINANCIAL_REPORT_{}.md", output.currency.target),
            markdown,
            json,
        })
    }

    fn markdown(&self, output: &PipelineOutput) -> String {
        let currency = &output.currency;
        let dataset = &output.dataset;
        let mut md = String::new();

        let _ = writeln!(md, "# Full Financial Forecast Report ({})", currency.target);
        if let Some(generated_at) = self.generated_at {
            let _ = writeln!(md, "**Generated:** {}", generated_at.format("%Y-%m-%d %H:%M"));
        }
        let _ = writeln!(
            md,
            "**Base Currency:** {} → **Forecast Currency:** {}",
            currency.base, currency.target
        );
        let _ = writeln!(
            md,
            "**Exchange Rate Used:** 1 {} = {:.4} {}",
            currency.base, currency.rate, currency.target
        );

        let _ = writeln!(md, "\n## Summary");
        let _ = writeln!(md, "- Income entries: {}", thousands(dataset.income_entries));
        let _ = writeln!(md, "- Expense entries: {}", thousands(dataset.expense_entries));
        if dataset.ingestion.dropped() > 0 {
            let _ = writeln!(
                md,
                "- Dropped records: {}",
                thousands(dataset.ingestion.dropped())
            );
        }
        match dataset.date_range {
            Some((start, end)) => {
                let _ = writeln!(md, "- Date range: {} to {}", start, end);
            }
            None => {
                let _ = writeln!(md, "- Date range: no transactions");
            }
        }
        let _ = writeln!(md, "- Forecast currency: **{}**", currency.target);

        let _ = writeln!(md, "\n## Forecasts");
        for horizon in &output.config.horizons {
            let _ = writeln!(md, "- {}", horizon.label);
        }

        let _ = writeln!(md, "\n## Insights");
        for horizon in &output.config.horizons {
            let rows: Vec<String> = TransactionType::ALL
                .iter()
                .flat_map(|kind| output.run.results_for(&horizon.label, *kind))
                .filter_map(|result| {
                    let insight = Insight::for_result(result, &output.config.insight)?;
                    let summary = ForecastSummary::from_result(result);
                    Some(format!(
                        "| {} | {} | {} | {:+.1}% | {} | {} |",
                        result.key.kind,
                        result.key.category,
                        amount(summary.predicted_total),
                        summary.change_pct,
                        insight.trend.phrase(),
                        insight.tier
                    ))
                })
                .collect();

            let _ = writeln!(md, "\n### {}", horizon.label);
            if rows.is_empty() {
                let _ = writeln!(md, "No series could be forecast for this horizon.");
                continue;
            }
            let _ = writeln!(
                md,
                "| Type | Category | Predicted Total | vs Previous Period | Trend | Uncertainty |"
            );
            let _ = writeln!(md, "|:---|:---|---:|---:|:---|:---|");
            for row in rows {
                let _ = writeln!(md, "{}", row);
            }
        }

        let _ = writeln!(md, "\n## {}-Month Net", output.config.net_balance_months);
        match &output.run.net_balance {
            Some(net) => {
                let _ = writeln!(md, "| Month | Predicted_Net |");
                let _ = writeln!(md, "|:---|---:|");
                for (date, point, _, _) in net.forecast.rows() {
                    let _ = writeln!(
                        md,
                        "| {} | {} |",
                        format_period(date, Frequency::Month),
                        amount(point)
                    );
                }
            }
            None => {
                let _ = writeln!(md, "Not enough data");
            }
        }

        let _ = writeln!(md, "\n## Skipped Series");
        if output.run.skipped.is_empty() && output.run.net_balance_skip.is_none() {
            let _ = writeln!(md, "None");
        }
        for skipped in &output.run.skipped {
            let _ = writeln!(md, "- {}: {}", skipped.key, skipped.reason);
        }
        if let Some(reason) = &output.run.net_balance_skip {
            let _ = writeln!(md, "- Net balance: {}", reason);
        }

        if !output.warnings.is_empty() {
            let _ = writeln!(md, "\n## Warnings");
            for warning in &output.warnings {
                let _ = writeln!(md, "- {}", warning);
            }
        }

        if !self.notes.is_empty() {
            let _ = writeln!(md, "\n## Notes");
            for note in &self.notes {
                let _ = writeln!(md, "- {}", note);
            }
        }

        md
    }
}

fn horizon_tables(
    label: &str,
    kind: TransactionType,
    results: &[&ForecastResult],
    suffix: &str,
) -> Vec<CsvTable> {
    let (value_column, group_column, combined_name) = match kind {
        TransactionType::Income => ("Predicted_Income", "Source", "INCOME_BY_SOURCE"),
        TransactionType::Expense => ("Predicted_Spending", "Category", "EXPENSE_BY_CATEGORY"),
    };

    let mut tables = Vec::new();
    let mut combined = CsvTable::new(
        format!("{}_{}{}.csv", label, combined_name, suffix),
        &["Date", group_column, value_column],
    );

    let mut used_names = BTreeSet::new();
    for result in results {
        let rows = result
            .forecast
            .rows()
            .map(|(date, point, _, _)| (format_period(date, result.frequency), amount(point)));

        if result.key.category == TOTAL_INCOME {
            let mut total = CsvTable::new(
                format!("{}_TOTAL_INCOME{}.csv", label, suffix),
                &["Date", value_column],
            );
            total.rows.extend(rows.map(|(date, value)| vec![date, value]));
            tables.push(total);
            continue;
        }

        let mut single = CsvTable::new(
            format!(
                "{}_{}_{}_forecast{}.csv",
                label,
                kind.as_str().to_lowercase(),
                unique_component(&result.key.category, &mut used_names),
                suffix
            ),
            &["Date", value_column],
        );
        for (date, value) in rows {
            combined
                .rows
                .push(vec![date.clone(), result.key.category.clone(), value.clone()]);
            single.rows.push(vec![date, value]);
        }
        tables.push(single);
    }

    if !combined.rows.is_empty() {
        tables.push(combined);
    }
    tables
}

/// File-name component for `category` that no earlier category in the same
/// table set has taken.
fn unique_component(category: &str, used: &mut BTreeSet<String>) -> String {
    let mut base = safe_file_component(category);
    if base.is_empty() {
        base = "category".to_string();
    }

    let mut candidate = base.clone();
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    candidate
}

fn amount(value: f64) -> String {
    let rounded = round_to(value, 2);
    // Avoid rendering "-0.00"
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.2}", rounded)
}

fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
