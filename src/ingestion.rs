use crate::error::{ForecastError, Result};
use crate::schema::{Transaction, TransactionType};
use crate::utils::{parse_ledger_date, title_case};
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;

pub const REQUIRED_COLUMNS: [&str; 4] = ["date", "amount", "type", "category"];

/// One ledger row as it arrives from a database export or CSV, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTransaction {
    pub date: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub account: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub is_recurring: Option<String>,
    pub interval: Option<String>,
}

impl RawTransaction {
    pub fn new(date: &str, amount: &str, kind: &str, category: &str) -> Self {
        Self {
            date: Some(date.to_string()),
            amount: Some(amount.to_string()),
            kind: Some(kind.to_string()),
            category: Some(category.to_string()),
            ..Default::default()
        }
    }

    fn present_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        [
            ("date", self.date.is_some()),
            ("title", self.title.is_some()),
            ("category", self.category.is_some()),
            ("account", self.account.is_some()),
            ("amount", self.amount.is_some()),
            ("currency", self.currency.is_some()),
            ("type", self.kind.is_some()),
            ("is_recurring", self.is_recurring.is_some()),
            ("interval", self.interval.is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| *present)
        .map(|(name, _)| name)
    }
}

/// Untyped input collection together with the columns it carries.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub columns: BTreeSet<String>,
    pub records: Vec<RawTransaction>,
    /// CSV rows that could not be decoded at all, e.g. invalid UTF-8.
    pub malformed: usize,
}

impl RecordSet {
    /// Reads a CSV export. Header names are matched case-insensitively.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| ForecastError::InputUnreadable(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect::<Vec<_>>();
        rdr.set_headers(csv::StringRecord::from(headers.clone()));

        let mut records = Vec::new();
        let mut malformed = 0;
        for row in rdr.deserialize::<RawTransaction>() {
            match row {
                Ok(record) => records.push(record),
                Err(e) if e.is_io_error() => {
                    return Err(ForecastError::InputUnreadable(e.to_string()));
                }
                Err(e) => {
                    debug!("Dropping malformed CSV row: {}", e);
                    malformed += 1;
                }
            }
        }

        Ok(Self {
            columns: headers.into_iter().collect(),
            records,
            malformed,
        })
    }

    pub fn from_csv_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            ForecastError::InputUnreadable(format!("{}: {}", path.display(), e))
        })?;
        Self::from_csv_reader(file)
    }

    /// Builds a record set from in-memory rows; a column counts as present when
    /// at least one row carries it.
    pub fn from_records(records: impl IntoIterator<Item = RawTransaction>) -> Self {
        let records: Vec<RawTransaction> = records.into_iter().collect();
        let columns = records
            .iter()
            .flat_map(|r| r.present_columns())
            .map(str::to_string)
            .collect();
        Self {
            columns,
            records,
            malformed: 0,
        }
    }

    pub fn missing_columns(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !self.columns.contains(*c))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionStats {
    pub total_rows: usize,
    pub accepted: usize,
    pub dropped_date: usize,
    pub dropped_amount: usize,
    pub dropped_type: usize,
    pub dropped_category: usize,
    pub dropped_malformed: usize,
}

impl IngestionStats {
    pub fn dropped(&self) -> usize {
        self.dropped_date
            + self.dropped_amount
            + self.dropped_type
            + self.dropped_category
            + self.dropped_malformed
    }
}

#[derive(Debug, Clone)]
pub struct Ingested {
    pub transactions: Vec<Transaction>,
    pub stats: IngestionStats,
}

impl Ingested {
    pub fn count(&self, kind: TransactionType) -> usize {
        self.transactions.iter().filter(|t| t.kind == kind).count()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.transactions.iter().map(|t| t.date).min()?;
        let max = self.transactions.iter().map(|t| t.date).max()?;
        Some((min, max))
    }
}

/// Validates and normalizes a record set. Missing required columns fail the
/// whole run; individual rows that cannot be parsed are dropped and counted.
pub fn ingest(records: &RecordSet) -> Result<Ingested> {
    if let Some(missing) = records.missing_columns().first() {
        return Err(ForecastError::MissingColumn(missing.to_string()));
    }

    let mut stats = IngestionStats {
        total_rows: records.records.len() + records.malformed,
        dropped_malformed: records.malformed,
        ..Default::default()
    };
    let mut transactions = Vec::with_capacity(records.records.len());

    for raw in &records.records {
        match parse_record(raw) {
            Ok(tx) => transactions.push(tx),
            Err(Rejection::Date) => stats.dropped_date += 1,
            Err(Rejection::Amount) => stats.dropped_amount += 1,
            Err(Rejection::Type) => stats.dropped_type += 1,
            Err(Rejection::Category) => stats.dropped_category += 1,
        }
    }

    stats.accepted = transactions.len();
    info!(
        "Ingested {} of {} transactions ({} dropped)",
        stats.accepted,
        stats.total_rows,
        stats.dropped()
    );
    if stats.dropped() > 0 {
        debug!("Dropped rows by reason: {:?}", stats);
    }

    Ok(Ingested {
        transactions,
        stats,
    })
}

enum Rejection {
    Date,
    Amount,
    Type,
    Category,
}

fn parse_record(raw: &RawTransaction) -> std::result::Result<Transaction, Rejection> {
    let date = raw
        .date
        .as_deref()
        .and_then(parse_ledger_date)
        .ok_or(Rejection::Date)?;

    let amount = raw
        .amount
        .as_deref()
        .and_then(|a| a.trim().parse::<f64>().ok())
        .filter(|a| a.is_finite() && *a >= 0.0)
        .ok_or(Rejection::Amount)?;

    let kind = raw
        .kind
        .as_deref()
        .and_then(TransactionType::parse)
        .ok_or(Rejection::Type)?;

    let category = raw
        .category
        .as_deref()
        .map(title_case)
        .filter(|c| !c.is_empty())
        .ok_or(Rejection::Category)?;

    Ok(Transaction {
        date,
        amount,
        kind,
        category,
        title: non_empty(raw.title.as_deref()).map(title_case),
        account: non_empty(raw.account.as_deref()).map(str::to_string),
        currency: non_empty(raw.currency.as_deref()).map(|c| c.to_uppercase()),
        is_recurring: raw.is_recurring.as_deref().map(parse_flag).unwrap_or(false),
        interval: non_empty(raw.interval.as_deref()).map(|i| i.to_lowercase()),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_flag(raw: &str) -> bool {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => true,
        other => other.parse::<f64>().map(|v| v != 0.0).unwrap_or(false),
    }
}

/// Multiplies every amount by `rate`. Applied once, before aggregation.
pub fn convert_amounts(transactions: &mut [Transaction], rate: f64) {
    if rate == 1.0 {
        return;
    }
    for tx in transactions.iter_mut() {
        tx.amount *= rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_is_fatal() {
        let csv = "date,amount,category\n2024-01-01,10,Food\n";
        let records = RecordSet::from_csv_reader(csv.as_bytes()).unwrap();
        match ingest(&records) {
            Err(ForecastError::MissingColumn(column)) => assert_eq!(column, "type"),
            other => panic!("expected MissingColumn, got {:?}", other.map(|i| i.stats)),
        }
    }

    #[test]
    fn test_unparsable_rows_are_dropped() {
        let csv = "\
Date,Title,Category,Amount,Type
2024-01-05,lunch,food,12.50,expense
bad-date,lunch,food,12.50,expense
2024-01-06,lunch,food,abc,expense
2024-01-07,move,savings,100,transfer
2024-01-08,lunch,  ,5,expense
2024-01-09,salary,salary,3000,INCOME
";
        let records = RecordSet::from_csv_reader(csv.as_bytes()).unwrap();
        let ingested = ingest(&records).unwrap();

        assert_eq!(ingested.stats.total_rows, 6);
        assert_eq!(ingested.stats.accepted, 2);
        assert_eq!(ingested.stats.dropped_date, 1);
        assert_eq!(ingested.stats.dropped_amount, 1);
        assert_eq!(ingested.stats.dropped_type, 1);
        assert_eq!(ingested.stats.dropped_category, 1);

        let lunch = &ingested.transactions[0];
        assert_eq!(lunch.category, "Food");
        assert_eq!(lunch.title.as_deref(), Some("Lunch"));
        assert_eq!(lunch.kind, TransactionType::Expense);
        assert_eq!(ingested.count(TransactionType::Income), 1);
    }

    #[test]
    fn test_malformed_row_is_dropped_not_fatal() {
        let mut csv = b"date,title,amount,type,category\n2024-01-01,Lunch,5,expense,food\n".to_vec();
        csv.extend_from_slice(b"2024-01-02,caf\xe9,6,expense,food\n");
        csv.extend_from_slice(b"2024-01-03,Tea,7,expense,food\n");

        let records = RecordSet::from_csv_reader(csv.as_slice()).unwrap();
        assert_eq!(records.records.len(), 2);
        assert_eq!(records.malformed, 1);

        let ingested = ingest(&records).unwrap();
        assert_eq!(ingested.stats.total_rows, 3);
        assert_eq!(ingested.stats.accepted, 2);
        assert_eq!(ingested.stats.dropped_malformed, 1);
        assert_eq!(ingested.stats.dropped(), 1);
    }

    #[test]
    fn test_from_records_infers_columns() {
        let set = RecordSet::from_records(vec![RawTransaction::new(
            "2024-01-01",
            "10",
            "expense",
            "food",
        )]);
        assert!(set.missing_columns().is_empty());

        let partial = RecordSet::from_records(vec![RawTransaction {
            date: Some("2024-01-01".to_string()),
            amount: Some("10".to_string()),
            ..Default::default()
        }]);
        assert_eq!(partial.missing_columns(), vec!["type", "category"]);
    }

    #[test]
    fn test_recurring_flag_and_negative_amount() {
        let mut recurring = RawTransaction::new("2024-01-01", "50", "expense", "rent");
        recurring.is_recurring = Some("1".to_string());
        let negative = RawTransaction::new("2024-01-01", "-5", "expense", "rent");

        let ingested = ingest(&RecordSet::from_records(vec![recurring, negative])).unwrap();
        assert_eq!(ingested.transactions.len(), 1);
        assert!(ingested.transactions[0].is_recurring);
        assert_eq!(ingested.stats.dropped_amount, 1);
    }

    #[test]
    fn test_convert_amounts() {
        let set = RecordSet::from_records(vec![RawTransaction::new(
            "2024-01-01",
            "100",
            "income",
            "salary",
        )]);
        let mut ingested = ingest(&set).unwrap();
        convert_amounts(&mut ingested.transactions, 0.25);
        assert!((ingested.transactions[0].amount - 25.0).abs() < 1e-9);
    }
}
