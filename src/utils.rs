use crate::error::{ForecastError, Result};
use crate::schema::Frequency;
use chrono::{Datelike, Days, Months, NaiveDate};

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Monday of the ISO week containing `date`.
pub fn iso_week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday() as u64;
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

/// Start of the bucket `date` falls into at the given frequency.
pub fn period_start(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    match frequency {
        Frequency::Day => date,
        Frequency::Week => iso_week_start(date),
        Frequency::Month => first_day_of_month(date),
    }
}

/// Moves a period start forward by `steps` whole periods.
pub fn advance_period(start: NaiveDate, frequency: Frequency, steps: u32) -> Result<NaiveDate> {
    let moved = match frequency {
        Frequency::Day => start.checked_add_days(Days::new(steps as u64)),
        Frequency::Week => start.checked_add_days(Days::new(7 * steps as u64)),
        Frequency::Month => first_day_of_month(start).checked_add_months(Months::new(steps)),
    };

    moved.ok_or_else(|| {
        ForecastError::DateError(format!(
            "Cannot advance {} by {} {:?} periods",
            start, steps, frequency
        ))
    })
}

/// The `count` period starts that follow `last` with no gaps.
pub fn future_periods(last: NaiveDate, frequency: Frequency, count: usize) -> Result<Vec<NaiveDate>> {
    (1..=count as u32)
        .map(|step| advance_period(last, frequency, step))
        .collect()
}

/// Every period start from `start` through `end` inclusive.
pub fn periods_between(start: NaiveDate, end: NaiveDate, frequency: Frequency) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = period_start(start, frequency);

    while current <= end {
        dates.push(current);
        match advance_period(current, frequency, 1) {
            Ok(next) => current = next,
            Err(_) => break,
        }
    }

    dates
}

/// Label used for a period in tables: full date for daily/weekly buckets,
/// `YYYY-MM` for monthly ones.
pub fn format_period(date: NaiveDate, frequency: Frequency) -> String {
    match frequency {
        Frequency::Day | Frequency::Week => date.format("%Y-%m-%d").to_string(),
        Frequency::Month => date.format("%Y-%m").to_string(),
    }
}

/// Trims and title-cases a label: the first letter of every alphabetic run is
/// upper-cased and the rest lower-cased ("food & DRINKS " -> "Food & Drinks").
pub fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut previous_is_alpha = false;

    for c in raw.trim().chars() {
        if c.is_alphabetic() {
            if previous_is_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_is_alpha = true;
        } else {
            out.push(c);
            previous_is_alpha = false;
        }
    }

    out
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// File-name friendly version of a label; keeps alphanumerics, space, `_` and `-`,
/// then turns spaces into underscores.
pub fn safe_file_component(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect::<String>()
        .trim()
        .replace(' ', "_")
}

/// Parses the date formats seen in exported ledgers. Time components are dropped.
pub fn parse_ledger_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_period_start() {
        // 2024-03-14 is a Thursday
        let date = d(2024, 3, 14);
        assert_eq!(period_start(date, Frequency::Day), date);
        assert_eq!(period_start(date, Frequency::Week), d(2024, 3, 11));
        assert_eq!(period_start(date, Frequency::Month), d(2024, 3, 1));

        // Sunday belongs to the week that started the previous Monday
        assert_eq!(period_start(d(2024, 3, 17), Frequency::Week), d(2024, 3, 11));
    }

    #[test]
    fn test_advance_period_month_rollover() {
        assert_eq!(
            advance_period(d(2023, 11, 1), Frequency::Month, 3).unwrap(),
            d(2024, 2, 1)
        );
        assert_eq!(
            advance_period(d(2023, 12, 25), Frequency::Week, 1).unwrap(),
            d(2024, 1, 1)
        );
    }

    #[test]
    fn test_future_periods_are_contiguous() {
        let dates = future_periods(d(2024, 1, 1), Frequency::Month, 4).unwrap();
        assert_eq!(
            dates,
            vec![d(2024, 2, 1), d(2024, 3, 1), d(2024, 4, 1), d(2024, 5, 1)]
        );
    }

    #[test]
    fn test_periods_between() {
        let weeks = periods_between(d(2024, 1, 1), d(2024, 1, 29), Frequency::Week);
        assert_eq!(weeks.len(), 5);
        assert_eq!(weeks[4], d(2024, 1, 29));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("grocery"), "Grocery");
        assert_eq!(title_case("Grocery "), "Grocery");
        assert_eq!(title_case(" GROCERY"), "Grocery");
        assert_eq!(title_case("food & DRINKS"), "Food & Drinks");
        assert_eq!(title_case("e-wallet top up"), "E-Wallet Top Up");
    }

    #[test]
    fn test_format_period() {
        assert_eq!(format_period(d(2024, 5, 6), Frequency::Week), "2024-05-06");
        assert_eq!(format_period(d(2024, 5, 1), Frequency::Month), "2024-05");
    }

    #[test]
    fn test_safe_file_component() {
        assert_eq!(safe_file_component("Food & Drinks"), "Food__Drinks");
        assert_eq!(safe_file_component("4 Months"), "4_Months");
    }

    #[test]
    fn test_parse_ledger_date() {
        assert_eq!(parse_ledger_date("2024-02-29"), Some(d(2024, 2, 29)));
        assert_eq!(parse_ledger_date("2024-02-29 13:45:00"), Some(d(2024, 2, 29)));
        assert_eq!(parse_ledger_date("2024-02-29T13:45:00+08:00"), Some(d(2024, 2, 29)));
        assert_eq!(parse_ledger_date("29/02/2024"), Some(d(2024, 2, 29)));
        assert_eq!(parse_ledger_date("not a date"), None);
        assert_eq!(parse_ledger_date(""), None);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1234.5678, 2), 1234.57);
        assert_eq!(round_to(1234.5, 0), 1235.0);
    }
}
