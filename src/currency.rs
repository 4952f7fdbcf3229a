use crate::error::{ForecastError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SUPPORTED_CURRENCIES: [&str; 30] = [
    "MYR", "USD", "EUR", "JPY", "GBP", "AUD", "CAD", "CHF", "CNY", "SEK", "NZD", "KRW", "SGD",
    "NOK", "MXN", "BRL", "ZAR", "RUB", "TRY", "AED", "INR", "PHP", "IDR", "THB", "VND", "PKR",
    "BDT", "LKR", "MMK", "EGP",
];

pub fn is_supported(code: &str) -> bool {
    SUPPORTED_CURRENCIES.contains(&code)
}

/// Display symbol for a currency code; unknown codes render as the code itself.
pub fn currency_symbol(code: &str) -> String {
    let symbol = match code {
        "MYR" => "RM",
        "USD" | "MXN" => "$",
        "EUR" => "€",
        "GBP" => "£",
        "JPY" | "CNY" => "¥",
        "INR" => "₹",
        "SGD" => "S$",
        "AUD" => "A$",
        "CAD" => "C$",
        "CHF" => "Fr",
        "KRW" => "₩",
        "AED" => "د.إ",
        "THB" => "฿",
        "IDR" => "Rp",
        "PHP" => "₱",
        "ZAR" => "R",
        "BRL" => "R$",
        "TRY" => "₺",
        "SEK" | "NOK" => "kr",
        "NZD" => "NZ$",
        other => return other.to_string(),
    };
    symbol.to_string()
}

/// Source of exchange rates: `1 base = rate target`.
pub trait RateLookup {
    fn rate(&self, base: &str, target: &str) -> Result<f64>;
}

impl<F> RateLookup for F
where
    F: Fn(&str, &str) -> Result<f64>,
{
    fn rate(&self, base: &str, target: &str) -> Result<f64> {
        self(base, target)
    }
}

/// In-memory rate table keyed by `(base, target)`.
#[derive(Debug, Clone, Default)]
pub struct FixedRates {
    rates: HashMap<(String, String), f64>,
}

impl FixedRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, base: &str, target: &str, rate: f64) -> Self {
        self.rates
            .insert((base.to_uppercase(), target.to_uppercase()), rate);
        self
    }
}

impl RateLookup for FixedRates {
    fn rate(&self, base: &str, target: &str) -> Result<f64> {
        self.rates
            .get(&(base.to_uppercase(), target.to_uppercase()))
            .copied()
            .ok_or_else(|| {
                ForecastError::ExternalService(format!("No rate configured for {base}->{target}"))
            })
    }
}

/// The currency the pipeline reports in, and how it got there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyContext {
    pub base: String,
    pub target: String,
    pub rate: f64,
    /// Set when the rate is the identity fallback rather than a looked-up value.
    pub fallback_warning: Option<String>,
}

impl CurrencyContext {
    pub fn identity(base: &str) -> Self {
        Self {
            base: base.to_string(),
            target: base.to_string(),
            rate: 1.0,
            fallback_warning: None,
        }
    }

    /// Resolves the conversion rate. A failed or nonsensical lookup degrades to
    /// 1.0 and records a warning; it never fails the run.
    pub fn resolve(base: &str, target: &str, lookup: &dyn RateLookup) -> Self {
        let base = base.trim().to_uppercase();
        let requested = target.trim().to_uppercase();

        if !is_supported(&requested) {
            let message = format!(
                "Currency '{}' is not supported; reporting in {} instead",
                requested, base
            );
            warn!("{}", message);
            return Self {
                fallback_warning: Some(message),
                ..Self::identity(&base)
            };
        }

        if base == requested {
            return Self::identity(&base);
        }

        match lookup.rate(&base, &requested) {
            Ok(rate) if rate.is_finite() && rate > 0.0 => {
                info!("Applied exchange rate: 1 {} = {:.4} {}", base, rate, requested);
                Self {
                    base,
                    target: requested,
                    rate,
                    fallback_warning: None,
                }
            }
            Ok(rate) => Self::fallback(base, requested, format!("lookup returned rate {rate}")),
            Err(e) => Self::fallback(base, requested, e.to_string()),
        }
    }

    fn fallback(base: String, target: String, reason: String) -> Self {
        let message = format!(
            "Exchange rate {}->{} unavailable ({}); using fallback rate 1.0",
            base, target, reason
        );
        warn!("{}", message);
        Self {
            base,
            target,
            rate: 1.0,
            fallback_warning: Some(message),
        }
    }

    pub fn is_converted(&self) -> bool {
        self.base != self.target
    }

    pub fn symbol(&self) -> String {
        currency_symbol(&self.target)
    }
}

#[cfg(feature = "live-rates")]
pub use live::ExchangeRateApi;

#[cfg(feature = "live-rates")]
mod live {
    use super::RateLookup;
    use crate::error::{ForecastError, Result};
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::time::Duration;

    const EXCHANGE_RATE_BASE_URL: &str = "https://api.exchangerate-api.com/v4/latest";

    #[derive(Deserialize)]
    struct LatestRates {
        rates: HashMap<String, f64>,
    }

    /// Blocking client for the public exchangerate-api.com endpoint.
    #[derive(Clone)]
    pub struct ExchangeRateApi {
        client: reqwest::blocking::Client,
        base_url: String,
    }

    impl ExchangeRateApi {
        pub fn new() -> Result<Self> {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?;
            Ok(Self {
                client,
                base_url: EXCHANGE_RATE_BASE_URL.to_string(),
            })
        }

        pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
            self.base_url = base_url.into();
            self
        }
    }

    impl RateLookup for ExchangeRateApi {
        fn rate(&self, base: &str, target: &str) -> Result<f64> {
            let url = format!("{}/{}", self.base_url, base);
            let response = self.client.get(&url).send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(ForecastError::ExternalService(format!(
                    "rate request failed with status {}",
                    status
                )));
            }

            let body: LatestRates = response.json()?;
            body.rates.get(target).copied().ok_or_else(|| {
                ForecastError::ExternalService(format!("no rate for {} in response", target))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_currency_skips_lookup() {
        let lookup = |_: &str, _: &str| -> Result<f64> { panic!("lookup must not be called") };
        let ctx = CurrencyContext::resolve("MYR", "myr", &lookup);
        assert_eq!(ctx.rate, 1.0);
        assert!(ctx.fallback_warning.is_none());
        assert!(!ctx.is_converted());
    }

    #[test]
    fn test_failed_lookup_falls_back_with_warning() {
        let lookup = |_: &str, _: &str| -> Result<f64> {
            Err(ForecastError::ExternalService("network unreachable".to_string()))
        };
        let ctx = CurrencyContext::resolve("MYR", "USD", &lookup);
        assert_eq!(ctx.rate, 1.0);
        assert_eq!(ctx.target, "USD");
        let warning = ctx.fallback_warning.expect("fallback must be surfaced");
        assert!(warning.contains("network unreachable"));
    }

    #[test]
    fn test_fixed_rates() {
        let rates = FixedRates::new().with_rate("MYR", "USD", 0.21);
        let ctx = CurrencyContext::resolve("MYR", "USD", &rates);
        assert!((ctx.rate - 0.21).abs() < 1e-12);
        assert!(ctx.fallback_warning.is_none());
        assert_eq!(ctx.symbol(), "$");
    }

    #[test]
    fn test_non_positive_rate_is_rejected() {
        let rates = FixedRates::new().with_rate("MYR", "EUR", 0.0);
        let ctx = CurrencyContext::resolve("MYR", "EUR", &rates);
        assert_eq!(ctx.rate, 1.0);
        assert!(ctx.fallback_warning.is_some());
    }

    #[test]
    fn test_unsupported_currency_reports_in_base() {
        let rates = FixedRates::new();
        let ctx = CurrencyContext::resolve("MYR", "XYZ", &rates);
        assert_eq!(ctx.target, "MYR");
        assert_eq!(ctx.rate, 1.0);
        assert!(ctx.fallback_warning.is_some());
    }

    #[test]
    fn test_currency_symbol() {
        assert_eq!(currency_symbol("MYR"), "RM");
        assert_eq!(currency_symbol("VND"), "VND");
    }
}
