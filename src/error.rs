use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Missing required column '{0}' in transaction input")]
    MissingColumn(String),

    #[error("Insufficient data: {observed} observed periods, at least {required} required")]
    InsufficientData { observed: usize, required: usize },

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Model fit failed: {0}")]
    FitFailure(String),

    #[error("Cannot read transaction input: {0}")]
    InputUnreadable(String),

    #[error("Cannot write output artifact {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "live-rates")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
