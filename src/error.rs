use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Missing required columns in {source_name}: {missing:?}")]
    MissingColumns {
        source_name: String,
        missing: Vec<String>,
    },

    #[error("Invalid configuration for '{field}': {details}")]
    InvalidConfig { field: String, details: String },

    #[error("Invalid aging bucket '{label}': {details}")]
    InvalidAgingBucket { label: String, details: String },

    #[error("Transaction feed is empty after filtering unusable rows")]
    EmptyFeed,

    #[error("Data quality score {score:.2} is below the required minimum {minimum:.2} ({errors} blocking errors)")]
    DataQuality {
        score: f64,
        minimum: f64,
        errors: usize,
    },

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Analysis engine '{0}' terminated unexpectedly")]
    EngineFailure(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Output is not valid UTF-8: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
