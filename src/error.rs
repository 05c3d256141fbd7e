use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebtorsError {
    #[error("Category '{0}' is not allowed")]
    CategoryNotAllowed(String),

    #[error("Credit limit exceeded for {client}: balance {balance} + {amount} > limit {limit}")]
    CreditLimitExceeded {
        client: String,
        balance: Decimal,
        amount: Decimal,
        limit: Decimal,
    },

    #[error("Invalid amount {0}: must not be negative")]
    InvalidAmount(Decimal),

    #[error("Client '{name}' already exists in category {category}")]
    DuplicateClient { name: String, category: String },

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("No debt records found for period {0}")]
    EmptyPeriod(String),

    #[error("Spreadsheet ingestion failed for '{file}': {details}")]
    Ingestion { file: String, details: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Backend request failed (status {status}): {body}")]
    Backend { status: u16, body: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Cannot hydrate: {0} local changes still pending sync")]
    PendingSync(usize),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DebtorsError>;
