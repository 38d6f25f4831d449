use thiserror::Error;

/// Errors raised while talking to the public-data APIs or decoding their payloads.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;

/// Rejected budget parameters for the recommendation query.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecommendError {
    #[error("budget or minBudget and maxBudget are required query parameters.")]
    MissingBudget,

    #[error("invalid budget value: {0}")]
    InvalidBudget(String),

    #[error("minBudget must not be greater than maxBudget.")]
    InvertedRange,
}

/// Why a single upstream record was left out of an import
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has invalid value {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid deal date {year}-{month}-{day}")]
    InvalidDate { year: String, month: String, day: String },
}
