use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Fetch failed for {symbol}: {reason}")]
    FetchFailure { symbol: String, reason: String },

    #[error("No price history for {0}")]
    NoData(String),

    #[error("Fetch timed out for {0}")]
    Timeout(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Cache error: {0}")]
    CacheError(String),
}

impl AnalysisError {
    /// Wrap a provider error with the symbol it was raised for
    pub fn fetch(symbol: &str, err: impl std::fmt::Display) -> Self {
        AnalysisError::FetchFailure {
            symbol: symbol.to_string(),
            reason: err.to_string(),
        }
    }
}
