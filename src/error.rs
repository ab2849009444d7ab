use thiserror::Error;

/// Why an extraction produced no data
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Alpha Vantage API key is not configured")]
    MissingApiKey,

    #[error("network failure: {0}")]
    Network(String),

    #[error("provider reported an error: {0}")]
    Provider(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no data returned for {0}")]
    Empty(String),
}

impl ExtractError {
    pub fn malformed(message: impl Into<String>) -> Self {
        ExtractError::Malformed(message.into())
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs carry the API key
        let e = e.without_url();
        if e.is_decode() {
            ExtractError::Malformed(e.to_string())
        } else {
            ExtractError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(e: serde_json::Error) -> Self {
        ExtractError::Malformed(e.to_string())
    }
}
