use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("missing Gemini API key")]
    MissingKey,
    #[error("invalid response from quote service: {0}")]
    BadResponse(String),
    #[error("quote service returned an empty result")]
    EmptyResult,
    #[error("quote request failed: {0}")]
    Transport(#[from] reqwest::Error),
}
