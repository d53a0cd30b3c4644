//! Quote of the day: a motivational line tailored to the habits still open
//! today, fetched from a remote model and cached per day.

pub mod error;
pub mod fallback;
pub mod gemini;
pub mod service;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use crate::error::QuoteError;
pub use crate::gemini::GeminiQuoteSource;
pub use crate::service::{QuoteService, QuoteState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    pub author: String,
}

impl Quote {
    pub fn new(text: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
        }
    }
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// A quote suited to `titles`, the habits not yet done today.
    async fn fetch(&self, titles: &[String]) -> Result<Quote, QuoteError>;
}
