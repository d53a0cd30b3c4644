//! Quote source backed by the Gemini `generateContent` REST endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::QuoteError;
use crate::fallback::local_quote;
use crate::{Quote, QuoteSource};

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-lite";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const RETRY_DELAY: Duration = Duration::from_millis(400);
const MAX_ATTEMPTS: u32 = 2;

#[derive(Clone)]
pub struct GeminiQuoteSource {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiQuoteSource {
    pub fn new(api_key: impl Into<String>) -> Result<Self, QuoteError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(QuoteError::MissingKey);
        }
        Ok(Self {
            client: Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: BASE_URL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl QuoteSource for GeminiQuoteSource {
    async fn fetch(&self, titles: &[String]) -> Result<Quote, QuoteError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(titles) }] }],
            "generationConfig": {
                "temperature": 0.6,
                "maxOutputTokens": 60,
                "response_mime_type": "application/json"
            }
        });

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .client
                .post(self.endpoint())
                .query(&[("key", self.api_key.as_str())])
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            debug!(%status, attempt, "gemini quote response");

            if status == StatusCode::OK {
                let envelope: Envelope = response
                    .json()
                    .await
                    .map_err(|err| QuoteError::BadResponse(err.to_string()))?;
                let raw = envelope.first_text().ok_or(QuoteError::EmptyResult)?;
                return Ok(parse_quote_payload(&raw).unwrap_or_else(|| {
                    warn!("gemini payload missing text or author, using local quote");
                    local_quote()
                }));
            }

            if attempt < MAX_ATTEMPTS && is_retryable(status) {
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            warn!(%status, "gemini request not retryable, using local quote");
            return Ok(local_quote());
        }
        Ok(local_quote())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn build_prompt(titles: &[String]) -> String {
    let titles: Vec<&str> = titles
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if titles.is_empty() {
        return concat!(
            "Return a JSON object with keys \"text\" and \"author\" for a short (<= 18 words) ",
            "real-world motivational quote by a real person. No emojis.\n",
            "Example:\n",
            "{\"text\":\"Believe you can and you're halfway there.\",\"author\":\"Theodore Roosevelt\"}"
        )
        .to_string();
    }
    format!(
        "The user is working on: {}.\n\
         Return a JSON object with keys \"text\" and \"author\" for a short (<= 18 words) \
         real-world motivational quote by a real person that fits these habits. No emojis.\n\
         Only output JSON, e.g.:\n\
         {{\"text\":\"It always seems impossible until it's done.\",\"author\":\"Nelson Mandela\"}}",
        titles.join(", ")
    )
}

#[derive(Debug, Deserialize)]
struct Envelope {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl Envelope {
    fn first_text(self) -> Option<String> {
        self.candidates?
            .into_iter()
            .next()?
            .content?
            .parts?
            .into_iter()
            .next()?
            .text
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    text: String,
    author: String,
}

/// Decode the model's JSON text into a quote. `None` when malformed or
/// when either field is blank.
fn parse_quote_payload(raw: &str) -> Option<Quote> {
    let payload: Payload = serde_json::from_str(raw.trim()).ok()?;
    let text = sanitize(&payload.text);
    let author = payload.author.trim();
    if text.is_empty() || author.is_empty() {
        return None;
    }
    Some(Quote::new(text, author))
}

fn sanitize(text: &str) -> String {
    let mut s = text.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s = &s[1..s.len() - 1];
    }
    s.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_api_key() {
        assert!(matches!(
            GeminiQuoteSource::new("  "),
            Err(QuoteError::MissingKey)
        ));
    }

    #[test]
    fn endpoint_joins_model_path() {
        let source = GeminiQuoteSource::new("k")
            .unwrap()
            .with_base_url("http://localhost:9/v1beta/");
        assert_eq!(
            source.endpoint(),
            "http://localhost:9/v1beta/models/gemini-2.5-flash-lite:generateContent"
        );
    }

    #[test]
    fn retries_only_rate_limits_and_server_errors() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::FORBIDDEN));
    }

    #[test]
    fn prompt_mentions_trimmed_titles() {
        let prompt = build_prompt(&[" Water ".into(), "".into(), "Read".into()]);
        assert!(prompt.starts_with("The user is working on: Water, Read."));
        assert!(build_prompt(&[]).starts_with("Return a JSON object"));
    }

    #[test]
    fn extracts_text_from_envelope() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"text\":\"x\",\"author\":\"y\"}"}]}}]}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        let quote = parse_quote_payload(&envelope.first_text().unwrap()).unwrap();
        assert_eq!(quote, Quote::new("x", "y"));

        let empty: Envelope = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(empty.first_text().is_none());
    }

    #[test]
    fn sanitizes_wrapped_quotes_and_newlines() {
        let quote = parse_quote_payload(
            r#"{"text":"\"Do it\nnow.\"","author":"  Someone "}"#,
        )
        .unwrap();
        assert_eq!(quote.text, "Do it now.");
        assert_eq!(quote.author, "Someone");
        assert!(parse_quote_payload(r#"{"text":"ok","author":" "}"#).is_none());
        assert!(parse_quote_payload("not json").is_none());
    }
}
