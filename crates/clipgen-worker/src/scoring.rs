//! Transcript chunk scoring.
//!
//! A scorer rates how clip-worthy a span of speech is on a 0-10 scale.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};

pub const MAX_SCORE: f64 = 10.0;

const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Models tried in order until one answers.
const DEFAULT_MODELS: &[&str] = &["gemini-2.5-flash", "gemini-2.5-flash-lite"];

/// Rates a chunk of transcript text.
#[async_trait]
pub trait MomentScorer: Send + Sync {
    /// Score in `0..=10`; higher is more engaging.
    async fn score(&self, text: &str) -> WorkerResult<f64>;
}

/// Gemini API client used as a [`MomentScorer`].
pub struct GeminiScorer {
    api_key: String,
    base_url: String,
    models: Vec<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ScoreReply {
    score: f64,
}

impl GeminiScorer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_GEMINI_URL.to_string(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            client: Client::new(),
        }
    }

    /// Build from `GEMINI_API_KEY`; `None` when unset.
    pub fn from_env() -> Option<Self> {
        std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(Self::new)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    fn build_prompt(&self, text: &str) -> String {
        format!(
            r#"You rate short spans of a video transcript for how well they would
work as a standalone short-form clip: a strong hook, a complete thought,
emotional or surprising content.

Return ONLY a JSON object of the form {{"score": N}} where N is a number
from 0 (useless) to 10 (must clip).

TRANSCRIPT SPAN:
{text}
"#
        )
    }

    async fn call_model(&self, model: &str, prompt: &str) -> WorkerResult<f64> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, model
        );

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::service_unavailable(format!("Gemini API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(WorkerError::scoring_failed(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            WorkerError::scoring_failed(format!("Failed to parse Gemini response: {}", e))
        })?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| WorkerError::scoring_failed("No content in Gemini response"))?;

        parse_score(text)
    }
}

/// Extract the score from a model reply, tolerating code fences and chatter.
pub fn parse_score(reply: &str) -> WorkerResult<f64> {
    let text = reply.trim();
    let text = text.strip_prefix("```json").unwrap_or(text);
    let text = text.strip_prefix("```").unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text).trim();

    let parsed = serde_json::from_str::<ScoreReply>(text).or_else(|_| {
        let object = Regex::new(r"\{[^{}]*\}")
            .ok()
            .and_then(|re| re.find(text).map(|m| m.as_str().to_string()))
            .ok_or_else(|| WorkerError::scoring_failed(format!("No JSON object in reply: {}", text)))?;
        serde_json::from_str::<ScoreReply>(&object)
            .map_err(|e| WorkerError::scoring_failed(format!("Failed to parse score JSON: {}", e)))
    })?;

    if !parsed.score.is_finite() {
        return Err(WorkerError::scoring_failed("Score is not a finite number"));
    }
    Ok(parsed.score.clamp(0.0, MAX_SCORE))
}

#[async_trait]
impl MomentScorer for GeminiScorer {
    async fn score(&self, text: &str) -> WorkerResult<f64> {
        let prompt = self.build_prompt(text);
        let mut last_error = None;

        for model in &self.models {
            match self.call_model(model, &prompt).await {
                Ok(score) => {
                    debug!(model = %model, score, "Scored transcript chunk");
                    return Ok(score);
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "Gemini scoring failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| WorkerError::scoring_failed("No Gemini models configured")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}]
        })
    }

    #[test]
    fn test_parse_score_variants() {
        assert_eq!(parse_score(r#"{"score": 7}"#).unwrap(), 7.0);
        assert_eq!(parse_score("```json\n{\"score\": 8.5}\n```").unwrap(), 8.5);
        assert_eq!(parse_score(r#"Sure! {"score": 3} hope that helps"#).unwrap(), 3.0);
        assert_eq!(parse_score(r#"{"score": 42}"#).unwrap(), 10.0);
        assert_eq!(parse_score(r#"{"score": -1}"#).unwrap(), 0.0);
        assert!(parse_score("no idea").is_err());
    }

    #[tokio::test]
    async fn test_falls_through_to_next_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/first:generateContent"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/second:generateContent"))
            .and(query_param("key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("```json\n{\"score\": 6}\n```")))
            .expect(1)
            .mount(&server)
            .await;

        let scorer = GeminiScorer::new("secret")
            .with_base_url(server.uri())
            .with_models(vec!["first".to_string(), "second".to_string()]);

        assert_eq!(scorer.score("a funny story").await.unwrap(), 6.0);
    }

    #[tokio::test]
    async fn test_all_models_failing_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})))
            .mount(&server)
            .await;

        let scorer = GeminiScorer::new("k")
            .with_base_url(server.uri())
            .with_models(vec!["only".to_string()]);

        assert!(matches!(
            scorer.score("text").await,
            Err(WorkerError::ScoringFailed(_))
        ));
    }
}
