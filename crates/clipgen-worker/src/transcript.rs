//! Transcript acquisition.
//!
//! Audio is hashed, looked up in the transcript cache, and on a miss
//! transcribed window by window. Every failure here degrades to "no
//! transcript": the job carries on without captions or scored moments.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clipgen_media::MediaProber;
use clipgen_models::{Transcript, TranscriptWord};
use clipgen_storage::{content_ref_for_file, TranscriptCache};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

const DEFAULT_WHISPER_URL: &str = "https://api.openai.com";
const DEFAULT_WHISPER_MODEL: &str = "whisper-1";

/// Speech-to-text boundary.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe one audio file with word-level timestamps.
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> WorkerResult<Transcript>;
}

/// Client for an OpenAI-compatible `/v1/audio/transcriptions` endpoint.
pub struct WhisperClient {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    words: Vec<WhisperWord>,
}

#[derive(Debug, Deserialize)]
struct WhisperWord {
    word: String,
    start: f64,
    end: f64,
}

impl WhisperClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: Client::new(),
        }
    }

    /// Build from `WHISPER_API_KEY`, `WHISPER_API_URL` and `WHISPER_MODEL`.
    ///
    /// Returns `None` when no API key is configured.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("WHISPER_API_KEY").ok().filter(|k| !k.is_empty())?;
        let base_url = std::env::var("WHISPER_API_URL").unwrap_or_else(|_| DEFAULT_WHISPER_URL.to_string());
        let model = std::env::var("WHISPER_MODEL").unwrap_or_else(|_| DEFAULT_WHISPER_MODEL.to_string());
        Some(Self::new(api_key, base_url, model))
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/audio/transcriptions", self.base_url)
    }
}

#[async_trait]
impl TranscriptionService for WhisperClient {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> WorkerResult<Transcript> {
        let bytes = audio.len();
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| WorkerError::transcription_failed(format!("Invalid audio part: {}", e)))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word");

        debug!(file = %file_name, bytes, model = %self.model, "Sending audio for transcription");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| WorkerError::service_unavailable(format!("Transcription request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Transcription API returned {}: {}", status, body);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                WorkerError::service_unavailable(message)
            } else {
                WorkerError::transcription_failed(message)
            });
        }

        let parsed: VerboseTranscription = response.json().await.map_err(|e| {
            WorkerError::transcription_failed(format!("Failed to parse transcription response: {}", e))
        })?;

        let words = parsed
            .words
            .into_iter()
            .filter(|w| !w.word.trim().is_empty())
            .map(|w| TranscriptWord::new(w.word.trim(), w.start, w.end))
            .collect();

        Ok(Transcript::new(parsed.text.trim(), words))
    }
}

/// Cache-first, windowed transcript acquisition.
#[derive(Clone)]
pub struct TranscriptAcquirer {
    service: Option<Arc<dyn TranscriptionService>>,
    cache: Option<TranscriptCache>,
    prober: Arc<dyn MediaProber>,
    window_secs: f64,
    window_timeout: Duration,
}

impl TranscriptAcquirer {
    pub fn new(service: Option<Arc<dyn TranscriptionService>>, prober: Arc<dyn MediaProber>) -> Self {
        Self {
            service,
            cache: None,
            prober,
            window_secs: clipgen_media::DEFAULT_WINDOW_SECS,
            window_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_cache(mut self, cache: TranscriptCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_windows(mut self, window_secs: f64, window_timeout: Duration) -> Self {
        self.window_secs = window_secs;
        self.window_timeout = window_timeout;
        self
    }

    /// Whether a transcript can be obtained at all (a service or a cache).
    pub fn is_available(&self) -> bool {
        self.service.is_some() || self.cache.is_some()
    }

    /// Obtain a transcript for `audio`, or `None` if none can be had.
    ///
    /// `scratch_dir` receives the audio windows and is owned by the caller.
    pub async fn acquire(&self, audio: &Path, duration: f64, scratch_dir: &Path) -> Option<Transcript> {
        let content_ref = match content_ref_for_file(audio).await {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(path = %audio.display(), error = %e, "Failed to hash audio, bypassing transcript cache");
                None
            }
        };

        if let (Some(cache), Some(content_ref)) = (&self.cache, &content_ref) {
            if let Some(cached) = cache.load(content_ref).await {
                metrics::record_transcript_cache_hit();
                info!(content_ref = %content_ref, words = cached.words.len(), "Using cached transcript");
                return Some(cached);
            }
        }

        let Some(service) = &self.service else {
            debug!("No transcription service configured");
            return None;
        };

        let transcript = match self.transcribe_windows(service.as_ref(), audio, duration, scratch_dir).await {
            Ok(t) if !t.is_empty() => t,
            Ok(_) => {
                warn!("Transcription returned no text");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Transcription failed, continuing without transcript");
                return None;
            }
        };

        if let (Some(cache), Some(content_ref)) = (&self.cache, &content_ref) {
            if let Err(e) = cache.store(content_ref, &transcript).await {
                warn!(content_ref = %content_ref, error = %e, "Failed to cache transcript");
            }
        }

        Some(transcript)
    }

    async fn transcribe_windows(
        &self,
        service: &dyn TranscriptionService,
        audio: &Path,
        duration: f64,
        scratch_dir: &Path,
    ) -> WorkerResult<Transcript> {
        let windows = self
            .prober
            .split_audio(audio, scratch_dir, self.window_secs, duration)
            .await?;

        let mut stitched = Transcript::default();
        for window in &windows {
            let bytes = tokio::fs::read(&window.path).await?;
            let file_name = window
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "audio.mp3".to_string());

            let part = tokio::time::timeout(self.window_timeout, service.transcribe(bytes, &file_name))
                .await
                .map_err(|_| {
                    WorkerError::transcription_failed(format!(
                        "Window at {:.0}s timed out after {}s",
                        window.offset,
                        self.window_timeout.as_secs()
                    ))
                })??;

            debug!(
                offset = window.offset,
                words = part.words.len(),
                "Transcribed audio window"
            );
            stitched.append_shifted(part, window.offset);
        }

        Ok(stitched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn whisper_client_parses_verbose_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": " Hello big world ",
                "words": [
                    {"word": "Hello", "start": 0.0, "end": 0.4},
                    {"word": " big", "start": 0.5, "end": 0.7},
                    {"word": "world", "start": 0.8, "end": 1.2}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = WhisperClient::new("test-key", server.uri(), "whisper-1");
        let transcript = client.transcribe(vec![1, 2, 3], "window_000.mp3").await.unwrap();

        assert_eq!(transcript.text, "Hello big world");
        assert_eq!(transcript.words.len(), 3);
        assert_eq!(transcript.words[1].text, "big");
    }

    #[tokio::test]
    async fn whisper_client_maps_server_errors_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = WhisperClient::new("k", server.uri(), "whisper-1");
        let err = client.transcribe(vec![0], "a.mp3").await.unwrap_err();
        assert!(matches!(err, WorkerError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn whisper_client_rejects_bad_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad file"))
            .mount(&server)
            .await;

        let client = WhisperClient::new("k", server.uri(), "whisper-1");
        let err = client.transcribe(vec![0], "a.mp3").await.unwrap_err();
        assert!(matches!(err, WorkerError::TranscriptionFailed(_)));
    }
}
