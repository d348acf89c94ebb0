// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Batch HTTP transcription client.
//!
//! Posts a complete canonical-format WAV to a prerecorded-transcription
//! endpoint and extracts the first channel's best transcript. The response
//! is parsed into typed structs; an empty transcript is a valid result and
//! is returned as an empty string rather than an error.

use async_trait::async_trait;
use serde::Deserialize;

use crate::services::{TranscriptionError, TranscriptionService};

// ---------------------------------------------------------------------------
// Response JSON types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Option<BatchResults>,
}

#[derive(Debug, Deserialize)]
struct BatchResults {
    #[serde(default)]
    channels: Vec<BatchChannel>,
}

#[derive(Debug, Deserialize)]
struct BatchChannel {
    #[serde(default)]
    alternatives: Vec<BatchAlternative>,
}

#[derive(Debug, Deserialize)]
struct BatchAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Default transcription endpoint.
const DEFAULT_BASE_URL: &str = "https://api.deepgram.com/v1/listen";

/// Prerecorded-audio transcription over HTTP.
///
/// # Example
///
/// ```rust,no_run
/// use voiceturn::services::transcription::BatchTranscriptionClient;
///
/// let stt = BatchTranscriptionClient::new("dg-api-key").with_model("nova-2");
/// ```
pub struct BatchTranscriptionClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    smart_format: bool,
    base_url: String,
}

impl BatchTranscriptionClient {
    /// Create a client with sensible defaults (model `nova-2`, smart
    /// formatting enabled).
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: "nova-2".to_string(),
            smart_format: true,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Builder method: set the transcription model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method: enable or disable smart formatting.
    pub fn with_smart_format(mut self, smart_format: bool) -> Self {
        self.smart_format = smart_format;
        self
    }

    /// Builder method: override the endpoint URL (e.g. for a proxy or a
    /// local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn extract_transcript(body: BatchResponse) -> Result<String, TranscriptionError> {
        let results = body
            .results
            .ok_or(TranscriptionError::MalformedResponse("results"))?;
        // Absent channels/alternatives means nothing was recognized; that is
        // a valid empty transcript, not a protocol violation.
        let transcript = results
            .channels
            .first()
            .and_then(|ch| ch.alternatives.first())
            .map(|alt| alt.transcript.clone())
            .unwrap_or_default();
        Ok(transcript)
    }
}

#[async_trait]
impl TranscriptionService for BatchTranscriptionClient {
    async fn transcribe(&self, canonical_wav: &[u8]) -> Result<String, TranscriptionError> {
        let response = self
            .http
            .post(&self.base_url)
            .query(&[
                ("model", self.model.as_str()),
                ("smart_format", if self.smart_format { "true" } else { "false" }),
                ("utterances", "true"),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(canonical_wav.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "transcription request rejected");
            return Err(TranscriptionError::Status(status.as_u16()));
        }

        let body: BatchResponse = response
            .json()
            .await
            .map_err(|_| TranscriptionError::MalformedResponse("body"))?;
        Self::extract_transcript(body)
    }
}

impl std::fmt::Debug for BatchTranscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTranscriptionClient")
            .field("model", &self.model)
            .field("smart_format", &self.smart_format)
            .field("base_url", &self.base_url)
            .finish()
    }
}
