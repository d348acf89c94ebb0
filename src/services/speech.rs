// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Synthesized-speech retrieval.
//!
//! Reply audio is referenced by URL; this module streams it into memory so
//! the playback scheduler can hand a complete payload to the audio sink.

use futures_util::StreamExt;

use crate::services::{ResponderError, SpeechSource};

/// Streams synthesized speech audio referenced by a [`SpeechSource`].
#[derive(Debug, Clone, Default)]
pub struct SpeechFetcher {
    http: reqwest::Client,
}

impl SpeechFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Materialize a speech source into audio bytes.
    ///
    /// URL sources are streamed chunk by chunk rather than buffered by the
    /// HTTP client in one piece.
    pub async fn fetch(&self, source: SpeechSource) -> Result<Vec<u8>, ResponderError> {
        match source {
            SpeechSource::Bytes(bytes) => Ok(bytes),
            SpeechSource::Url(url) => {
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| ResponderError::Synthesis(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(ResponderError::Synthesis(format!(
                        "speech fetch returned status {status}"
                    )));
                }

                let mut audio = Vec::new();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| ResponderError::Synthesis(e.to_string()))?;
                    audio.extend_from_slice(&chunk);
                }
                tracing::debug!(bytes = audio.len(), "fetched synthesized speech");
                Ok(audio)
            }
        }
    }
}
