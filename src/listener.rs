// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-speaker listening tasks.
//!
//! Each tracked speaker gets one listener task that subscribes to their audio,
//! decodes it, assembles fixed-size analysis frames, and runs silence-based
//! utterance segmentation. A finished utterance that clears the minimum speech
//! length is handed to a detached finalization task (canonical WAV encode,
//! transcription, transcript line submission), so tearing the listener down
//! never cancels transcription work already in flight. An utterance still open
//! at teardown is discarded without being transcribed.
//!
//! After each utterance the listener drops its subscription and re-arms with a
//! fresh one, but only while the speaker is still tracked in the session's
//! membership.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::TranscriptLine;
use crate::audio::convert::to_canonical_wav;
use crate::audio::frame_buffer::FrameBuffer;
use crate::audio::vad::state_machine::VadStateMachine;
use crate::audio::vad::UtteranceEvent;
use crate::config::{AudioConfig, VadParams};
use crate::services::{
    AudioCodec, AudioSubscription, EndBehavior, SpeakerInfo, TranscriptionService, VoiceGateway,
};
use crate::session::Membership;

/// Shared dependencies for every listener in a session.
pub struct ListenerContext {
    pub gateway: Arc<dyn VoiceGateway>,
    pub codec: Arc<dyn AudioCodec>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub membership: Arc<Membership>,
    pub line_tx: mpsc::UnboundedSender<TranscriptLine>,
    pub audio: AudioConfig,
    pub vad: VadParams,
}

impl std::fmt::Debug for ListenerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerContext")
            .field("audio", &self.audio)
            .field("vad", &self.vad)
            .finish()
    }
}

/// Handle to one speaker's listener task.
#[derive(Debug)]
pub struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Request teardown. An open utterance is discarded; transcription
    /// already in flight for a finished utterance completes independently.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the listener task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Spawn a listener for one speaker.
pub fn spawn_listener(ctx: Arc<ListenerContext>, speaker: SpeakerInfo) -> ListenerHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(ctx, speaker, cancel.clone()));
    ListenerHandle { cancel, task }
}

async fn run(ctx: Arc<ListenerContext>, speaker: SpeakerInfo, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() || !ctx.membership.is_tracked(&speaker.speaker_id) {
            break;
        }

        let sub = match ctx
            .gateway
            .subscribe(&speaker.speaker_id, EndBehavior::Manual)
            .await
        {
            Ok(sub) => sub,
            Err(err) => {
                tracing::warn!(speaker = %speaker.speaker_id, %err, "subscribe failed");
                break;
            }
        };

        tracing::debug!(speaker = %speaker.speaker_id, "listening");
        if !listen_once(&ctx, &speaker, sub, &cancel).await {
            break;
        }
    }
    tracing::debug!(speaker = %speaker.speaker_id, "listener exited");
}

/// Consume one subscription until an utterance finishes, the stream ends, or
/// the listener is cancelled. Returns `false` on cancellation.
async fn listen_once(
    ctx: &Arc<ListenerContext>,
    speaker: &SpeakerInfo,
    mut sub: AudioSubscription,
    cancel: &CancellationToken,
) -> bool {
    let mut frames = FrameBuffer::new(ctx.audio.frame_size);
    let mut vad = VadStateMachine::new(ctx.vad.clone(), ctx.audio.frame_duration_ms);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Teardown mid-utterance: whatever has accumulated is noise
                // to the session that asked us to stop.
                if vad.accumulated_len() > 0 {
                    tracing::debug!(speaker = %speaker.speaker_id, "open utterance discarded at teardown");
                }
                return false;
            }
            chunk = sub.frames.recv() => chunk,
        };

        let Some(chunk) = chunk else {
            // Gateway closed the stream. A partial utterance has no end event
            // and is discarded; the caller decides whether to re-arm.
            return true;
        };

        let pcm = match ctx.codec.decode(&chunk) {
            Ok(pcm) => pcm,
            Err(err) => {
                tracing::warn!(speaker = %speaker.speaker_id, %err, "frame decode failed, resetting");
                frames.clear();
                vad.reset();
                continue;
            }
        };

        frames.add_data(&pcm);
        for frame in frames.extract_frames() {
            match vad.process_frame(&frame) {
                Some(UtteranceEvent::Start) => {
                    tracing::debug!(speaker = %speaker.speaker_id, "utterance started");
                }
                Some(UtteranceEvent::End { audio, duration_ms }) => {
                    if duration_ms >= ctx.vad.min_speech_ms {
                        finalize_utterance(ctx.clone(), speaker.clone(), audio, duration_ms);
                    } else {
                        tracing::debug!(
                            speaker = %speaker.speaker_id,
                            duration_ms,
                            "utterance below minimum speech length, discarded"
                        );
                    }
                    return true;
                }
                None => {}
            }
        }
    }
}

/// Transcribe a finished utterance on a detached task and submit the line.
/// Empty and failed transcriptions are dropped silently.
fn finalize_utterance(
    ctx: Arc<ListenerContext>,
    speaker: SpeakerInfo,
    audio: Vec<u8>,
    duration_ms: u64,
) {
    tokio::spawn(async move {
        let wav = match to_canonical_wav(
            &audio,
            ctx.audio.sample_rate,
            ctx.audio.num_channels,
            ctx.audio.canonical_sample_rate,
            ctx.audio.canonical_num_channels,
        ) {
            Ok(wav) => wav,
            Err(err) => {
                tracing::warn!(speaker = %speaker.speaker_id, %err, "utterance encode failed");
                return;
            }
        };

        let text = match ctx.transcription.transcribe(&wav).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(speaker = %speaker.speaker_id, %err, "transcription failed");
                return;
            }
        };

        let text = text.trim();
        if text.is_empty() {
            tracing::debug!(speaker = %speaker.speaker_id, "empty transcription discarded");
            return;
        }

        tracing::debug!(speaker = %speaker.speaker_id, duration_ms, "utterance transcribed");
        let line = TranscriptLine {
            speaker_id: speaker.speaker_id.clone(),
            speaker_label: speaker.display_name.clone(),
            text: text.to_string(),
            timestamp: chrono::Utc::now(),
        };
        if ctx.line_tx.send(line).is_err() {
            tracing::warn!(speaker = %speaker.speaker_id, "aggregator gone, transcript line dropped");
        }
    });
}
