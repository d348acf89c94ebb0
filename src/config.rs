// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration for the voice conversation core.
//!
//! All components receive their tuning as immutable config structs at
//! construction time. Defaults match the values the system was tuned with
//! against 48 kHz stereo capture audio.

use serde::{Deserialize, Serialize};

/// Capture-side audio format and framing constants.
///
/// `frame_size` and `frame_duration_ms` must agree with `sample_rate`,
/// `num_channels` and 16-bit samples: one frame is
/// `sample_rate / 1000 * frame_duration_ms * num_channels * 2` bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Capture channel count.
    pub num_channels: u32,
    /// Analysis frame size in bytes.
    pub frame_size: usize,
    /// Duration of one analysis frame in milliseconds.
    pub frame_duration_ms: u64,
    /// Sample rate of the canonical transcription format in Hz.
    pub canonical_sample_rate: u32,
    /// Channel count of the canonical transcription format.
    pub canonical_num_channels: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            num_channels: 2,
            // 20 ms of 48 kHz stereo PCM16: 48000 / 1000 * 20 * 2 * 2.
            frame_size: 3840,
            frame_duration_ms: 20,
            canonical_sample_rate: 16_000,
            canonical_num_channels: 1,
        }
    }
}

/// Voice activity detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadParams {
    /// Frames quieter than this (in dBFS) are classified as silent.
    pub silence_threshold_db: f64,
    /// Consecutive non-silent frames required to open an utterance.
    pub start_frames: u32,
    /// Cumulative silence that closes an utterance, in milliseconds.
    pub min_silence_ms: u64,
    /// Utterances shorter than this are discarded as noise, in milliseconds.
    pub min_speech_ms: u64,
    /// Hard cap on a single utterance, in milliseconds.
    pub max_recording_ms: u64,
}

impl Default for VadParams {
    fn default() -> Self {
        Self {
            silence_threshold_db: -35.0,
            start_frames: 2,
            min_silence_ms: 600,
            min_speech_ms: 1000,
            max_recording_ms: 30_000,
        }
    }
}

/// Transcript aggregation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Quiet period after the last submitted line before a turn is
    /// dispatched, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { debounce_ms: 3000 }
    }
}

/// Scope of conversation identity at the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationScope {
    /// One conversation shared by every speaker.
    Global,
    /// One conversation per speaker; forgotten when the speaker leaves.
    PerSpeaker,
}

/// Turn dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Responder character identity to converse as.
    pub character_id: String,
    /// Voice used for speech synthesis of replies.
    pub voice_id: String,
    /// Bound on a single responder send, in milliseconds.
    pub response_timeout_ms: u64,
    /// When set, the recognized prompt and the reply text are announced to
    /// the session's text channel (best effort).
    pub announce: bool,
    /// Conversation identity scope.
    pub scope: ConversationScope,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            character_id: String::new(),
            voice_id: String::new(),
            response_timeout_ms: 10_000,
            announce: false,
            scope: ConversationScope::Global,
        }
    }
}

/// Playback scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// In single-speaker mode, re-arm the tracked speaker's listener after a
    /// reply finishes playing.
    pub auto_restart: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_matches_format() {
        let cfg = AudioConfig::default();
        let expected = cfg.sample_rate as usize / 1000
            * cfg.frame_duration_ms as usize
            * cfg.num_channels as usize
            * 2;
        assert_eq!(cfg.frame_size, expected);
    }

    #[test]
    fn defaults_roundtrip_through_json() {
        let vad = VadParams::default();
        let json = serde_json::to_string(&vad).unwrap();
        let back: VadParams = serde_json::from_str(&json).unwrap();
        assert!((back.silence_threshold_db - vad.silence_threshold_db).abs() < f64::EPSILON);
        assert_eq!(back.min_silence_ms, 600);
        assert_eq!(back.min_speech_ms, 1000);
        assert_eq!(back.max_recording_ms, 30_000);
    }

    #[test]
    fn dispatch_defaults() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.response_timeout_ms, 10_000);
        assert!(!cfg.announce);
        assert_eq!(cfg.scope, ConversationScope::Global);
    }
}
