// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Audio analysis and segmentation subsystem.
//!
//! Raw PCM16 bytes flow through a [`FrameBuffer`](frame_buffer::FrameBuffer)
//! that cuts them into fixed-size analysis frames, each frame is scored by
//! [`analyze_frame`], and the per-speaker
//! [VAD state machine](vad::state_machine::VadStateMachine) turns the scores
//! into utterance start/end events.

pub mod convert;
pub mod frame_buffer;
pub mod vad;

/// Full-scale amplitude of a 16-bit signed sample.
const MAX_AMPLITUDE: f64 = i16::MAX as f64;

/// Energy classification of a single analysis frame. Ephemeral; derived per
/// frame and never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAnalysis {
    /// Mean absolute amplitude expressed in dB relative to full scale.
    /// [`f64::NEG_INFINITY`] for an all-zero frame.
    pub decibel_level: f64,
    /// Whether the frame falls below the silence threshold.
    pub is_silent: bool,
}

/// Score one PCM16 frame against a silence threshold.
///
/// Interprets the byte slice as little-endian 16-bit signed samples and
/// computes the mean absolute amplitude, converted to dBFS as
/// `20 * log10(avg / 32767)`. A zero average is defined as silent outright so
/// the undefined logarithm never propagates as NaN or -inf comparisons.
pub fn analyze_frame(frame: &[u8], silence_threshold_db: f64) -> FrameAnalysis {
    let num_samples = frame.len() / 2;
    if num_samples == 0 {
        return FrameAnalysis {
            decibel_level: f64::NEG_INFINITY,
            is_silent: true,
        };
    }

    let mut sum: f64 = 0.0;
    for chunk in frame.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        sum += f64::from(sample).abs();
    }
    let avg = sum / num_samples as f64;

    if avg == 0.0 {
        return FrameAnalysis {
            decibel_level: f64::NEG_INFINITY,
            is_silent: true,
        };
    }

    let db = 20.0 * (avg / MAX_AMPLITUDE).log10();
    FrameAnalysis {
        decibel_level: db,
        is_silent: db < silence_threshold_db,
    }
}

#[cfg(test)]
pub(crate) fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}
