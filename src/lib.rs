// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Voiceturn - multi-speaker voice conversation core.
//!
//! Voiceturn turns live per-speaker audio into conversational turns and
//! spoken replies: energy-based utterance segmentation per speaker,
//! transcription, debounced transcript aggregation across speakers, dispatch
//! to a conversational responder, and single-flight playback of the
//! synthesized answers. A session supervisor ties it together and persists
//! enough state to resume after a restart.
//!
//! Transport, codec, transcription, responder, and playback backends plug in
//! through the traits in [`services`].

pub mod aggregator;
pub mod audio;
pub mod config;
pub mod dispatch;
pub mod listener;
pub mod playback;
pub mod prelude;
pub mod services;
pub mod session;
