// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Common re-exports for convenient use of the voiceturn core.
//!
//! ```
//! use voiceturn::prelude::*;
//! ```

pub use std::sync::Arc;

pub use crate::aggregator::{AggregatedTurn, TranscriptAggregator, TranscriptLine};
pub use crate::config::{
    AggregatorConfig, AudioConfig, ConversationScope, DispatchConfig, PlaybackConfig, VadParams,
};
pub use crate::dispatch::TurnDispatcher;
pub use crate::listener::{spawn_listener, ListenerContext, ListenerHandle};
pub use crate::playback::{OriginContext, PlaybackItem, PlaybackScheduler, PlaybackSource};
pub use crate::services::speech::SpeechFetcher;
pub use crate::services::transcription::BatchTranscriptionClient;
pub use crate::services::{
    AudioCodec, AudioPlayer, AudioSubscription, EndBehavior, MembershipChange, MembershipEvent,
    Notifier, ReplyTurn, Responder, SpeakerInfo, SpeechSource, SynthesisRef, TranscriptionService,
    VoiceGateway,
};
pub use crate::session::record::{SessionCommand, SessionRecord, SessionRecordStore};
pub use crate::session::{
    Membership, SessionConfig, SessionDeps, SessionError, SessionSupervisor,
};
