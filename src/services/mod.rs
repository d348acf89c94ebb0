// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! External collaborator seams.
//!
//! The core treats its transport, codec, transcription, responder, and
//! notification dependencies as black boxes behind these traits. Concrete
//! implementations live alongside (the batch transcription client in
//! [`transcription`], speech retrieval in [`speech`]) or are supplied by the
//! embedding application.

pub mod speech;
pub mod transcription;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Voice-session gateway
// ---------------------------------------------------------------------------

/// How a subscription's byte stream should be closed.
///
/// The core always requests [`EndBehavior::Manual`] and performs its own
/// silence segmentation; the gateway's built-in silence timeout is never
/// relied upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBehavior {
    /// Stream stays open until the subscriber closes or cancels it.
    Manual,
    /// Gateway closes the stream after the given silence window.
    AfterSilence(Duration),
}

/// One speaker's live audio subscription.
///
/// `frames` yields encoded audio chunks; the channel closing means the
/// gateway ended the stream.
#[derive(Debug)]
pub struct AudioSubscription {
    pub frames: mpsc::Receiver<Vec<u8>>,
}

/// A channel member as reported by the gateway.
#[derive(Debug, Clone)]
pub struct SpeakerInfo {
    pub speaker_id: String,
    pub display_name: String,
    /// System/bot participants are never subscribed to.
    pub is_system: bool,
}

/// A channel membership change.
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    pub speaker: SpeakerInfo,
    pub channel_id: String,
    pub change: MembershipChange,
}

/// Direction of a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Joined,
    Left,
}

/// Errors surfaced by the voice-session gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("voice channel not found: {0}")]
    ChannelNotFound(String),
    #[error("gateway connection failed: {0}")]
    Connection(String),
    #[error("subscription failed for speaker {0}")]
    Subscribe(String),
}

/// Transport delivering raw audio frames and channel membership.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Join the given voice channel, replacing any existing connection.
    async fn join(&self, guild_id: &str, channel_id: &str) -> Result<(), GatewayError>;

    /// Whether a voice channel currently exists and is reachable.
    async fn channel_exists(&self, channel_id: &str) -> bool;

    /// Current non-system members of a channel.
    async fn members(&self, channel_id: &str) -> Result<Vec<SpeakerInfo>, GatewayError>;

    /// Subscribe to one speaker's audio.
    async fn subscribe(
        &self,
        speaker_id: &str,
        end_behavior: EndBehavior,
    ) -> Result<AudioSubscription, GatewayError>;

    /// Tear down the voice connection.
    async fn destroy_connection(&self);
}

// ---------------------------------------------------------------------------
// Audio decode
// ---------------------------------------------------------------------------

/// Errors raised while decoding encoded audio frames.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed audio frame: {0}")]
    Malformed(String),
    #[error("unsupported audio encoding: {0}")]
    Unsupported(String),
}

/// Decoder from the gateway's encoded frames to PCM16.
pub trait AudioCodec: Send + Sync {
    /// Decode one encoded chunk into PCM16 bytes.
    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, DecodeError>;
}

// ---------------------------------------------------------------------------
// Transcription
// ---------------------------------------------------------------------------

/// Errors surfaced by the transcription service.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("transcription request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("transcription service returned status {0}")]
    Status(u16),
    #[error("malformed transcription response: {0}")]
    MalformedResponse(&'static str),
}

/// Speech-to-text over canonical-format WAV bytes.
///
/// Empty text is a valid, non-error result.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, canonical_wav: &[u8]) -> Result<String, TranscriptionError>;
}

// ---------------------------------------------------------------------------
// Conversational responder
// ---------------------------------------------------------------------------

/// Errors surfaced by the conversational responder.
#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("responder send timed out after {0:?}")]
    Timeout(Duration),
    #[error("responder transport failure: {0}")]
    Transport(String),
    #[error("responder reply missing required field: {0}")]
    MalformedReply(&'static str),
    #[error("no conversation available")]
    NoConversation,
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
}

/// Reference to a synthesized rendition of one reply turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRef {
    pub turn_id: String,
    pub candidate_id: String,
}

/// A strictly-shaped responder reply.
///
/// Responder wire formats are loosely shaped; [`ReplyTurn::from_value`]
/// validates the required fields once, up front, so downstream code never
/// trusts the shape at each access site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTurn {
    pub text: String,
    pub speaker_name: String,
    pub synthesis: SynthesisRef,
}

impl ReplyTurn {
    /// Parse a raw responder reply, failing fast on any missing field.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ResponderError> {
        let turn = value
            .get("turn")
            .ok_or(ResponderError::MalformedReply("turn"))?;
        let turn_id = turn
            .pointer("/turn_key/turn_id")
            .and_then(|v| v.as_str())
            .ok_or(ResponderError::MalformedReply("turn.turn_key.turn_id"))?;
        let candidate_id = turn
            .get("primary_candidate_id")
            .and_then(|v| v.as_str())
            .ok_or(ResponderError::MalformedReply("turn.primary_candidate_id"))?;
        let text = turn
            .pointer("/candidates/0/raw_content")
            .and_then(|v| v.as_str())
            .ok_or(ResponderError::MalformedReply("turn.candidates[0].raw_content"))?;
        let speaker_name = turn
            .pointer("/author/name")
            .and_then(|v| v.as_str())
            .ok_or(ResponderError::MalformedReply("turn.author.name"))?;

        Ok(Self {
            text: text.to_string(),
            speaker_name: speaker_name.to_string(),
            synthesis: SynthesisRef {
                turn_id: turn_id.to_string(),
                candidate_id: candidate_id.to_string(),
            },
        })
    }
}

/// Where synthesized speech audio can be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechSource {
    /// Fetch from a playback URL.
    Url(String),
    /// Already-materialized audio bytes.
    Bytes(Vec<u8>),
}

/// The conversational responder: text in, reply turn + synthesized speech out.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Establish (or re-establish) the character session.
    async fn connect(&self, character_id: &str) -> Result<(), ResponderError>;

    /// Resolve an external conversation identifier for a new conversation.
    async fn resolve_conversation(&self) -> Result<String, ResponderError>;

    /// Send one prompt within a conversation and return the typed reply.
    async fn send_message(
        &self,
        text: &str,
        conversation_id: &str,
        timeout: Duration,
    ) -> Result<ReplyTurn, ResponderError>;

    /// Request synthesized speech for a reply turn.
    async fn request_speech(
        &self,
        synthesis: &SynthesisRef,
        voice_id: &str,
    ) -> Result<SpeechSource, ResponderError>;

    /// Drop the character session.
    async fn disconnect(&self, character_id: &str) -> Result<(), ResponderError>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Errors raised by the notification channel. Always best-effort for callers.
#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Best-effort text announcements into an external channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel_id: &str, text: &str) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// Audio playback sink
// ---------------------------------------------------------------------------

/// Errors raised while playing a reply through the gateway.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback decode failure: {0}")]
    Decode(String),
    #[error("playback device failure: {0}")]
    Device(String),
    #[error("playback source unavailable: {0}")]
    Source(String),
}

/// Sink that plays one audio payload to completion.
///
/// `play` resolves only when playback reaches a terminal state (finished or
/// errored); the scheduler relies on that to serialize playback.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, audio: &[u8]) -> Result<(), PlaybackError>;
}
