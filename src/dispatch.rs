// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Turn dispatch to the conversational responder.
//!
//! Aggregated turns are consumed one at a time by a single task: the prompt
//! goes to the responder under a bounded timeout, the reply's synthesized
//! speech is fetched, and the audio is handed to the playback scheduler.
//! Conversation identifiers are resolved lazily and cached per scope key, so
//! the first turn of a conversation pays the resolution round trip and later
//! turns reuse it.
//!
//! Failure handling deliberately stays simple: a failed send triggers exactly
//! one forced responder reconnect and drops the cached conversation, then the
//! turn is surfaced as lost. The next turn starts clean. There is no retry of
//! the prompt itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::aggregator::AggregatedTurn;
use crate::config::{ConversationScope, DispatchConfig};
use crate::playback::{CompletionCallback, OriginContext, PlaybackItem, PlaybackScheduler};
use crate::services::speech::SpeechFetcher;
use crate::services::{Notifier, Responder, ResponderError};

/// Scope key shared by every speaker in global mode.
const GLOBAL_SCOPE_KEY: &str = "global";

struct DispatcherInner {
    config: DispatchConfig,
    responder: Arc<dyn Responder>,
    notifier: Arc<dyn Notifier>,
    fetcher: SpeechFetcher,
    scheduler: PlaybackScheduler,
    /// Text channel announcements and failure reports go to, if any.
    text_channel_id: Option<String>,
    /// Invoked after each reply finishes playing.
    on_reply_played: Option<CompletionCallback>,
    /// Scope key to external conversation id. Never held across an await.
    conversations: Mutex<HashMap<String, String>>,
}

/// Handle to the dispatch task. Cloneable.
#[derive(Clone)]
pub struct TurnDispatcher {
    inner: Arc<DispatcherInner>,
    cancel: CancellationToken,
}

impl TurnDispatcher {
    pub fn new(
        config: DispatchConfig,
        responder: Arc<dyn Responder>,
        notifier: Arc<dyn Notifier>,
        scheduler: PlaybackScheduler,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                responder,
                notifier,
                fetcher: SpeechFetcher::new(),
                scheduler,
                text_channel_id: None,
                on_reply_played: None,
                conversations: Mutex::new(HashMap::new()),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Text channel to announce prompts/replies and report failures to.
    pub fn with_text_channel(self, text_channel_id: impl Into<String>) -> Self {
        self.with_inner(|inner| inner.text_channel_id = Some(text_channel_id.into()))
    }

    /// Callback fired after each reply finishes playing.
    pub fn with_on_reply_played(self, callback: CompletionCallback) -> Self {
        self.with_inner(|inner| inner.on_reply_played = Some(callback))
    }

    fn with_inner(mut self, f: impl FnOnce(&mut DispatcherInner)) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => f(inner),
            // Builders are only meaningful before the handle is shared.
            None => tracing::warn!("dispatcher builder called after spawn, ignored"),
        }
        self
    }

    /// Spawn the dispatch task consuming `turn_rx`.
    pub fn spawn(&self, turn_rx: mpsc::UnboundedReceiver<AggregatedTurn>) -> JoinHandle<()> {
        tokio::spawn(run(self.inner.clone(), turn_rx, self.cancel.clone()))
    }

    /// Stop consuming turns. Any in-flight turn completes.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Drop the cached conversation for one speaker. Only meaningful in
    /// per-speaker scope; in global scope this is a no-op.
    pub async fn forget_conversation(&self, speaker_id: &str) {
        if self.inner.config.scope == ConversationScope::PerSpeaker {
            self.inner.conversations.lock().await.remove(speaker_id);
        }
    }

    /// The cached conversation id for a scope key, if resolved.
    #[cfg(test)]
    async fn cached_conversation(&self, key: &str) -> Option<String> {
        self.inner.conversations.lock().await.get(key).cloned()
    }
}

impl std::fmt::Debug for TurnDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnDispatcher")
            .field("character_id", &self.inner.config.character_id)
            .field("scope", &self.inner.config.scope)
            .finish()
    }
}

async fn run(
    inner: Arc<DispatcherInner>,
    mut turn_rx: mpsc::UnboundedReceiver<AggregatedTurn>,
    cancel: CancellationToken,
) {
    loop {
        let turn = tokio::select! {
            _ = cancel.cancelled() => break,
            turn = turn_rx.recv() => match turn {
                Some(turn) => turn,
                None => break,
            },
        };

        if let Err(err) = handle_turn(&inner, &turn).await {
            tracing::warn!(speaker = %turn.speaker_id, %err, "turn dispatch failed");
            recover(&inner, &turn).await;
            report(&inner, &format!("Failed to get a response: {err}")).await;
        }
    }
}

fn scope_key<'a>(config: &DispatchConfig, turn: &'a AggregatedTurn) -> &'a str {
    match config.scope {
        ConversationScope::Global => GLOBAL_SCOPE_KEY,
        ConversationScope::PerSpeaker => &turn.speaker_id,
    }
}

async fn handle_turn(inner: &Arc<DispatcherInner>, turn: &AggregatedTurn) -> Result<(), ResponderError> {
    let key = scope_key(&inner.config, turn);
    let cached = inner.conversations.lock().await.get(key).cloned();
    let conversation_id = match cached {
        Some(id) => id,
        None => {
            let id = inner.responder.resolve_conversation().await?;
            tracing::debug!(%key, conversation = %id, "resolved new conversation");
            inner
                .conversations
                .lock()
                .await
                .insert(key.to_string(), id.clone());
            id
        }
    };

    let response_timeout = Duration::from_millis(inner.config.response_timeout_ms);
    let reply = timeout(
        response_timeout,
        inner
            .responder
            .send_message(&turn.prompt, &conversation_id, response_timeout),
    )
    .await
    .map_err(|_| ResponderError::Timeout(response_timeout))??;

    tracing::debug!(speaker = %reply.speaker_name, chars = reply.text.len(), "reply received");

    if inner.config.announce {
        report(
            inner,
            &format!("**Heard:** {}\n**{}:** {}", turn.prompt, reply.speaker_name, reply.text),
        )
        .await;
    }

    let source = inner
        .responder
        .request_speech(&reply.synthesis, &inner.config.voice_id)
        .await?;
    let audio = inner.fetcher.fetch(source).await?;

    let mut item = PlaybackItem::from_memory(audio);
    if let Some(channel_id) = &inner.text_channel_id {
        item = item.with_origin(OriginContext {
            text_channel_id: channel_id.clone(),
            description: format!("reply to {}", turn.speaker_id),
        });
    }
    if let Some(callback) = &inner.on_reply_played {
        item = item.with_on_complete(callback.clone());
    }
    if !inner.scheduler.enqueue(item) {
        tracing::warn!("playback scheduler gone, reply audio dropped");
    }
    Ok(())
}

/// One forced reconnect after a failed turn. The cached conversation for the
/// turn's scope is dropped so the next turn resolves a fresh one.
async fn recover(inner: &Arc<DispatcherInner>, turn: &AggregatedTurn) {
    let key = scope_key(&inner.config, turn);
    inner.conversations.lock().await.remove(key);

    let character_id = &inner.config.character_id;
    if let Err(err) = inner.responder.disconnect(character_id).await {
        tracing::debug!(%err, "disconnect during recovery failed");
    }
    match inner.responder.connect(character_id).await {
        Ok(()) => tracing::debug!("responder reconnected after failed turn"),
        Err(err) => tracing::warn!(%err, "responder reconnect failed"),
    }
}

async fn report(inner: &Arc<DispatcherInner>, message: &str) {
    let Some(channel_id) = &inner.text_channel_id else {
        return;
    };
    if let Err(err) = inner.notifier.notify(channel_id, message).await {
        tracing::debug!(err = %err.0, "failed to post dispatch notification");
    }
}
