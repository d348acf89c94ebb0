// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Single-flight audio playback scheduling.
//!
//! Responses are enqueued as [`PlaybackItem`]s on an unbounded FIFO queue
//! consumed by one task. The task awaits each [`AudioPlayer::play`] call to
//! completion before popping the next item, so overlapping output is
//! impossible no matter how many turns resolve concurrently. A failed item is
//! reported and skipped; it never stalls the queue.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::{AudioPlayer, Notifier};

/// Async callback invoked after an item plays to completion. Skipped when
/// playback fails.
pub type CompletionCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Where the playable audio lives.
pub enum PlaybackSource {
    /// Fully buffered audio bytes.
    Memory(Vec<u8>),
    /// A temporary file on disk, removed after playback.
    TempFile(PathBuf),
}

impl std::fmt::Debug for PlaybackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(bytes) => f.debug_tuple("Memory").field(&bytes.len()).finish(),
            Self::TempFile(path) => f.debug_tuple("TempFile").field(path).finish(),
        }
    }
}

/// Context for reporting playback failures back to whoever caused them.
#[derive(Debug, Clone)]
pub struct OriginContext {
    pub text_channel_id: String,
    pub description: String,
}

/// One queued playback.
pub struct PlaybackItem {
    pub source: PlaybackSource,
    pub origin: Option<OriginContext>,
    pub on_complete: Option<CompletionCallback>,
}

impl PlaybackItem {
    pub fn from_memory(audio: Vec<u8>) -> Self {
        Self {
            source: PlaybackSource::Memory(audio),
            origin: None,
            on_complete: None,
        }
    }

    pub fn from_temp_file(path: PathBuf) -> Self {
        Self {
            source: PlaybackSource::TempFile(path),
            origin: None,
            on_complete: None,
        }
    }

    pub fn with_origin(mut self, origin: OriginContext) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_on_complete(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }
}

impl std::fmt::Debug for PlaybackItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackItem")
            .field("source", &self.source)
            .field("origin", &self.origin)
            .field("has_on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Handle to the playback task. Cloneable; all clones feed the same queue.
#[derive(Clone)]
pub struct PlaybackScheduler {
    item_tx: mpsc::UnboundedSender<PlaybackItem>,
    playing: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl PlaybackScheduler {
    /// Spawn the playback task over `player`, reporting failures through
    /// `notifier`. Returns the handle and the task's join handle.
    pub fn spawn(
        player: Arc<dyn AudioPlayer>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, JoinHandle<()>) {
        let (item_tx, item_rx) = mpsc::unbounded_channel();
        let playing = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            item_rx,
            player,
            notifier,
            playing.clone(),
            cancel.clone(),
        ));
        (
            Self {
                item_tx,
                playing,
                cancel,
            },
            task,
        )
    }

    /// Append an item to the queue. Returns `false` if the task is gone.
    pub fn enqueue(&self, item: PlaybackItem) -> bool {
        self.item_tx.send(item).is_ok()
    }

    /// Whether an item is currently being played.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Best-effort stop: halts after the in-flight item and drops the rest
    /// of the queue.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("is_playing", &self.is_playing())
            .finish()
    }
}

async fn run(
    mut item_rx: mpsc::UnboundedReceiver<PlaybackItem>,
    player: Arc<dyn AudioPlayer>,
    notifier: Arc<dyn Notifier>,
    playing: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = item_rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        playing.store(true, Ordering::Release);
        play_item(item, player.as_ref(), notifier.as_ref()).await;
        playing.store(false, Ordering::Release);
    }
    playing.store(false, Ordering::Release);
}

/// Play one item to completion. Failures are reported to the item's origin
/// and swallowed so the queue keeps moving.
async fn play_item(item: PlaybackItem, player: &dyn AudioPlayer, notifier: &dyn Notifier) {
    let result = match &item.source {
        PlaybackSource::Memory(audio) => player.play(audio).await,
        PlaybackSource::TempFile(path) => match tokio::fs::read(path).await {
            Ok(audio) => player.play(&audio).await,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "failed to read playback file");
                Err(crate::services::PlaybackError::Source(err.to_string()))
            }
        },
    };

    if let PlaybackSource::TempFile(path) = &item.source {
        if let Err(err) = tokio::fs::remove_file(path).await {
            tracing::debug!(path = %path.display(), %err, "failed to remove playback temp file");
        }
    }

    if let Err(err) = result {
        tracing::warn!(%err, "playback failed, skipping item");
        if let Some(origin) = &item.origin {
            let message = format!("Failed to play {}: {err}", origin.description);
            if let Err(notify_err) = notifier.notify(&origin.text_channel_id, &message).await {
                tracing::debug!(err = %notify_err.0, "failed to report playback error");
            }
        }
        return;
    }

    if let Some(on_complete) = item.on_complete {
        on_complete().await;
    }
}
