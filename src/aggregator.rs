// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Transcript aggregation into conversational turns.
//!
//! Finished utterances from any number of concurrent speakers arrive as
//! [`TranscriptLine`]s. The aggregator owns the pending turn buffer and a
//! single debounce timer: every submitted line restarts the timer, and only
//! after a full quiet period does the buffer get snapshotted, cleared, and
//! joined into one prompt. Near-simultaneous speakers therefore merge into a
//! single turn instead of racing each other to the responder.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::AggregatorConfig;

/// One finalized, transcribed utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub speaker_id: String,
    pub speaker_label: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// One aggregated prompt ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedTurn {
    /// Lines joined in arrival order as `"{label}: {text}"`.
    pub prompt: String,
    /// Speaker that contributed the first line; used as the conversation
    /// scope key in per-speaker mode.
    pub speaker_id: String,
    /// Number of transcript lines merged into this turn.
    pub line_count: usize,
}

/// Join buffered lines into a single prompt, arrival order preserved.
fn render_turn(lines: &[TranscriptLine]) -> String {
    let mut prompt = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            prompt.push('\n');
        }
        prompt.push_str(&line.speaker_label);
        prompt.push_str(": ");
        prompt.push_str(&line.text);
    }
    prompt
}

/// Handle to the aggregator task.
///
/// Dropping the handle (or calling [`shutdown`](Self::shutdown)) cancels any
/// pending debounce timer and discards buffered lines.
#[derive(Debug)]
pub struct TranscriptAggregator {
    line_tx: mpsc::UnboundedSender<TranscriptLine>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TranscriptAggregator {
    /// Spawn the aggregator task. Dispatched turns are sent on `turn_tx`.
    pub fn spawn(
        config: AggregatorConfig,
        turn_tx: mpsc::UnboundedSender<AggregatedTurn>,
    ) -> Self {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(config, line_rx, turn_tx, cancel.clone()));
        Self {
            line_tx,
            cancel,
            task,
        }
    }

    /// Append a line to the pending turn and restart the debounce timer.
    pub fn submit(&self, speaker_id: &str, speaker_label: &str, text: &str) {
        let line = TranscriptLine {
            speaker_id: speaker_id.to_string(),
            speaker_label: speaker_label.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        if self.line_tx.send(line).is_err() {
            tracing::warn!("transcript aggregator task gone, line dropped");
        }
    }

    /// Sender clone for listeners that submit lines directly.
    pub fn line_sender(&self) -> mpsc::UnboundedSender<TranscriptLine> {
        self.line_tx.clone()
    }

    /// Cancel the pending debounce (if any), discard buffered lines, and
    /// wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for TranscriptAggregator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The aggregator task loop.
///
/// The buffer is only ever touched between suspension points: a flush is a
/// synchronous snapshot-then-clear followed by an unbounded (non-blocking)
/// send, so no reentrant submit can observe a half-cleared buffer.
async fn run(
    config: AggregatorConfig,
    mut line_rx: mpsc::UnboundedReceiver<TranscriptLine>,
    turn_tx: mpsc::UnboundedSender<AggregatedTurn>,
    cancel: CancellationToken,
) {
    let debounce = Duration::from_millis(config.debounce_ms);
    let mut buffer: Vec<TranscriptLine> = Vec::new();

    loop {
        if buffer.is_empty() {
            // No pending turn: wait for the first line, no timer outstanding.
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = line_rx.recv() => match line {
                    Some(line) => buffer.push(line),
                    None => break,
                },
            }
        } else {
            // A turn is pending: one debounce timer, restarted by re-entering
            // this arm after every received line.
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = line_rx.recv() => match line {
                    Some(line) => buffer.push(line),
                    None => break,
                },
                _ = sleep(debounce) => {
                    let lines = std::mem::take(&mut buffer);
                    let turn = AggregatedTurn {
                        prompt: render_turn(&lines),
                        speaker_id: lines[0].speaker_id.clone(),
                        line_count: lines.len(),
                    };
                    tracing::debug!(lines = turn.line_count, "dispatching aggregated turn");
                    if turn_tx.send(turn).is_err() {
                        tracing::warn!("turn receiver gone, aggregated turn dropped");
                    }
                }
            }
        }
    }

    if !buffer.is_empty() {
        tracing::debug!(lines = buffer.len(), "aggregator torn down, pending lines discarded");
    }
}
