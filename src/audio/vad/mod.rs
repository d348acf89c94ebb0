// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Voice Activity Detection (VAD) subsystem.

pub mod state_machine;

pub use state_machine::VadStateMachine;

/// VAD state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No utterance in progress.
    Idle,
    /// An utterance is being accumulated.
    Speaking,
}

/// Events emitted by the VAD state machine on completed transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceEvent {
    /// Transitioned from Idle to Speaking.
    Start,
    /// Transitioned from Speaking back to Idle.
    End {
        /// Every frame accumulated while Speaking, in arrival order.
        audio: Vec<u8>,
        /// Elapsed speaking time excluding the terminating silence run,
        /// in milliseconds.
        duration_ms: u64,
    },
}
