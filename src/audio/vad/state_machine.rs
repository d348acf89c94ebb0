// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Standalone utterance-segmentation state machine — pure logic, no I/O.
//!
//! Drives an `Idle -> Speaking -> Idle` machine from per-frame energy
//! analysis and emits [`UtteranceEvent`] values on completed transitions.
//! Time is counted in analysis frames rather than wall-clock reads, which
//! keeps the machine fully deterministic for a given frame sequence.
//!
//! Transition rules:
//!
//! - `Idle -> Speaking` after `start_frames` consecutive non-silent frames
//!   (debounce against transient noise). The triggering frame opens the
//!   utterance accumulator.
//! - `Speaking -> Idle` once the cumulative silence run reaches
//!   `min_silence_ms`, emitting [`UtteranceEvent::End`] with the accumulated
//!   bytes. The reported duration excludes the terminating silence run.
//! - While Speaking, an utterance reaching `max_recording_ms` is force-ended
//!   so a stuck-open stream can never buffer unboundedly.

use crate::audio::vad::{UtteranceEvent, VadState};
use crate::audio::{analyze_frame, FrameAnalysis};
use crate::config::VadParams;

/// Per-speaker utterance segmentation machine.
///
/// Feed fixed-size frames via [`process_frame`](Self::process_frame); every
/// frame observed while Speaking is appended to the utterance accumulator,
/// including the silent tail that eventually closes it.
#[derive(Debug)]
pub struct VadStateMachine {
    params: VadParams,
    /// Duration of one analysis frame in milliseconds.
    frame_duration_ms: u64,
    state: VadState,
    /// Consecutive silent frames observed.
    consecutive_silent: u32,
    /// Consecutive non-silent frames observed.
    consecutive_active: u32,
    /// Frames accumulated since the utterance opened.
    frames_since_start: u64,
    /// Bytes of the current utterance.
    utterance: Vec<u8>,
}

impl VadStateMachine {
    /// Create a new machine in [`VadState::Idle`].
    pub fn new(params: VadParams, frame_duration_ms: u64) -> Self {
        Self {
            params,
            frame_duration_ms,
            state: VadState::Idle,
            consecutive_silent: 0,
            consecutive_active: 0,
            frames_since_start: 0,
            utterance: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> VadState {
        self.state
    }

    /// Current VAD parameters.
    pub fn params(&self) -> &VadParams {
        &self.params
    }

    /// Bytes accumulated for the in-progress utterance.
    pub fn accumulated_len(&self) -> usize {
        self.utterance.len()
    }

    /// Feed one analysis frame and advance the machine.
    ///
    /// Returns `Some(UtteranceEvent)` when a transition completes, `None`
    /// otherwise.
    pub fn process_frame(&mut self, frame: &[u8]) -> Option<UtteranceEvent> {
        let analysis = analyze_frame(frame, self.params.silence_threshold_db);
        self.advance(frame, analysis)
    }

    /// Advance the machine with a pre-computed [`FrameAnalysis`].
    ///
    /// Split out from [`process_frame`](Self::process_frame) so callers that
    /// already scored the frame (or tests injecting exact classifications)
    /// can drive the machine directly.
    pub fn advance(&mut self, frame: &[u8], analysis: FrameAnalysis) -> Option<UtteranceEvent> {
        if analysis.is_silent {
            self.consecutive_silent += 1;
            self.consecutive_active = 0;

            if self.state == VadState::Speaking {
                self.accumulate(frame);

                let silent_ms = u64::from(self.consecutive_silent) * self.frame_duration_ms;
                if silent_ms >= self.params.min_silence_ms {
                    tracing::debug!(silent_ms, "end of speech detected");
                    return Some(self.finish_utterance());
                }
                return self.check_max_duration();
            }
        } else {
            self.consecutive_silent = 0;
            self.consecutive_active += 1;

            match self.state {
                VadState::Idle => {
                    if self.consecutive_active >= self.params.start_frames {
                        tracing::debug!(db = analysis.decibel_level, "start of speech detected");
                        self.state = VadState::Speaking;
                        self.utterance.clear();
                        self.frames_since_start = 0;
                        self.accumulate(frame);
                        return Some(UtteranceEvent::Start);
                    }
                }
                VadState::Speaking => {
                    self.accumulate(frame);
                    return self.check_max_duration();
                }
            }
        }

        None
    }

    /// Reset to [`VadState::Idle`], discarding counters and any accumulated
    /// utterance bytes.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.consecutive_silent = 0;
        self.consecutive_active = 0;
        self.frames_since_start = 0;
        self.utterance.clear();
    }

    fn accumulate(&mut self, frame: &[u8]) {
        self.utterance.extend_from_slice(frame);
        self.frames_since_start += 1;
    }

    /// Force an end once the utterance hits the recording cap.
    fn check_max_duration(&mut self) -> Option<UtteranceEvent> {
        let elapsed_ms = self.frames_since_start * self.frame_duration_ms;
        if elapsed_ms >= self.params.max_recording_ms {
            tracing::warn!(elapsed_ms, "max recording duration reached, forcing end");
            return Some(self.finish_utterance());
        }
        None
    }

    fn finish_utterance(&mut self) -> UtteranceEvent {
        // Duration excludes the silence run that closed the utterance.
        let silent_frames = u64::from(self.consecutive_silent).min(self.frames_since_start);
        let duration_ms =
            (self.frames_since_start - silent_frames) * self.frame_duration_ms;
        let audio = std::mem::take(&mut self.utterance);

        self.state = VadState::Idle;
        self.consecutive_silent = 0;
        self.consecutive_active = 0;
        self.frames_since_start = 0;

        UtteranceEvent::End { audio, duration_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::samples_to_bytes;
    use crate::config::VadParams;

    const FRAME_MS: u64 = 20;
    /// 20 ms of 48 kHz stereo PCM16.
    const FRAME_SAMPLES: usize = 1920;

    fn machine(params: VadParams) -> VadStateMachine {
        VadStateMachine::new(params, FRAME_MS)
    }

    fn loud_frame() -> Vec<u8> {
        samples_to_bytes(&vec![3000i16; FRAME_SAMPLES])
    }

    fn silent_frame() -> Vec<u8> {
        samples_to_bytes(&vec![0i16; FRAME_SAMPLES])
    }

    #[test]
    fn stays_idle_on_pure_silence() {
        let mut sm = machine(VadParams::default());
        for _ in 0..500 {
            assert_eq!(sm.process_frame(&silent_frame()), None);
        }
        assert_eq!(sm.state(), VadState::Idle);
        assert_eq!(sm.accumulated_len(), 0);
    }

    #[test]
    fn single_active_frame_does_not_start() {
        let mut sm = machine(VadParams::default());
        assert_eq!(sm.process_frame(&loud_frame()), None);
        assert_eq!(sm.state(), VadState::Idle);

        // A silent frame resets the active run.
        sm.process_frame(&silent_frame());
        assert_eq!(sm.process_frame(&loud_frame()), None);
        assert_eq!(sm.state(), VadState::Idle);
    }

    #[test]
    fn two_consecutive_active_frames_start_speaking() {
        let mut sm = machine(VadParams::default());
        assert_eq!(sm.process_frame(&loud_frame()), None);
        assert_eq!(
            sm.process_frame(&loud_frame()),
            Some(UtteranceEvent::Start)
        );
        assert_eq!(sm.state(), VadState::Speaking);
        // The triggering frame opened the accumulator.
        assert_eq!(sm.accumulated_len(), FRAME_SAMPLES * 2);
    }

    #[test]
    fn end_requires_min_silence_run() {
        let mut sm = machine(VadParams::default());
        sm.process_frame(&loud_frame());
        sm.process_frame(&loud_frame());

        // 580 ms of silence (29 frames) is below the 600 ms threshold.
        for _ in 0..29 {
            assert_eq!(sm.process_frame(&silent_frame()), None);
        }
        assert_eq!(sm.state(), VadState::Speaking);

        // The 30th silent frame crosses 600 ms.
        let event = sm.process_frame(&silent_frame());
        assert!(matches!(event, Some(UtteranceEvent::End { .. })));
        assert_eq!(sm.state(), VadState::Idle);
    }

    #[test]
    fn speech_then_silence_scenario() {
        // 1500 ms of speech then 700 ms of silence with min_silence = 600 ms
        // yields exactly one End with duration ~1500 ms, and the buffer holds
        // every frame seen while Speaking.
        let mut sm = machine(VadParams::default());
        let mut events = Vec::new();

        // 75 loud frames = 1500 ms. The first frame only arms the debounce.
        for _ in 0..75 {
            if let Some(ev) = sm.process_frame(&loud_frame()) {
                events.push(ev);
            }
        }
        // 35 silent frames = 700 ms; End fires at the 30th (600 ms).
        for _ in 0..35 {
            if let Some(ev) = sm.process_frame(&silent_frame()) {
                events.push(ev);
            }
        }

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], UtteranceEvent::Start);
        match &events[1] {
            UtteranceEvent::End { audio, duration_ms } => {
                // 74 speaking frames reported (the debounce frame is not
                // accumulated), trailing silence excluded.
                assert_eq!(*duration_ms, 74 * FRAME_MS);
                // Accumulated: 74 loud + 30 silent frames.
                assert_eq!(audio.len(), (74 + 30) * FRAME_SAMPLES * 2);
            }
            other => panic!("expected End, got {other:?}"),
        }

        // Nothing further fires on continued silence.
        for _ in 0..50 {
            assert_eq!(sm.process_frame(&silent_frame()), None);
        }
    }

    #[test]
    fn end_only_after_start() {
        let mut sm = machine(VadParams::default());
        let mut saw_start = false;
        for i in 0..200 {
            let frame = if i % 2 == 0 {
                loud_frame()
            } else {
                silent_frame()
            };
            match sm.process_frame(&frame) {
                Some(UtteranceEvent::Start) => saw_start = true,
                Some(UtteranceEvent::End { .. }) => {
                    assert!(saw_start, "End emitted without a preceding Start");
                    saw_start = false;
                }
                None => {}
            }
        }
    }

    #[test]
    fn max_duration_forces_end() {
        let params = VadParams {
            max_recording_ms: 1000,
            ..VadParams::default()
        };
        let mut sm = machine(params);

        sm.process_frame(&loud_frame());
        assert_eq!(sm.process_frame(&loud_frame()), Some(UtteranceEvent::Start));

        let mut end = None;
        for i in 0..200 {
            if let Some(ev) = sm.process_frame(&loud_frame()) {
                end = Some((i, ev));
                break;
            }
        }
        let (i, ev) = end.expect("cap never fired");
        match ev {
            UtteranceEvent::End { duration_ms, .. } => {
                assert_eq!(duration_ms, 1000);
                // 1 accumulated frame from Start + 49 more = 50 frames = 1 s.
                assert_eq!(i, 48);
            }
            other => panic!("expected End, got {other:?}"),
        }
        assert_eq!(sm.state(), VadState::Idle);
    }

    #[test]
    fn reset_discards_in_progress_utterance() {
        let mut sm = machine(VadParams::default());
        sm.process_frame(&loud_frame());
        sm.process_frame(&loud_frame());
        assert_eq!(sm.state(), VadState::Speaking);

        sm.reset();
        assert_eq!(sm.state(), VadState::Idle);
        assert_eq!(sm.accumulated_len(), 0);

        // A fresh utterance still needs the full start debounce.
        assert_eq!(sm.process_frame(&loud_frame()), None);
        assert_eq!(sm.process_frame(&loud_frame()), Some(UtteranceEvent::Start));
    }
}
