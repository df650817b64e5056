//! Pure state machine for capture termination.
//!
//! `(State, Event) -> (NewState, Vec<SideEffect>)`
//!
//! Invalid transitions return the current state with no effects. Only the
//! `Running -> StopRequested` edge is ever taken concurrently; the coordinator
//! serializes it behind its mutex, and every later edge is driven by the
//! controlling thread.

use std::fmt;
use std::time::Instant;

use serde::Serialize;

/// Why a capture is stopping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// The configured frame count was reached.
    FrameLimit { frames: u64 },
    /// The queue grew past the configured byte ceiling.
    #[serde(rename_all = "camelCase")]
    MemoryLimit { queued_bytes: u64 },
    /// Operator interrupt.
    Interrupted,
    /// Unrecoverable error in the producer or writer.
    Fatal(String),
}

impl StopReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StopReason::Fatal(_))
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::FrameLimit { frames } => write!(f, "frame limit reached ({} frames)", frames),
            StopReason::MemoryLimit { queued_bytes } => {
                write!(f, "queue memory limit exceeded ({} bytes queued)", queued_bytes)
            }
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::Fatal(msg) => write!(f, "fatal error: {}", msg),
        }
    }
}

/// Termination lifecycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TerminationState {
    /// Producer enqueues, writer drains.
    #[default]
    Running,

    /// A stop was requested; the controller has been woken.
    StopRequested {
        reason: StopReason,
        requested_at: Instant,
    },

    /// Device stopped, writer being released and joined.
    Draining {
        reason: StopReason,
        requested_at: Instant,
    },

    /// All threads joined, output finalized.
    Stopped { reason: StopReason },
}

impl TerminationState {
    pub fn is_running(&self) -> bool {
        matches!(self, TerminationState::Running)
    }

    /// When the stop was first requested. `None` while running and once
    /// stopped.
    pub fn requested_at(&self) -> Option<Instant> {
        match self {
            TerminationState::StopRequested { requested_at, .. }
            | TerminationState::Draining { requested_at, .. } => Some(*requested_at),
            TerminationState::Running | TerminationState::Stopped { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&StopReason> {
        match self {
            TerminationState::Running => None,
            TerminationState::StopRequested { reason, .. }
            | TerminationState::Draining { reason, .. }
            | TerminationState::Stopped { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TerminationEvent {
    /// Producer criterion met, operator interrupt, or fatal error.
    StopRequested(StopReason),

    /// The controller is about to tear down the pipeline.
    DrainStarted,

    /// The writer thread has exited.
    WriterJoined,
}

/// Effects the controller executes, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Wake the thread blocked in `wait_for_stop`.
    NotifyController,

    /// Stop frame delivery from the device.
    StopDevice,

    /// Queue the flush marker so the writer drains and exits.
    InjectFlush,

    /// Drop queued packets and release the writer without draining.
    AbortQueue,

    /// Wait for the writer thread.
    JoinWriter,

    /// Write the trailer and close the output.
    FinalizeOutput,
}

pub fn transition(
    state: TerminationState,
    event: TerminationEvent,
) -> (TerminationState, Vec<SideEffect>) {
    match (&state, event) {
        // Running + StopRequested -> StopRequested
        (TerminationState::Running, TerminationEvent::StopRequested(reason)) => {
            let new_state = TerminationState::StopRequested {
                reason,
                requested_at: Instant::now(),
            };
            (new_state, vec![SideEffect::NotifyController])
        }

        // StopRequested + DrainStarted -> Draining
        (
            TerminationState::StopRequested {
                reason,
                requested_at,
            },
            TerminationEvent::DrainStarted,
        ) => {
            let release = if reason.is_fatal() {
                SideEffect::AbortQueue
            } else {
                SideEffect::InjectFlush
            };
            let new_state = TerminationState::Draining {
                reason: reason.clone(),
                requested_at: *requested_at,
            };
            (
                new_state,
                vec![SideEffect::StopDevice, release, SideEffect::JoinWriter],
            )
        }

        // Draining + WriterJoined -> Stopped
        (TerminationState::Draining { reason, .. }, TerminationEvent::WriterJoined) => {
            let new_state = TerminationState::Stopped {
                reason: reason.clone(),
            };
            (new_state, vec![SideEffect::FinalizeOutput])
        }

        // Invalid transition: return current state with no effects
        _ => (state, vec![]),
    }
}
