//! TerminationCoordinator - shared stop signal for one capture session.
//!
//! Three parties can ask a session to stop: the producer on the device
//! thread, the writer thread, and the interrupt handler. All of them go
//! through `request_stop`; the first request wins and wakes the controller
//! blocked in `wait_for_stop`. The controller then drives the remaining
//! transitions and executes the side effects they return.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::state::{transition, SideEffect, StopReason, TerminationEvent, TerminationState};

pub struct TerminationCoordinator {
    state: Mutex<TerminationState>,
    changed: Condvar,
}

impl TerminationCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TerminationState::Running),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TerminationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `event` and returns the side effects of the transition.
    fn apply(&self, event: TerminationEvent) -> Vec<SideEffect> {
        let mut state = self.lock();
        let (new_state, effects) = transition(state.clone(), event);
        *state = new_state;

        if effects.contains(&SideEffect::NotifyController) {
            self.changed.notify_all();
        }
        effects
    }

    /// Requests a stop. Returns true only for the request that moved the
    /// session out of `Running`; later requests are ignored.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let log_reason = reason.to_string();
        let accepted = !self
            .apply(TerminationEvent::StopRequested(reason))
            .is_empty();

        if accepted {
            tracing::info!(target: "capture", "[SESSION] Stop requested: {}", log_reason);
        } else {
            tracing::debug!(target: "capture", "[SESSION] Ignoring stop request ({}), already stopping", log_reason);
        }
        accepted
    }

    /// Blocks until a stop has been requested and returns its reason.
    pub fn wait_for_stop(&self) -> StopReason {
        let mut state = self.lock();
        loop {
            if let Some(reason) = state.reason() {
                return reason.clone();
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Moves `StopRequested -> Draining`. Empty if no stop was requested.
    pub fn begin_draining(&self) -> Vec<SideEffect> {
        self.apply(TerminationEvent::DrainStarted)
    }

    /// Moves `Draining -> Stopped` once the writer has been joined.
    pub fn mark_stopped(&self) -> Vec<SideEffect> {
        self.apply(TerminationEvent::WriterJoined)
    }

    pub fn state(&self) -> TerminationState {
        self.lock().clone()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.lock().reason().cloned()
    }
}

impl Default for TerminationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_first_stop_request_wins() {
        let coordinator = TerminationCoordinator::new();

        assert!(coordinator.request_stop(StopReason::FrameLimit { frames: 10 }));
        assert!(!coordinator.request_stop(StopReason::Interrupted));
        assert!(!coordinator.request_stop(StopReason::Fatal("late".to_string())));

        assert_eq!(
            coordinator.stop_reason(),
            Some(StopReason::FrameLimit { frames: 10 })
        );
    }

    #[test]
    fn test_concurrent_requests_accept_exactly_one() {
        let coordinator = Arc::new(TerminationCoordinator::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    coordinator.request_stop(StopReason::FrameLimit { frames: i })
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|accepted| *accepted)
            .count();

        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_wait_for_stop_wakes_on_request() {
        let coordinator = Arc::new(TerminationCoordinator::new());
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.wait_for_stop())
        };

        thread::sleep(Duration::from_millis(20));
        coordinator.request_stop(StopReason::Interrupted);

        assert_eq!(waiter.join().unwrap(), StopReason::Interrupted);
    }

    #[test]
    fn test_full_lifecycle() {
        let coordinator = TerminationCoordinator::new();
        assert!(coordinator.begin_draining().is_empty());

        coordinator.request_stop(StopReason::MemoryLimit { queued_bytes: 2048 });
        let effects = coordinator.begin_draining();
        assert_eq!(effects.first(), Some(&SideEffect::StopDevice));
        assert!(matches!(coordinator.state(), TerminationState::Draining { .. }));
        assert!(coordinator.state().requested_at().is_some());

        assert_eq!(coordinator.mark_stopped(), vec![SideEffect::FinalizeOutput]);
        assert!(matches!(coordinator.state(), TerminationState::Stopped { .. }));
        assert!(!coordinator.state().is_running());
    }
}
