//! Server lifecycle state with in-flight call tracking.
//!
//! Uses `ArcSwap` for lock-free state reads and an atomic counter with RAII
//! guards for in-flight tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

/// Lifecycle state of a server.
///
/// State machine: Unstarted -> Listening -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet bound.
    Unstarted,
    /// Bound and accepting calls.
    Listening,
    /// Graceful shutdown in progress: no new calls, in-flight calls finishing.
    Draining,
    /// All in-flight calls completed.
    Stopped,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Tracks lifecycle state and in-flight calls.
///
/// 1. The call handler takes an `in_flight_guard()` per accepted call and
///    rejects calls once `accepting()` turns false
/// 2. `begin_drain()` moves Listening to Draining
/// 3. `wait_for_drain()` returns once every guard has been dropped
#[derive(Debug)]
pub struct LifecycleController {
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<LifecycleState>,
}

impl LifecycleController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(LifecycleState::Unstarted),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Whether new calls may be admitted.
    #[must_use]
    pub fn accepting(&self) -> bool {
        self.state() == LifecycleState::Listening
    }

    /// Unstarted -> Listening. Returns `false` from any other state.
    pub fn set_listening(&self) -> bool {
        self.transition(LifecycleState::Unstarted, LifecycleState::Listening)
    }

    /// Listening -> Draining. Returns `false` from any other state.
    pub fn begin_drain(&self) -> bool {
        self.transition(LifecycleState::Listening, LifecycleState::Draining)
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let previous = self.state.rcu(|current| {
            if **current == from {
                Arc::new(to)
            } else {
                Arc::clone(current)
            }
        });
        *previous == from
    }

    /// Creates an RAII guard that tracks an in-flight call.
    ///
    /// The counter is decremented when the guard drops, including during
    /// unwinding.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits, without a deadline, until no calls are in flight, then moves
    /// Draining to Stopped.
    pub async fn wait_for_drain(&self) {
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.transition(LifecycleState::Draining, LifecycleState::Stopped);
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_unstarted() {
        let controller = LifecycleController::new();
        assert_eq!(controller.state(), LifecycleState::Unstarted);
        assert!(!controller.accepting());
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        let controller = LifecycleController::new();

        assert!(!controller.begin_drain());
        assert_eq!(controller.state(), LifecycleState::Unstarted);

        assert!(controller.set_listening());
        assert!(controller.accepting());
        assert!(!controller.set_listening());

        assert!(controller.begin_drain());
        assert_eq!(controller.state(), LifecycleState::Draining);
        assert!(!controller.accepting());
        assert!(!controller.begin_drain());
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let controller = LifecycleController::new();

        let guard1 = controller.in_flight_guard();
        let guard2 = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(guard1);
        assert_eq!(controller.in_flight_count(), 1);

        drop(guard2);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_drain_immediate() {
        let controller = LifecycleController::new();
        controller.set_listening();
        controller.begin_drain();

        controller.wait_for_drain().await;
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn wait_for_drain_waits_for_guards() {
        let controller = Arc::new(LifecycleController::new());
        controller.set_listening();

        let guard = controller.in_flight_guard();
        controller.begin_drain();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        let started = std::time::Instant::now();
        controller.wait_for_drain().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(controller.in_flight_count(), 0);

        release.await.unwrap();
    }

    #[test]
    fn state_names() {
        assert_eq!(LifecycleState::Unstarted.as_str(), "unstarted");
        assert_eq!(LifecycleState::Listening.as_str(), "listening");
        assert_eq!(LifecycleState::Draining.as_str(), "draining");
        assert_eq!(LifecycleState::Stopped.as_str(), "stopped");
    }
}
