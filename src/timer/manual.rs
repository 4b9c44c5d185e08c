use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Timer, TimerCallback, TimerHandle};

struct Scheduled {
    handle: TimerHandle,
    callback: TimerCallback,
}

#[derive(Default)]
struct ClockState {
    now: Duration,
    next_seq: u64,
    /// Keyed by (deadline, scheduling order) so ties fire first-come first-served.
    pending: BTreeMap<(Duration, u64), Scheduled>,
}

/// Deterministic clock for tests.
///
/// Nothing fires until [`ManualClock::advance`] moves time past a deadline.
/// Callbacks run on the thread calling `advance`, with the clock set to their
/// own deadline, so timers they schedule are measured from that instant.
#[derive(Default)]
pub struct ManualClock {
    state: Mutex<ClockState>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elapsed fake time since the clock was created.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of timers neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .pending
            .values()
            .filter(|scheduled| scheduled.handle.is_pending())
            .count()
    }

    /// Move time forward by `by`, firing every due callback in deadline
    /// order. Returns how many callbacks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now.saturating_add(by);
        let mut fired = 0;

        loop {
            let due = {
                let mut state = self.state.lock();
                let next = state
                    .pending
                    .first_key_value()
                    .map(|(&(deadline, seq), _)| (deadline, seq));
                match next {
                    Some((deadline, seq)) if deadline <= target => {
                        state.now = state.now.max(deadline);
                        state.pending.remove(&(deadline, seq))
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };

            let Some(scheduled) = due else { break };
            if scheduled.handle.try_fire() {
                (scheduled.callback)();
                fired += 1;
            }
        }

        fired
    }

    /// Advance to an absolute fake time. Moving backwards does nothing.
    pub fn advance_to(&self, at: Duration) -> usize {
        let now = self.now();
        self.advance(at.saturating_sub(now))
    }
}

impl Timer for ManualClock {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut state = self.state.lock();
        let deadline = state.now.saturating_add(delay);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.insert(
            (deadline, seq),
            Scheduled {
                handle: handle.clone(),
                callback,
            },
        );
        handle
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}
