use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use coalesce_utils::panic_message;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error};

use super::{Timer, TimerCallback, TimerHandle};

struct Entry {
    deadline: Instant,
    seq: u64,
    handle: TimerHandle,
    callback: TimerCallback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct TimerQueue {
    entries: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    shutdown: bool,
}

impl TimerQueue {
    /// Drop cancelled entries once they dominate the heap, so a debouncer
    /// called in a tight loop does not pile up dead timers until they expire.
    fn compact(&mut self) {
        let cancelled = self
            .entries
            .iter()
            .filter(|Reverse(entry)| !entry.handle.is_pending())
            .count();
        if cancelled > 64 && cancelled * 2 > self.entries.len() {
            self.entries.retain(|Reverse(entry)| entry.handle.is_pending());
        }
    }
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
}

/// Real-time timer backed by one dedicated thread.
///
/// Callbacks run on the timer thread in deadline order, so a slow callback
/// delays the ones behind it. Dropping the timer stops the thread; callbacks
/// still queued at that point never run.
pub struct ThreadTimer {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl ThreadTimer {
    pub fn new() -> io::Result<Self> {
        Self::named("coalesce-timer")
    }

    pub fn named(name: impl Into<String>) -> io::Result<Self> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue::default()),
            condvar: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name.into())
            .spawn(move || timer_loop(&worker_shared))?;
        let worker_id = worker.thread().id();

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    /// Number of queued entries, including cancelled ones not yet discarded.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }
}

impl Timer for ThreadTimer {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new();
        let deadline = deadline_after(delay);

        let mut queue = self.shared.queue.lock();
        queue.compact();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.entries.push(Reverse(Entry {
            deadline,
            seq,
            handle: handle.clone(),
            callback,
        }));
        drop(queue);

        self.shared.condvar.notify_one();
        handle
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.condvar.notify_all();

        // The last owner may be a callback running on the timer thread itself.
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("timer thread exited by panicking");
            }
        }
    }
}

/// Roughly 30 years, the same horizon `tokio::time` clamps long sleeps to.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Delays too long for `Instant` are clamped to a deadline that never comes
/// in practice.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn timer_loop(shared: &TimerShared) {
    let mut queue = shared.queue.lock();
    loop {
        if queue.shutdown {
            debug!(dropped = queue.entries.len(), "timer thread shutting down");
            queue.entries.clear();
            break;
        }

        let next_deadline = queue.entries.peek().map(|Reverse(entry)| entry.deadline);
        let Some(deadline) = next_deadline else {
            shared.condvar.wait(&mut queue);
            continue;
        };

        if deadline > Instant::now() {
            shared.condvar.wait_until(&mut queue, deadline);
            continue;
        }

        let Some(Reverse(entry)) = queue.entries.pop() else {
            continue;
        };
        if entry.handle.try_fire() {
            MutexGuard::unlocked(&mut queue, || run_callback(entry.callback));
        }
    }
}

fn run_callback(callback: TimerCallback) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(
            panic = %panic_message(payload.as_ref()),
            "timer callback panicked"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn explode() {
        panic!("boom")
    }

    #[test]
    fn fires_in_deadline_order() {
        let timer = ThreadTimer::new().unwrap();
        let (tx, rx) = bounded(2);
        let late = tx.clone();
        timer.after(Duration::from_millis(40), Box::new(move || late.send("late").unwrap()));
        timer.after(Duration::from_millis(5), Box::new(move || tx.send("early").unwrap()));

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "early");
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "late");
    }

    #[test]
    fn cancelled_callback_never_runs() {
        let timer = ThreadTimer::new().unwrap();
        let (tx, rx) = bounded::<()>(1);
        let handle = timer.after(Duration::from_millis(20), Box::new(move || tx.send(()).unwrap()));
        assert!(handle.cancel());
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn huge_delays_are_clamped_not_overflowed() {
        let timer = ThreadTimer::new().unwrap();
        let handle = timer.after(Duration::MAX, Box::new(|| {}));
        assert!(handle.is_pending());
        assert_eq!(timer.queued(), 1);
        assert!(handle.cancel());
        assert!(deadline_after(Duration::MAX) > Instant::now() + Duration::from_secs(86_400));
    }

    #[test]
    fn survives_panicking_callbacks() {
        let timer = ThreadTimer::new().unwrap();
        let (tx, rx) = bounded(1);
        timer.after(Duration::ZERO, Box::new(explode));
        timer.after(Duration::from_millis(10), Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 7);
    }
}
