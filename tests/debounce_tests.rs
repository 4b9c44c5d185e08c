use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use coalesce::debounce::{Debouncer, DeferredExecutionError};
use coalesce::timer::{ManualClock, ThreadTimer, Timer, TimerCallback, TimerHandle, TokioTimer};
use parking_lot::Mutex;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Debouncer over a manual clock that records every delivered argument.
fn recording(delay: u64) -> (Arc<ManualClock>, Debouncer<u32>, Arc<Mutex<Vec<u32>>>) {
    let clock = Arc::new(ManualClock::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let debouncer = Debouncer::new(Arc::clone(&clock), ms(delay), move |value: u32| {
        sink.lock().push(value);
    });
    (clock, debouncer, log)
}

#[test]
fn burst_collapses_into_last_call() {
    let (clock, debouncer, log) = recording(100);

    for value in 1..=5 {
        debouncer.call(value);
        clock.advance(ms(10));
    }
    // last call at t=40 is due at t=140
    clock.advance_to(ms(139));
    assert!(log.lock().is_empty());
    assert!(debouncer.is_pending());

    clock.advance_to(ms(140));
    assert_eq!(*log.lock(), vec![5]);
    assert!(!debouncer.is_pending());

    let stats = debouncer.stats();
    assert_eq!(stats.calls, 5);
    assert_eq!(stats.invocations, 1);
    assert_eq!(stats.superseded, 4);
}

#[test]
fn spaced_calls_each_fire() {
    let (clock, debouncer, log) = recording(100);

    debouncer.call(1);
    clock.advance(ms(150));
    debouncer.call(2);
    clock.advance(ms(150));

    assert_eq!(*log.lock(), vec![1, 2]);
}

#[test]
fn cancel_discards_pending_call() {
    let (clock, debouncer, log) = recording(100);

    debouncer.call(1);
    clock.advance(ms(50));
    assert!(debouncer.cancel());
    assert!(!debouncer.cancel());
    clock.advance(ms(500));

    assert!(log.lock().is_empty());
    assert_eq!(clock.pending(), 0);
    assert_eq!(debouncer.stats().cancelled, 1);
}

#[test]
fn logger_fires_once_after_last_call() {
    let (clock, debouncer, log) = recording(200);

    debouncer.call(0);
    clock.advance_to(ms(50));
    debouncer.call(50);
    clock.advance_to(ms(120));
    debouncer.call(120);

    clock.advance_to(ms(319));
    assert!(log.lock().is_empty());
    clock.advance_to(ms(320));
    assert_eq!(*log.lock(), vec![120]);

    clock.advance(ms(1_000));
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn failures_reach_handler_and_later_calls_still_fire() {
    let clock = Arc::new(ManualClock::new());
    let failures = Arc::new(Mutex::new(Vec::new()));
    let delivered = Arc::new(AtomicUsize::new(0));

    let sink = Arc::clone(&failures);
    let count = Arc::clone(&delivered);
    let debouncer = Debouncer::fallible(Arc::clone(&clock), ms(20), move |value: i32| {
        if value < 0 {
            return Err(format!("rejected {value}"));
        }
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .with_error_handler(move |err: &DeferredExecutionError| sink.lock().push(err.to_string()));

    debouncer.call(-1);
    clock.advance(ms(20));
    assert_eq!(failures.lock().len(), 1);
    assert!(failures.lock()[0].contains("rejected -1"));

    debouncer.call(3);
    clock.advance(ms(20));
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert_eq!(debouncer.stats().failures, 1);
    assert_eq!(debouncer.stats().invocations, 2);
}

fn explode(_: ()) {
    panic!("deferred boom");
}

#[test]
fn panics_are_reported_not_propagated() {
    let clock = Arc::new(ManualClock::new());
    let panics = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&panics);
    let debouncer = Debouncer::new(Arc::clone(&clock), ms(5), explode).with_error_handler(
        move |err: &DeferredExecutionError| {
            assert!(err.is_panic());
            if let DeferredExecutionError::Panicked(message) = err {
                sink.lock().push(message.clone());
            }
        },
    );

    debouncer.call(());
    clock.advance(ms(5));
    assert_eq!(*panics.lock(), vec!["deferred boom".to_string()]);
}

#[test]
fn flush_runs_pending_call_immediately() {
    let (clock, debouncer, log) = recording(100);

    assert!(!debouncer.flush());
    debouncer.call(7);
    assert!(debouncer.flush());
    assert_eq!(*log.lock(), vec![7]);

    clock.advance(ms(500));
    assert_eq!(*log.lock(), vec![7]);
}

#[test]
fn clones_share_one_pending_call() {
    let (clock, debouncer, log) = recording(100);
    let other = debouncer.clone();

    other.call(1);
    clock.advance(ms(30));
    debouncer.call(2);
    clock.advance(ms(100));

    assert_eq!(*log.lock(), vec![2]);
    assert_eq!(other.stats().superseded, 1);
}

#[test]
fn dropping_last_clone_cancels() {
    let (clock, debouncer, log) = recording(100);
    let other = debouncer.clone();

    debouncer.call(1);
    drop(debouncer);
    assert_eq!(clock.pending(), 1);
    drop(other);
    assert_eq!(clock.pending(), 0);

    clock.advance(ms(200));
    assert!(log.lock().is_empty());
}

#[test]
fn thread_timer_delivers_latest_arguments() {
    let timer = Arc::new(ThreadTimer::new().unwrap());
    let (tx, rx) = crossbeam_channel::unbounded();
    let debouncer = Debouncer::new(timer, ms(60), move |value: u32| {
        tx.send(value).unwrap();
    });

    for value in 0..5 {
        debouncer.call(value);
    }

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 4);
    assert!(rx.recv_timeout(ms(200)).is_err());
    assert_eq!(debouncer.stats().invocations, 1);
}

#[tokio::test(start_paused = true)]
async fn tokio_timer_restarts_delay_on_each_call() {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fired);
    let debouncer = Debouncer::new(Arc::new(TokioTimer::current().unwrap()), ms(100), move |v: u8| {
        sink.lock().push(v);
    });

    debouncer.call(1);
    tokio::time::sleep(ms(50)).await;
    debouncer.call(2);

    tokio::time::sleep(ms(99)).await;
    assert!(fired.lock().is_empty());

    tokio::time::sleep(ms(2)).await;
    tokio::task::yield_now().await;
    assert_eq!(*fired.lock(), vec![2]);
}

#[test]
fn unbounded_delay_stays_pending_until_cancelled() {
    let timer = Arc::new(ThreadTimer::new().unwrap());
    let debouncer = Debouncer::new(timer, Duration::MAX, |_: u32| {});

    debouncer.call(1);
    debouncer.call(2);
    assert!(debouncer.is_pending());
    assert_eq!(debouncer.stats().superseded, 1);

    assert!(debouncer.cancel());
    assert!(!debouncer.is_pending());
}

/// Timer whose scheduling always fails.
struct RefusingTimer;

impl Timer for RefusingTimer {
    fn after(&self, _delay: Duration, _callback: TimerCallback) -> TimerHandle {
        panic!("timer refused to schedule");
    }
}

#[test]
fn failed_scheduling_leaves_no_phantom_pending_call() {
    let debouncer = Debouncer::new(Arc::new(RefusingTimer), ms(10), |_: u32| {});

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| debouncer.call(1)));
    assert!(outcome.is_err());
    assert!(!debouncer.is_pending());
    assert!(!debouncer.cancel());
}
