use fibersched::{Counter, JobDescriptor, Priority, Scheduler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

/// Occupies the only worker until the returned closure is called.
fn block_single_worker(scheduler: &Scheduler) -> (Counter, impl FnOnce()) {
    let started = Arc::new(Barrier::new(2));
    let release = Arc::new(AtomicBool::new(false));

    let started_clone = started.clone();
    let release_clone = release.clone();
    let counter = scheduler.run(move || {
        started_clone.wait();
        while !release_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
    });
    started.wait();

    (counter, move || release.store(true, Ordering::SeqCst))
}

fn record(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl FnOnce() + Send + use<> {
    let log = log.clone();
    move || log.lock().unwrap().push(name)
}

#[test]
fn test_priority_ordering() {
    let scheduler = Scheduler::new(1);
    let log = Arc::new(Mutex::new(Vec::new()));
    let (blocker, release) = block_single_worker(&scheduler);

    let counter = Counter::new();
    scheduler.schedule(JobDescriptor::with_counter(record(&log, "low"), counter.clone()).priority(Priority::Low));
    scheduler.schedule(JobDescriptor::with_counter(record(&log, "normal"), counter.clone()));
    scheduler.schedule(JobDescriptor::with_counter(record(&log, "high-1"), counter.clone()).priority(Priority::High));
    scheduler.schedule(JobDescriptor::with_counter(record(&log, "high-2"), counter.clone()).priority(Priority::High));
    assert_eq!(scheduler.handle().queued_at(Priority::High), 2);
    assert_eq!(scheduler.handle().queued_jobs(), 4);

    release();
    scheduler.wait_for_counter(&blocker);
    scheduler.wait_for_counter(&counter);

    assert_eq!(*log.lock().unwrap(), vec!["high-1", "high-2", "normal", "low"]);
    scheduler.shutdown().expect("Shutdown failed");
}

#[test]
fn test_fifo_within_level() {
    let scheduler = Scheduler::new(1);
    let log = Arc::new(Mutex::new(Vec::new()));
    let (blocker, release) = block_single_worker(&scheduler);

    let counter = Counter::new();
    scheduler.schedule_all([
        JobDescriptor::with_counter(record(&log, "a"), counter.clone()).priority(Priority::Low),
        JobDescriptor::with_counter(record(&log, "b"), counter.clone()).priority(Priority::Low),
        JobDescriptor::with_counter(record(&log, "c"), counter.clone()).priority(Priority::Low),
    ]);

    release();
    scheduler.wait_for_counter(&blocker);
    scheduler.wait_for_counter(&counter);

    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    scheduler.shutdown().expect("Shutdown failed");
}

#[test]
fn test_satisfied_waiter_preferred_over_queue() {
    let scheduler = Scheduler::new(1);
    let handle = scheduler.handle();
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Counter::with_value(1);

    // Runs first and parks on the gate.
    let waiter_log = log.clone();
    let gate_clone = gate.clone();
    let waiter = scheduler.run(move || {
        handle.wait_for_counter(&gate_clone);
        waiter_log.lock().unwrap().push("waiter");
    });

    let (blocker, release) = block_single_worker(&scheduler);
    assert_eq!(scheduler.pending_waits(), 1);

    let high = scheduler.run_priority(Priority::High, record(&log, "high"));
    gate.decrement();

    release();
    scheduler.wait_for_counter(&blocker);
    scheduler.wait_for_counter(&waiter);
    scheduler.wait_for_counter(&high);

    assert_eq!(*log.lock().unwrap(), vec!["waiter", "high"]);
    scheduler.shutdown().expect("Shutdown failed");
}
