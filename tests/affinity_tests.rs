use fibersched::{PinningStrategy, Scheduler, SchedulerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn with_strategy(threads: usize, strategy: PinningStrategy) -> Scheduler {
    Scheduler::with_config(SchedulerConfig::with_threads(threads).pinning(strategy))
        .expect("failed to start")
}

#[test]
fn test_none_strategy() {
    let scheduler = with_strategy(4, PinningStrategy::None);
    assert_eq!(scheduler.num_workers(), 4);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_linear_strategy() {
    let scheduler = with_strategy(2, PinningStrategy::Linear);
    assert_eq!(scheduler.num_workers(), 2);

    let counter = scheduler.run(|| {
        // Affinity itself is not observable portably; the path must not fail.
    });
    scheduler.wait_for_counter(&counter);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_avoid_smt_more_workers_than_cores() {
    let scheduler = with_strategy(10, PinningStrategy::AvoidSmt);
    assert_eq!(scheduler.num_workers(), 10);

    let executed = Arc::new(AtomicUsize::new(0));
    let mut jobs = Vec::new();
    for _ in 0..100 {
        let executed_clone = executed.clone();
        jobs.push(Box::new(move || {
            executed_clone.fetch_add(1, Ordering::SeqCst);
        }) as Box<dyn FnOnce() + Send>);
    }

    let counter = scheduler.run_multiple(jobs);
    scheduler.wait_for_counter(&counter);
    assert_eq!(executed.load(Ordering::SeqCst), 100);

    scheduler.shutdown().unwrap();
}
