use fibersched::{Scheduler, this_job};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_yield_loop_terminates_on_single_worker() {
    let scheduler = Scheduler::new(1);
    let flag = Arc::new(AtomicBool::new(false));
    let spins = Arc::new(AtomicUsize::new(0));

    let flag_clone = flag.clone();
    let spins_clone = spins.clone();
    let spinner = scheduler.run(move || {
        while !flag_clone.load(Ordering::SeqCst) {
            spins_clone.fetch_add(1, Ordering::SeqCst);
            this_job::yield_now();
        }
    });

    let flag_clone = flag.clone();
    let setter = scheduler.run(move || {
        flag_clone.store(true, Ordering::SeqCst);
    });

    scheduler.wait_for_counter(&setter);
    scheduler.wait_for_counter(&spinner);
    assert!(spins.load(Ordering::SeqCst) >= 1);
    scheduler.shutdown().expect("Shutdown failed");
}

#[test]
fn test_yield_loop_waits_for_late_submission() {
    let scheduler = Scheduler::new(1);
    let flag = Arc::new(AtomicBool::new(false));

    let flag_clone = flag.clone();
    let spinner = scheduler.run(move || {
        while !flag_clone.load(Ordering::SeqCst) {
            this_job::yield_now();
        }
    });

    // The spinner is alone and keeps getting re-selected until this arrives.
    thread::sleep(Duration::from_millis(10));
    let flag_clone = flag.clone();
    scheduler.run(move || flag_clone.store(true, Ordering::SeqCst));

    scheduler.wait_for_counter(&spinner);
    scheduler.shutdown().expect("Shutdown failed");
}

#[test]
fn test_two_yielders_and_queued_work_all_progress() {
    let scheduler = Scheduler::new(1);
    let stop = Arc::new(AtomicBool::new(false));

    let mut yielders = Vec::new();
    for _ in 0..2 {
        let stop = stop.clone();
        yielders.push(scheduler.run(move || {
            while !stop.load(Ordering::SeqCst) {
                this_job::yield_now();
            }
        }));
    }

    let stop_clone = stop.clone();
    let stopper = scheduler.run(move || stop_clone.store(true, Ordering::SeqCst));

    scheduler.wait_for_counter(&stopper);
    for counter in &yielders {
        scheduler.wait_for_counter(counter);
    }
    scheduler.shutdown().expect("Shutdown failed");
}

#[test]
fn test_cooperative_yielding_many_workers() {
    let scheduler = Scheduler::new(4);
    let iterations_completed = Arc::new(AtomicUsize::new(0));
    let other_job_ran = Arc::new(AtomicUsize::new(0));

    let iterations = iterations_completed.clone();
    let long_counter = scheduler.run(move || {
        for i in 0..100 {
            iterations.fetch_add(1, Ordering::SeqCst);
            if i % 10 == 0 {
                this_job::yield_now();
            }
            // Whichever worker resumed us, we are still inside a job.
            assert!(this_job::is_in_job());
        }
    });

    let other = other_job_ran.clone();
    let short_counter = scheduler.run(move || {
        other.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.wait_for_counter(&long_counter);
    scheduler.wait_for_counter(&short_counter);

    assert_eq!(iterations_completed.load(Ordering::SeqCst), 100);
    assert_eq!(other_job_ran.load(Ordering::SeqCst), 1);
    scheduler.shutdown().expect("Shutdown failed");
}
