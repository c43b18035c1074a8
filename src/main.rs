use fibersched::{
    AdaptiveMutex, Counter, JobDescriptor, Mutex, Priority, Scheduler, SchedulerConfig, this_job,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("fibersched - Fiber-Based Job Scheduler\n");

    let num_threads = 4;
    let scheduler = match Scheduler::with_config(SchedulerConfig::with_threads(num_threads)) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            eprintln!("Failed to start scheduler: {}", e);
            return;
        }
    };
    println!("Initialized scheduler with {} worker threads\n", num_threads);

    // Example 1: fan-out / fan-in on a shared counter
    println!("Example 1: Shared counter join");
    let result1 = Arc::new(AtomicUsize::new(0));
    let result2 = Arc::new(AtomicUsize::new(0));
    let counter = Counter::new();
    let (r1, r2) = (result1.clone(), result2.clone());
    scheduler.schedule_all([
        JobDescriptor::with_counter(move || r1.store(2 + 3, Ordering::SeqCst), counter.clone()),
        JobDescriptor::with_counter(move || r2.store(4 + 6, Ordering::SeqCst), counter.clone()),
    ]);
    scheduler.wait_for_counter(&counter);
    println!(
        "  job1(2,3) = {}, job2(4,6) = {}\n",
        result1.load(Ordering::SeqCst),
        result2.load(Ordering::SeqCst)
    );

    // Example 2: nested jobs waiting inside a fiber
    println!("Example 2: Nested wait inside a job");
    let handle = scheduler.handle();
    let sum = Arc::new(AtomicUsize::new(0));
    let sum_clone = sum.clone();
    let root = scheduler.run_priority(Priority::High, move || {
        let children = Counter::new();
        handle.schedule_all((0..100).map(|i| {
            let sum = sum_clone.clone();
            JobDescriptor::with_counter(
                move || {
                    sum.fetch_add(i, Ordering::SeqCst);
                },
                children.clone(),
            )
            .stack_size(32 * 1024)
        }));
        handle.wait_for_counter(&children);
    });
    scheduler.wait_for_counter(&root);
    println!("  Sum result: {} (expected: {})\n", sum.load(Ordering::SeqCst), (0..100).sum::<usize>());

    // Example 3: fiber-aware locks
    println!("Example 3: Mutex and AdaptiveMutex");
    let total = Arc::new(Mutex::new(0u64));
    let fast_total = Arc::new(AdaptiveMutex::new(0u64));
    let start = Instant::now();
    let jobs: Vec<Box<dyn FnOnce() + Send>> = (0..1000)
        .map(|_| {
            let total = total.clone();
            let fast_total = fast_total.clone();
            Box::new(move || {
                *total.lock() += 1;
                *fast_total.lock(Duration::from_micros(20)) += 1;
                this_job::sleep_for(Duration::ZERO);
            }) as Box<dyn FnOnce() + Send>
        })
        .collect();
    let counter = scheduler.run_multiple(jobs);
    scheduler.wait_for_counter(&counter);
    println!(
        "  {} / {} increments in {:?}\n",
        *total.lock(),
        *fast_total.lock(Duration::ZERO),
        start.elapsed()
    );

    let metrics = scheduler.metrics();
    println!(
        "Completed {} jobs, {} yields, {} parked waits ({:.2} jobs/second)",
        metrics.jobs_completed,
        metrics.yields,
        metrics.waits_parked,
        metrics.jobs_per_second()
    );

    println!("Shutting down scheduler...");
    match scheduler.shutdown() {
        Ok(_) => println!("Done!"),
        Err(e) => eprintln!("Shutdown error: {}", e),
    }
}
