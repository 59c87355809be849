use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use vkrt_job::{Job, Priority};
use vkrt_scheduler::{Scheduler, SchedulerConfig};

fn submit_and_drain(job_count: u32) {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_count: 4,
        fiber_count: 16,
        queue_capacity: 1024,
    });
    scheduler.start();

    let counter = Arc::new(AtomicU32::new(0));
    for _ in 0..job_count {
        let counter = Arc::clone(&counter);
        let job = Job::new();
        job.configure_boxed(
            move |_n, _t, _f| {
                counter.fetch_add(1, Ordering::Relaxed);
            },
            Priority::Medium,
            None::<String>,
        );
        scheduler.safe_submit(job);
    }
    scheduler.wait_until_all_done();
    scheduler.shutdown();
}

fn bench_scheduler(c: &mut Criterion) {
    c.bench_function("scheduler_1k_independent_jobs", |b| {
        b.iter(|| submit_and_drain(1_000));
    });
}

criterion_group!(benches, bench_scheduler);
criterion_main!(benches);
