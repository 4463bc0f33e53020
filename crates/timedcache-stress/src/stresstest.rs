use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use sketches_ddsketch::DDSketch;
use timedcache::TimedCache;
use timedcache::config::Config;
use tokio::sync::Semaphore;

use crate::workloads::{LoaderParams, StressLoader, WorkloadsConfig, default_loaders};

struct PreparedWorkload {
    concurrency: usize,
    keys: usize,
    read_type: timedcache::ReadType,
    cache: TimedCache<StressLoader>,
    params: LoaderParams,
}

impl PreparedWorkload {
    async fn run_once(&self) -> bool {
        let key = format!("key-{}", rand::random_range(0..self.keys.max(1)));
        self.cache.get(&key, self.read_type).await.is_ok()
    }
}

pub async fn perform_stresstest(
    config: Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let loaders = default_loaders();

    // initialize workloads
    let mut prepared = Vec::with_capacity(workloads.workloads.len());
    for (i, workload) in workloads.workloads.into_iter().enumerate() {
        let factory = loaders.get(&workload.loader).with_context(|| {
            format!(
                "unknown loader `{}`, expected one of {:?}",
                workload.loader,
                loaders.names()
            )
        })?;
        let params = LoaderParams::new(&workload);
        let cache = TimedCache::from_config(
            format!("workload-{i}"),
            &config.cache(&workload.cache),
            factory(&params),
        )
        .with_context(|| format!("invalid settings for cache `{}`", workload.cache))?;
        tracing::debug!(workload = i, ?cache, "Prepared workload");

        prepared.push(Arc::new(PreparedWorkload {
            concurrency: workload.concurrency,
            keys: workload.keys,
            read_type: workload.read_type,
            cache,
            params,
        }));
    }

    // warmup: run each workload once to make sure caches are warm
    {
        let start = Instant::now();

        let futures = prepared.iter().map(|workload| {
            let workload = Arc::clone(workload);
            tokio::spawn(async move { workload.run_once().await })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(prepared.len());
    for workload in &prepared {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let workload = Arc::clone(workload);

        let task = tokio::spawn(async move {
            let concurrency = workload.concurrency;
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let errors = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let calls_before = workload.params.calls();

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let workload = Arc::clone(&workload);
                        let task_durations = Arc::clone(&task_durations);
                        let errors = Arc::clone(&errors);
                        let task_start = Instant::now();

                        tokio::spawn(async move {
                            if !workload.run_once().await {
                                errors.fetch_add(1, Ordering::Relaxed);
                            }

                            task_durations.lock().add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let task_durations = std::mem::take(&mut *task_durations.lock());
            let loader_calls = workload.params.calls() - calls_before;

            (
                concurrency,
                task_durations,
                errors.load(Ordering::Relaxed),
                loader_calls,
            )
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (concurrency, task_durations, errors, loader_calls) =
            task.context("workload task panicked")?;

        let ops = task_durations.count();
        let ops_ps = ops as f64 / duration.as_secs_f64();
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");
        println!("  errors: {errors}; loader calls: {loader_calls}");

        if ops == 0 {
            continue;
        }
        let quantile = |q| {
            let secs = task_durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
        let p50 = quantile(0.5);
        let p90 = quantile(0.9);
        let p99 = quantile(0.99);
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    Ok(())
}
