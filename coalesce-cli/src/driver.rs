//! Burst and throughput drivers over every cache strategy.
//!
//! The resolved operation is a simulated backend call: it sleeps for the
//! configured work time and returns its own invocation number, so the
//! observed values show exactly how many times the backend was hit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, ensure, Context, Result};
use clap::ValueEnum;
use indicatif::ProgressBar;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::debug;

use coalesce_cache::AsyncCoalescer;
use coalesce_core::traits::Coalesce;
use coalesce_core::types::CacheStats;

/// Progress is reported once per this many resolves.
const PROGRESS_STEP: u64 = 1024;

/// Which cache implementation to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One global read/write lock
    Global,
    /// One lock per key
    Keyed,
    /// Async, latecomers join the in-flight computation
    Async,
}

/// Shape of a burst run.
#[derive(Clone, Debug)]
pub struct BurstPlan {
    pub callers: usize,
    pub waves: usize,
    pub keys: usize,
    pub gap: Duration,
    pub ttl: Duration,
    pub work: Duration,
    pub fail: bool,
}

impl BurstPlan {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.callers > 0, "--callers must be at least 1");
        ensure!(self.waves > 0, "--waves must be at least 1");
        ensure!(self.keys > 0, "--keys must be at least 1");
        Ok(())
    }
}

/// Outcomes observed by one wave, counted by rendered value.
#[derive(Debug, Serialize)]
pub struct WaveReport {
    pub wave: usize,
    pub outcomes: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct BurstReport {
    pub strategy: Strategy,
    pub invocations: u64,
    pub waves: Vec<WaveReport>,
    pub stats: CacheStats,
}

/// Shape of a throughput run.
#[derive(Clone, Debug)]
pub struct BenchPlan {
    pub threads: usize,
    pub iterations: u64,
    pub keys: usize,
    pub ttl: Duration,
}

impl BenchPlan {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.threads > 0, "--threads must be at least 1");
        ensure!(self.keys > 0, "--keys must be at least 1");
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.threads as u64 * self.iterations
    }
}

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub strategy: Strategy,
    pub operations: u64,
    pub elapsed_secs: f64,
    pub ops_per_sec: f64,
    pub stats: CacheStats,
}

/// Simulated expensive backend.
#[derive(Clone)]
struct Backend {
    calls: Arc<AtomicU64>,
    work: Duration,
    fail: bool,
}

impl Backend {
    fn new(work: Duration, fail: bool) -> Self {
        Self {
            calls: Arc::new(AtomicU64::new(0)),
            work,
            fail,
        }
    }

    fn call_blocking(&self) -> Result<u64, String> {
        let n = self.next();
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        self.outcome(n)
    }

    async fn call(self) -> Result<u64, String> {
        let n = self.next();
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.outcome(n)
    }

    fn next(&self) -> u64 {
        self.calls.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn outcome(&self, n: u64) -> Result<u64, String> {
        if self.fail {
            Err(format!("invocation {n} failed"))
        } else {
            Ok(n)
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn key_for(caller: usize, keys: usize) -> String {
    format!("key-{}", caller % keys)
}

fn label(outcome: &Result<u64, String>) -> String {
    match outcome {
        Ok(value) => format!("ok({value})"),
        Err(err) => format!("err({err})"),
    }
}

fn record(outcomes: &mut BTreeMap<String, usize>, outcome: &Result<u64, String>) {
    *outcomes.entry(label(outcome)).or_insert(0) += 1;
}

/// Runs every wave against a blocking cache, one OS thread per caller.
///
/// Callers of a wave are released together; the next wave starts `gap` after
/// the previous one has fully returned.
pub fn run_blocking_burst<C>(
    cache: Arc<C>,
    strategy: Strategy,
    plan: &BurstPlan,
) -> Result<BurstReport>
where
    C: Coalesce<u64, String> + 'static,
{
    plan.validate()?;
    let backend = Backend::new(plan.work, plan.fail);
    let mut waves = Vec::with_capacity(plan.waves);

    for wave in 1..=plan.waves {
        if wave > 1 {
            thread::sleep(plan.gap);
        }

        let barrier = Arc::new(Barrier::new(plan.callers));
        let handles: Vec<_> = (0..plan.callers)
            .map(|caller| {
                let cache = cache.clone();
                let backend = backend.clone();
                let barrier = barrier.clone();
                let key = key_for(caller, plan.keys);
                let ttl = plan.ttl;
                thread::spawn(move || {
                    barrier.wait();
                    cache.resolve(&key, ttl, || backend.call_blocking())
                })
            })
            .collect();

        let mut outcomes = BTreeMap::new();
        for handle in handles {
            let outcome = handle
                .join()
                .map_err(|_| anyhow!("caller thread panicked in wave {wave}"))?;
            record(&mut outcomes, &outcome);
        }
        debug!(wave, distinct = outcomes.len(), "Wave finished");
        waves.push(WaveReport { wave, outcomes });
    }

    Ok(BurstReport {
        strategy,
        invocations: backend.calls(),
        waves,
        stats: cache.stats(),
    })
}

/// Runs every wave against the async cache, one task per caller.
pub async fn run_async_burst(
    cache: Arc<AsyncCoalescer<u64, String>>,
    plan: &BurstPlan,
) -> Result<BurstReport> {
    plan.validate()?;
    let backend = Backend::new(plan.work, plan.fail);
    let mut waves = Vec::with_capacity(plan.waves);

    for wave in 1..=plan.waves {
        if wave > 1 {
            tokio::time::sleep(plan.gap).await;
        }

        let mut tasks = JoinSet::new();
        for caller in 0..plan.callers {
            let cache = cache.clone();
            let backend = backend.clone();
            let key = key_for(caller, plan.keys);
            let ttl = plan.ttl;
            tasks.spawn(async move { cache.resolve(&key, ttl, move || backend.call()).await });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(result) = tasks.join_next().await {
            let outcome = result.with_context(|| format!("caller task failed in wave {wave}"))?;
            record(&mut outcomes, &outcome);
        }
        debug!(wave, distinct = outcomes.len(), "Wave finished");
        waves.push(WaveReport { wave, outcomes });
    }

    Ok(BurstReport {
        strategy: Strategy::Async,
        invocations: backend.calls(),
        waves,
        stats: cache.stats(),
    })
}

/// Measures resolve throughput of a warm blocking cache.
pub fn run_blocking_bench<C>(
    cache: Arc<C>,
    strategy: Strategy,
    plan: &BenchPlan,
    progress: &ProgressBar,
) -> Result<BenchReport>
where
    C: Coalesce<u64, String> + 'static,
{
    plan.validate()?;
    let start = Instant::now();

    let handles: Vec<_> = (0..plan.threads)
        .map(|thread_idx| {
            let cache = cache.clone();
            let progress = progress.clone();
            let plan = plan.clone();
            thread::spawn(move || {
                for i in 0..plan.iterations {
                    let key = key_for(thread_idx + i as usize, plan.keys);
                    let _ = cache.resolve(&key, plan.ttl, || Ok(i));
                    if (i + 1) % PROGRESS_STEP == 0 {
                        progress.inc(PROGRESS_STEP);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().map_err(|_| anyhow!("bench thread panicked"))?;
    }

    Ok(bench_report(strategy, plan, start.elapsed(), cache.stats()))
}

/// Measures resolve throughput of a warm async cache.
pub async fn run_async_bench(
    cache: Arc<AsyncCoalescer<u64, String>>,
    plan: &BenchPlan,
    progress: &ProgressBar,
) -> Result<BenchReport> {
    plan.validate()?;
    let start = Instant::now();

    let mut tasks = JoinSet::new();
    for task_idx in 0..plan.threads {
        let cache = cache.clone();
        let progress = progress.clone();
        let plan = plan.clone();
        tasks.spawn(async move {
            for i in 0..plan.iterations {
                let key = key_for(task_idx + i as usize, plan.keys);
                let _ = cache.resolve(&key, plan.ttl, move || async move { Ok(i) }).await;
                if (i + 1) % PROGRESS_STEP == 0 {
                    progress.inc(PROGRESS_STEP);
                }
            }
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.context("bench task failed")?;
    }

    Ok(bench_report(Strategy::Async, plan, start.elapsed(), cache.stats()))
}

fn bench_report(
    strategy: Strategy,
    plan: &BenchPlan,
    elapsed: Duration,
    stats: CacheStats,
) -> BenchReport {
    let elapsed_secs = elapsed.as_secs_f64();
    let operations = plan.total();
    BenchReport {
        strategy,
        operations,
        elapsed_secs,
        ops_per_sec: if elapsed_secs > 0.0 {
            operations as f64 / elapsed_secs
        } else {
            0.0
        },
        stats,
    }
}
