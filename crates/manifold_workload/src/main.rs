//! Workload generator for the batched cache layer.
//!
//! This binary drives read-through, write, and delete batches against an
//! in-process memory cluster backed by a synthetic table of rows, and writes
//! a JSON report with per-operation counts for repeatable measurements.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use manifold_cache::memory::MemoryCluster;
use manifold_cache::{CacheError, ClusterCache, Loader, ScalarCodec, StringKeys};

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "manifold-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

/// CLI options for running the workload.
#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Number of memory shards backing the cluster.
    #[arg(long, default_value_t = 4)]
    shards: usize,

    /// Number of concurrent clients (one thread each).
    #[arg(long, default_value_t = 8)]
    clients: usize,

    /// Number of hot keys. Keys are generated as `{key_prefix}{seed}_k{idx}`.
    #[arg(long, default_value_t = 64)]
    keys: usize,

    /// Key prefix/namespace.
    #[arg(long, default_value = "mf_")]
    key_prefix: String,

    /// Keys per batch operation.
    #[arg(long, default_value_t = 16)]
    batch_size: usize,

    /// Percent of operations that are batch reads.
    #[arg(long, default_value_t = 80)]
    read_pct: u8,

    /// Percent of operations that are batch deletes (the rest are writes).
    #[arg(long, default_value_t = 5)]
    delete_pct: u8,

    /// Cache TTL in seconds; zero or negative disables write-back.
    #[arg(long, default_value_t = 60)]
    ttl: i64,

    /// Total runtime for the workload.
    #[arg(long, default_value = "10s")]
    duration: humantime::Duration,

    /// Random seed (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Write a JSON report to this path.
    #[arg(long, default_value = ".tmp/manifold/report.json")]
    out: PathBuf,
}

/// Metadata embedded in the report for reproducibility.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
struct ReportMeta {
    shards: usize,
    clients: usize,
    keys: usize,
    key_prefix: String,
    batch_size: usize,
    read_pct: u8,
    delete_pct: u8,
    ttl: i64,
    duration_ms: u64,
    seed: u64,
}

/// Aggregated workload counters.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
struct ReportTotals {
    read_batches: u64,
    write_batches: u64,
    delete_batches: u64,
    params_requested: u64,
    cache_hits: u64,
    cache_misses: u64,
    loader_fetches: u64,
    loader_params: u64,
    pipelines: u64,
    commands: u64,
    max_batch_us: u64,
    elapsed_ms: u64,
}

/// Full workload report.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
struct Report {
    meta: ReportMeta,
    totals: ReportTotals,
}

/// Synthetic system of record: every key has a row, and fetches are counted.
struct BackingStore {
    rows: Mutex<HashMap<String, i64>>,
    fetches: AtomicU64,
    fetched_params: AtomicU64,
}

impl BackingStore {
    fn new(keys: &[String]) -> Self {
        let rows = keys
            .iter()
            .enumerate()
            .map(|(idx, key)| (key.clone(), idx as i64))
            .collect();
        Self {
            rows: Mutex::new(rows),
            fetches: AtomicU64::new(0),
            fetched_params: AtomicU64::new(0),
        }
    }
}

struct StoreLoader<'a> {
    store: &'a BackingStore,
}

impl Loader<String, i64> for StoreLoader<'_> {
    fn read_key(&self, param: &String) -> Result<String, CacheError> {
        Ok(param.clone())
    }

    fn fetch(&self, misses: &[String]) -> Result<Vec<(String, i64)>, CacheError> {
        self.store.fetches.fetch_add(1, Ordering::Relaxed);
        self.store
            .fetched_params
            .fetch_add(misses.len() as u64, Ordering::Relaxed);
        let rows = self
            .store
            .rows
            .lock()
            .map_err(|_| CacheError::Transport("backing store lock poisoned".to_string()))?;
        Ok(misses
            .iter()
            .filter_map(|key| rows.get(key).map(|v| (key.clone(), *v)))
            .collect())
    }
}

/// Per-client counters folded into the report totals at the end.
#[derive(Debug, Default, Clone)]
struct ClientStats {
    read_batches: u64,
    write_batches: u64,
    delete_batches: u64,
    params_requested: u64,
    cache_hits: u64,
    cache_misses: u64,
    max_batch_us: u64,
}

/// Parse CLI args and dispatch to the selected subcommand.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    match args.cmd {
        // Run the workload generator.
        Command::Run(args) => run(args),
    }
}

/// Run the workload and write the JSON report.
fn run(args: RunArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.clients > 0, "--clients must be > 0");
    anyhow::ensure!(args.keys > 0, "--keys must be > 0");
    anyhow::ensure!(args.batch_size > 0, "--batch-size must be > 0");
    anyhow::ensure!(args.read_pct <= 100, "--read-pct must be <= 100");
    anyhow::ensure!(
        args.read_pct as u32 + args.delete_pct as u32 <= 100,
        "--read-pct plus --delete-pct must be <= 100"
    );

    let duration: Duration = args.duration.into();
    // Use a random seed when the user provides zero.
    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };

    let keyspace: Vec<String> = (0..args.keys)
        .map(|i| format!("{}{}_k{i}", args.key_prefix, seed))
        .collect();

    let cluster = Arc::new(MemoryCluster::new(args.shards));
    let cache = Arc::new(ClusterCache::new(cluster.clone()));
    let store = Arc::new(BackingStore::new(&keyspace));

    let start = Instant::now();
    let deadline = start + duration;

    let mut tasks = Vec::with_capacity(args.clients);
    for client_id in 0..args.clients {
        let cache = cache.clone();
        let store = store.clone();
        let keyspace = keyspace.clone();
        let run_args = args.clone();
        // Mix the base seed with the client id for deterministic per-client RNG.
        let seed = seed ^ (client_id as u64).wrapping_mul(0x9e3779b97f4a7c15);
        tasks.push(std::thread::spawn(move || {
            run_client(&cache, &store, &keyspace, &run_args, seed, deadline)
        }));
    }

    let mut totals = ClientStats::default();
    for task in tasks {
        let stats = task
            .join()
            .map_err(|_| anyhow::anyhow!("client thread panicked"))??;
        totals.read_batches += stats.read_batches;
        totals.write_batches += stats.write_batches;
        totals.delete_batches += stats.delete_batches;
        totals.params_requested += stats.params_requested;
        totals.cache_hits += stats.cache_hits;
        totals.cache_misses += stats.cache_misses;
        totals.max_batch_us = totals.max_batch_us.max(stats.max_batch_us);
    }

    let report = Report {
        meta: ReportMeta {
            shards: args.shards,
            clients: args.clients,
            keys: args.keys,
            key_prefix: args.key_prefix.clone(),
            batch_size: args.batch_size,
            read_pct: args.read_pct,
            delete_pct: args.delete_pct,
            ttl: args.ttl,
            duration_ms: duration.as_millis() as u64,
            seed,
        },
        totals: ReportTotals {
            read_batches: totals.read_batches,
            write_batches: totals.write_batches,
            delete_batches: totals.delete_batches,
            params_requested: totals.params_requested,
            cache_hits: totals.cache_hits,
            cache_misses: totals.cache_misses,
            loader_fetches: store.fetches.load(Ordering::Relaxed),
            loader_params: store.fetched_params.load(Ordering::Relaxed),
            pipelines: cluster.pipelines_executed(),
            commands: cluster.commands_executed(),
            max_batch_us: totals.max_batch_us,
            elapsed_ms: start.elapsed().as_millis() as u64,
        },
    };

    write_report(&args.out, &report).context("write report")?;
    eprintln!("wrote report: {}", args.out.display());
    Ok(())
}

/// Run one client until the deadline, returning its counters.
fn run_client(
    cache: &ClusterCache,
    store: &BackingStore,
    keyspace: &[String],
    args: &RunArgs,
    seed: u64,
    deadline: Instant,
) -> anyhow::Result<ClientStats> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut stats = ClientStats::default();
    let codec = ScalarCodec::<i64>::new();
    let loader = StoreLoader { store };

    while Instant::now() < deadline {
        let batch: Vec<String> = (0..args.batch_size)
            .map(|_| keyspace[rng.gen_range(0..keyspace.len())].clone())
            .collect();
        let roll = rng.gen_range(0..100u32);
        let op_start = Instant::now();

        if roll < args.read_pct as u32 {
            let result = cache
                .batch_read_pairs(batch.clone(), &loader, &codec, args.ttl)
                .context("batch read failed")?;
            stats.read_batches += 1;
            stats.params_requested += batch.len() as u64;
            stats.cache_hits += result.hit_params.len() as u64;
            stats.cache_misses += result.miss_params.len() as u64;
        } else if roll < args.read_pct as u32 + args.delete_pct as u32 {
            cache
                .batch_delete(&batch, &StringKeys)
                .context("batch delete failed")?;
            stats.delete_batches += 1;
        } else {
            let pairs: Vec<(String, i64)> = {
                let rows = store
                    .rows
                    .lock()
                    .map_err(|_| anyhow::anyhow!("backing store lock poisoned"))?;
                batch
                    .iter()
                    .filter_map(|key| rows.get(key).map(|v| (key.clone(), *v)))
                    .collect()
            };
            cache
                .batch_write(&pairs, &StringKeys, &codec, args.ttl)
                .context("batch write failed")?;
            stats.write_batches += 1;
        }

        let batch_us = op_start.elapsed().as_micros() as u64;
        stats.max_batch_us = stats.max_batch_us.max(batch_us);
    }

    Ok(stats)
}

/// Serialize and write the workload report JSON.
fn write_report(path: &PathBuf, report: &Report) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        // Ensure the output directory exists before writing.
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(report).context("serialize report")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
