use anyhow::{ensure, Context, Result};
use brrtpool::logging::{init_logging, LogConfig};
use brrtpool::runtime_config::RuntimeConfig;
use brrtpool::{MetricsSnapshot, Pool, PoolConfig, Publisher, Responder};
use clap::Parser;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::info;

/// Drive a pool with an echo handler and report how the work was delivered
#[derive(Parser)]
#[command(name = "brrtpool-stress")]
#[command(about = "brrtpool stress runner", long_about = None)]
struct Args {
    /// Number of worker coroutines
    #[arg(short, long, env = "BRRTP_WORKERS", default_value_t = 5)]
    workers: usize,

    /// Number of payloads to publish
    #[arg(short, long, default_value_t = 10_000)]
    tasks: usize,

    /// Upper bound on the per-task handler delay in microseconds (0 disables)
    #[arg(short, long, default_value_t = 0)]
    delay_us: u64,

    /// Coroutine stack size, decimal or 0x hex
    #[arg(long, default_value = "0x10000", value_parser = parse_stack)]
    stack_size: usize,

    /// Print the report as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Enable structured logging from BRRTP_LOG_* variables
    #[arg(long, default_value_t = false)]
    log: bool,
}

fn parse_stack(value: &str) -> Result<usize, String> {
    brrtpool::runtime_config::parse_stack_size(value)
        .ok_or_else(|| format!("invalid stack size: {value}"))
}

#[derive(Serialize)]
struct Report {
    workers: usize,
    tasks: usize,
    received: usize,
    elapsed_ms: u128,
    tasks_per_sec: f64,
    metrics: MetricsSnapshot,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.log {
        init_logging(&LogConfig::from_env())?;
    }
    RuntimeConfig::from_env().apply();

    let pool = Pool::new(PoolConfig::new(args.workers, args.stack_size))
        .context("Failed to start pool")?;
    let delay_us = args.delay_us;
    let (publisher, responses) =
        pool.register(move |_p: &Publisher<u64>, n: u64, out: &Responder<u64>| {
            if delay_us > 0 {
                // Deterministic spread so runs are comparable
                may::coroutine::sleep(Duration::from_micros(n.wrapping_mul(7919) % delay_us));
            }
            let _ = out.send(n);
        });

    info!(workers = args.workers, tasks = args.tasks, "Stress run started");
    let start = Instant::now();
    for n in 0..args.tasks as u64 {
        publisher.publish(n);
    }

    // The pool is consumed by shutdown, so take the final snapshot just before
    let tasks = args.tasks as u64;
    let shutdown = std::thread::spawn(move || {
        while !(pool.is_idle() && pool.metrics().completed == tasks) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let metrics = pool.metrics();
        pool.shutdown();
        metrics
    });

    let mut counts: HashMap<u64, usize> = HashMap::with_capacity(args.tasks);
    for n in responses.iter() {
        *counts.entry(n).or_insert(0) += 1;
    }
    let elapsed = start.elapsed();
    let metrics = shutdown
        .join()
        .map_err(|_| anyhow::anyhow!("shutdown thread panicked"))?;

    let received: usize = counts.values().sum();
    ensure!(
        received == args.tasks && counts.len() == args.tasks,
        "lost or duplicated work: published {}, received {} ({} distinct)",
        args.tasks,
        received,
        counts.len()
    );

    let report = Report {
        workers: args.workers,
        tasks: args.tasks,
        received,
        elapsed_ms: elapsed.as_millis(),
        tasks_per_sec: args.tasks as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        metrics,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("workers:         {}", report.workers);
        println!("tasks:           {}", report.tasks);
        println!("elapsed:         {} ms", report.elapsed_ms);
        println!("throughput:      {:.0} tasks/s", report.tasks_per_sec);
        println!("direct handoffs: {}", metrics.direct_handoffs);
        println!("backlogged:      {}", metrics.backlogged);
        println!("drains started:  {}", metrics.drains_started);
        println!("peak drains:     {}", metrics.peak_drains);
    }

    Ok(())
}
