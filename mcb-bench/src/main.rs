//! # Client Benchmark Harness
//!
//! Purpose: Drive a memcached server (or cluster) through the mcb client so
//! set/get throughput and latency can be compared over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Use a fixed PRNG seed for stable comparisons.
//! 2. **Allocation Control**: Pre-build keys/values to keep setup costs off the hot path.
//! 3. **Same Code Path as Users**: Every operation goes through `Client`, so
//!    routing, framing and buffer reuse are all measured.
//!
//! ## Usage
//!
//! ```text
//! mcb-bench [servers|config.json] [ops] [value_size] [key_count]
//! ```
//!
//! `RUST_LOG` controls log verbosity (default `info`).

use std::env;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mcb_client::{Client, ClientError, Config, ServerAddr, Status};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVERS: &str = "127.0.0.1:11211";
const DEFAULT_OP_COUNT: usize = 100_000;
const DEFAULT_VALUE_SIZE: usize = 128;
const DEFAULT_KEY_COUNT: usize = 1 << 12;
const SEED: u64 = 0x9e37_79b9_7f4a_7c15;

struct BenchConfig {
    target: String,
    op_count: usize,
    value_size: usize,
    key_count: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let target = args.next().unwrap_or_else(|| DEFAULT_SERVERS.to_string());
        let op_count = parse_usize(args.next(), DEFAULT_OP_COUNT).max(1);
        let value_size = parse_usize(args.next(), DEFAULT_VALUE_SIZE);
        let key_count = parse_usize(args.next(), DEFAULT_KEY_COUNT).max(1);

        BenchConfig {
            target,
            op_count,
            value_size,
            key_count,
        }
    }

    fn client_config(&self) -> Result<Config> {
        if self.target.ends_with(".json") {
            return Config::from_json_file(&self.target)
                .with_context(|| format!("loading config from {}", self.target));
        }
        let servers = ServerAddr::parse_list(&self.target)
            .with_context(|| format!("parsing server list {:?}", self.target))?;
        Ok(Config::with_servers(servers))
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// Tiny deterministic PRNG; keeps the key sequence reproducible.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, len: usize) -> usize {
        (self.next_u64() % len as u64) as usize
    }
}

fn build_keys(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("mcb-bench:{:08}", i).into_bytes())
        .collect()
}

fn build_value(size: usize) -> Vec<u8> {
    (0..size).map(|i| b'a' + (i % 26) as u8).collect()
}

fn report(label: &str, ops: usize, errors: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops as f64);
    info!(
        phase = label,
        ops,
        errors,
        elapsed_s = (secs * 1000.0).round() / 1000.0,
        ops_per_sec = ops_per_sec.round(),
        us_per_op = (micros_per_op * 10.0).round() / 10.0,
        "phase complete"
    );
}

fn bench_set(client: &Client, keys: &[Vec<u8>], value: &[u8], config: &BenchConfig) -> Result<()> {
    let mut rng = XorShift64::new(SEED);
    let mut errors = 0;
    let start = Instant::now();
    for _ in 0..config.op_count {
        let key = &keys[rng.next_index(keys.len())];
        if let Err(err) = client.set(key, value, 0, 0, 0) {
            if !err.is_network() {
                return Err(err).context("set failed");
            }
            errors += 1;
        }
    }
    report("set", config.op_count, errors, start.elapsed());
    Ok(())
}

fn bench_get(client: &Client, keys: &[Vec<u8>], config: &BenchConfig) -> Result<()> {
    let mut rng = XorShift64::new(SEED ^ 0xffff);
    let mut errors = 0;
    let mut misses = 0;
    let start = Instant::now();
    for _ in 0..config.op_count {
        let key = &keys[rng.next_index(keys.len())];
        match client.get(key) {
            Ok(item) => debug_assert_eq!(item.value.len(), config.value_size),
            Err(ClientError::Status(Status::KeyNotFound)) => misses += 1,
            Err(err) if err.is_network() => errors += 1,
            Err(err) => return Err(err).context("get failed"),
        }
    }
    report("get", config.op_count, errors, start.elapsed());
    if misses > 0 {
        warn!(misses, "get phase saw missing keys");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bench = BenchConfig::from_args();
    let client = Client::new(bench.client_config()?).context("building client")?;
    let servers: Vec<String> = client.cluster().servers().map(ToString::to_string).collect();
    info!(
        servers = ?servers,
        ops = bench.op_count,
        value_size = bench.value_size,
        keys = bench.key_count,
        "starting benchmark"
    );

    let versions = client.version().context("server unreachable")?;
    for (server, version) in &versions {
        info!(server = %server, version = %version, "server online");
    }

    let keys = build_keys(bench.key_count);
    let value = build_value(bench.value_size);

    bench_set(&client, &keys, &value, &bench)?;
    bench_get(&client, &keys, &bench)?;

    let stats = client.stats().context("collecting stats")?;
    for (server, stats) in &stats {
        info!(
            server = %server,
            get_hits = stats.get("get_hits").map(String::as_str).unwrap_or("?"),
            get_misses = stats.get("get_misses").map(String::as_str).unwrap_or("?"),
            "server stats"
        );
    }

    client.quit();
    Ok(())
}
