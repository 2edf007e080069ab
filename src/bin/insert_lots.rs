// MIT License
//
// Copyright (c) 2019 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Stress driver: streams batches of inserts, lookups and erasures through a
//! map and reports throughput.

use slabhash::{Device, Hashmap};

use std::{
    hash::BuildHasher,
    time::{Duration, Instant},
};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Insert lots of keys into a batched hash map
#[derive(Parser, Debug)]
#[command(name = "insert_lots", version, about, long_about = None)]
struct Cli {
    /// Device to run on, such as CPU:0 or CUDA:0
    #[arg(long, default_value = "CPU:0", env = "SLABHASH_DEVICE")]
    device: Device,

    /// Keys per batch
    #[arg(long, default_value_t = 1 << 16)]
    batch_size: usize,

    /// Stop after this many batches
    #[arg(long, default_value_t = usize::MAX)]
    batches: usize,

    #[arg(long, default_value_t = slabhash::config::DEFAULT_INIT_BUCKETS)]
    init_buckets: usize,

    #[arg(long, default_value_t = slabhash::config::DEFAULT_INIT_CAPACITY)]
    init_capacity: usize,

    /// Stop after this many seconds
    #[arg(long, default_value_t = 5)]
    seconds: u64,
}

fn main() -> slabhash::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut map = Hashmap::builder(8, 8)
        .device(cli.device)
        .init_buckets(cli.init_buckets)
        .init_capacity(cli.init_capacity)
        .build()?;

    info!(device = %cli.device, batch_size = cli.batch_size, "starting");

    // scrambles counters into well-spread keys
    let scrambler = ahash::RandomState::with_seeds(1, 2, 3, 4);
    let deadline = Instant::now() + Duration::from_secs(cli.seconds);
    let start = Instant::now();

    let mut next_key = 0u64;
    let mut num_batches = 0;
    let mut num_inserted = 0;

    while num_batches < cli.batches && Instant::now() < deadline {
        // half of each batch repeats keys from the previous one
        let first = next_key.saturating_sub(cli.batch_size as u64 / 2);
        let keys: Vec<u8> = (first..first + cli.batch_size as u64)
            .flat_map(|i| scrambler.hash_one(i).to_le_bytes())
            .collect();
        next_key = first + cli.batch_size as u64;

        let inserted = map.insert(&keys, &keys)?;
        let found = map.find(&keys)?;
        assert_eq!(found.num_succeeded(), inserted.len());

        // erase every fourth key of the batch
        let erased: Vec<u8> = keys.chunks_exact(8).step_by(4).flatten().copied().collect();
        map.erase(&erased)?;

        num_inserted += inserted.num_succeeded();
        num_batches += 1;

        debug!(
            batch = num_batches,
            inserted = inserted.num_succeeded(),
            size = map.size(),
            capacity = map.capacity(),
            buckets = map.bucket_count(),
            load_factor = map.load_factor(),
            "batch done"
        );
    }

    let elapsed = start.elapsed().as_secs_f64();

    info!(
        batches = num_batches,
        inserted = num_inserted,
        size = map.size(),
        capacity = map.capacity(),
        buckets = map.bucket_count(),
        keys_per_sec = (num_batches * cli.batch_size) as f64 / elapsed,
        "finished"
    );

    Ok(())
}
