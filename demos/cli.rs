// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to run examples of split/map/reduce operations.
//!
//! Logs are printed when the `log` feature is enabled, with the level set by
//! the `RUST_LOG` environment variable.

use clap::{Parser, ValueEnum};
use paramapper::{
    CancellationToken, CpuPinningPolicy, Error, MapReduce, ThreadCount, WorkerPoolBuilder,
};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::process::ExitCode;
use std::time::Duration;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.backend {
        Backend::Threads => run(&cli, MapReduce::new()),
        Backend::Pool => {
            let pool = match (WorkerPoolBuilder {
                num_threads: match cli.num_threads {
                    Some(num_threads) => ThreadCount::Count(num_threads),
                    None => ThreadCount::AvailableParallelism,
                },
                cpu_pinning: if cli.pin_cpus {
                    CpuPinningPolicy::IfSupported
                } else {
                    CpuPinningPolicy::No
                },
                queue_capacity: cli.queue_capacity,
            })
            .build()
            {
                Ok(pool) => pool,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let result = run(&cli, MapReduce::with_pool(&pool));
            pool.close();
            println!("tasks executed per worker = {:?}", pool.tasks_executed());
            result
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, mapper: MapReduce) -> Result<(), Error> {
    let token = CancellationToken::new();
    let mapper = mapper.with_token(token.clone());
    let blocks = cli.blocks;

    std::thread::scope(|s| -> Result<(), Error> {
        if let Some(cancel_after_ms) = cli.cancel_after_ms {
            let token = token.clone();
            s.spawn(move || {
                std::thread::sleep(Duration::from_millis(cancel_after_ms));
                token.cancel();
            });
        }

        let result: Result<(), Error> = match cli.scenario {
            Scenario::Sum => {
                let input = (0..cli.input_size).collect::<Vec<u64>>();
                let sum = mapper.sum(blocks, black_box(&input))?;
                println!("sum = {sum}");
                Ok(())
            }
            Scenario::Max => {
                let input = (0..cli.input_size)
                    .map(|x| x.wrapping_mul(0x9E37_79B9_7F4A_7C15))
                    .collect::<Vec<u64>>();
                let max = mapper.maximum(blocks, black_box(&input), Ord::cmp)?;
                println!("max = {max}");
                Ok(())
            }
            Scenario::Filter => {
                let input = fill_needles(cli.input_size as usize, cli.density);
                let indices = (0..input.len()).collect::<Vec<usize>>();
                let found = mapper.filter(blocks, black_box(&indices), |&i| input[i])?;
                println!("found {} needles, first = {:?}", found.len(), found.first());
                Ok(())
            }
            Scenario::Any => {
                let input = fill_needles(cli.input_size as usize, cli.density);
                let found = mapper.any(blocks, black_box(&input), |x| *x)?;
                println!("found = {found}");
                Ok(())
            }
            Scenario::Slow => {
                // Each item takes a millisecond, to observe cancellation.
                let input = (0..cli.input_size).collect::<Vec<u64>>();
                let count = mapper.work(
                    blocks,
                    black_box(&input),
                    |block| {
                        for _ in block {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                        block.len()
                    },
                    |lengths| lengths.into_iter().sum::<usize>(),
                )?;
                println!("processed {count} items");
                Ok(())
            }
        };
        // Unblock the cancelling thread, if any.
        token.cancel();
        result
    })
}

/// Creates a vector of `input_size` booleans, `density` of which are set to
/// [`true`] (the needles). The set of needles follows a uniform distribution,
/// but is fixed by a constant-time seed for reproducibility.
fn fill_needles(input_size: usize, density: usize) -> Vec<bool> {
    let mut input = vec![false; input_size];

    let mut rng = ChaCha12Rng::seed_from_u64(42);
    let needles = index::sample(&mut rng, input_size, density.min(input_size));
    for needle in needles {
        input[needle] = true;
    }

    input
}

/// CLI tool to run examples of split/map/reduce operations.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Where blocks are processed.
    #[arg(long, value_enum, default_value_t = Backend::Pool)]
    backend: Backend,

    /// Number of worker threads in the pool. Default to the available
    /// parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Whether to pin worker threads to CPUs, if supported.
    #[arg(long, default_value_t = false)]
    pin_cpus: bool,

    /// Maximum number of pending tasks in the pool's queue.
    #[arg(long, default_value_t = usize::MAX)]
    queue_capacity: usize,

    /// Number of blocks to split the input into.
    #[arg(long, default_value_t = 8)]
    blocks: usize,

    /// Scenario to run in parallel.
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Number of items in the input.
    #[arg(long, default_value_t = 1_000_000)]
    input_size: u64,

    /// Number of items that match the search. Used only for the filter and
    /// any scenarios.
    #[arg(long, default_value_t = 1)]
    density: usize,

    /// Cancel the operation after the given number of milliseconds.
    #[arg(long)]
    cancel_after_ms: Option<u64>,
}

/// Where blocks are processed.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    /// On a worker pool.
    Pool,
    /// On threads spawned for the operation.
    Threads,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
enum Scenario {
    /// Sum a slice of numbers.
    Sum,
    /// Find the maximum of a slice of pseudo-random numbers.
    Max,
    /// Find the indices of all the needles.
    Filter,
    /// Find whether there is any needle.
    Any,
    /// Process items slowly.
    Slow,
}
