// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that computes the sum of a slice on a worker pool, and
//! checks it against a serial sum.

use paramapper::{CpuPinningPolicy, MapReduce, Result, ThreadCount, WorkerPoolBuilder};
use std::hint::black_box;

fn main() -> Result<()> {
    let pool = WorkerPoolBuilder {
        num_threads: ThreadCount::AvailableParallelism,
        cpu_pinning: CpuPinningPolicy::IfSupported,
        queue_capacity: usize::MAX,
    }
    .build()?;
    let mapper = MapReduce::with_pool(&pool);

    let input_size = 1_000_000;
    let input = (0..input_size).collect::<Vec<u64>>();

    let sum = mapper.sum(pool.num_threads().get(), black_box(&input))?;
    assert_eq!(sum, input.iter().sum::<u64>());
    println!("sum = {sum}");
    Ok(())
}
