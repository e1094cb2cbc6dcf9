// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that runs a few adapters over a list of words, with one
//! thread spawned per block.

use paramapper::{MapReduce, Monoid, Result};

fn main() -> Result<()> {
    let words = [
        "split", "the", "input", "into", "blocks", "map", "each", "block", "then", "combine",
    ];
    let mapper = MapReduce::new();

    let lengths = mapper.map(3, &words, |w| w.len())?;
    println!("lengths = {lengths:?}");

    let longest = mapper.maximum(3, &words, |a, b| a.len().cmp(&b.len()))?;
    println!("longest = {longest}");

    let total = mapper.map_reduce(3, &words, |w| w.len(), &Monoid::new(0, |a: usize, b| a + b))?;
    println!("total length = {total}");

    let short = mapper.filter(3, &words, |w| w.len() <= 4)?;
    println!("short words = {short:?}");

    println!("joined = {}", mapper.join(3, &words)?);
    Ok(())
}
