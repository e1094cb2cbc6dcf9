// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Common operations expressed as [`MapReduce::work()`] calls.

use super::MapReduce;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt::{Display, Write};
use std::iter::Sum;

/// An associative operator together with its identity element.
///
/// ```rust
/// # use paramapper::{MapReduce, Monoid};
/// let product = Monoid::new(1u64, |a, b| a * b);
/// let factorial = MapReduce::new()
///     .reduce(4, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], &product)
///     .unwrap();
/// assert_eq!(factorial, 3_628_800);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Monoid<T, Op> {
    /// Identity element of the operator.
    pub identity: T,
    /// Associative binary operator.
    pub operator: Op,
}

impl<T, Op> Monoid<T, Op>
where
    T: Clone,
    Op: Fn(T, T) -> T,
{
    /// Creates a monoid from an identity element and an associative operator.
    pub fn new(identity: T, operator: Op) -> Self {
        Self { identity, operator }
    }

    /// Folds the items with the operator, starting from the identity.
    fn fold(&self, items: impl IntoIterator<Item = T>) -> T {
        items
            .into_iter()
            .fold(self.identity.clone(), |acc, item| (self.operator)(acc, item))
    }
}

impl MapReduce<'_> {
    /// Concatenates the string representations of all the values.
    ///
    /// ```rust
    /// # use paramapper::MapReduce;
    /// let joined = MapReduce::new().join(2, &[1, 2, 3]).unwrap();
    /// assert_eq!(joined, "123");
    /// ```
    pub fn join<T>(&self, threads: usize, values: &[T]) -> Result<String>
    where
        T: Display + Sync,
    {
        self.work(
            threads,
            values,
            |block| {
                block.iter().fold(String::new(), |mut joined, value| {
                    // Writing to a string never fails.
                    let _ = write!(joined, "{value}");
                    joined
                })
            },
            |parts| parts.concat(),
        )
    }

    /// Returns the values that satisfy the predicate, in their original order.
    pub fn filter<T>(
        &self,
        threads: usize,
        values: &[T],
        predicate: impl Fn(&T) -> bool + Sync,
    ) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync,
    {
        self.work(
            threads,
            values,
            |block| {
                block
                    .iter()
                    .filter(|value| predicate(*value))
                    .cloned()
                    .collect::<Vec<_>>()
            },
            |blocks| blocks.concat(),
        )
    }

    /// Applies a function to each value, and returns the results in the
    /// original order.
    pub fn map<T, U>(&self, threads: usize, values: &[T], f: impl Fn(&T) -> U + Sync) -> Result<Vec<U>>
    where
        T: Sync,
        U: Send,
    {
        self.work(
            threads,
            values,
            |block| block.iter().map(&f).collect::<Vec<_>>(),
            |blocks| blocks.into_iter().flatten().collect(),
        )
    }

    /// Returns the maximum value with respect to the given comparison
    /// function. If several values are equally maximum, the first one is
    /// returned.
    ///
    /// Fails with [`Error::EmptyInput`] if there is no value.
    ///
    /// ```rust
    /// # use paramapper::{Error, MapReduce};
    /// let mapper = MapReduce::new();
    /// assert_eq!(mapper.maximum(3, &[5, 3, 8, 1, 9, 2], Ord::cmp).unwrap(), &9);
    /// assert!(matches!(
    ///     mapper.maximum(3, &[] as &[i32], Ord::cmp),
    ///     Err(Error::EmptyInput)
    /// ));
    /// ```
    pub fn maximum<'a, T>(
        &self,
        threads: usize,
        values: &'a [T],
        compare: impl Fn(&T, &T) -> Ordering + Sync,
    ) -> Result<&'a T>
    where
        T: Sync,
    {
        if values.is_empty() {
            return Err(Error::EmptyInput);
        }
        // Keeps the earlier value unless the later one is strictly greater.
        let first_max = |a: &'a T, b: &'a T| {
            if compare(b, a) == Ordering::Greater {
                b
            } else {
                a
            }
        };
        self.work(
            threads,
            values,
            |block| block.iter().reduce(first_max),
            |maxima| maxima.into_iter().flatten().reduce(first_max),
        )?
        .ok_or(Error::EmptyInput)
    }

    /// Returns the minimum value with respect to the given comparison
    /// function. If several values are equally minimum, the first one is
    /// returned.
    ///
    /// Fails with [`Error::EmptyInput`] if there is no value.
    pub fn minimum<'a, T>(
        &self,
        threads: usize,
        values: &'a [T],
        compare: impl Fn(&T, &T) -> Ordering + Sync,
    ) -> Result<&'a T>
    where
        T: Sync,
    {
        if values.is_empty() {
            return Err(Error::EmptyInput);
        }
        self.work(
            threads,
            values,
            |block| block.iter().min_by(|a, b| compare(*a, *b)),
            |minima| {
                minima
                    .into_iter()
                    .flatten()
                    .min_by(|a, b| compare(*a, *b))
            },
        )?
        .ok_or(Error::EmptyInput)
    }

    /// Returns whether all the values satisfy the predicate. This is true for
    /// an empty input.
    pub fn all<T>(
        &self,
        threads: usize,
        values: &[T],
        predicate: impl Fn(&T) -> bool + Sync,
    ) -> Result<bool>
    where
        T: Sync,
    {
        self.work(
            threads,
            values,
            |block| block.iter().all(&predicate),
            |matches| matches.into_iter().all(|x| x),
        )
    }

    /// Returns whether any value satisfies the predicate. This is false for an
    /// empty input.
    pub fn any<T>(
        &self,
        threads: usize,
        values: &[T],
        predicate: impl Fn(&T) -> bool + Sync,
    ) -> Result<bool>
    where
        T: Sync,
    {
        self.work(
            threads,
            values,
            |block| block.iter().any(&predicate),
            |matches| matches.into_iter().any(|x| x),
        )
    }

    /// Folds all the values with the given monoid. This returns the identity
    /// for an empty input.
    pub fn reduce<T, Op>(&self, threads: usize, values: &[T], monoid: &Monoid<T, Op>) -> Result<T>
    where
        T: Clone + Send + Sync,
        Op: Fn(T, T) -> T + Sync,
    {
        self.map_reduce(threads, values, T::clone, monoid)
    }

    /// Lifts each value with the given function, and folds the results with
    /// the given monoid. This returns the identity for an empty input.
    ///
    /// ```rust
    /// # use paramapper::{MapReduce, Monoid};
    /// let words = ["map", "reduce", "in", "parallel"];
    /// let total_len = MapReduce::new()
    ///     .map_reduce(2, &words, |word| word.len(), &Monoid::new(0, |a: usize, b| a + b))
    ///     .unwrap();
    /// assert_eq!(total_len, 19);
    /// ```
    pub fn map_reduce<T, R, Op>(
        &self,
        threads: usize,
        values: &[T],
        lift: impl Fn(&T) -> R + Sync,
        monoid: &Monoid<R, Op>,
    ) -> Result<R>
    where
        T: Sync,
        R: Clone + Send + Sync,
        Op: Fn(R, R) -> R + Sync,
    {
        self.work(
            threads,
            values,
            |block| monoid.fold(block.iter().map(&lift)),
            |partials| monoid.fold(partials),
        )
    }

    /// Sums all the values.
    pub fn sum<T>(&self, threads: usize, values: &[T]) -> Result<T>
    where
        T: Copy + Sum + Send + Sync,
    {
        self.work(
            threads,
            values,
            |block| block.iter().copied().sum::<T>(),
            |sums| sums.into_iter().sum(),
        )
    }
}
