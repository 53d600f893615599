//! Cost-balanced partitioning of an index range.
//!
//! [`Partitioning::calc`] cuts `0..n` into `size` contiguous buckets so
//! that every bucket carries roughly the same share of the total cost.
//! Loops over a partitioning assign a fixed number of tasks to each
//! bucket; see [`TaskManager::parallel_for_partitioned`].
//!
//! [`TaskManager::parallel_for_partitioned`]: crate::TaskManager::parallel_for_partitioned

use crate::error::{Error, Result};
use crate::slice::ParallelSliceMut;
use crate::task_manager::TaskManager;
use std::ops::Range;

/// Boundaries `b[0] = 0 <= b[1] <= ... <= b[size] = n`; bucket `i` is `b[i]..b[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitioning {
    boundaries: Vec<usize>,
}

impl Partitioning {
    /// Splits `0..n` into `size` buckets of balanced `cost`.
    ///
    /// Boundary `k` is the first position whose prefix cost reaches
    /// `total * k / size`. With all costs zero every inner boundary is 0.
    pub fn calc<F>(n: usize, cost: F, size: usize) -> Result<Self>
    where
        F: Fn(usize) -> u64,
    {
        if size == 0 {
            return Err(Error::EmptyPartitioning);
        }
        let costs: Vec<u64> = (0..n).map(cost).collect();
        Ok(Self::from_costs(&costs, size))
    }

    /// Like [`calc`](Self::calc), evaluating `cost` on the pool.
    pub fn calc_parallel<F>(pool: &TaskManager, n: usize, cost: F, size: usize) -> Result<Self>
    where
        F: Fn(usize) -> u64 + Sync,
    {
        if size == 0 {
            return Err(Error::EmptyPartitioning);
        }
        let mut costs = vec![0u64; n];
        costs.par_for_each_mut(pool, |i, c| *c = cost(i));
        Ok(Self::from_costs(&costs, size))
    }

    /// Equal-sized buckets, as produced by [`split`](crate::split).
    pub fn uniform(n: usize, size: usize) -> Result<Self> {
        Self::calc(n, |_| 1, size)
    }

    fn from_costs(costs: &[u64], size: usize) -> Self {
        let n = costs.len();
        let mut prefix = Vec::with_capacity(n + 1);
        let mut sum: u128 = 0;
        prefix.push(0);
        for &c in costs {
            sum += u128::from(c);
            prefix.push(sum);
        }
        let total = sum;

        let mut boundaries = Vec::with_capacity(size + 1);
        boundaries.push(0);
        for k in 1..size {
            let threshold = total * k as u128 / size as u128;
            boundaries.push(prefix.partition_point(|&p| p < threshold));
        }
        boundaries.push(n);
        Partitioning { boundaries }
    }

    /// Number of buckets.
    pub fn size(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Indices of bucket `i`.
    pub fn bucket(&self, i: usize) -> Range<usize> {
        self.boundaries[i]..self.boundaries[i + 1]
    }

    /// The whole partitioned range, `0..n`.
    pub fn range(&self) -> Range<usize> {
        0..self.boundaries[self.size()]
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    /// Iterates over the buckets in order.
    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.boundaries.windows(2).map(|w| w[0]..w[1])
    }

    /// Tasks each bucket gets when a loop runs `ntasks` tasks over it.
    pub(crate) fn tasks_per_bucket(&self, ntasks: usize) -> Result<usize> {
        if ntasks == 0 {
            return Err(Error::NoTasks);
        }
        if ntasks % self.size() != 0 {
            return Err(Error::PartitionMismatch {
                ntasks,
                parts: self.size(),
            });
        }
        Ok(ntasks / self.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_costs_give_even_buckets() {
        let part = Partitioning::calc(16, |_| 1, 4).unwrap();
        assert_eq!(part.boundaries(), &[0, 4, 8, 12, 16]);
        assert_eq!(part.bucket(2), 8..12);
        assert_eq!(part.range(), 0..16);
    }

    #[test]
    fn test_three_equal_buckets() {
        let part = Partitioning::calc(12, |_| 1, 3).unwrap();
        assert_eq!(part.boundaries(), &[0, 4, 8, 12]);
    }

    #[test]
    fn test_uniform_bucket_sizes_differ_by_at_most_one() {
        for n in 0..60 {
            for size in 1..13 {
                let part = Partitioning::calc(n, |_| 1, size).unwrap();
                let sizes: Vec<usize> = part.iter().map(|r| r.len()).collect();
                let max = sizes.iter().copied().max().unwrap();
                let min = sizes.iter().copied().min().unwrap();
                assert!(max - min <= 1, "n={n} size={size}: {sizes:?}");
                assert_eq!(sizes.iter().sum::<usize>(), n);
            }
        }
    }

    #[test]
    fn test_heavy_tail_shrinks_last_buckets() {
        // Cost i: the later indices dominate.
        let part = Partitioning::calc(100, |i| i as u64, 4).unwrap();
        let sizes: Vec<usize> = part.iter().map(|r| r.len()).collect();
        assert!(sizes[0] > sizes[3], "sizes: {sizes:?}");
        assert_eq!(sizes.iter().sum::<usize>(), 100);
    }

    #[test]
    fn test_boundaries_are_monotonic_and_anchored() {
        let part = Partitioning::calc(37, |i| (i * 7 % 5) as u64, 6).unwrap();
        let b = part.boundaries();
        assert_eq!(b[0], 0);
        assert_eq!(*b.last().unwrap(), 37);
        assert!(b.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(part.size(), 6);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(Partitioning::calc(10, |_| 1, 0), Err(Error::EmptyPartitioning));
    }

    #[test]
    fn test_all_zero_costs() {
        let part = Partitioning::calc(5, |_| 0, 3).unwrap();
        assert_eq!(part.boundaries(), &[0, 0, 0, 5]);
    }

    #[test]
    fn test_tasks_per_bucket() {
        let part = Partitioning::uniform(8, 4).unwrap();
        assert_eq!(part.tasks_per_bucket(8), Ok(2));
        assert_eq!(
            part.tasks_per_bucket(6),
            Err(Error::PartitionMismatch { ntasks: 6, parts: 4 })
        );
        assert_eq!(part.tasks_per_bucket(0), Err(Error::NoTasks));
    }

    #[test]
    fn test_calc_parallel_matches_sequential() {
        let pool = TaskManager::new(3).expect("Start failed");
        let cost = |i: usize| (i % 11) as u64 + 1;
        let parallel = Partitioning::calc_parallel(&pool, 200, cost, 5).unwrap();
        assert_eq!(parallel, Partitioning::calc(200, cost, 5).unwrap());
        pool.stop().expect("Shutdown failed");
    }
}
