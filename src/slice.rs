//! Parallel per-element access to slices.

use crate::job::TaskInfo;
use crate::task_manager::TaskManager;

struct UnsafeSlice<T> {
    slice: *mut [T],
}

// SAFETY: only handed to tasks that touch disjoint indices.
unsafe impl<T: Send> Send for UnsafeSlice<T> {}
unsafe impl<T: Send> Sync for UnsafeSlice<T> {}

impl<T> UnsafeSlice<T> {
    fn new(slice: &mut [T]) -> Self {
        Self {
            slice: slice as *mut [T],
        }
    }

    /// # Safety
    /// No other thread may access `index` while the reference lives.
    unsafe fn get_mut<'a>(&self, index: usize) -> &'a mut T {
        unsafe { &mut (*self.slice)[index] }
    }
}

pub trait ParallelSlice<T> {
    /// Calls `op(i, &self[i])` for every element, one task per pool thread.
    fn par_for_each<F>(&self, pool: &TaskManager, op: F)
    where
        F: Fn(usize, &T) + Sync;
}

pub trait ParallelSliceMut<T> {
    /// Calls `op(i, &mut self[i])` for every element, one task per pool thread.
    fn par_for_each_mut<F>(&mut self, pool: &TaskManager, op: F)
    where
        F: Fn(usize, &mut T) + Sync;
}

impl<T: Sync> ParallelSlice<T> for [T] {
    fn par_for_each<F>(&self, pool: &TaskManager, op: F)
    where
        F: Fn(usize, &T) + Sync,
    {
        let len = self.len();
        pool.shared().run_tasks(pool.num_threads(), &|ti: &TaskInfo| {
            for i in ti.split(0..len) {
                op(i, &self[i]);
            }
        });
    }
}

impl<T: Send> ParallelSliceMut<T> for [T] {
    fn par_for_each_mut<F>(&mut self, pool: &TaskManager, op: F)
    where
        F: Fn(usize, &mut T) + Sync,
    {
        let len = self.len();
        let slice = UnsafeSlice::new(self);
        pool.shared().run_tasks(pool.num_threads(), &|ti: &TaskInfo| {
            for i in ti.split(0..len) {
                // SAFETY: task splits are disjoint, so every index has one writer.
                op(i, unsafe { slice.get_mut(i) });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_par_for_each_mut_touches_every_element_once() {
        let pool = TaskManager::new(4).expect("Start failed");
        let mut data = vec![0usize; 1000];
        data.par_for_each_mut(&pool, |i, x| *x += i * 2);
        assert!(data.iter().enumerate().all(|(i, &x)| x == i * 2));
        pool.stop().expect("Shutdown failed");
    }

    #[test]
    fn test_par_for_each_reads_all() {
        let pool = TaskManager::new(3).expect("Start failed");
        let data: Vec<usize> = (1..=100).collect();
        let sum = AtomicUsize::new(0);
        data.par_for_each(&pool, |_, &x| {
            sum.fetch_add(x, Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), 5050);
        pool.stop().expect("Shutdown failed");
    }

    #[test]
    fn test_empty_slice() {
        let pool = TaskManager::new(2).expect("Start failed");
        let mut data: Vec<u8> = Vec::new();
        data.par_for_each_mut(&pool, |_, _| panic!("no elements"));
        pool.stop().expect("Shutdown failed");
    }
}
