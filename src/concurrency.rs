//! Bounded worker pool with an explicit join barrier per submitted group.

use anyhow::{Context, Result};
use rayon::prelude::*;

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    width: usize,
}

impl WorkerPool {
    /// At most `width` items of a group run at once.
    pub fn new(width: usize, name: &'static str) -> Result<Self> {
        let width = width.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .thread_name(move |i| format!("{name}-{i}"))
            .build()
            .with_context(|| format!("build {name} pool ({width} threads)"))?;
        Ok(Self { pool, width })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run `f` over every item and return once all have finished.
    /// Output order follows input order; completion order is unspecified.
    pub fn map_barrier<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        if self.width <= 1 {
            return items.iter().map(f).collect();
        }
        self.pool.install(|| items.par_iter().map(f).collect())
    }
}
