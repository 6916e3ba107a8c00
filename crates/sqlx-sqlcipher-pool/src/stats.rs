//! Rolling query timing statistics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Aggregated pool state returned by [`crate::SqlCipherPool::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
   /// Connections currently checked out, the writer included
   pub active_connections: usize,
   /// Open connections waiting in the pool, the writer included
   pub idle_connections: usize,
   /// Open read connections, active or idle
   pub read_connections: usize,
   pub max_read_connections: usize,
   pub total_queries: u64,
   pub slow_queries: u64,
   /// Samples currently held in the rolling window
   pub sampled_queries: usize,
   /// Mean over the rolling window; zero before the first operation
   pub avg_query_time: Duration,
}

/// Collects a duration sample for every operation that reached the engine.
#[derive(Debug)]
pub struct QueryStats {
   window: Mutex<VecDeque<Duration>>,
   capacity: usize,
   slow_threshold: Duration,
   total_queries: AtomicU64,
   slow_queries: AtomicU64,
}

impl QueryStats {
   pub fn new(capacity: usize, slow_threshold: Duration) -> Self {
      let capacity = capacity.max(1);
      Self {
         window: Mutex::new(VecDeque::with_capacity(capacity)),
         capacity,
         slow_threshold,
         total_queries: AtomicU64::new(0),
         slow_queries: AtomicU64::new(0),
      }
   }

   /// Records one sample. Returns `true` if it counted as slow.
   pub fn record(&self, elapsed: Duration) -> bool {
      {
         let mut window = self.window.lock();
         if window.len() == self.capacity {
            window.pop_front();
         }
         window.push_back(elapsed);
      }

      self.total_queries.fetch_add(1, Ordering::Relaxed);

      let slow = elapsed > self.slow_threshold;
      if slow {
         self.slow_queries.fetch_add(1, Ordering::Relaxed);
      }
      slow
   }

   pub fn total_queries(&self) -> u64 {
      self.total_queries.load(Ordering::Relaxed)
   }

   pub fn slow_queries(&self) -> u64 {
      self.slow_queries.load(Ordering::Relaxed)
   }

   pub fn slow_threshold(&self) -> Duration {
      self.slow_threshold
   }

   /// Number of samples currently in the rolling window
   pub fn window_len(&self) -> usize {
      self.window.lock().len()
   }

   pub fn average(&self) -> Duration {
      let window = self.window.lock();
      if window.is_empty() {
         return Duration::ZERO;
      }
      let sum: Duration = window.iter().sum();
      sum / window.len() as u32
   }
}
