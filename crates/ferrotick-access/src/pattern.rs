//! Per-key access statistics used for adaptive TTL, hot-key ranking and
//! preload prediction.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Default capacity of the access-time ring buffer.
pub const DEFAULT_PATTERN_WINDOW: usize = 100;

/// Access history of a single cache key.
#[derive(Debug, Clone)]
pub struct AccessPattern {
    key: String,
    access_count: u64,
    last_access_time: Instant,
    recent_access_times: VecDeque<Instant>,
    capacity: usize,
    avg_interval: Option<Duration>,
}

impl AccessPattern {
    /// Empty pattern; the first access is recorded by the caller.
    pub fn new(key: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            key: key.into(),
            access_count: 0,
            last_access_time: Instant::now(),
            recent_access_times: VecDeque::with_capacity(capacity),
            capacity,
            avg_interval: None,
        }
    }

    pub fn record_access(&mut self) {
        self.record_access_at(Instant::now());
    }

    pub fn record_access_at(&mut self, at: Instant) {
        if self.recent_access_times.len() == self.capacity {
            self.recent_access_times.pop_front();
        }
        self.recent_access_times.push_back(at);
        self.access_count = self.access_count.saturating_add(1);
        self.last_access_time = at;
        self.avg_interval = mean_interval(&self.recent_access_times);
    }

    /// `None` stands for "never": no interval has been observed yet.
    pub fn predict_next_access(&self) -> Option<Instant> {
        self.avg_interval
            .map(|interval| self.last_access_time + interval)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn last_access_time(&self) -> Instant {
        self.last_access_time
    }

    pub fn avg_interval(&self) -> Option<Duration> {
        self.avg_interval
    }

    /// Number of timestamps currently retained in the window.
    pub fn samples(&self) -> usize {
        self.recent_access_times.len()
    }
}

fn mean_interval(times: &VecDeque<Instant>) -> Option<Duration> {
    if times.len() < 2 {
        return None;
    }

    let total: Duration = times
        .iter()
        .zip(times.iter().skip(1))
        .map(|(earlier, later)| later.saturating_duration_since(*earlier))
        .sum();

    Some(total / (times.len() as u32 - 1))
}

/// Keys ordered by access count, highest first, truncated to `top_n`.
///
/// Equal counts are ordered by key so rankings are stable.
pub fn rank_hot_keys(patterns: &HashMap<String, AccessPattern>, top_n: usize) -> Vec<(String, u64)> {
    let mut ranked = patterns
        .values()
        .map(|pattern| (pattern.key.clone(), pattern.access_count))
        .collect::<Vec<_>>();

    ranked.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
    ranked.truncate(top_n);
    ranked
}
