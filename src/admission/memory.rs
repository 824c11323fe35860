//! In-process admission counters

use super::{AdmissionBackend, Decision};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
struct Counter {
    count: u32,
    started: Instant,
}

/// Fixed-window counters held in this process
///
/// A window starts with the first request for a key and resets on the first
/// request arriving strictly later than `window` after that start.
#[derive(Debug)]
pub struct MemoryBackend {
    requests_max: u32,
    window: Duration,
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new(requests_max: u32, window: Duration) -> Self {
        Self {
            requests_max,
            window,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently tracked
    pub async fn tracked_keys(&self) -> usize {
        self.counters.lock().await.len()
    }
}

#[async_trait]
impl AdmissionBackend for MemoryBackend {
    async fn check(&self, key: &str) -> Result<Decision> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;

        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            started: now,
        });

        if now.duration_since(counter.started) > self.window {
            counter.count = 0;
            counter.started = now;
        }

        let count = counter.count;
        let decision = if count >= self.requests_max {
            Decision {
                allowed: false,
                count,
            }
        } else {
            counter.count += 1;
            Decision {
                allowed: true,
                count,
            }
        };

        Ok(decision)
    }

    async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|_, c| now.duration_since(c.started) <= self.window);
        before - counters.len()
    }

    fn needs_sweeping(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
