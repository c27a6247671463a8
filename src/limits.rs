use std::{collections::HashMap, time::Duration};

use tokio::{sync::Mutex, time::Instant};

/// Entries older than this many intervals are pruned when the map grows.
const STALE_AFTER_INTERVALS: u32 = 60;
const PRUNE_THRESHOLD: usize = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRejected {
    pub retry_after: Duration,
}

/// Admits at most one call per `min_interval` for each caller id.
#[derive(Debug)]
pub struct CallLimiter {
    min_interval: Duration,
    last_calls: Mutex<HashMap<String, Instant>>,
}

impl CallLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn check_and_record(&self, caller_id: &str) -> Result<(), CallRejected> {
        self.check_and_record_at(caller_id, Instant::now()).await
    }

    /// Rejected calls do not move the caller's window.
    pub async fn check_and_record_at(
        &self,
        caller_id: &str,
        now: Instant,
    ) -> Result<(), CallRejected> {
        let mut last_calls = self.last_calls.lock().await;

        if let Some(last) = last_calls.get(caller_id) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.min_interval {
                return Err(CallRejected {
                    retry_after: self.min_interval - elapsed,
                });
            }
        }

        if last_calls.len() >= PRUNE_THRESHOLD {
            let stale = self.min_interval * STALE_AFTER_INTERVALS;
            last_calls.retain(|_, last| now.saturating_duration_since(*last) < stale);
        }
        last_calls.insert(caller_id.to_owned(), now);
        Ok(())
    }
}
