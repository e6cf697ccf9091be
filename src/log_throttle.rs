//! Per-key log throttling ("anti-spam"), an ergonomic helper only — it never
//! gates behavior, only whether a line is emitted. Grounded on
//! `AntiSpamLogger` in `src/ntrip.py:33` of the original, generalized from a
//! single global instance into a small keyed token bucket any caller can
//! hold (see spec §9: "keep as an ergonomic helper, not a behavioral
//! contract").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    window_start: Instant,
    count: u32,
}

/// Suppresses repeats of the same `key` beyond `max_count` within
/// `time_window`, returning how many were suppressed once the window rolls
/// over so callers can log a single "suppressed N" summary.
pub struct LogThrottle {
    time_window: Duration,
    max_count: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl LogThrottle {
    pub fn new(time_window: Duration, max_count: u32) -> Self {
        LogThrottle {
            time_window,
            max_count,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if a line keyed by `key` should be logged now.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            window_start: now,
            count: 0,
        });

        if now.duration_since(bucket.window_start) > self.time_window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        bucket.count += 1;
        bucket.count <= self.max_count
    }

    /// Number of times `key` has been suppressed in the current window.
    pub fn suppressed_count(&self, key: &str) -> u32 {
        let buckets = self.buckets.lock();
        match buckets.get(key) {
            Some(b) if b.count > self.max_count => b.count - self.max_count,
            _ => 0,
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        LogThrottle::new(Duration::from_secs(60), 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_after_max_count() {
        let throttle = LogThrottle::new(Duration::from_secs(60), 3);
        let key = "rtcm_parse_error:BASE1";
        for _ in 0..3 {
            assert!(throttle.should_log(key));
        }
        assert!(!throttle.should_log(key));
        assert_eq!(throttle.suppressed_count(key), 1);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let throttle = LogThrottle::new(Duration::from_secs(60), 1);
        assert!(throttle.should_log("a"));
        assert!(throttle.should_log("b"));
    }
}
