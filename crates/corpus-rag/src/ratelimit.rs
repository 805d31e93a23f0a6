//! Sliding-window rate limiter for outbound provider calls
//!
//! One limiter caps the combined request rate across every provider and
//! every concurrent upload. Service tags exist for statistics only and
//! never grant extra budget.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// A recorded (or reserved) request slot. Reservations carry a timestamp in
/// the future; they are trimmed once they age out of the window like any
/// other entry.
#[derive(Debug)]
struct Entry {
    at: Instant,
    service: String,
}

/// Shared sliding-window limiter.
///
/// When the window is full, callers are handed paced reservations spaced
/// `min_delay = window / max_rpm * 1.1` apart, so saturated traffic settles
/// slightly under the configured budget instead of bursting at window edges.
pub struct RateLimiter {
    max_rpm: usize,
    window: Duration,
    min_delay: Duration,
    entries: Mutex<VecDeque<Entry>>,
}

/// Snapshot of limiter state, shaped for `GET /rate-limit-stats`
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub global: GlobalStats,
    pub services: BTreeMap<String, ServiceStats>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub current_rpm: usize,
    pub max_rpm: usize,
    pub utilization_percent: f64,
    pub min_delay_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub current_rpm: usize,
}

impl RateLimiter {
    pub fn new(max_rpm: usize, window: Duration) -> Self {
        let max_rpm = max_rpm.max(1);
        let min_delay = window.mul_f64(1.1).div_f64(max_rpm as f64);
        tracing::info!(
            max_rpm,
            min_delay_ms = min_delay.as_millis() as u64,
            "rate limiter initialized"
        );
        Self {
            max_rpm,
            window,
            min_delay,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Reserve a slot and return how long the caller must wait before using
    /// it. Zero means the request may go out immediately. Never blocks.
    pub fn acquire(&self, service: &str) -> Duration {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::trim(&mut entries, now, self.window);

        if entries.len() < self.max_rpm {
            entries.push_back(Entry {
                at: now,
                service: service.to_string(),
            });
            return Duration::ZERO;
        }

        // Window full: pace this caller min_delay past the newest reservation.
        let newest = entries.back().map(|e| e.at).unwrap_or(now).max(now);
        let slot = newest + self.min_delay;
        entries.push_back(Entry {
            at: slot,
            service: service.to_string(),
        });
        let delay = slot - now;
        tracing::warn!(
            service,
            delay_ms = delay.as_millis() as u64,
            in_window = entries.len(),
            max_rpm = self.max_rpm,
            "rate limit saturated, delaying request"
        );
        delay
    }

    /// Reserve a slot only if one is free right now. Used by the inbound
    /// middleware, which rejects rather than queues.
    pub fn try_acquire(&self, service: &str) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::trim(&mut entries, now, self.window);

        if entries.len() < self.max_rpm {
            entries.push_back(Entry {
                at: now,
                service: service.to_string(),
            });
            Ok(())
        } else {
            let newest = entries.back().map(|e| e.at).unwrap_or(now).max(now);
            Err((newest + self.min_delay) - now)
        }
    }

    /// Acquire a slot and sleep out the delay. Returns the delay in seconds.
    /// The sleep happens outside the lock; cancellation mid-sleep forfeits
    /// the reservation, which is bounded and acceptable.
    pub async fn request(&self, service: &str) -> f64 {
        let delay = self.acquire(service);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay.as_secs_f64()
    }

    pub fn stats(&self) -> RateLimitStats {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::trim(&mut entries, now, self.window);

        // Reservations in the future have not gone out yet; exclude them.
        let mut services: BTreeMap<String, ServiceStats> = BTreeMap::new();
        let mut current = 0usize;
        for entry in entries.iter().filter(|e| e.at <= now) {
            current += 1;
            services
                .entry(entry.service.clone())
                .or_insert(ServiceStats { current_rpm: 0 })
                .current_rpm += 1;
        }

        RateLimitStats {
            global: GlobalStats {
                current_rpm: current,
                max_rpm: self.max_rpm,
                utilization_percent: current as f64 / self.max_rpm as f64 * 100.0,
                min_delay_seconds: self.min_delay.as_secs_f64(),
            },
            services,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn max_rpm(&self) -> usize {
        self.max_rpm
    }

    fn trim(entries: &mut VecDeque<Entry>, now: Instant, window: Duration) {
        while let Some(front) = entries.front() {
            if now.saturating_duration_since(front.at) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }
    }
}
