//! Sliding-window rate limiting for the inspecting proxy
//!
//! Every accepted connection attempt is recorded. Once more than
//! `max_requests` arrivals fall inside the trailing window, connections are
//! treated as a likely denial-of-service source and rejected. Rejected
//! arrivals stay recorded, so a client that keeps hammering keeps tripping
//! the limiter.
//!
//! This is a fixed sliding-window counter, not a token bucket: a burst that
//! straddles the window boundary can admit up to twice `max_requests` within
//! just under two windows.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::InspectionConfig;
use crate::error::{Result, TollgateError};

/// Rate limiter for inbound connections
pub struct RateLimiter {
    /// Arrival times, oldest first
    arrivals: Arc<Mutex<VecDeque<Instant>>>,
    /// Trailing span arrivals are counted over
    window: Duration,
    /// Arrivals tolerated inside the window
    max_requests: usize,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            arrivals: Arc::new(Mutex::new(VecDeque::with_capacity(max_requests + 1))),
            window,
            max_requests,
        }
    }

    pub fn from_config(config: &InspectionConfig) -> Self {
        Self::new(config.detection_window, config.max_requests)
    }

    /// Record an arrival at `now` and decide whether it is admitted
    ///
    /// Inserts first, evicts arrivals older than the window, then compares
    /// the remaining count to the threshold. Nothing is rolled back on
    /// rejection.
    pub fn admit(&self, now: Instant) -> bool {
        let mut arrivals = self.arrivals.lock();
        arrivals.push_back(now);

        while let Some(&oldest) = arrivals.front() {
            if now.saturating_duration_since(oldest) > self.window {
                arrivals.pop_front();
            } else {
                break;
            }
        }

        arrivals.len() <= self.max_requests
    }

    /// Check an arrival from the given client
    ///
    /// Logs at debug only; callers report the rejection.
    pub fn check(&self, client: &str, now: Instant) -> Result<()> {
        if self.admit(now) {
            debug!("Rate limit check passed for {}", client);
            Ok(())
        } else {
            debug!("Rate limit exceeded for {}", client);
            Err(TollgateError::RateLimitExceeded {
                client: client.to_string(),
            })
        }
    }

    /// Number of arrivals currently recorded
    pub fn len(&self) -> usize {
        self.arrivals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.lock().is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&InspectionConfig::default())
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            arrivals: Arc::clone(&self.arrivals),
            window: self.window,
            max_requests: self.max_requests,
        }
    }
}
