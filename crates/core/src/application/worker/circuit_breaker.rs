// Per-slot circuit breaker: stop claiming after too many errors in one window

use crate::config::CircuitBreakerConfig;
use crate::domain::Timestamp;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Slot keeps claiming
    Closed,
    /// Threshold exceeded; slot must exit
    Tripped,
}

/// Error counter owned by one execution slot.
///
/// The window starts at the first error after a reset and lasts
/// `reset_window_ms`; errors older than that are forgotten.
#[derive(Debug)]
pub struct SlotBreaker {
    threshold: u32,
    reset_window_ms: i64,
    window_start: Option<Timestamp>,
    errors: u32,
}

impl SlotBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            threshold: config.threshold,
            reset_window_ms: config.reset_window_ms as i64,
            window_start: None,
            errors: 0,
        }
    }

    /// Count one error at `now` and report the resulting state
    pub fn record_error(&mut self, now: Timestamp) -> BreakerState {
        match self.window_start {
            Some(start) if now - start < self.reset_window_ms => {}
            _ => {
                self.window_start = Some(now);
                self.errors = 0;
            }
        }

        self.errors += 1;
        self.state()
    }

    pub fn state(&self) -> BreakerState {
        if self.errors > self.threshold {
            BreakerState::Tripped
        } else {
            BreakerState::Closed
        }
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }
}
