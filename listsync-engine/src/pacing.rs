//! Minimum inter-call spacing.
//!
//! Platform clients own a [`Pacer`] and call [`Pacer::wait`] immediately
//! before every request, so spacing holds for reads, writes and retries alike.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::clock::Clock;

pub struct Pacer {
    spacing: Duration,
    clock: Arc<dyn Clock>,
    last_call: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(spacing: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            spacing,
            clock,
            last_call: Mutex::new(None),
        }
    }

    /// A pacer that never sleeps.
    pub fn unpaced(clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::ZERO, clock)
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Block until at least `spacing` has passed since the previous call.
    pub fn wait(&self) {
        let mut last = self.last_call.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last {
            let since = self.clock.now().saturating_duration_since(prev);
            if since < self.spacing {
                self.clock.sleep(self.spacing - since);
            }
        }
        *last = Some(self.clock.now());
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer").field("spacing", &self.spacing).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn first_call_does_not_sleep() {
        let clock = ManualClock::shared();
        let pacer = Pacer::new(Duration::from_millis(200), clock.clone());
        pacer.wait();
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn back_to_back_calls_are_spaced() {
        let clock = ManualClock::shared();
        let pacer = Pacer::new(Duration::from_millis(200), clock.clone());
        pacer.wait();
        pacer.wait();
        pacer.wait();
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(200); 2]);
    }

    #[test]
    fn elapsed_time_counts_toward_spacing() {
        let clock = ManualClock::shared();
        let pacer = Pacer::new(Duration::from_millis(200), clock.clone());
        pacer.wait();
        clock.advance(Duration::from_millis(150));
        pacer.wait();
        clock.advance(Duration::from_millis(500));
        pacer.wait();
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(50)]);
    }
}
