//! Request spacing for TheAudioDB.
//!
//! Callers reserve a send slot and sleep until it arrives; the lock is only
//! held while the slot is handed out, never across the request itself. The
//! gap between slots starts at the floor and widens when the API pushes back.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

/// How a request went, as far as pacing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    /// HTTP 429; the gap jumps straight to the ceiling.
    Throttled,
    /// Any other failure; the gap doubles.
    Failed,
}

struct Pacing {
    next_slot: Option<Instant>,
    gap: Duration,
    clean_run: u32,
}

pub struct RateLimiter {
    label: String,
    floor: Duration,
    ceiling: Duration,
    /// Successes in a row before the gap is halved; 0 keeps it where it is.
    relax_after: u32,
    pacing: Mutex<Pacing>,
}

impl RateLimiter {
    pub fn new(label: &str, floor: Duration, ceiling: Duration, relax_after: u32) -> Self {
        RateLimiter {
            label: label.to_string(),
            floor,
            ceiling: ceiling.max(floor),
            relax_after,
            pacing: Mutex::new(Pacing {
                next_slot: None,
                gap: floor,
                clean_run: 0,
            }),
        }
    }

    /// Floor of `millis`, ceiling 16 times that, relaxing after 10 successes.
    pub fn from_millis(label: &str, millis: u64) -> Self {
        let floor = Duration::from_millis(millis);
        Self::new(label, floor, floor * 16, 10)
    }

    pub fn unlimited(label: &str) -> Self {
        Self::new(label, Duration::ZERO, Duration::ZERO, 0)
    }

    pub fn gap(&self) -> Duration {
        self.pacing.lock().gap
    }

    /// Sleep until this caller's slot comes up.
    pub fn acquire(&self) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            debug!("[{}] Waiting {} ms for a request slot", self.label, wait.as_millis());
            thread::sleep(wait);
        }
    }

    /// Hand out the next free slot at or after `now`; returns the time to it.
    fn reserve(&self, now: Instant) -> Duration {
        let mut pacing = self.pacing.lock();
        let slot = pacing.next_slot.map_or(now, |next| next.max(now));
        pacing.next_slot = Some(slot + pacing.gap);
        slot - now
    }

    pub fn record(&self, outcome: Outcome) {
        let mut pacing = self.pacing.lock();
        match outcome {
            Outcome::Ok => {
                if self.relax_after == 0 || pacing.gap <= self.floor {
                    return;
                }
                pacing.clean_run += 1;
                if pacing.clean_run >= self.relax_after {
                    pacing.gap = (pacing.gap / 2).max(self.floor);
                    pacing.clean_run = 0;
                    info!("[{}] Request gap back down to {} ms", self.label, pacing.gap.as_millis());
                }
            }
            Outcome::Throttled => {
                pacing.clean_run = 0;
                pacing.gap = self.ceiling;
                pacing.next_slot = Some(Instant::now() + self.ceiling);
                warn!("[{}] Throttled, spacing requests {} ms apart", self.label, self.ceiling.as_millis());
            }
            Outcome::Failed => {
                pacing.clean_run = 0;
                pacing.gap = (pacing.gap * 2).min(self.ceiling);
                info!("[{}] Request gap up to {} ms", self.label, pacing.gap.as_millis());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_slots_are_spaced_by_the_gap() {
        let limiter = RateLimiter::from_millis("test", 500);
        let now = Instant::now();

        assert_eq!(limiter.reserve(now), Duration::ZERO);
        assert_eq!(limiter.reserve(now), 500 * MS);
        assert_eq!(limiter.reserve(now), 1000 * MS);
        // A caller arriving after every reserved slot goes straight away.
        assert_eq!(limiter.reserve(now + 5000 * MS), Duration::ZERO);
    }

    #[test]
    fn test_acquire_sleeps_until_the_slot() {
        let limiter = RateLimiter::from_millis("test", 30);
        limiter.acquire();
        let start = Instant::now();
        limiter.acquire();
        assert!(start.elapsed() >= 20 * MS);
    }

    #[test]
    fn test_failures_widen_and_successes_relax() {
        let limiter = RateLimiter::new("test", 100 * MS, 300 * MS, 2);

        limiter.record(Outcome::Failed);
        assert_eq!(limiter.gap(), 200 * MS);
        limiter.record(Outcome::Failed);
        assert_eq!(limiter.gap(), 300 * MS);

        limiter.record(Outcome::Ok);
        assert_eq!(limiter.gap(), 300 * MS);
        limiter.record(Outcome::Ok);
        assert_eq!(limiter.gap(), 150 * MS);
        limiter.record(Outcome::Ok);
        limiter.record(Outcome::Ok);
        assert_eq!(limiter.gap(), 100 * MS);
    }

    #[test]
    fn test_throttle_jumps_to_ceiling_and_delays_next_slot() {
        let limiter = RateLimiter::new("test", 100 * MS, 800 * MS, 2);
        limiter.record(Outcome::Throttled);
        assert_eq!(limiter.gap(), 800 * MS);
        assert!(limiter.reserve(Instant::now()) > 700 * MS);
    }

    #[test]
    fn test_unlimited_never_waits() {
        let limiter = RateLimiter::unlimited("test");
        let now = Instant::now();
        assert_eq!(limiter.reserve(now), Duration::ZERO);
        assert_eq!(limiter.reserve(now), Duration::ZERO);
        limiter.record(Outcome::Throttled);
        assert_eq!(limiter.gap(), Duration::ZERO);
    }
}
