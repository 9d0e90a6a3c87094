// src/session/clock.rs

use std::time::Duration;

use tokio::time::Instant;

/// One-shot notifications produced by [`SessionClock::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// Remaining time dropped to the warning threshold. Advisory only.
    LowTime { remaining: Duration },
    /// Remaining time reached zero.
    Expired,
}

/// Countdown for one session.
///
/// Time is derived from a monotonic start instant, so missed or coalesced
/// polls never skew `remaining()`; it simply clamps at zero. Each event is
/// emitted at most once and nothing is emitted after `stop()`.
#[derive(Debug)]
pub struct SessionClock {
    duration: Duration,
    started: Instant,
    low_time_threshold: Option<Duration>,
    stopped_at: Option<Instant>,
    low_time_fired: bool,
    expired_fired: bool,
}

impl SessionClock {
    /// Starts the countdown now.
    ///
    /// The low-time warning is armed when the duration is at least the
    /// threshold. An exam exactly as long as the threshold warns at once;
    /// a shorter one never warns.
    pub fn start(duration: Duration, low_time_threshold: Duration) -> Self {
        Self::start_at(Instant::now(), duration, low_time_threshold)
    }

    fn start_at(started: Instant, duration: Duration, low_time_threshold: Duration) -> Self {
        let low_time_threshold =
            (!low_time_threshold.is_zero() && duration >= low_time_threshold).then_some(low_time_threshold);
        Self {
            duration,
            started,
            low_time_threshold,
            stopped_at: None,
            low_time_fired: false,
            expired_fired: false,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Wall time since start, frozen once the clock is stopped. Not clamped.
    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    fn elapsed_at(&self, now: Instant) -> Duration {
        let end = self.stopped_at.unwrap_or(now);
        end.saturating_duration_since(self.started)
    }

    /// Never negative.
    pub fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now())
    }

    fn remaining_at(&self, now: Instant) -> Duration {
        self.duration.saturating_sub(self.elapsed_at(now))
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_at.is_some()
    }

    pub fn low_time_reached(&self) -> bool {
        self.low_time_fired
    }

    pub fn has_expired(&self) -> bool {
        self.expired_fired
    }

    /// Cancels all future events. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(Instant::now());
        }
    }

    /// The next instant at which `poll` has something to report, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_stopped() || self.expired_fired {
            return None;
        }
        let expiry = self.started + self.duration;
        match self.low_time_threshold {
            Some(threshold) if !self.low_time_fired => Some(expiry - threshold),
            _ => Some(expiry),
        }
    }

    /// Emits whatever became due since the last poll.
    pub fn poll(&mut self) -> Vec<ClockEvent> {
        self.poll_at(Instant::now())
    }

    fn poll_at(&mut self, now: Instant) -> Vec<ClockEvent> {
        let mut events = Vec::new();
        if self.is_stopped() || self.expired_fired {
            return events;
        }

        let remaining = self.remaining_at(now);

        if let Some(threshold) = self.low_time_threshold {
            if !self.low_time_fired && remaining <= threshold {
                self.low_time_fired = true;
                // Coalesced straight past zero: the expiry supersedes the warning.
                if !remaining.is_zero() {
                    events.push(ClockEvent::LowTime { remaining });
                }
            }
        }

        if remaining.is_zero() {
            self.expired_fired = true;
            events.push(ClockEvent::Expired);
        }

        events
    }
}
