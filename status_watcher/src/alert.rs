//! Blinking alert indicator.
//!
//! A distracted status starts a short blink cycle. Further distracted statuses extend the cycle,
//! anything else ends it.
use std::time::{Duration, Instant};

/// Time between two indicator toggles.
pub const BLINK_INTERVAL: Duration = Duration::from_millis(300);

/// Length of one blink cycle.
pub const BLINK_DURATION: Duration = Duration::from_millis(2100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indicator {
    Normal,
    Alert,
}

#[derive(Clone, Copy, Debug)]
struct Cycle {
    started: Instant,
    deadline: Instant,
}

#[derive(Debug)]
pub struct Blinker {
    interval: Duration,
    duration: Duration,
    cycle: Option<Cycle>,
}

impl Default for Blinker {
    fn default() -> Self {
        Self::new(BLINK_INTERVAL, BLINK_DURATION)
    }
}

impl Blinker {
    pub fn new(interval: Duration, duration: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            duration,
            cycle: None,
        }
    }

    /// Start a blink cycle, or extend the running one without changing its phase.
    pub fn trigger(&mut self, now: Instant) {
        let deadline = now + self.duration;
        match self.cycle.as_mut() {
            Some(cycle) if now < cycle.deadline => cycle.deadline = deadline,
            _ => {
                self.cycle = Some(Cycle {
                    started: now,
                    deadline,
                })
            }
        }
    }

    pub fn stop(&mut self) {
        self.cycle = None;
    }

    /// Feed a polled status.
    pub fn on_status(&mut self, distracted: bool, now: Instant) {
        match distracted {
            true => self.trigger(now),
            false => self.stop(),
        }
    }

    pub fn is_blinking(&self, now: Instant) -> bool {
        matches!(self.cycle, Some(cycle) if now < cycle.deadline)
    }

    /// Indicator to show at `now`, starting with `Alert` and toggling every interval.
    pub fn indicator_at(&self, now: Instant) -> Indicator {
        match self.cycle {
            Some(cycle) if now < cycle.deadline => {
                let elapsed = now.saturating_duration_since(cycle.started);
                let phase = elapsed.as_millis() / self.interval.as_millis();
                match phase % 2 {
                    0 => Indicator::Alert,
                    _ => Indicator::Normal,
                }
            }
            _ => Indicator::Normal,
        }
    }
}
