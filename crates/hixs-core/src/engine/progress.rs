//! Transfer speed estimation
//!
//! The worker reports on a fixed cadence. Each report turns the bytes moved
//! since the previous report into a rate, and the published speed is the mean
//! of the last few rates so a single slow read does not make the number jump.

use std::collections::VecDeque;
use std::time::Instant;

/// Number of recent rates averaged into the published speed
const SPEED_WINDOW: usize = 4;

#[derive(Debug)]
pub struct SpeedMeter {
    last_bytes: u64,
    last_time: Instant,
    samples: VecDeque<f64>,
}

impl SpeedMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            last_bytes: 0,
            last_time: now,
            samples: VecDeque::with_capacity(SPEED_WINDOW),
        }
    }

    /// Record the running byte total at `now` and return bytes per second
    pub fn report(&mut self, received: u64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_time).as_secs_f64();
        let delta = received.saturating_sub(self.last_bytes);

        if elapsed > 0.0 {
            if self.samples.len() == SPEED_WINDOW {
                self.samples.pop_front();
            }
            self.samples.push_back(delta as f64 / elapsed);
            self.last_bytes = received;
            self.last_time = now;
        }

        self.speed()
    }

    /// Current estimate without recording anything
    pub fn speed(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }
}
