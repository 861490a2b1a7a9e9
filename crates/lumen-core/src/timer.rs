//! Frame timing.

use std::time::Instant;

/// Measures the wall-clock time between frames.
#[derive(Debug)]
pub struct Timer {
    last_tick: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            last_tick: Instant::now(),
        }
    }

    /// Seconds since the previous call, advancing the timer.
    pub fn delta_secs(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta.as_secs_f32()
    }

    /// Restarts the measurement from now, so the next delta does not
    /// include time spent before the reset.
    pub fn reset(&mut self) {
        self.last_tick = Instant::now();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_are_non_negative() {
        let mut timer = Timer::new();
        assert!(timer.delta_secs() >= 0.0);
        timer.reset();
        assert!(timer.delta_secs() >= 0.0);
    }
}
