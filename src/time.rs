use std::time::{Duration, Instant};

/// Wall-clock frame timer. Deltas are reported in milliseconds, the unit every
/// `update(ctx, elapsed)` hook receives.
pub struct FrameClock {
    start: Instant,
    last: Instant,
    pub delta: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::ZERO }
    }

    /// Advances to now and returns the delta since the previous tick in milliseconds.
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        self.delta = now - self.last;
        self.last = now;
        self.delta_millis()
    }

    pub fn delta_millis(&self) -> f64 {
        self.delta.as_secs_f64() * 1000.0
    }

    pub fn elapsed_millis(&self) -> f64 {
        self.last.duration_since(self.start).as_secs_f64() * 1000.0
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
