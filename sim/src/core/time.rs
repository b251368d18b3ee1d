use chrono::TimeDelta;
use insgps_gnc::{Instant as GncInstant, hal::Hal};

/// Monotonic simulation time, advanced explicitly by the runner.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    elapsed: TimeDelta,
}

impl SimulatedClock {
    pub fn new(elapsed: TimeDelta) -> SimulatedClock {
        SimulatedClock { elapsed }
    }

    pub fn step(&mut self, delta: TimeDelta) {
        self.elapsed += delta
    }

    pub fn elapsed(&self) -> TimeDelta {
        self.elapsed
    }

    pub fn elapsed_seconds_f64(&self) -> f64 {
        TD(self.elapsed).seconds()
    }
}

impl Hal for SimulatedClock {
    /// Elapsed simulation time in microsecond ticks.
    fn system_time(&self) -> GncInstant {
        let us = self.elapsed.num_microseconds().unwrap_or(i64::MAX).max(0);
        GncInstant::from_micros(us as u64)
    }
}

pub struct TD(pub TimeDelta);

impl TD {
    pub fn from_seconds_f64(s: f64) -> TimeDelta {
        TimeDelta::nanoseconds((s * 1e9).round() as i64)
    }

    pub fn seconds(&self) -> f64 {
        self.0.num_seconds() as f64 + (self.0.subsec_nanos() as f64) / 1e9
    }
}
