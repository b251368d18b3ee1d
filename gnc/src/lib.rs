#![no_std]

pub mod common;
pub mod components;
pub mod datatypes;
pub mod ekf;
pub mod estimation;
pub mod hal;
pub mod math;

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub type InstantU64 = fugit::Instant<u64, 1, 1_000_000>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(pub InstantU64);

pub type DurationU64 = fugit::Duration<u64, 1, 1_000_000>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(pub DurationU64);

impl Instant {
    pub fn from_micros(us: u64) -> Self {
        Instant(InstantU64::from_ticks(us))
    }

    /// Time elapsed since `earlier`, or `None` if `earlier` is in the future.
    pub fn checked_since(&self, earlier: Instant) -> Option<Duration> {
        self.0.checked_duration_since(earlier.0).map(Duration)
    }
}

impl Duration {
    pub fn millis(ms: u64) -> Self {
        Duration(DurationU64::millis(ms))
    }

    pub fn to_secs_f32(&self) -> f32 {
        self.0.to_micros() as f32 * 1e-6
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        Instant(self.0 + rhs.0)
    }
}
