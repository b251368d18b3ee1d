//! Pipeline stages.

pub mod air;
pub mod baro;
pub mod complementary;
pub mod ekf;
pub mod mag;
pub mod stationary;
pub mod velocity;

pub use air::AirFilter;
pub use baro::BaroFilter;
pub use complementary::ComplementaryFilter;
pub use ekf::EkfFilter;
pub use mag::MagFilter;
pub use stationary::StationaryFilter;
pub use velocity::VelocityFilter;
