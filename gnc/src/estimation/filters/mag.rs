use defmt_or_log::warn;
use nalgebra::Vector3;

use crate::{
    Instant,
    estimation::{
        filter::{FilterInitError, FilterResult, StateFilter},
        settings::EstimationSettings,
        state::{SensorUpdates, StateEstimation},
    },
};

/// Largest relative difference between the measured field strength and the
/// home location field for the magnetometer to count as healthy.
pub const MAG_MAX_DEVIATION: f32 = 0.05;

/// Checks magnetometer samples against the strength of the home field.
///
/// Samples pass through unchanged, the verdict goes to
/// [`StateEstimation::mag_ok`]. Without a configured home field the
/// magnetometer is never healthy.
#[derive(Debug, Clone, Default)]
pub struct MagFilter {
    be_norm: f32,
    healthy: bool,
}

impl MagFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn mag_is_plausible(mag_b: &Vector3<f32>, be_norm: f32) -> bool {
    if !(be_norm.is_finite() && be_norm > 0.0) {
        return false;
    }

    let deviation = (mag_b.norm() - be_norm).abs() / be_norm;
    deviation <= MAG_MAX_DEVIATION
}

impl StateFilter for MagFilter {
    fn name(&self) -> &'static str {
        "mag"
    }

    fn init(&mut self, settings: &EstimationSettings) -> Result<(), FilterInitError> {
        self.be_norm = Vector3::from(settings.home.be).norm();
        self.healthy = false;
        Ok(())
    }

    fn filter(&mut self, _now: Instant, state: &mut StateEstimation) -> FilterResult {
        if state.is_set(SensorUpdates::MAG) {
            let healthy = mag_is_plausible(&state.mag_b, self.be_norm);
            if self.healthy && !healthy {
                warn!("Magnetometer field strength out of range");
            }
            self.healthy = healthy;
        }

        state.mag_ok = self.healthy;
        FilterResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filter() -> MagFilter {
        let mut settings = EstimationSettings::default();
        settings.home.be = [200.0, 0.0, 450.0];

        let mut filter = MagFilter::new();
        filter.init(&settings).unwrap();
        filter
    }

    fn mag(mag_b: Vector3<f32>) -> StateEstimation {
        let mut state = StateEstimation::default();
        state.mag_b = mag_b;
        state.mark(SensorUpdates::MAG);
        state
    }

    #[test]
    fn test_plausibility() {
        let be_norm = Vector3::<f32>::new(200.0, 0.0, 450.0).norm();

        assert!(mag_is_plausible(&Vector3::new(0.0, -200.0, 450.0), be_norm));
        assert!(mag_is_plausible(&(Vector3::new(450.0, 0.0, 200.0) * 1.04), be_norm));
        assert!(!mag_is_plausible(&(Vector3::new(450.0, 0.0, 200.0) * 1.1), be_norm));
        assert!(!mag_is_plausible(&Vector3::zeros(), be_norm));
        assert!(!mag_is_plausible(&Vector3::new(200.0, 0.0, 450.0), 0.0));
    }

    #[test]
    fn test_health_follows_latest_sample() {
        let mut filter = filter();
        let t = Instant::from_micros(0);

        let mut state = mag(Vector3::new(200.0, 0.0, 450.0));
        assert_eq!(filter.filter(t, &mut state), FilterResult::Ok);
        assert!(state.mag_ok);
        assert!(state.is_set(SensorUpdates::MAG));

        // Verdict holds between samples
        let mut state = StateEstimation::default();
        filter.filter(t, &mut state);
        assert!(state.mag_ok);

        let mut state = mag(Vector3::new(20.0, 0.0, 45.0));
        assert_eq!(filter.filter(t, &mut state), FilterResult::Ok);
        assert!(!state.mag_ok);
        assert_eq!(state.mag_b, Vector3::new(20.0, 0.0, 45.0));
    }

    #[test]
    fn test_unconfigured_field_is_never_healthy() {
        let mut filter = MagFilter::new();
        filter.init(&EstimationSettings::default()).unwrap();

        let mut state = mag(Vector3::new(200.0, 0.0, 450.0));
        filter.filter(Instant::from_micros(0), &mut state);
        assert!(!state.mag_ok);
    }
}
