use nalgebra::Vector3;

use crate::{
    Instant,
    estimation::{
        filter::{FilterInitError, FilterResult, StateFilter},
        settings::EstimationSettings,
        state::{SensorUpdates, StateEstimation},
    },
};

/// Indoor pseudo measurement: the vehicle is assumed to stay close to its
/// origin, with zero position and velocity injected every cycle. The EKF
/// weights them with the indoor fake variances.
#[derive(Debug, Clone, Default)]
pub struct StationaryFilter;

impl StateFilter for StationaryFilter {
    fn name(&self) -> &'static str {
        "stationary"
    }

    fn init(&mut self, _settings: &EstimationSettings) -> Result<(), FilterInitError> {
        Ok(())
    }

    fn filter(&mut self, _now: Instant, state: &mut StateEstimation) -> FilterResult {
        state.pos_n_m = Vector3::zeros();
        state.vel_n_m_s = Vector3::zeros();
        state.mark(SensorUpdates::POS | SensorUpdates::VEL);
        FilterResult::Ok
    }
}
