use nalgebra::Vector3;

use crate::{
    Instant,
    estimation::{
        filter::{FilterInitError, FilterResult, StateFilter, check_range},
        settings::EstimationSettings,
        state::{SensorUpdates, StateEstimation},
    },
};

/// First order low pass on the exported velocity.
#[derive(Debug, Clone, Default)]
pub struct VelocityFilter {
    alpha: f32,
    filtered: Option<Vector3<f32>>,
}

impl VelocityFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateFilter for VelocityFilter {
    fn name(&self) -> &'static str {
        "velocity"
    }

    fn init(&mut self, settings: &EstimationSettings) -> Result<(), FilterInitError> {
        check_range("velocity_lowpass_alpha", settings.velocity_lowpass_alpha, 0.0, 1.0)?;
        self.alpha = settings.velocity_lowpass_alpha;
        self.filtered = None;
        Ok(())
    }

    fn filter(&mut self, _now: Instant, state: &mut StateEstimation) -> FilterResult {
        if state.is_set(SensorUpdates::VEL) {
            let vel = match self.filtered {
                Some(prev) => prev * self.alpha + state.vel_n_m_s * (1.0 - self.alpha),
                None => state.vel_n_m_s,
            };
            self.filtered = Some(vel);
            state.vel_n_m_s = vel;
        }
        FilterResult::Ok
    }
}
