use crate::{
    Instant,
    estimation::{
        filter::{FilterInitError, FilterResult, StateFilter},
        settings::EstimationSettings,
        state::{SensorUpdates, StateEstimation},
    },
};

/// True airspeed gain per meter of altitude, 2% every 1000 ft.
const TAS_GAIN_PER_M: f32 = 0.02 / 304.8;

/// Converts calibrated to true airspeed using the latest baro altitude.
#[derive(Debug, Clone, Default)]
pub struct AirFilter {
    altitude_m: f32,
}

impl AirFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn calibrated_to_true_airspeed(cas_m_s: f32, altitude_m: f32) -> f32 {
    cas_m_s * (1.0 + TAS_GAIN_PER_M * altitude_m)
}

impl StateFilter for AirFilter {
    fn name(&self) -> &'static str {
        "air"
    }

    fn init(&mut self, _settings: &EstimationSettings) -> Result<(), FilterInitError> {
        self.altitude_m = 0.0;
        Ok(())
    }

    fn filter(&mut self, _now: Instant, state: &mut StateEstimation) -> FilterResult {
        if state.is_set(SensorUpdates::BARO) {
            self.altitude_m = state.baro_alt_m;
        }

        if state.is_set(SensorUpdates::AIRSPEED) {
            state.true_airspeed_m_s =
                calibrated_to_true_airspeed(state.calibrated_airspeed_m_s, self.altitude_m);
        }

        FilterResult::Ok
    }
}
