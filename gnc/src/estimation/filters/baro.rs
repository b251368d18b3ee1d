use defmt_or_log::info;

use crate::{
    Instant,
    estimation::{
        filter::{FilterInitError, FilterResult, StateFilter, check_range},
        settings::EstimationSettings,
        state::{SensorUpdates, StateEstimation},
    },
};

const INIT_CYCLES: u16 = 500;
const INIT_OFFSET_ALPHA: f32 = 0.02;

/// Removes the offset of the barometric altitude.
///
/// The offset is learned over the first samples. With GPS it is referenced
/// to the first position fix and keeps tracking the GPS altitude, so the
/// corrected baro altitude equals minus the NED down position.
#[derive(Debug, Clone)]
pub struct BaroFilter {
    use_gps: bool,
    offset_m: f32,
    last_baro_alt_m: f32,
    gps_alt_m: f32,
    remaining_init: u16,
    gps_correction_alpha: f32,
}

impl BaroFilter {
    pub fn with_gps() -> Self {
        Self::new(true)
    }

    pub fn indoor() -> Self {
        Self::new(false)
    }

    fn new(use_gps: bool) -> Self {
        BaroFilter {
            use_gps,
            offset_m: 0.0,
            last_baro_alt_m: 0.0,
            gps_alt_m: 0.0,
            remaining_init: INIT_CYCLES,
            gps_correction_alpha: 0.0,
        }
    }

    pub fn offset_m(&self) -> f32 {
        self.offset_m
    }

    fn warm_up(&mut self, state: &mut StateEstimation) {
        if self.use_gps && state.is_set(SensorUpdates::POS) && self.remaining_init == INIT_CYCLES {
            self.gps_alt_m = state.pos_n_m[2];
            self.remaining_init -= 1;
        }

        if state.consume(SensorUpdates::BARO)
            && (self.remaining_init < INIT_CYCLES || !self.use_gps)
        {
            let sample = state.baro_alt_m + self.gps_alt_m;
            if self.remaining_init > INIT_CYCLES - 2 {
                self.offset_m = sample;
            }
            self.offset_m = (1.0 - INIT_OFFSET_ALPHA) * self.offset_m + INIT_OFFSET_ALPHA * sample;
            self.last_baro_alt_m = state.baro_alt_m;
            self.remaining_init -= 1;

            if self.remaining_init == 0 {
                info!("Baro offset initialized to {} m", self.offset_m);
            }
        }
    }
}

impl StateFilter for BaroFilter {
    fn name(&self) -> &'static str {
        if self.use_gps { "baro" } else { "baro-indoor" }
    }

    fn init(&mut self, settings: &EstimationSettings) -> Result<(), FilterInitError> {
        check_range(
            "baro_gps_offset_correction_alpha",
            settings.baro_gps_offset_correction_alpha,
            0.0,
            1.0,
        )?;

        *self = Self::new(self.use_gps);
        self.gps_correction_alpha = settings.baro_gps_offset_correction_alpha;
        Ok(())
    }

    fn filter(&mut self, _now: Instant, state: &mut StateEstimation) -> FilterResult {
        if self.remaining_init > 0 {
            self.warm_up(state);
            // Altitude hold must not engage on an unreferenced baro
            return FilterResult::Critical;
        }

        if self.use_gps && state.is_set(SensorUpdates::POS) {
            let alpha = self.gps_correction_alpha;
            self.offset_m =
                self.offset_m * alpha + (1.0 - alpha) * (self.last_baro_alt_m + state.pos_n_m[2]);
        }

        if state.is_set(SensorUpdates::BARO) {
            self.last_baro_alt_m = state.baro_alt_m;
            state.baro_alt_m -= self.offset_m;
        }

        FilterResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use pretty_assertions::assert_eq;

    fn baro_sample(alt_m: f32) -> StateEstimation {
        let mut state = StateEstimation::default();
        state.baro_alt_m = alt_m;
        state.mark(SensorUpdates::BARO);
        state
    }

    #[test]
    fn test_indoor_warm_up() {
        let mut filter = BaroFilter::indoor();
        filter.init(&EstimationSettings::default()).unwrap();
        let t = Instant::from_micros(0);

        for _ in 0..INIT_CYCLES {
            let mut state = baro_sample(120.0);
            assert_eq!(filter.filter(t, &mut state), FilterResult::Critical);
            // Not forwarded while warming up
            assert!(!state.is_set(SensorUpdates::BARO));
        }

        let mut state = baro_sample(121.5);
        assert_eq!(filter.filter(t, &mut state), FilterResult::Ok);
        assert!(state.is_set(SensorUpdates::BARO));
        assert_relative_eq!(state.baro_alt_m, 1.5, epsilon = 1e-4);
    }

    #[test]
    fn test_gps_referenced_offset() {
        let mut filter = BaroFilter::with_gps();
        filter.init(&EstimationSettings::default()).unwrap();
        let t = Instant::from_micros(0);

        // Baro samples before the first fix are ignored
        let mut state = baro_sample(300.0);
        filter.filter(t, &mut state);
        assert_eq!(filter.remaining_init, INIT_CYCLES);

        let mut fix = StateEstimation::default();
        fix.pos_n_m = Vector3::new(0.0, 0.0, -2.0);
        fix.mark(SensorUpdates::POS);
        filter.filter(t, &mut fix);

        for _ in 0..INIT_CYCLES - 1 {
            let mut state = baro_sample(300.0);
            filter.filter(t, &mut state);
        }
        assert_relative_eq!(filter.offset_m(), 298.0, epsilon = 1e-3);

        let mut state = baro_sample(300.0);
        assert_eq!(filter.filter(t, &mut state), FilterResult::Ok);
        // Corrected altitude is minus the down position of the fix
        assert_relative_eq!(state.baro_alt_m, 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_offset_tracks_gps() {
        let mut filter = BaroFilter::with_gps();
        let mut settings = EstimationSettings::default();
        settings.baro_gps_offset_correction_alpha = 0.5;
        filter.init(&settings).unwrap();
        filter.remaining_init = 0;
        filter.last_baro_alt_m = 100.0;

        let mut state = StateEstimation::default();
        state.pos_n_m = Vector3::new(0.0, 0.0, -10.0);
        state.mark(SensorUpdates::POS);
        for _ in 0..50 {
            filter.filter(Instant::from_micros(0), &mut state);
        }

        assert_relative_eq!(filter.offset_m(), 90.0, epsilon = 1e-3);
    }

    #[test]
    fn test_rejects_invalid_alpha() {
        let mut filter = BaroFilter::with_gps();
        let mut settings = EstimationSettings::default();
        settings.baro_gps_offset_correction_alpha = 1.5;
        assert!(filter.init(&settings).is_err());
    }
}
