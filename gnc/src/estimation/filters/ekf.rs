use defmt_or_log::{info, warn};
use libm::atan2f;
use nalgebra::{UnitQuaternion, Vector3};

use crate::{
    Instant,
    ekf::{InsGps, SensorsUsed},
    estimation::{
        deltatime::DeltaTime,
        filter::{FilterInitError, FilterResult, StateFilter, check_variances},
        settings::{EkfConfiguration, EstimationSettings},
        state::{SensorUpdates, StateEstimation},
    },
    math::{align_from_accel_mag, dip_angle, map_to_horizontal_plane, quat_from_array, quat_to_array},
};

/// Prediction-only cycles run after the reset, before corrections start.
const INIT_PREDICTION_CYCLES: u8 = 10;

const MIN_FIELD_NORM_SQUARED: f32 = 1e-5;

/// Which variances the position and velocity channels use in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PosVelSource {
    Gps,
    Indoor,
    Airspeed,
}

/// Channels to correct with, given the fresh entries of the working record.
fn measurement_plan(updated: SensorUpdates, use_pos: bool) -> (SensorsUsed, PosVelSource) {
    let mut sensors = SensorsUsed::empty();
    if updated.contains(SensorUpdates::MAG) {
        sensors |= SensorsUsed::MAG;
    }
    if updated.contains(SensorUpdates::BARO) {
        sensors |= SensorsUsed::BARO;
    }
    if updated.contains(SensorUpdates::POS) {
        sensors |= SensorsUsed::POS;
    }
    if updated.contains(SensorUpdates::VEL) {
        sensors |= SensorsUsed::VEL;
    }

    let gps_fresh = updated.intersects(SensorUpdates::POS | SensorUpdates::VEL);
    if updated.contains(SensorUpdates::AIRSPEED) && (!gps_fresh || !use_pos) {
        // Wind is absorbed by a large velocity variance
        return (sensors | SensorsUsed::VEL, PosVelSource::Airspeed);
    }

    let source = if use_pos {
        PosVelSource::Gps
    } else {
        PosVelSource::Indoor
    };
    (sensors, source)
}

/// Runs the 14 state INS/GPS filter as a pipeline stage.
///
/// Variants differ in whether position and velocity come from a real GPS
/// or from indoor pseudo measurements, and in whether attitude and gyro
/// rates are exported (`nav_only` leaves them to a later stage).
#[derive(Debug, Clone)]
pub struct EkfFilter {
    use_pos: bool,
    nav_only: bool,

    config: EkfConfiguration,
    be: Vector3<f32>,
    mag_dip_rad: f32,

    ins: InsGps,
    work: StateEstimation,
    dt: DeltaTime,

    init_stage: u8,
    inited: bool,
    recovering: bool,
}

impl EkfFilter {
    pub fn gps() -> Self {
        Self::new(true, false)
    }

    pub fn gps_nav_only() -> Self {
        Self::new(true, true)
    }

    pub fn indoor() -> Self {
        Self::new(false, false)
    }

    pub fn indoor_nav_only() -> Self {
        Self::new(false, true)
    }

    fn new(use_pos: bool, nav_only: bool) -> Self {
        EkfFilter {
            use_pos,
            nav_only,
            config: EkfConfiguration::default(),
            be: Vector3::x(),
            mag_dip_rad: 0.0,
            ins: InsGps::new(),
            work: StateEstimation::default(),
            dt: DeltaTime::new(500.0),
            init_stage: 0,
            inited: false,
            recovering: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inited
    }

    /// Severity while waiting for the sensors needed to (re)initialize.
    fn not_ready(&self) -> FilterResult {
        match (self.recovering, self.nav_only) {
            (true, true) => FilterResult::Warning,
            (true, false) => FilterResult::Critical,
            (false, true) => FilterResult::Ok,
            (false, false) => FilterResult::Critical,
        }
    }

    fn reset(&mut self) {
        let q = &self.config.q;
        let r = &self.config.r;
        let be2 = self.be.norm_squared();

        self.ins.initialize();
        self.ins
            .set_mag_var(&[r.mag[0] / be2, r.mag[1] / be2, r.mag[2] / be2]);
        self.ins.set_accel_var(&q.accel);
        self.ins.set_gyro_var(&q.gyro);
        self.ins.set_gyro_bias_var(&q.gyro_drift);
        self.ins.set_accel_bias_var(q.accel_drift);
        self.ins.set_baro_var(r.baro_z);
        self.ins.set_mag_north(&self.be.normalize());

        // Leveled magnetometer heading, rotated by the declination of the
        // home field so yaw is relative to true north
        let magnetic = quat_from_array(&align_from_accel_mag(
            &self.work.accel_m_s2,
            Some(&self.work.mag_b),
        ));
        let declination = UnitQuaternion::from_axis_angle(
            &Vector3::z_axis(),
            atan2f(self.be[1], self.be[0]),
        );
        let quat_nb = quat_to_array(&(declination * magnetic));

        self.ins.set_state(
            &self.work.pos_n_m,
            &Vector3::zeros(),
            &quat_nb,
            &Vector3::zeros(),
            &Vector3::zeros(),
        );
        self.ins.reset_covariance(&self.config.p);
    }

    fn predict_and_export(&mut self, dt: f32, state: &mut StateEstimation) {
        self.ins
            .state_prediction(&self.work.gyro_rad_s, &self.work.accel_m_s2, dt);

        let nav = self.ins.nav();
        if !self.nav_only {
            state.quat_nb = nav.quat_nb;
            state.gyro_rad_s = nav.gyro_rad_s;
        }
        state.pos_n_m = nav.pos_n_m;
        state.vel_n_m_s = nav.vel_n_m_s;
        state.mark(SensorUpdates::ATTITUDE | SensorUpdates::POS | SensorUpdates::VEL);
    }

    fn initialization_cycle(&mut self, dt: f32, state: &mut StateEstimation) -> FilterResult {
        if self.init_stage == 0 {
            self.reset();
        } else {
            self.predict_and_export(dt, state);
        }

        self.init_stage += 1;
        if self.init_stage > INIT_PREDICTION_CYCLES {
            info!("EKF initialized");
            self.inited = true;
            self.recovering = false;
            state.nav_ok = true;
        }

        if self.recovering {
            self.not_ready()
        } else {
            FilterResult::Ok
        }
    }

    fn correct(&mut self) {
        let (sensors, source) = measurement_plan(self.work.updated, self.use_pos);
        let fake_r = &self.config.fake_r;

        if sensors.intersects(SensorsUsed::MAG) && self.config.map_mag_to_horizontal_plane {
            let quat_nb = quat_from_array(&self.ins.state().quat_nb);
            self.work.mag_b =
                map_to_horizontal_plane(&quat_nb, &self.work.mag_b, self.mag_dip_rad, self.be.norm());
        }

        match source {
            PosVelSource::Gps => self
                .ins
                .set_pos_vel_var(&self.config.r.gps_pos, &self.config.r.gps_vel),
            PosVelSource::Indoor => self.ins.set_pos_vel_var(
                &[fake_r.gps_pos_indoor; 3],
                &[fake_r.gps_vel_indoor; 3],
            ),
            PosVelSource::Airspeed => {
                self.ins.set_pos_vel_var(
                    &[fake_r.gps_pos_indoor; 3],
                    &[fake_r.gps_vel_airspeed; 3],
                );
                // Airspeed is measured along the body X axis
                let quat_nb = quat_from_array(&self.ins.state().quat_nb);
                self.work.vel_n_m_s = quat_nb
                    .transform_vector(&Vector3::new(self.work.true_airspeed_m_s, 0.0, 0.0));
            }
        }

        if !sensors.is_empty() {
            self.ins.correction(
                &self.work.mag_b,
                &self.work.pos_n_m,
                &self.work.vel_n_m_s,
                self.work.baro_alt_m,
                sensors,
            );
        }
    }
}

impl StateFilter for EkfFilter {
    fn name(&self) -> &'static str {
        match (self.use_pos, self.nav_only) {
            (true, false) => "ekf",
            (true, true) => "ekf-nav-only",
            (false, false) => "ekf-indoor",
            (false, true) => "ekf-indoor-nav-only",
        }
    }

    fn init(&mut self, settings: &EstimationSettings) -> Result<(), FilterInitError> {
        let config = settings.ekf;
        check_variances("P", &config.p)?;
        check_variances("Q", &config.q.to_array())?;
        check_variances("R", &config.r.to_array())?;

        let be = Vector3::from(settings.home.be);
        if !be.iter().all(|v| v.is_finite()) || be.norm_squared() < MIN_FIELD_NORM_SQUARED {
            return Err(FilterInitError::MissingMagneticField);
        }

        *self = Self::new(self.use_pos, self.nav_only);
        self.config = config;
        self.be = be;
        self.mag_dip_rad = dip_angle(&be);
        self.dt = DeltaTime::new(settings.sensor_rate_hz);
        Ok(())
    }

    fn filter(&mut self, now: Instant, state: &mut StateEstimation) -> FilterResult {
        self.ins.set_armed(state.armed);
        state.nav_used = self.use_pos || self.nav_only;

        // An unhealthy magnetometer must not seed the alignment
        if !self.inited && !state.mag_ok {
            state.unmark(SensorUpdates::MAG);
            self.work.unmark(SensorUpdates::MAG);
        }
        self.work.import_updated(state);

        // Accel must have arrived already, gyro must arrive now
        if !(self.work.is_set(SensorUpdates::ACCEL) && state.is_set(SensorUpdates::GYRO)) {
            state.unmark(
                SensorUpdates::POS | SensorUpdates::VEL | SensorUpdates::ATTITUDE | SensorUpdates::GYRO,
            );
            return FilterResult::Ok;
        }

        let dt = self.dt.average_seconds(now);

        if !self.inited {
            let ready = self
                .work
                .is_set(SensorUpdates::MAG | SensorUpdates::BARO | SensorUpdates::POS);
            return if ready {
                self.initialization_cycle(dt, state)
            } else {
                self.not_ready()
            };
        }

        self.predict_and_export(dt, state);
        self.ins.covariance_prediction(dt);
        self.correct();

        let result = if self.ins.covariance_is_valid() {
            FilterResult::Ok
        } else {
            warn!("EKF covariance diverged, reinitializing");
            self.ins.reset_covariance(&self.config.p);
            self.init_stage = 0;
            self.inited = false;
            self.recovering = true;
            state.nav_ok = false;
            self.not_ready()
        };

        self.work.updated = SensorUpdates::empty();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::GRAVITY_M_S2;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    const BE: [f32; 3] = [200.0, 0.0, 450.0];

    fn settings() -> EstimationSettings {
        let mut settings = EstimationSettings::default();
        settings.sensor_rate_hz = 100.0;
        settings.home.be = BE;
        settings
    }

    fn full_sample() -> StateEstimation {
        let mut state = StateEstimation::default();
        state.accel_m_s2 = Vector3::new(0.0, 0.0, -GRAVITY_M_S2);
        state.mag_b = Vector3::from(BE);
        state.baro_alt_m = 0.0;
        state.mag_ok = true;
        state.mark(
            SensorUpdates::GYRO
                | SensorUpdates::ACCEL
                | SensorUpdates::MAG
                | SensorUpdates::BARO
                | SensorUpdates::POS
                | SensorUpdates::VEL,
        );
        state
    }

    fn cycle(filter: &mut EkfFilter, i: u64, state: &mut StateEstimation) -> FilterResult {
        filter.filter(Instant::from_micros(i * 10_000), state)
    }

    fn initialized(mut filter: EkfFilter) -> EkfFilter {
        filter.init(&settings()).unwrap();
        for i in 0..=u64::from(INIT_PREDICTION_CYCLES) {
            cycle(&mut filter, i, &mut full_sample());
        }
        assert!(filter.is_initialized());
        // First corrected cycle flushes the samples gathered during init
        cycle(&mut filter, 11, &mut full_sample());
        filter
    }

    #[test]
    fn test_names() {
        assert_eq!(EkfFilter::gps().name(), "ekf");
        assert_eq!(EkfFilter::gps_nav_only().name(), "ekf-nav-only");
        assert_eq!(EkfFilter::indoor().name(), "ekf-indoor");
        assert_eq!(EkfFilter::indoor_nav_only().name(), "ekf-indoor-nav-only");
    }

    #[test]
    fn test_gyro_without_accel_does_not_predict() {
        let mut filter = EkfFilter::gps();
        filter.init(&settings()).unwrap();
        let before = filter.ins.state();

        let mut state = StateEstimation::default();
        state.mark(SensorUpdates::GYRO | SensorUpdates::ATTITUDE | SensorUpdates::POS);
        assert_eq!(cycle(&mut filter, 0, &mut state), FilterResult::Ok);

        assert_eq!(state.updated, SensorUpdates::empty());
        assert_eq!(filter.ins.state(), before);
        assert_eq!(filter.init_stage, 0);
    }

    #[test]
    fn test_accel_then_gyro_runs_one_step() {
        let mut filter = initialized(EkfFilter::gps());

        let mut accel = StateEstimation::default();
        accel.accel_m_s2 = Vector3::new(0.0, 0.0, -GRAVITY_M_S2);
        accel.mark(SensorUpdates::ACCEL);
        cycle(&mut filter, 20, &mut accel);
        assert!(!accel.is_set(SensorUpdates::ATTITUDE));

        let mut gyro = StateEstimation::default();
        gyro.mark(SensorUpdates::GYRO);
        assert_eq!(cycle(&mut filter, 21, &mut gyro), FilterResult::Ok);
        assert!(gyro.is_set(SensorUpdates::ATTITUDE | SensorUpdates::POS | SensorUpdates::VEL));
    }

    #[test]
    fn test_initialization_sequence() {
        let mut filter = EkfFilter::gps();
        filter.init(&settings()).unwrap();

        // Reset and alignment only
        let mut state = full_sample();
        state.pos_n_m = Vector3::new(1.0, 2.0, -3.0);
        state.updated.remove(SensorUpdates::VEL);
        assert_eq!(cycle(&mut filter, 0, &mut state), FilterResult::Ok);
        assert!(!state.is_set(SensorUpdates::ATTITUDE));
        assert_eq!(filter.ins.variance(), settings().ekf.p);
        assert_eq!(filter.ins.state().pos_n_m, Vector3::new(1.0, 2.0, -3.0));

        for i in 1..=u64::from(INIT_PREDICTION_CYCLES) {
            let mut state = full_sample();
            assert_eq!(cycle(&mut filter, i, &mut state), FilterResult::Ok);
            assert!(state.is_set(SensorUpdates::ATTITUDE));
            assert_eq!(state.nav_ok, i == u64::from(INIT_PREDICTION_CYCLES));
        }
        assert!(filter.is_initialized());
    }

    #[test]
    fn test_waits_for_mag_baro_and_pos() {
        let mut sample = StateEstimation::default();
        sample.accel_m_s2 = Vector3::new(0.0, 0.0, -GRAVITY_M_S2);
        sample.mark(SensorUpdates::GYRO | SensorUpdates::ACCEL | SensorUpdates::MAG);

        let mut full = EkfFilter::gps();
        full.init(&settings()).unwrap();
        let mut state = sample;
        assert_eq!(cycle(&mut full, 0, &mut state), FilterResult::Critical);

        let mut nav_only = EkfFilter::gps_nav_only();
        nav_only.init(&settings()).unwrap();
        let mut state = sample;
        assert_eq!(cycle(&mut nav_only, 0, &mut state), FilterResult::Ok);
        assert!(state.nav_used);
        assert!(!nav_only.is_initialized());
    }

    #[test]
    fn test_unhealthy_mag_blocks_initialization() {
        let mut filter = EkfFilter::gps();
        filter.init(&settings()).unwrap();

        for i in 0..5 {
            let mut state = full_sample();
            state.mag_b = Vector3::new(20.0, 0.0, 45.0);
            state.mag_ok = false;
            assert_eq!(cycle(&mut filter, i, &mut state), FilterResult::Critical);
            assert!(!state.is_set(SensorUpdates::MAG));
        }
        assert_eq!(filter.init_stage, 0);
        assert!(!filter.work.is_set(SensorUpdates::MAG));

        // A healthy sample starts the alignment right away
        assert_eq!(cycle(&mut filter, 5, &mut full_sample()), FilterResult::Ok);
        assert_eq!(filter.init_stage, 1);
        assert_eq!(filter.work.mag_b, Vector3::from(BE));
    }

    #[test]
    fn test_unhealthy_mag_passes_after_initialization() {
        let mut filter = initialized(EkfFilter::gps());

        let mut state = full_sample();
        state.mag_ok = false;
        cycle(&mut filter, 20, &mut state);
        assert!(state.is_set(SensorUpdates::MAG));
    }

    #[test]
    fn test_nav_only_leaves_attitude() {
        let mut filter = initialized(EkfFilter::gps_nav_only());

        let mut state = full_sample();
        state.gyro_rad_s = Vector3::new(0.1, 0.0, 0.0);
        cycle(&mut filter, 20, &mut state);

        assert_eq!(state.quat_nb, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(state.gyro_rad_s, Vector3::new(0.1, 0.0, 0.0));
        assert!(state.is_set(SensorUpdates::POS | SensorUpdates::VEL));
    }

    #[test]
    fn test_static_hold() {
        let mut filter = initialized(EkfFilter::gps());

        for i in 20..2000 {
            assert_eq!(cycle(&mut filter, i, &mut full_sample()), FilterResult::Ok);
        }
        let mut state = full_sample();
        assert_eq!(cycle(&mut filter, 2000, &mut state), FilterResult::Ok);

        let (roll, pitch, yaw) = quat_from_array(&state.quat_nb).euler_angles();
        assert_relative_eq!(roll, 0.0, epsilon = 1e-2);
        assert_relative_eq!(pitch, 0.0, epsilon = 1e-2);
        assert_relative_eq!(yaw, 0.0, epsilon = 1e-2);
        assert!(state.pos_n_m.norm() < 0.1);
        assert!(state.vel_n_m_s.norm() < 0.1);
        assert!(filter.ins.covariance_is_valid());
    }

    #[test]
    fn test_divergence_resets_to_template() {
        for (filter, expected) in [
            (EkfFilter::gps(), FilterResult::Critical),
            (EkfFilter::gps_nav_only(), FilterResult::Warning),
        ] {
            let mut filter = initialized(filter);
            filter.ins.covariance_mut()[(3, 3)] = f32::NAN;

            let mut state = full_sample();
            assert_eq!(cycle(&mut filter, 20, &mut state), expected);
            assert_eq!(filter.ins.variance(), settings().ekf.p);
            assert!(!state.nav_ok);
            assert!(!filter.is_initialized());

            // Reported until the re-initialization is complete
            for i in 21..31 {
                assert_eq!(cycle(&mut filter, i, &mut full_sample()), expected);
            }
            assert_eq!(cycle(&mut filter, 32, &mut full_sample()), FilterResult::Ok);
            assert!(filter.ins.state().quat_nb.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_init_rejects_implausible_configuration() {
        let mut settings = settings();
        settings.ekf.r.baro_z = 0.0;
        assert_eq!(
            EkfFilter::gps().init(&settings),
            Err(FilterInitError::ImplausibleVariance {
                name: "R",
                index: 9,
                value: 0.0
            })
        );

        let mut settings = self::settings();
        settings.home.be = [0.0; 3];
        assert_eq!(
            EkfFilter::indoor().init(&settings),
            Err(FilterInitError::MissingMagneticField)
        );
    }

    #[test]
    fn test_measurement_plan() {
        let gps = SensorUpdates::POS | SensorUpdates::VEL;
        assert_eq!(
            measurement_plan(gps | SensorUpdates::MAG, true),
            (SensorsUsed::POS | SensorsUsed::VEL | SensorsUsed::MAG, PosVelSource::Gps)
        );
        assert_eq!(
            measurement_plan(SensorUpdates::BARO, false),
            (SensorsUsed::BARO, PosVelSource::Indoor)
        );

        // GPS takes precedence over airspeed outdoors
        assert_eq!(
            measurement_plan(gps | SensorUpdates::AIRSPEED, true),
            (SensorsUsed::POS | SensorsUsed::VEL, PosVelSource::Gps)
        );
        assert_eq!(
            measurement_plan(SensorUpdates::AIRSPEED, true),
            (SensorsUsed::VEL, PosVelSource::Airspeed)
        );
        assert_eq!(
            measurement_plan(gps | SensorUpdates::AIRSPEED, false),
            (SensorsUsed::POS | SensorsUsed::VEL, PosVelSource::Airspeed)
        );
    }

    #[test]
    fn test_airspeed_becomes_velocity() {
        let mut filter = initialized(EkfFilter::gps());
        let before = filter.ins.state().vel_n_m_s;

        let mut state = StateEstimation::default();
        state.accel_m_s2 = Vector3::new(0.0, 0.0, -GRAVITY_M_S2);
        state.true_airspeed_m_s = 20.0;
        state.mark(SensorUpdates::GYRO | SensorUpdates::ACCEL | SensorUpdates::AIRSPEED);
        cycle(&mut filter, 20, &mut state);

        assert_relative_eq!(filter.work.vel_n_m_s, Vector3::new(20.0, 0.0, 0.0), epsilon = 1e-2);
        assert!(filter.ins.state().vel_n_m_s[0] > before[0]);
    }
}
