use defmt_or_log::{debug, info};
use libm::atan2f;
use nalgebra::{UnitQuaternion, Vector3};

use crate::{
    Instant,
    estimation::{
        deltatime::DeltaTime,
        filter::{FilterInitError, FilterResult, StateFilter, check_range},
        settings::{ComplementaryGains, EstimationSettings},
        state::{SensorUpdates, StateEstimation},
    },
    math::{align_from_accel_mag, quat_from_array, quat_to_array},
};

const GYRO_BIAS_LIMIT_RAD_S: f32 = 10.0 * core::f32::consts::PI / 180.0;

/// Attitude complementary filter.
///
/// Gyro rates are integrated and corrected towards the gravity direction
/// measured by the accelerometer and, optionally, towards the horizontal
/// component of the home magnetic field. The integral terms estimate the
/// gyro bias.
#[derive(Debug, Clone)]
pub struct ComplementaryFilter {
    use_mag: bool,
    gains: ComplementaryGains,
    /// Unit horizontal home field, NED.
    be_h: Vector3<f32>,
    declination_rad: f32,

    quat_nb: Option<UnitQuaternion<f32>>,
    gyro_bias_rad_s: Vector3<f32>,
    accel_m_s2: Option<Vector3<f32>>,
    mag_b: Option<Vector3<f32>>,
    dt: DeltaTime,
}

impl ComplementaryFilter {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn with_mag() -> Self {
        Self::build(true)
    }

    fn build(use_mag: bool) -> Self {
        ComplementaryFilter {
            use_mag,
            gains: ComplementaryGains::default(),
            be_h: Vector3::x(),
            declination_rad: 0.0,
            quat_nb: None,
            gyro_bias_rad_s: Vector3::zeros(),
            accel_m_s2: None,
            mag_b: None,
            dt: DeltaTime::new(500.0),
        }
    }

    pub fn gyro_bias_rad_s(&self) -> Vector3<f32> {
        self.gyro_bias_rad_s
    }

    fn align(&mut self, accel: &Vector3<f32>) -> Option<UnitQuaternion<f32>> {
        if !self.use_mag {
            return Some(quat_from_array(&align_from_accel_mag(accel, None)));
        }

        let mag = self.mag_b?;
        let magnetic = quat_from_array(&align_from_accel_mag(accel, Some(&mag)));
        let declination = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.declination_rad);
        Some(declination * magnetic)
    }

    /// Direction error between the measured specific force and the one
    /// expected from the attitude estimate, in body frame.
    fn accel_error(quat_nb: &UnitQuaternion<f32>, accel: &Vector3<f32>) -> Option<Vector3<f32>> {
        let measured = accel.try_normalize(1e-6)?;
        let expected = quat_nb.inverse_transform_vector(&-Vector3::z());
        Some(measured.cross(&expected))
    }

    /// Heading error between the leveled magnetometer reading and the home
    /// field, in body frame.
    fn mag_error(&self, quat_nb: &UnitQuaternion<f32>, mag: &Vector3<f32>) -> Option<Vector3<f32>> {
        let mag_n = quat_nb.transform_vector(mag);
        let mag_h = Vector3::new(mag_n[0], mag_n[1], 0.0).try_normalize(1e-6)?;
        Some(quat_nb.inverse_transform_vector(&mag_h.cross(&self.be_h)))
    }
}

impl Default for ComplementaryFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl StateFilter for ComplementaryFilter {
    fn name(&self) -> &'static str {
        if self.use_mag { "cfm" } else { "cf" }
    }

    fn init(&mut self, settings: &EstimationSettings) -> Result<(), FilterInitError> {
        let gains = settings.complementary;
        check_range("accel_kp", gains.accel_kp, 0.0, f32::INFINITY)?;
        check_range("accel_ki", gains.accel_ki, 0.0, f32::INFINITY)?;
        check_range("mag_kp", gains.mag_kp, 0.0, f32::INFINITY)?;
        check_range("mag_ki", gains.mag_ki, 0.0, f32::INFINITY)?;

        *self = Self::build(self.use_mag);
        self.gains = gains;
        self.dt = DeltaTime::new(settings.sensor_rate_hz);

        if self.use_mag {
            let be = settings.home.be;
            self.be_h = Vector3::new(be[0], be[1], 0.0)
                .try_normalize(1e-6)
                .ok_or(FilterInitError::MissingMagneticField)?;
            self.declination_rad = atan2f(be[1], be[0]);
        }
        Ok(())
    }

    fn filter(&mut self, now: Instant, state: &mut StateEstimation) -> FilterResult {
        if state.is_set(SensorUpdates::ACCEL) {
            self.accel_m_s2 = Some(state.accel_m_s2);
        }
        let mag_fresh = state.is_set(SensorUpdates::MAG);
        if mag_fresh {
            self.mag_b = Some(state.mag_b);
        }

        // Propagate on gyro samples only, once an accel sample has been seen
        let accel = match self.accel_m_s2 {
            Some(accel) if state.is_set(SensorUpdates::GYRO) => accel,
            _ => {
                state.unmark(SensorUpdates::ATTITUDE | SensorUpdates::GYRO);
                return FilterResult::Ok;
            }
        };

        let dt = self.dt.average_seconds(now);

        let quat_nb = match self.quat_nb {
            Some(q) => q,
            None => match self.align(&accel) {
                Some(q) => {
                    info!("Complementary filter aligned");
                    self.quat_nb = Some(q);
                    state.quat_nb = quat_to_array(&q);
                    state.mark(SensorUpdates::ATTITUDE);
                    return FilterResult::Ok;
                }
                None => {
                    debug!("Complementary filter waiting for magnetometer");
                    state.unmark(SensorUpdates::ATTITUDE | SensorUpdates::GYRO);
                    return FilterResult::Critical;
                }
            },
        };

        let mut correction = Vector3::zeros();
        if let Some(err) = Self::accel_error(&quat_nb, &accel) {
            correction += err * self.gains.accel_kp;
            self.gyro_bias_rad_s -= err * (self.gains.accel_ki * dt);
        }
        if self.use_mag && mag_fresh {
            if let Some(err) = self.mag_error(&quat_nb, &state.mag_b) {
                correction += err * self.gains.mag_kp;
                self.gyro_bias_rad_s -= err * (self.gains.mag_ki * dt);
            }
        }
        self.gyro_bias_rad_s = self
            .gyro_bias_rad_s
            .map(|b| b.clamp(-GYRO_BIAS_LIMIT_RAD_S, GYRO_BIAS_LIMIT_RAD_S));

        let rate = state.gyro_rad_s - self.gyro_bias_rad_s;
        let quat_nb = quat_nb * UnitQuaternion::from_scaled_axis((rate + correction) * dt);
        self.quat_nb = Some(quat_nb);

        state.quat_nb = quat_to_array(&quat_nb);
        state.gyro_rad_s = rate;
        state.mark(SensorUpdates::ATTITUDE);
        FilterResult::Ok
    }
}
