//! 14 state INS/GPS extended Kalman filter.
//!
//! The filter integrates gyro and accelerometer readings through a strapdown
//! model and corrects the result with position, velocity, magnetometer and
//! barometric altitude measurements. Covariance propagation and the update
//! exploit the fixed sparsity of the Jacobians, see [`sparsity`].

pub mod covariance;
pub mod integrator;
pub mod model;
pub mod sparsity;
pub mod update;

use libm::sqrtf;
use nalgebra::{SMatrix, SVector, Vector3, Vector6};

pub use update::SensorsUsed;

use crate::math::inv_sqrt_guarded;

/// Number of states.
pub const NUMX: usize = 14;
/// Number of process noise sources.
pub const NUMW: usize = 10;
/// Number of measurement channels.
pub const NUMV: usize = 10;

pub type StateVector = SVector<f32, NUMX>;
pub type InputVector = Vector6<f32>;
pub type NoiseVector = SVector<f32, NUMW>;
pub type MeasurementVector = SVector<f32, NUMV>;
pub type CovarianceMatrix = SMatrix<f32, NUMX, NUMX>;
pub type FMatrix = SMatrix<f32, NUMX, NUMX>;
pub type GMatrix = SMatrix<f32, NUMX, NUMW>;
pub type HMatrix = SMatrix<f32, NUMV, NUMX>;

const ACCEL_BIAS_LIMIT_M_S2: f32 = 0.1;
const GYRO_BIAS_LIMIT_RAD_S: f32 = 10.0 * core::f32::consts::PI / 180.0;

const DEFAULT_P_DIAG: [f32; NUMX] = [
    25.0, 25.0, 25.0, // position (m^2)
    5.0, 5.0, 5.0, // velocity (m/s)^2
    1e-5, 1e-5, 1e-5, 1e-5, // quaternion
    1e-6, 1e-6, 1e-6, // gyro bias (rad/s)^2
    1e-5, // accel bias (m/s^2)^2
];

const DEFAULT_Q: [f32; NUMW] = [
    1e-5, 1e-5, 1e-5, // gyro noise (rad/s)^2
    1e-5, 1e-5, 1e-5, // accel noise (m/s^2)^2
    1e-6, 1e-6, 1e-6, // gyro bias random walk
    5e-4, // accel bias random walk
];

const DEFAULT_R: [f32; NUMV] = [
    0.004, 0.004, 0.036, // position (m^2)
    0.004, 0.004, 0.004, // velocity (m/s)^2
    0.005, 0.005, 0.005, // magnetic unit vector
    0.05, // baro altitude (m^2)
];

const POS_RESET_VAR_M2: f32 = 25.0;
const VEL_RESET_VAR_M2_S2: f32 = 5.0;

/// Copy of the navigation solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsState {
    pub pos_n_m: Vector3<f32>,
    pub vel_n_m_s: Vector3<f32>,
    /// Body to NED, scalar first.
    pub quat_nb: [f32; 4],
    pub gyro_bias_rad_s: Vector3<f32>,
    /// Only the Z component is estimated.
    pub accel_bias_m_s2: Vector3<f32>,
}

/// Outputs of the last state prediction, with the estimated biases removed
/// from the inertial inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nav {
    pub pos_n_m: Vector3<f32>,
    pub vel_n_m_s: Vector3<f32>,
    pub quat_nb: [f32; 4],
    pub gyro_rad_s: Vector3<f32>,
    pub accel_m_s2: Vector3<f32>,
}

impl Default for Nav {
    fn default() -> Self {
        Nav {
            pos_n_m: Vector3::zeros(),
            vel_n_m_s: Vector3::zeros(),
            quat_nb: [1.0, 0.0, 0.0, 0.0],
            gyro_rad_s: Vector3::zeros(),
            accel_m_s2: Vector3::zeros(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsGps {
    x: StateVector,
    p: CovarianceMatrix,
    q: NoiseVector,
    r: MeasurementVector,
    be: Vector3<f32>,

    // Entries outside the sparsity ranges are never written and stay zero
    f: FMatrix,
    g: GMatrix,
    h: HMatrix,

    nav: Nav,
}

impl Default for InsGps {
    fn default() -> Self {
        Self::new()
    }
}

impl InsGps {
    pub fn new() -> Self {
        let mut x = StateVector::zeros();
        x[6] = 1.0;

        InsGps {
            x,
            p: CovarianceMatrix::from_diagonal(&StateVector::from(DEFAULT_P_DIAG)),
            q: NoiseVector::from(DEFAULT_Q),
            r: MeasurementVector::from(DEFAULT_R),
            be: Vector3::x(),
            f: FMatrix::zeros(),
            g: GMatrix::zeros(),
            h: HMatrix::zeros(),
            nav: Nav::default(),
        }
    }

    /// Resets every matrix, the state and the noise parameters to their
    /// built-in defaults.
    pub fn initialize(&mut self) {
        *self = Self::new();
    }

    /// Hook for arming dependent tuning. Bias convergence used to be sped up
    /// while disarmed; that proved unstable and the noise is left untouched.
    pub fn set_armed(&mut self, _armed: bool) {}

    pub fn state(&self) -> InsState {
        InsState {
            pos_n_m: self.x.fixed_rows::<3>(0).clone_owned(),
            vel_n_m_s: self.x.fixed_rows::<3>(3).clone_owned(),
            quat_nb: [self.x[6], self.x[7], self.x[8], self.x[9]],
            gyro_bias_rad_s: self.x.fixed_rows::<3>(10).clone_owned(),
            accel_bias_m_s2: Vector3::new(0.0, 0.0, self.x[13]),
        }
    }

    pub fn nav(&self) -> Nav {
        self.nav
    }

    /// Diagonal of the covariance.
    pub fn variance(&self) -> [f32; NUMX] {
        let mut var = [0.0; NUMX];
        for (i, v) in var.iter_mut().enumerate() {
            *v = self.p[(i, i)];
        }
        var
    }

    /// True if every variance is finite and strictly positive.
    pub fn covariance_is_valid(&self) -> bool {
        self.variance().iter().all(|v| v.is_finite() && *v > 0.0)
    }

    /// For every nonzero entry of `diag`, clears the matching row and column
    /// of P and sets the diagonal element. Zero entries are left untouched.
    pub fn reset_covariance(&mut self, diag: &[f32; NUMX]) {
        for (i, d) in diag.iter().enumerate() {
            if *d != 0.0 {
                self.p.row_mut(i).fill(0.0);
                self.p.column_mut(i).fill(0.0);
                self.p[(i, i)] = *d;
            }
        }
    }

    pub fn set_state(
        &mut self,
        pos_n_m: &Vector3<f32>,
        vel_n_m_s: &Vector3<f32>,
        quat_nb: &[f32; 4],
        gyro_bias_rad_s: &Vector3<f32>,
        accel_bias_m_s2: &Vector3<f32>,
    ) {
        self.x.fixed_rows_mut::<3>(0).copy_from(pos_n_m);
        self.x.fixed_rows_mut::<3>(3).copy_from(vel_n_m_s);
        self.x.fixed_rows_mut::<4>(6).copy_from_slice(quat_nb);
        self.x.fixed_rows_mut::<3>(10).copy_from(gyro_bias_rad_s);
        self.x[13] = accel_bias_m_s2[2];
    }

    /// Overwrites position and velocity and decorrelates them from the rest
    /// of the state.
    pub fn reset_pos_vel(&mut self, pos_n_m: &Vector3<f32>, vel_n_m_s: &Vector3<f32>) {
        for i in 0..6 {
            self.p.row_mut(i).fill(0.0);
            self.p.column_mut(i).fill(0.0);
        }
        for i in 0..3 {
            self.p[(i, i)] = POS_RESET_VAR_M2;
            self.p[(i + 3, i + 3)] = VEL_RESET_VAR_M2_S2;
        }

        self.x.fixed_rows_mut::<3>(0).copy_from(pos_n_m);
        self.x.fixed_rows_mut::<3>(3).copy_from(vel_n_m_s);
    }

    pub fn set_gyro_bias(&mut self, gyro_bias_rad_s: &Vector3<f32>) {
        self.x.fixed_rows_mut::<3>(10).copy_from(gyro_bias_rad_s);
    }

    pub fn set_accel_bias(&mut self, accel_bias_m_s2: &Vector3<f32>) {
        self.x[13] = accel_bias_m_s2[2];
    }

    pub fn set_gyro_var(&mut self, var: &[f32; 3]) {
        self.q.fixed_rows_mut::<3>(0).copy_from_slice(var);
    }

    pub fn set_accel_var(&mut self, var: &[f32; 3]) {
        self.q.fixed_rows_mut::<3>(3).copy_from_slice(var);
    }

    pub fn set_gyro_bias_var(&mut self, var: &[f32; 3]) {
        self.q.fixed_rows_mut::<3>(6).copy_from_slice(var);
    }

    pub fn set_accel_bias_var(&mut self, var: f32) {
        self.q[9] = var;
    }

    pub fn set_pos_vel_var(&mut self, pos_var: &[f32; 3], vel_var: &[f32; 3]) {
        self.r.fixed_rows_mut::<3>(0).copy_from_slice(pos_var);
        self.r.fixed_rows_mut::<3>(3).copy_from_slice(vel_var);
    }

    /// Variance of the magnetic unit vector channels.
    pub fn set_mag_var(&mut self, var: &[f32; 3]) {
        self.r.fixed_rows_mut::<3>(6).copy_from_slice(var);
    }

    pub fn set_baro_var(&mut self, var: f32) {
        self.r[9] = var;
    }

    /// Reference magnetic field in NED, as a unit vector.
    pub fn set_mag_north(&mut self, be: &Vector3<f32>) {
        self.be = *be;
    }

    /// Propagates the state over `dt` seconds and relinearizes the process
    /// model around the pre-integration state.
    pub fn state_prediction(&mut self, gyro_rad_s: &Vector3<f32>, accel_m_s2: &Vector3<f32>, dt: f32) {
        let u = InputVector::new(
            gyro_rad_s[0],
            gyro_rad_s[1],
            gyro_rad_s[2],
            accel_m_s2[0],
            accel_m_s2[1],
            accel_m_s2[2],
        );

        model::linearize_fg(&self.x, &u, &mut self.f, &mut self.g);
        integrator::runge_kutta(&mut self.x, &u, dt);
        self.normalize_attitude();

        let state = self.state();
        self.nav = Nav {
            pos_n_m: state.pos_n_m,
            vel_n_m_s: state.vel_n_m_s,
            quat_nb: state.quat_nb,
            gyro_rad_s: gyro_rad_s - state.gyro_bias_rad_s,
            accel_m_s2: accel_m_s2 - state.accel_bias_m_s2,
        };
    }

    /// Propagates the covariance with the Jacobians of the last
    /// [`state_prediction`](Self::state_prediction).
    pub fn covariance_prediction(&mut self, dt: f32) {
        covariance::covariance_prediction(&self.f, &self.g, &self.q, dt, &mut self.p);
    }

    /// Measurement update with the channels selected by `sensors`.
    ///
    /// `mag_b` may be in any unit. It is normalized and leveled with the
    /// estimated roll and pitch; if that fails the magnetic channels are
    /// skipped.
    pub fn correction(
        &mut self,
        mag_b: &Vector3<f32>,
        pos_n_m: &Vector3<f32>,
        vel_n_m_s: &Vector3<f32>,
        baro_alt_m: f32,
        mut sensors: SensorsUsed,
    ) {
        let mut z = MeasurementVector::zeros();
        z.fixed_rows_mut::<3>(0).copy_from(pos_n_m);
        z.fixed_rows_mut::<3>(3).copy_from(vel_n_m_s);

        if sensors.intersects(SensorsUsed::MAG) {
            let leveled = self.level_mag(&(mag_b / mag_b.norm()));
            if leveled.iter().all(|v| v.is_finite()) {
                z.fixed_rows_mut::<3>(6).copy_from(&leveled);
            } else {
                sensors.remove(SensorsUsed::MAG);
            }
        }

        z[9] = baro_alt_m;

        model::linearize_h(&self.x, &self.be, &mut self.h);
        let y = model::measurement_eq(&self.x, &self.be);
        update::serial_update(&self.h, &self.r, &z, &y, &mut self.p, &mut self.x, sensors);

        self.normalize_attitude();
        self.limit_bias();
    }

    /// Removes roll and pitch from a body frame vector, leaving it in the
    /// heading frame.
    fn level_mag(&self, mag: &Vector3<f32>) -> Vector3<f32> {
        let (q0, q1, q2, q3) = (self.x[6], self.x[7], self.x[8], self.x[9]);

        let a = q0 * q1 * 2.0 + q2 * q3 * 2.0;
        let b = q0 * q0 - q1 * q1 - q2 * q2 + q3 * q3;
        let c = q0 * q2 * 2.0 - q1 * q3 * 2.0;
        let k1 = 1.0 / sqrtf(a * a + b * b);
        let k2 = sqrtf(1.0 - c * c);

        let rbe = nalgebra::Matrix3::new(
            k2,
            0.0,
            -c,
            k1 * a * c,
            k1 * b,
            k1 * k2 * a,
            k1 * c * b,
            -k1 * a,
            k1 * k2 * b,
        );

        rbe.transpose() * mag
    }

    fn normalize_attitude(&mut self) {
        let scale = inv_sqrt_guarded(self.x.fixed_rows::<4>(6).norm_squared());
        self.x.fixed_rows_mut::<4>(6).scale_mut(scale);
    }

    fn limit_bias(&mut self) {
        self.x[13] = self.x[13].clamp(-ACCEL_BIAS_LIMIT_M_S2, ACCEL_BIAS_LIMIT_M_S2);
        for i in 10..13 {
            self.x[i] = self.x[i].clamp(-GYRO_BIAS_LIMIT_RAD_S, GYRO_BIAS_LIMIT_RAD_S);
        }
    }

    #[cfg(test)]
    pub(crate) fn covariance_mut(&mut self) -> &mut CovarianceMatrix {
        &mut self.p
    }
}
