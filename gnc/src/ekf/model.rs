//! Process and measurement model of the 14 state filter.
//!
//! State: NED position, NED velocity, body to NED quaternion (scalar first),
//! gyro bias, accelerometer Z bias. Input: body rates and specific force.
//! Measurements: NED position, NED velocity, leveled magnetic field, baro
//! altitude.

use libm::{powf, sqrtf};
use nalgebra::Vector3;

use super::{FMatrix, GMatrix, HMatrix, InputVector, MeasurementVector, StateVector};
use crate::math::GRAVITY_M_S2;

/// Bias corrected inputs and the quaternion, shared by the state equation
/// and its linearization.
struct Operands {
    wx: f32,
    wy: f32,
    wz: f32,
    ax: f32,
    ay: f32,
    az: f32,
    q0: f32,
    q1: f32,
    q2: f32,
    q3: f32,
}

impl Operands {
    fn new(x: &StateVector, u: &InputVector) -> Self {
        Operands {
            wx: u[0] - x[10],
            wy: u[1] - x[11],
            wz: u[2] - x[12],
            ax: u[3],
            ay: u[4],
            az: u[5] - x[13],
            q0: x[6],
            q1: x[7],
            q2: x[8],
            q3: x[9],
        }
    }
}

pub fn state_eq(x: &StateVector, u: &InputVector) -> StateVector {
    let Operands {
        wx,
        wy,
        wz,
        ax,
        ay,
        az,
        q0,
        q1,
        q2,
        q3,
    } = Operands::new(x, u);

    let mut xdot = StateVector::zeros();

    // Pdot = V
    xdot[0] = x[3];
    xdot[1] = x[4];
    xdot[2] = x[5];

    // Vdot = Reb * a + g
    xdot[3] = (q0 * q0 + q1 * q1 - q2 * q2 - q3 * q3) * ax
        + 2.0 * (q1 * q2 - q0 * q3) * ay
        + 2.0 * (q1 * q3 + q0 * q2) * az;
    xdot[4] = 2.0 * (q1 * q2 + q0 * q3) * ax
        + (q0 * q0 - q1 * q1 + q2 * q2 - q3 * q3) * ay
        + 2.0 * (q2 * q3 - q0 * q1) * az;
    xdot[5] = 2.0 * (q1 * q3 - q0 * q2) * ax
        + 2.0 * (q2 * q3 + q0 * q1) * ay
        + (q0 * q0 - q1 * q1 - q2 * q2 + q3 * q3) * az
        + GRAVITY_M_S2;

    // qdot = Q * w / 2
    xdot[6] = (-q1 * wx - q2 * wy - q3 * wz) / 2.0;
    xdot[7] = (q0 * wx - q3 * wy + q2 * wz) / 2.0;
    xdot[8] = (q3 * wx + q0 * wy - q1 * wz) / 2.0;
    xdot[9] = (-q2 * wx + q1 * wy + q0 * wz) / 2.0;

    // Biases are constant
    xdot
}

/// Jacobians of [`state_eq`] with respect to the state (F) and to the
/// process noise (G). Only the entries inside the sparsity ranges are
/// written; the rest of `f` and `g` must be zero.
pub fn linearize_fg(x: &StateVector, u: &InputVector, f: &mut FMatrix, g: &mut GMatrix) {
    let Operands {
        wx,
        wy,
        wz,
        ax,
        ay,
        az,
        q0,
        q1,
        q2,
        q3,
    } = Operands::new(x, u);

    // Pdot = V
    f[(0, 3)] = 1.0;
    f[(1, 4)] = 1.0;
    f[(2, 5)] = 1.0;

    // dVdot/dq
    f[(3, 6)] = 2.0 * (q0 * ax - q3 * ay + q2 * az);
    f[(3, 7)] = 2.0 * (q1 * ax + q2 * ay + q3 * az);
    f[(3, 8)] = 2.0 * (-q2 * ax + q1 * ay + q0 * az);
    f[(3, 9)] = 2.0 * (-q3 * ax - q0 * ay + q1 * az);
    f[(4, 6)] = 2.0 * (q3 * ax + q0 * ay - q1 * az);
    f[(4, 7)] = 2.0 * (q2 * ax - q1 * ay - q0 * az);
    f[(4, 8)] = 2.0 * (q1 * ax + q2 * ay + q3 * az);
    f[(4, 9)] = 2.0 * (q0 * ax - q3 * ay + q2 * az);
    f[(5, 6)] = 2.0 * (-q2 * ax + q1 * ay + q0 * az);
    f[(5, 7)] = 2.0 * (q3 * ax + q0 * ay - q1 * az);
    f[(5, 8)] = 2.0 * (-q0 * ax + q3 * ay - q2 * az);
    f[(5, 9)] = 2.0 * (q1 * ax + q2 * ay + q3 * az);

    // The accel Z bias and the accel Z noise enter the velocity the same way
    let dv_dabz = [
        -2.0 * (q1 * q3 + q0 * q2),
        2.0 * (-q2 * q3 + q0 * q1),
        -q0 * q0 + q1 * q1 + q2 * q2 - q3 * q3,
    ];
    for (i, d) in dv_dabz.into_iter().enumerate() {
        f[(3 + i, 13)] = d;
        g[(3 + i, 5)] = d;
    }

    // dqdot/dq
    f[(6, 6)] = 0.0;
    f[(6, 7)] = -wx / 2.0;
    f[(6, 8)] = -wy / 2.0;
    f[(6, 9)] = -wz / 2.0;
    f[(7, 6)] = wx / 2.0;
    f[(7, 7)] = 0.0;
    f[(7, 8)] = wz / 2.0;
    f[(7, 9)] = -wy / 2.0;
    f[(8, 6)] = wy / 2.0;
    f[(8, 7)] = -wz / 2.0;
    f[(8, 8)] = 0.0;
    f[(8, 9)] = wx / 2.0;
    f[(9, 6)] = wz / 2.0;
    f[(9, 7)] = wy / 2.0;
    f[(9, 8)] = -wx / 2.0;
    f[(9, 9)] = 0.0;

    // dqdot/dwbias, equal to dqdot/dnw
    let dq_dwb = [
        [q1 / 2.0, q2 / 2.0, q3 / 2.0],
        [-q0 / 2.0, q3 / 2.0, -q2 / 2.0],
        [-q3 / 2.0, -q0 / 2.0, q1 / 2.0],
        [q2 / 2.0, -q1 / 2.0, -q0 / 2.0],
    ];
    for (i, row) in dq_dwb.iter().enumerate() {
        for (j, d) in row.iter().enumerate() {
            f[(6 + i, 10 + j)] = *d;
            g[(6 + i, j)] = *d;
        }
    }

    // dVdot/dna
    g[(3, 3)] = -q0 * q0 - q1 * q1 + q2 * q2 + q3 * q3;
    g[(3, 4)] = 2.0 * (-q1 * q2 + q0 * q3);
    g[(4, 3)] = -2.0 * (q1 * q2 + q0 * q3);
    g[(4, 4)] = -q0 * q0 + q1 * q1 - q2 * q2 + q3 * q3;
    g[(5, 3)] = 2.0 * (-q1 * q3 + q0 * q2);
    g[(5, 4)] = -2.0 * (q2 * q3 + q0 * q1);
}

/// Unnormalized sine and cosine of the heading, and their squared norm.
fn heading(q0: f32, q1: f32, q2: f32, q3: f32) -> (f32, f32, f32) {
    let a1 = 2.0 * q0 * q3 + 2.0 * q1 * q2;
    let a2 = q0 * q0 + q1 * q1 - q2 * q2 - q3 * q3;
    (a1, a2, a1 * a1 + a2 * a2)
}

/// Predicted measurements. The magnetic channels compare the horizontal
/// projection of the reference field rotated by the estimated heading; the
/// vertical channel is unused and predicted as zero.
pub fn measurement_eq(x: &StateVector, be: &Vector3<f32>) -> MeasurementVector {
    let (q0, q1, q2, q3) = (x[6], x[7], x[8], x[9]);
    let mut y = MeasurementVector::zeros();

    for i in 0..6 {
        y[i] = x[i];
    }

    let (a1, a2, norm_sq) = heading(q0, q1, q2, q3);
    let r = sqrtf(norm_sq);
    let cos_psi = a2 / r;
    let sin_psi = a1 / r;
    y[6] = be[0] * cos_psi + be[1] * sin_psi;
    y[7] = -be[0] * sin_psi + be[1] * cos_psi;
    y[8] = 0.0;

    y[9] = -x[2];
    y
}

/// Jacobian of [`measurement_eq`] with respect to the state. Row 8 stays
/// zero.
pub fn linearize_h(x: &StateVector, be: &Vector3<f32>, h: &mut HMatrix) {
    let (q0, q1, q2, q3) = (x[6], x[7], x[8], x[9]);
    let (be0, be1) = (be[0], be[1]);

    for i in 0..6 {
        h[(i, i)] = 1.0;
    }

    let (a1, a2, norm_sq) = heading(q0, q1, q2, q3);
    let a3 = 0.5 / powf(norm_sq, 1.5);
    let k1 = 1.0 / sqrtf(norm_sq);
    let k3 = a3 * a2;
    let k4 = a2 * 4.0;
    let k5 = a1 * 4.0;
    let k6 = a3 * a1;

    let d0 = q0 * k4 + q3 * k5;
    let d1 = q1 * k4 + q2 * k5;
    let d2 = q2 * k4 - q1 * k5;
    let d3 = q3 * k4 - q0 * k5;

    h[(6, 6)] = be0 * q0 * k1 * 2.0 + be1 * q3 * k1 * 2.0 - be0 * d0 * k3 - be1 * d0 * k6;
    h[(6, 7)] = be0 * q1 * k1 * 2.0 + be1 * q2 * k1 * 2.0 - be0 * d1 * k3 - be1 * d1 * k6;
    h[(6, 8)] = be0 * q2 * k1 * -2.0 + be1 * q1 * k1 * 2.0 + be0 * d2 * k3 + be1 * d2 * k6;
    h[(6, 9)] = be1 * q0 * k1 * 2.0 - be0 * q3 * k1 * 2.0 + be0 * d3 * k3 + be1 * d3 * k6;
    h[(7, 6)] = be1 * q0 * k1 * 2.0 - be0 * q3 * k1 * 2.0 - be1 * d0 * k3 + be0 * d0 * k6;
    h[(7, 7)] = be0 * q2 * k1 * -2.0 + be1 * q1 * k1 * 2.0 - be1 * d1 * k3 + be0 * d1 * k6;
    h[(7, 8)] = be0 * q1 * k1 * -2.0 - be1 * q2 * k1 * 2.0 + be1 * d2 * k3 - be0 * d2 * k6;
    h[(7, 9)] = be0 * q0 * k1 * -2.0 - be1 * q3 * k1 * 2.0 + be1 * d3 * k3 - be0 * d3 * k6;

    // dAlt/dPz
    h[(9, 2)] = -1.0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ekf::{NUMV, NUMX};
    use approx::assert_relative_eq;

    const EPS: f32 = 1e-3;

    fn test_state() -> StateVector {
        let mut x = StateVector::zeros();
        let q = nalgebra::Vector4::new(0.8f32, 0.3, -0.4, 0.33).normalize();
        x.fixed_rows_mut::<3>(0).copy_from_slice(&[1.0, -2.0, -3.0]);
        x.fixed_rows_mut::<3>(3).copy_from_slice(&[0.5, 0.2, -0.1]);
        x.fixed_rows_mut::<4>(6).copy_from_slice(q.as_slice());
        x.fixed_rows_mut::<3>(10).copy_from_slice(&[0.01, -0.02, 0.03]);
        x[13] = 0.05;
        x
    }

    fn test_input() -> InputVector {
        InputVector::new(0.1, -0.2, 0.3, 1.0, 2.0, -9.0)
    }

    #[test]
    fn test_level_at_rest_has_no_acceleration() {
        let mut x = StateVector::zeros();
        x[6] = 1.0;
        let u = InputVector::new(0.0, 0.0, 0.0, 0.0, 0.0, -GRAVITY_M_S2);

        let xdot = state_eq(&x, &u);
        assert_relative_eq!(xdot.norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gyro_bias_is_subtracted() {
        let mut x = StateVector::zeros();
        x[6] = 1.0;
        x[12] = 0.2;
        let u = InputVector::new(0.0, 0.0, 0.2, 0.0, 0.0, -GRAVITY_M_S2);

        let xdot = state_eq(&x, &u);
        assert_relative_eq!(xdot[9], 0.0);
    }

    #[test]
    fn test_f_matches_finite_differences() {
        let x = test_state();
        let u = test_input();
        let mut f = FMatrix::zeros();
        let mut g = GMatrix::zeros();
        linearize_fg(&x, &u, &mut f, &mut g);

        for j in 0..NUMX {
            let mut xp = x;
            let mut xm = x;
            xp[j] += EPS;
            xm[j] -= EPS;
            let d = (state_eq(&xp, &u) - state_eq(&xm, &u)) / (2.0 * EPS);
            for i in 0..NUMX {
                assert_relative_eq!(f[(i, j)], d[i], epsilon = 5e-3);
            }
        }
    }

    #[test]
    fn test_g_matches_finite_differences() {
        let x = test_state();
        let u = test_input();
        let mut f = FMatrix::zeros();
        let mut g = GMatrix::zeros();
        linearize_fg(&x, &u, &mut f, &mut g);

        // Sensor noise is subtracted from the input
        for j in 0..6 {
            let mut up = u;
            let mut um = u;
            up[j] += EPS;
            um[j] -= EPS;
            let d = (state_eq(&x, &up) - state_eq(&x, &um)) / (2.0 * EPS);
            for i in 0..NUMX {
                assert_relative_eq!(g[(i, j)], -d[i], epsilon = 5e-3);
            }
        }
        for j in 6..10 {
            assert_relative_eq!(g.column(j).norm(), 0.0);
        }
    }

    #[test]
    fn test_h_matches_finite_differences() {
        let x = test_state();
        let be = Vector3::new(0.4, 0.1, 0.9).normalize();
        let mut h = HMatrix::zeros();
        linearize_h(&x, &be, &mut h);

        for j in 0..NUMX {
            let mut xp = x;
            let mut xm = x;
            xp[j] += EPS;
            xm[j] -= EPS;
            let d = (measurement_eq(&xp, &be) - measurement_eq(&xm, &be)) / (2.0 * EPS);
            for i in 0..NUMV {
                assert_relative_eq!(h[(i, j)], d[i], epsilon = 5e-3);
            }
        }
    }

    #[test]
    fn test_measurement_follows_heading() {
        let mut x = StateVector::zeros();
        // 90 degrees of yaw
        x[6] = libm::sqrtf(0.5);
        x[9] = libm::sqrtf(0.5);
        x[2] = -12.0;
        let be = Vector3::new(1.0, 0.0, 0.0);

        let y = measurement_eq(&x, &be);
        assert_relative_eq!(y[6], 0.0, epsilon = 1e-6);
        assert_relative_eq!(y[7], -1.0, epsilon = 1e-6);
        assert_relative_eq!(y[8], 0.0);
        assert_relative_eq!(y[9], 12.0);
    }
}
