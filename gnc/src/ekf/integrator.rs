use super::{InputVector, StateVector, model::state_eq};

/// Fourth order Runge-Kutta step, holding the input constant over `dt`.
pub fn runge_kutta(x: &mut StateVector, u: &InputVector, dt: f32) {
    let half_dt = dt / 2.0;
    let x0 = *x;

    let k1 = state_eq(&x0, u);
    let k2 = state_eq(&(x0 + k1 * half_dt), u);
    let k3 = state_eq(&(x0 + k2 * half_dt), u);
    let k4 = state_eq(&(x0 + k3 * dt), u);

    *x = x0 + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::GRAVITY_M_S2;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_acceleration_is_exact() {
        let mut x = StateVector::zeros();
        x[6] = 1.0;
        // 1 m/s^2 north on top of gravity compensation
        let u = InputVector::new(0.0, 0.0, 0.0, 1.0, 0.0, -GRAVITY_M_S2);

        runge_kutta(&mut x, &u, 2.0);

        assert_relative_eq!(x[3], 2.0, epsilon = 1e-5);
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(x[5], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_rotation_about_z() {
        let mut x = StateVector::zeros();
        x[6] = 1.0;
        let rate = 0.5;
        let u = InputVector::new(0.0, 0.0, rate, 0.0, 0.0, -GRAVITY_M_S2);

        for _ in 0..100 {
            runge_kutta(&mut x, &u, 0.01);
        }

        // Half angle of a 0.5 rad rotation
        assert_relative_eq!(x[6], libm::cosf(0.25), epsilon = 1e-4);
        assert_relative_eq!(x[9], libm::sinf(0.25), epsilon = 1e-4);
    }
}
