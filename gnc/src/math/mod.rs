//! Attitude helpers shared by the filter stages.
//!
//! Quaternions exchanged with the EKF are scalar first, `[q0, q1, q2, q3]`,
//! and rotate body frame vectors into the NED frame.

use libm::{atan2f, cosf, sinf, sqrtf};
use nalgebra::{Quaternion, Rotation3, UnitQuaternion, Vector3};

pub const GRAVITY_M_S2: f32 = 9.805;

const MIN_SQUARED_NORM: f32 = 1e-12;

/// `1 / sqrt(x)` with `x` floored, so a degenerate norm cannot divide by zero.
pub fn inv_sqrt_guarded(x: f32) -> f32 {
    1.0 / sqrtf(x.max(MIN_SQUARED_NORM))
}

pub fn quat_from_array(q: &[f32; 4]) -> UnitQuaternion<f32> {
    UnitQuaternion::from_quaternion(Quaternion::new(q[0], q[1], q[2], q[3]))
}

/// Scalar-first coefficients, sign chosen so that `q0 >= 0`.
pub fn quat_to_array(q: &UnitQuaternion<f32>) -> [f32; 4] {
    let q = [q.w, q.i, q.j, q.k];
    if q[0] < 0.0 {
        [-q[0], -q[1], -q[2], -q[3]]
    } else {
        q
    }
}

/// Z-Y-X Euler angles in radians to a scalar-first quaternion.
pub fn rpy_to_quat(roll: f32, pitch: f32, yaw: f32) -> [f32; 4] {
    quat_to_array(&UnitQuaternion::from_euler_angles(roll, pitch, yaw))
}

/// Coarse attitude from a specific force and a magnetic field measurement.
///
/// Roll and pitch come from the accelerometer, the field is then leveled
/// to obtain yaw. Without a field measurement the yaw is zero.
pub fn align_from_accel_mag(accel: &Vector3<f32>, mag: Option<&Vector3<f32>>) -> [f32; 4] {
    let roll = atan2f(-accel[1], -accel[2]);
    let (sr, cr) = (sinf(roll), cosf(roll));

    let azn = cr * accel[2] + sr * accel[1];
    let pitch = atan2f(accel[0], -azn);

    let yaw = match mag {
        Some(mag) => {
            let zn = cr * mag[2] + sr * mag[1];
            let yn = cr * mag[1] - sr * mag[2];
            let xn = cosf(pitch) * mag[0] + sinf(pitch) * zn;
            atan2f(-yn, xn)
        }
        None => 0.0,
    };

    rpy_to_quat(roll, pitch, yaw)
}

/// Angle between the local down direction and the field `be`.
pub fn dip_angle(be: &Vector3<f32>) -> f32 {
    let be = be.normalize();
    atan2f(Vector3::z().cross(&be).norm(), be[2])
}

/// Replaces a body frame field measurement with a synthetic one that has
/// the expected dip angle with respect to the estimated down direction.
///
/// The measured field only contributes its horizontal heading, so roll and
/// pitch errors cannot leak into the yaw correction.
pub fn map_to_horizontal_plane(
    quat_nb: &UnitQuaternion<f32>,
    mag_b: &Vector3<f32>,
    dip: f32,
    strength: f32,
) -> Vector3<f32> {
    let down_b = quat_nb.inverse_transform_vector(&Vector3::z());
    let axis = down_b.cross(mag_b).normalize();
    let rotation = Rotation3::new(axis * dip);

    rotation * (down_b * strength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use core::f32::consts::PI;

    #[test]
    fn test_rpy_to_quat_identity() {
        let q = rpy_to_quat(0.0, 0.0, 0.0);
        assert_relative_eq!(q.as_slice(), [1.0f32, 0.0, 0.0, 0.0].as_slice());
    }

    #[test]
    fn test_rpy_to_quat_yaw() {
        let q = rpy_to_quat(0.0, 0.0, PI / 2.0);
        let s = sqrtf(0.5);
        assert_relative_eq!(q.as_slice(), [s, 0.0, 0.0, s].as_slice(), epsilon = 1e-6);
    }

    #[test]
    fn test_quat_to_array_canonical_sign() {
        let q = UnitQuaternion::from_quaternion(Quaternion::new(-0.5, 0.5, 0.5, 0.5));
        let a = quat_to_array(&q);
        assert!(a[0] > 0.0);
        assert_relative_eq!(a.as_slice(), [0.5f32, -0.5, -0.5, -0.5].as_slice(), epsilon = 1e-6);
    }

    #[test]
    fn test_align_level_north() {
        let accel = Vector3::new(0.0, 0.0, -9.81);
        let mag = Vector3::new(0.2, 0.0, 0.45);
        let q = align_from_accel_mag(&accel, Some(&mag));
        assert_relative_eq!(q.as_slice(), [1.0f32, 0.0, 0.0, 0.0].as_slice(), epsilon = 1e-6);
    }

    #[test]
    fn test_align_recovers_attitude() {
        let truth = UnitQuaternion::from_euler_angles(0.2, -0.1, 1.0);
        let be = Vector3::new(0.2, 0.03, 0.45);
        let accel = truth.inverse_transform_vector(&Vector3::new(0.0, 0.0, -GRAVITY_M_S2));
        let mag = truth.inverse_transform_vector(&be);

        let q = quat_from_array(&align_from_accel_mag(&accel, Some(&mag)));
        let (roll, pitch, yaw) = q.euler_angles();

        assert_relative_eq!(roll, 0.2, epsilon = 1e-4);
        assert_relative_eq!(pitch, -0.1, epsilon = 1e-4);
        // Declination is not compensated
        assert_relative_eq!(yaw, 1.0 - atan2f(0.03, 0.2), epsilon = 1e-4);
    }

    #[test]
    fn test_dip_angle() {
        assert_relative_eq!(dip_angle(&Vector3::new(1.0, 0.0, 0.0)), PI / 2.0);
        assert_relative_eq!(dip_angle(&Vector3::new(1.0, 0.0, 1.0)), PI / 4.0);
    }

    #[test]
    fn test_map_to_horizontal_plane_keeps_dip() {
        let quat_nb = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let mag_b = Vector3::new(0.3, -0.1, 0.2);
        let dip = 1.0;

        let mapped = map_to_horizontal_plane(&quat_nb, &mag_b, dip, 2.0);
        let down_b = quat_nb.inverse_transform_vector(&Vector3::z());

        assert_relative_eq!(mapped.norm(), 2.0, epsilon = 1e-5);
        assert_relative_eq!(mapped.angle(&down_b), dip, epsilon = 1e-4);
        // Stays in the plane spanned by down and the measurement
        assert_relative_eq!(mapped.dot(&down_b.cross(&mag_b)), 0.0, epsilon = 1e-5);

        // Tilted from down towards the measurement, not away from it
        let horizontal = |v: &Vector3<f32>| v - down_b * v.dot(&down_b);
        assert!(horizontal(&mapped).dot(&horizontal(&mag_b)) > 0.0);
    }

    #[test]
    fn test_map_to_horizontal_plane_follows_heading() {
        // Level, field pointing north east and down
        let quat_nb = UnitQuaternion::identity();
        let mag_b = Vector3::new(1.0, 1.0, 2.0);
        let dip = dip_angle(&mag_b);

        let mapped = map_to_horizontal_plane(&quat_nb, &mag_b, dip, mag_b.norm());
        assert_relative_eq!(mapped, mag_b, epsilon = 1e-5);
    }
}
