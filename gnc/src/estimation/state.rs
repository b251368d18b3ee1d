use bitflags::bitflags;
use nalgebra::Vector3;

bitflags! {
    /// Which entries of [`StateEstimation`] were refreshed in this cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SensorUpdates: u16 {
        const GYRO = 1 << 0;
        const ACCEL = 1 << 1;
        const MAG = 1 << 2;
        const ATTITUDE = 1 << 3;
        const POS = 1 << 4;
        const VEL = 1 << 5;
        const AIRSPEED = 1 << 6;
        const BARO = 1 << 7;
    }
}

/// Record shared by the stages of a filter pipeline.
///
/// Values persist between cycles, `updated` only marks the ones that are
/// fresh. Stages read, transform and mark entries in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateEstimation {
    pub gyro_rad_s: Vector3<f32>,
    pub accel_m_s2: Vector3<f32>,
    pub mag_b: Vector3<f32>,
    /// Body to NED, scalar first.
    pub quat_nb: [f32; 4],
    pub pos_n_m: Vector3<f32>,
    pub vel_n_m_s: Vector3<f32>,
    pub calibrated_airspeed_m_s: f32,
    pub true_airspeed_m_s: f32,
    /// Altitude, positive up.
    pub baro_alt_m: f32,

    pub armed: bool,
    /// Last magnetometer sample had a plausible field strength.
    pub mag_ok: bool,
    pub nav_ok: bool,
    pub nav_used: bool,

    pub updated: SensorUpdates,
}

impl Default for StateEstimation {
    fn default() -> Self {
        StateEstimation {
            gyro_rad_s: Vector3::zeros(),
            accel_m_s2: Vector3::zeros(),
            mag_b: Vector3::zeros(),
            quat_nb: [1.0, 0.0, 0.0, 0.0],
            pos_n_m: Vector3::zeros(),
            vel_n_m_s: Vector3::zeros(),
            calibrated_airspeed_m_s: 0.0,
            true_airspeed_m_s: 0.0,
            baro_alt_m: 0.0,
            armed: false,
            mag_ok: false,
            nav_ok: false,
            nav_used: false,
            updated: SensorUpdates::empty(),
        }
    }
}

impl StateEstimation {
    pub fn is_set(&self, flags: SensorUpdates) -> bool {
        self.updated.contains(flags)
    }

    pub fn mark(&mut self, flags: SensorUpdates) {
        self.updated.insert(flags);
    }

    pub fn unmark(&mut self, flags: SensorUpdates) {
        self.updated.remove(flags);
    }

    /// Clears `flags`, returning whether all of them were set.
    pub fn consume(&mut self, flags: SensorUpdates) -> bool {
        let was_set = self.is_set(flags);
        self.updated.remove(flags);
        was_set
    }

    /// Copies the entries of `src` that are marked in `src.updated`.
    pub fn import_updated(&mut self, src: &StateEstimation) {
        let fresh = src.updated;
        if fresh.contains(SensorUpdates::GYRO) {
            self.gyro_rad_s = src.gyro_rad_s;
        }
        if fresh.contains(SensorUpdates::ACCEL) {
            self.accel_m_s2 = src.accel_m_s2;
        }
        if fresh.contains(SensorUpdates::MAG) {
            self.mag_b = src.mag_b;
        }
        if fresh.contains(SensorUpdates::ATTITUDE) {
            self.quat_nb = src.quat_nb;
        }
        if fresh.contains(SensorUpdates::POS) {
            self.pos_n_m = src.pos_n_m;
        }
        if fresh.contains(SensorUpdates::VEL) {
            self.vel_n_m_s = src.vel_n_m_s;
        }
        if fresh.contains(SensorUpdates::AIRSPEED) {
            self.calibrated_airspeed_m_s = src.calibrated_airspeed_m_s;
            self.true_airspeed_m_s = src.true_airspeed_m_s;
        }
        if fresh.contains(SensorUpdates::BARO) {
            self.baro_alt_m = src.baro_alt_m;
        }
        self.updated |= fresh;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_consume() {
        let mut state = StateEstimation::default();
        state.mark(SensorUpdates::BARO | SensorUpdates::GYRO);

        assert!(state.consume(SensorUpdates::BARO));
        assert!(!state.consume(SensorUpdates::BARO));
        assert_eq!(state.updated, SensorUpdates::GYRO);
    }

    #[test]
    fn test_import_only_fresh_values() {
        let mut work = StateEstimation::default();
        work.pos_n_m = Vector3::new(1.0, 1.0, 1.0);

        let mut src = StateEstimation::default();
        src.pos_n_m = Vector3::new(5.0, 5.0, 5.0);
        src.baro_alt_m = 12.0;
        src.mark(SensorUpdates::BARO);

        work.import_updated(&src);

        assert_eq!(work.pos_n_m, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(work.baro_alt_m, 12.0);
        assert!(work.is_set(SensorUpdates::BARO));
    }
}
