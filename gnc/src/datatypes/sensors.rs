use nalgebra::Vector3;

fn all_finite(v: &Vector3<f32>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Checked before a sample is copied into the estimation record.
pub trait SanityCheck {
    fn is_sane(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroSensorSample {
    pub angvel_rad_s: Vector3<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSensorSample {
    pub accel_m_s2: Vector3<f32>,
}

/// Body frame magnetic field, in the same unit as the home location field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnetometerSensorSample {
    pub mag_field_b: Vector3<f32>,
}

/// Barometric altitude above the sea level reference, positive up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaroSensorSample {
    pub altitude_m: f32,
}

/// Position and velocity already expressed in the local NED frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsSensorSample {
    pub pos_n_m: Vector3<f32>,
    pub vel_n_m_s: Vector3<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirspeedSensorSample {
    pub calibrated_m_s: f32,
}

impl SanityCheck for GyroSensorSample {
    fn is_sane(&self) -> bool {
        all_finite(&self.angvel_rad_s)
    }
}

impl SanityCheck for AccelSensorSample {
    fn is_sane(&self) -> bool {
        all_finite(&self.accel_m_s2)
    }
}

impl SanityCheck for MagnetometerSensorSample {
    fn is_sane(&self) -> bool {
        all_finite(&self.mag_field_b)
    }
}

impl SanityCheck for BaroSensorSample {
    fn is_sane(&self) -> bool {
        self.altitude_m.is_finite()
    }
}

impl SanityCheck for GpsSensorSample {
    fn is_sane(&self) -> bool {
        all_finite(&self.pos_n_m) && all_finite(&self.vel_n_m_s)
    }
}

impl SanityCheck for AirspeedSensorSample {
    fn is_sane(&self) -> bool {
        self.calibrated_m_s.is_finite()
    }
}
