use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ekf::{NUMV, NUMW, NUMX};

/// Selects the chain of filter stages run by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FusionAlgorithm {
    /// Gyro integration with accelerometer leveling only.
    AcroNoSensors,
    #[default]
    BasicComplementary,
    ComplementaryMag,
    ComplementaryMagGpsOutdoor,
    Ins13Indoor,
    GpsNavigationIns13,
    /// EKF for navigation, complementary filter for attitude.
    GpsNavigationIns13Cf,
    TestingInsIndoorCf,
}

impl FusionAlgorithm {
    pub const ALL: [FusionAlgorithm; 8] = [
        FusionAlgorithm::AcroNoSensors,
        FusionAlgorithm::BasicComplementary,
        FusionAlgorithm::ComplementaryMag,
        FusionAlgorithm::ComplementaryMagGpsOutdoor,
        FusionAlgorithm::Ins13Indoor,
        FusionAlgorithm::GpsNavigationIns13,
        FusionAlgorithm::GpsNavigationIns13Cf,
        FusionAlgorithm::TestingInsIndoorCf,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FusionAlgorithm::AcroNoSensors => "AcroNoSensors",
            FusionAlgorithm::BasicComplementary => "BasicComplementary",
            FusionAlgorithm::ComplementaryMag => "ComplementaryMag",
            FusionAlgorithm::ComplementaryMagGpsOutdoor => "ComplementaryMagGpsOutdoor",
            FusionAlgorithm::Ins13Indoor => "Ins13Indoor",
            FusionAlgorithm::GpsNavigationIns13 => "GpsNavigationIns13",
            FusionAlgorithm::GpsNavigationIns13Cf => "GpsNavigationIns13Cf",
            FusionAlgorithm::TestingInsIndoorCf => "TestingInsIndoorCf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownFusionAlgorithm;

impl FromStr for FusionAlgorithm {
    type Err = UnknownFusionAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FusionAlgorithm::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or(UnknownFusionAlgorithm)
    }
}

/// Earth magnetic field at the home location, NED.
///
/// Any unit may be used, as long as magnetometer samples and the
/// magnetometer variances use the same one. An all zero field means
/// "not configured".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HomeLocation {
    pub be: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProcessNoise {
    pub gyro: [f32; 3],
    pub accel: [f32; 3],
    pub gyro_drift: [f32; 3],
    pub accel_drift: f32,
}

impl ProcessNoise {
    pub fn to_array(&self) -> [f32; NUMW] {
        let mut q = [0.0; NUMW];
        q[0..3].copy_from_slice(&self.gyro);
        q[3..6].copy_from_slice(&self.accel);
        q[6..9].copy_from_slice(&self.gyro_drift);
        q[9] = self.accel_drift;
        q
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeasurementNoise {
    pub gps_pos: [f32; 3],
    pub gps_vel: [f32; 3],
    /// In squared home location field units.
    pub mag: [f32; 3],
    pub baro_z: f32,
}

impl MeasurementNoise {
    pub fn to_array(&self) -> [f32; NUMV] {
        let mut r = [0.0; NUMV];
        r[0..3].copy_from_slice(&self.gps_pos);
        r[3..6].copy_from_slice(&self.gps_vel);
        r[6..9].copy_from_slice(&self.mag);
        r[9] = self.baro_z;
        r
    }
}

/// Variances of the pseudo measurements used when no GPS is available.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FakeMeasurementNoise {
    pub gps_pos_indoor: f32,
    pub gps_vel_indoor: f32,
    pub gps_vel_airspeed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EkfConfiguration {
    /// Initial covariance diagonal, also used when the covariance diverges.
    pub p: [f32; NUMX],
    pub q: ProcessNoise,
    pub r: MeasurementNoise,
    pub fake_r: FakeMeasurementNoise,
    pub map_mag_to_horizontal_plane: bool,
}

impl Default for EkfConfiguration {
    fn default() -> Self {
        EkfConfiguration {
            p: [
                10.0, 10.0, 10.0, 1.0, 1.0, 1.0, 0.007, 0.007, 0.007, 0.007, 1e-6, 1e-6, 1e-6,
                1e-7,
            ],
            q: ProcessNoise {
                gyro: [1e-2; 3],
                accel: [1e-2; 3],
                gyro_drift: [1e-6; 3],
                accel_drift: 1e-7,
            },
            r: MeasurementNoise {
                gps_pos: [1.0, 1.0, 1000.0],
                gps_vel: [1e-2; 3],
                mag: [10.0; 3],
                baro_z: 1e-2,
            },
            fake_r: FakeMeasurementNoise {
                gps_pos_indoor: 10.0,
                gps_vel_indoor: 1.0,
                gps_vel_airspeed: 1000.0,
            },
            map_mag_to_horizontal_plane: false,
        }
    }
}

/// Proportional gains in rad/s per unit of direction error, integral gains
/// in rad/s² per unit of direction error.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComplementaryGains {
    pub accel_kp: f32,
    pub accel_ki: f32,
    pub mag_kp: f32,
    pub mag_ki: f32,
}

impl Default for ComplementaryGains {
    fn default() -> Self {
        ComplementaryGains {
            accel_kp: 0.5,
            accel_ki: 5e-3,
            mag_kp: 0.2,
            mag_ki: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EstimationSettings {
    pub fusion_algorithm: FusionAlgorithm,
    /// Nominal gyro rate, seeds the integration step estimate.
    pub sensor_rate_hz: f32,
    pub home: HomeLocation,
    pub ekf: EkfConfiguration,
    pub complementary: ComplementaryGains,
    /// Weight of the previous baro offset when tracking GPS altitude.
    pub baro_gps_offset_correction_alpha: f32,
    /// Weight of the previous value in the velocity low pass, 0 disables it.
    pub velocity_lowpass_alpha: f32,
}

impl Default for EstimationSettings {
    fn default() -> Self {
        EstimationSettings {
            fusion_algorithm: FusionAlgorithm::default(),
            sensor_rate_hz: 500.0,
            home: HomeLocation::default(),
            ekf: EkfConfiguration::default(),
            complementary: ComplementaryGains::default(),
            baro_gps_offset_correction_alpha: 0.999_333_5,
            velocity_lowpass_alpha: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_fusion_algorithm() {
        for algorithm in FusionAlgorithm::ALL {
            assert_eq!(algorithm.name().parse(), Ok(algorithm));
        }
        assert_eq!(
            "gpsnavigationins13".parse(),
            Ok(FusionAlgorithm::GpsNavigationIns13)
        );
        assert_eq!(
            "Kalman".parse::<FusionAlgorithm>(),
            Err(UnknownFusionAlgorithm)
        );
    }

    #[test]
    fn test_noise_layout() {
        let config = EkfConfiguration::default();
        let q = config.q.to_array();
        let r = config.r.to_array();

        assert_eq!(q[0], config.q.gyro[0]);
        assert_eq!(q[5], config.q.accel[2]);
        assert_eq!(q[9], config.q.accel_drift);
        assert_eq!(r[2], config.r.gps_pos[2]);
        assert_eq!(r[8], config.r.mag[2]);
        assert_eq!(r[9], config.r.baro_z);
    }
}
