use insgps_gnc::{
    ekf::NUMX,
    estimation::settings::{
        ComplementaryGains, EkfConfiguration, EstimationSettings, FakeMeasurementNoise,
        FusionAlgorithm, HomeLocation, MeasurementNoise, ProcessNoise,
    },
};
use thiserror::Error;

use crate::parameters::{self, ParameterMap};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Parameter(#[from] parameters::Error),

    #[error("Unknown fusion algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("Parameter '{path}' must be positive, got {val}")]
    NonPositive { path: String, val: f64 },

    #[error("Parameter '{path}' is out of range")]
    OutOfRange { path: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruthConfig {
    pub initial_pos_n_m: [f64; 3],
    pub initial_rpy_deg: [f64; 3],
    /// Constant body angular rate.
    pub angvel_b_deg_s: [f64; 3],
    /// Constant NED velocity.
    pub vel_n_m_s: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuConfig {
    pub rate_hz: f64,
    pub gyro_noise_std_rad_s: f64,
    pub gyro_bias_rad_s: [f64; 3],
    pub accel_noise_std_m_s2: f64,
    pub accel_bias_m_s2: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagConfig {
    pub rate_hz: f64,
    pub noise_std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaroConfig {
    pub rate_hz: f64,
    pub noise_std_m: f64,
    /// Altitude of the NED origin above the baro reference.
    pub reference_alt_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsConfig {
    pub rate_hz: f64,
    pub pos_noise_std_m: f64,
    pub vel_noise_std_m_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirspeedConfig {
    pub rate_hz: f64,
    pub noise_std_m_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioConfig {
    pub truth: TruthConfig,
    pub imu: ImuConfig,
    pub mag: MagConfig,
    pub baro: BaroConfig,
    pub gps: Option<GpsConfig>,
    pub airspeed: Option<AirspeedConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimConfig {
    pub duration_s: f64,
    pub seed: u64,
    pub armed: bool,
    pub estimation: EstimationSettings,
    pub scenario: ScenarioConfig,
}

impl SimConfig {
    pub fn from_params(params: &ParameterMap) -> Result<Self, ConfigError> {
        let sim = params.get_map("sim")?;
        let seed = sim.get_param("seed")?;

        Ok(SimConfig {
            duration_s: positive(sim, "duration_s")?,
            seed: u64::try_from(seed.value_int()?).map_err(|_| ConfigError::OutOfRange {
                path: seed.path().to_string(),
            })?,
            armed: sim.get_param("armed")?.value_bool()?,
            estimation: estimation_settings(params.get_map("estimation")?)?,
            scenario: scenario_config(params.get_map("scenario")?)?,
        })
    }
}

pub fn estimation_settings(params: &ParameterMap) -> Result<EstimationSettings, ConfigError> {
    let algorithm = params.get_param("fusion_algorithm")?.value_string()?;
    let fusion_algorithm = algorithm
        .parse::<FusionAlgorithm>()
        .map_err(|_| ConfigError::UnknownAlgorithm(algorithm.to_string()))?;

    let ekf = params.get_map("ekf")?;
    let cf = params.get_map("complementary")?;

    Ok(EstimationSettings {
        fusion_algorithm,
        sensor_rate_hz: positive(params, "sensor_rate_hz")? as f32,
        home: HomeLocation {
            be: float_arr::<3>(params, "home.be")?,
        },
        ekf: EkfConfiguration {
            p: float_arr::<NUMX>(ekf, "p")?,
            q: ProcessNoise {
                gyro: float_arr(ekf, "q.gyro")?,
                accel: float_arr(ekf, "q.accel")?,
                gyro_drift: float_arr(ekf, "q.gyro_drift")?,
                accel_drift: float(ekf, "q.accel_drift")?,
            },
            r: MeasurementNoise {
                gps_pos: float_arr(ekf, "r.gps_pos")?,
                gps_vel: float_arr(ekf, "r.gps_vel")?,
                mag: float_arr(ekf, "r.mag")?,
                baro_z: float(ekf, "r.baro_z")?,
            },
            fake_r: FakeMeasurementNoise {
                gps_pos_indoor: float(ekf, "fake_r.gps_pos_indoor")?,
                gps_vel_indoor: float(ekf, "fake_r.gps_vel_indoor")?,
                gps_vel_airspeed: float(ekf, "fake_r.gps_vel_airspeed")?,
            },
            map_mag_to_horizontal_plane: ekf
                .get_param("map_mag_to_horizontal_plane")?
                .value_bool()?,
        },
        complementary: ComplementaryGains {
            accel_kp: float(cf, "accel_kp")?,
            accel_ki: float(cf, "accel_ki")?,
            mag_kp: float(cf, "mag_kp")?,
            mag_ki: float(cf, "mag_ki")?,
        },
        baro_gps_offset_correction_alpha: float(params, "baro_gps_offset_correction_alpha")?,
        velocity_lowpass_alpha: float(params, "velocity_lowpass_alpha")?,
    })
}

pub fn scenario_config(params: &ParameterMap) -> Result<ScenarioConfig, ConfigError> {
    let truth = params.get_map("truth")?;
    let imu = params.get_map("imu")?;
    let mag = params.get_map("mag")?;
    let baro = params.get_map("baro")?;

    let gps = if enabled(params, "gps")? {
        let gps = params.get_map("gps")?;
        Some(GpsConfig {
            rate_hz: positive(gps, "rate_hz")?,
            pos_noise_std_m: gps.get_param("pos_noise_std_m")?.value_float()?,
            vel_noise_std_m_s: gps.get_param("vel_noise_std_m_s")?.value_float()?,
        })
    } else {
        None
    };

    let airspeed = if enabled(params, "airspeed")? {
        let airspeed = params.get_map("airspeed")?;
        Some(AirspeedConfig {
            rate_hz: positive(airspeed, "rate_hz")?,
            noise_std_m_s: airspeed.get_param("noise_std_m_s")?.value_float()?,
        })
    } else {
        None
    };

    Ok(ScenarioConfig {
        truth: TruthConfig {
            initial_pos_n_m: truth.get_param("initial_pos_n_m")?.value_float_fixed()?,
            initial_rpy_deg: truth.get_param("initial_rpy_deg")?.value_float_fixed()?,
            angvel_b_deg_s: truth.get_param("angvel_b_deg_s")?.value_float_fixed()?,
            vel_n_m_s: truth.get_param("vel_n_m_s")?.value_float_fixed()?,
        },
        imu: ImuConfig {
            rate_hz: positive(imu, "rate_hz")?,
            gyro_noise_std_rad_s: imu.get_param("gyro_noise_std_rad_s")?.value_float()?,
            gyro_bias_rad_s: imu.get_param("gyro_bias_rad_s")?.value_float_fixed()?,
            accel_noise_std_m_s2: imu.get_param("accel_noise_std_m_s2")?.value_float()?,
            accel_bias_m_s2: imu.get_param("accel_bias_m_s2")?.value_float_fixed()?,
        },
        mag: MagConfig {
            rate_hz: positive(mag, "rate_hz")?,
            noise_std: mag.get_param("noise_std")?.value_float()?,
        },
        baro: BaroConfig {
            rate_hz: positive(baro, "rate_hz")?,
            noise_std_m: baro.get_param("noise_std_m")?.value_float()?,
            reference_alt_m: baro.get_param("reference_alt_m")?.value_float()?,
        },
        gps,
        airspeed,
    })
}

fn enabled(params: &ParameterMap, sensor: &str) -> Result<bool, ConfigError> {
    Ok(params
        .get_param(&format!("{sensor}.enabled"))?
        .value_bool()?)
}

fn positive(params: &ParameterMap, path: &str) -> Result<f64, ConfigError> {
    let param = params.get_param(path)?;
    let val = param.value_float()?;
    if val > 0.0 {
        Ok(val)
    } else {
        Err(ConfigError::NonPositive {
            path: param.path().to_string(),
            val,
        })
    }
}

fn float(params: &ParameterMap, path: &str) -> Result<f32, ConfigError> {
    Ok(params.get_param(path)?.value_float()? as f32)
}

fn float_arr<const N: usize>(params: &ParameterMap, path: &str) -> Result<[f32; N], ConfigError> {
    let arr = params.get_param(path)?.value_float_fixed::<N>()?;
    Ok(arr.map(|v| v as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::parse_string;
    use pretty_assertions::assert_eq;

    const DEFAULT_PARAMS: &str = include_str!("../config/params.toml");

    #[test]
    fn test_default_params() {
        let params = parse_string(DEFAULT_PARAMS).unwrap();
        let config = SimConfig::from_params(&params).unwrap();

        assert_eq!(
            config.estimation.fusion_algorithm,
            FusionAlgorithm::GpsNavigationIns13
        );
        assert_eq!(config.estimation.home.be, [200.0, 0.0, 450.0]);
        assert_eq!(config.estimation.ekf, EkfConfiguration::default());
        assert_eq!(
            config.estimation.complementary,
            ComplementaryGains::default()
        );
        assert!(config.scenario.gps.is_some());
        assert!(config.scenario.airspeed.is_none());
        assert!(!config.armed);
    }

    #[test]
    fn test_unknown_algorithm() {
        let params = parse_string(
            &DEFAULT_PARAMS.replace("\"GpsNavigationIns13\"", "\"Kalman\""),
        )
        .unwrap();

        assert_eq!(
            SimConfig::from_params(&params),
            Err(ConfigError::UnknownAlgorithm("Kalman".to_string()))
        );
    }

    #[test]
    fn test_rejects_zero_rate() {
        let params = parse_string(
            "rate_hz = { val = 0.0, type = \"float\" }
            noise_std = { val = 1.0, type = \"float\" }",
        )
        .unwrap();

        assert_eq!(
            positive(&params, "rate_hz"),
            Err(ConfigError::NonPositive {
                path: ".rate_hz".to_string(),
                val: 0.0
            })
        );
    }

    #[test]
    fn test_short_covariance() {
        let params = parse_string("p = { val = [1.0, 2.0], type = \"float[]\" }").unwrap();

        assert!(matches!(
            float_arr::<NUMX>(&params, "p"),
            Err(ConfigError::Parameter(parameters::Error::BadLength {
                expected: NUMX,
                found: 2,
                ..
            }))
        ));
    }
}
