use anyhow::{Context, Result};
use insgps_gnc::{
    datatypes::sensors::{
        AccelSensorSample, AirspeedSensorSample, BaroSensorSample, GpsSensorSample,
        GyroSensorSample, MagnetometerSensorSample,
    },
    math::GRAVITY_M_S2,
};
use nalgebra::{UnitQuaternion, Vector3};
use rand::{RngCore, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xoshiro::{SplitMix64, Xoshiro256StarStar};

use crate::config::ScenarioConfig;

/// Rigid body moving at constant NED velocity while rotating at a constant
/// body rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Truth {
    pub pos_n_m: Vector3<f64>,
    pub vel_n_m_s: Vector3<f64>,
    pub quat_nb: UnitQuaternion<f64>,
    pub angvel_b_rad_s: Vector3<f64>,
}

impl Truth {
    fn propagate(&mut self, dt: f64) {
        self.pos_n_m += self.vel_n_m_s * dt;
        self.quat_nb *= UnitQuaternion::from_scaled_axis(self.angvel_b_rad_s * dt);
    }

    /// Specific force in body frame, what an ideal accelerometer reads.
    pub fn specific_force_b(&self) -> Vector3<f64> {
        let g_n = Vector3::new(0.0, 0.0, GRAVITY_M_S2 as f64);
        self.quat_nb.inverse_transform_vector(&(-g_n))
    }
}

#[derive(Debug)]
struct NoiseSource {
    normal: Normal<f64>,
    rng: Xoshiro256StarStar,
}

impl NoiseSource {
    fn new(std: f64, seeder: &mut SplitMix64) -> Result<Self> {
        let mut seed = [0; 32];
        seeder.fill_bytes(&mut seed);

        Ok(NoiseSource {
            normal: Normal::new(0.0, std)
                .with_context(|| format!("Invalid noise standard deviation {std}"))?,
            rng: Xoshiro256StarStar::from_seed(seed),
        })
    }

    fn sample(&mut self) -> f64 {
        self.normal.sample(&mut self.rng)
    }

    fn sample3(&mut self) -> Vector3<f64> {
        Vector3::new(self.sample(), self.sample(), self.sample())
    }
}

/// Fires once per period, on the first simulation step at or after the
/// due time.
#[derive(Debug, Clone)]
struct Periodic {
    period_s: f64,
    next_s: f64,
}

impl Periodic {
    fn new(rate_hz: f64) -> Self {
        Periodic {
            period_s: 1.0 / rate_hz,
            next_s: 0.0,
        }
    }

    fn due(&mut self, t_s: f64) -> bool {
        if t_s + 1e-9 < self.next_s {
            return false;
        }
        self.next_s += self.period_s;
        true
    }
}

/// Samples produced in one simulation step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorFrame {
    pub gyro: Option<GyroSensorSample>,
    pub accel: Option<AccelSensorSample>,
    pub mag: Option<MagnetometerSensorSample>,
    pub baro: Option<BaroSensorSample>,
    pub gps: Option<GpsSensorSample>,
    pub airspeed: Option<AirspeedSensorSample>,
}

#[derive(Debug)]
pub struct Scenario {
    config: ScenarioConfig,
    truth: Truth,
    be_n: Vector3<f64>,

    imu_timer: Periodic,
    mag_timer: Periodic,
    baro_timer: Periodic,
    gps_timer: Option<Periodic>,
    airspeed_timer: Option<Periodic>,

    gyro_noise: NoiseSource,
    accel_noise: NoiseSource,
    mag_noise: NoiseSource,
    baro_noise: NoiseSource,
    gps_pos_noise: NoiseSource,
    gps_vel_noise: NoiseSource,
    airspeed_noise: NoiseSource,
}

impl Scenario {
    pub fn new(config: &ScenarioConfig, be_n: [f32; 3], seed: u64) -> Result<Self> {
        let mut seeder = SplitMix64::seed_from_u64(seed);
        let truth = &config.truth;
        let [roll, pitch, yaw] = truth.initial_rpy_deg.map(f64::to_radians);
        let gps = config.gps.as_ref();
        let airspeed = config.airspeed.as_ref();

        Ok(Scenario {
            config: *config,
            truth: Truth {
                pos_n_m: Vector3::from(truth.initial_pos_n_m),
                vel_n_m_s: Vector3::from(truth.vel_n_m_s),
                quat_nb: UnitQuaternion::from_euler_angles(roll, pitch, yaw),
                angvel_b_rad_s: Vector3::from(truth.angvel_b_deg_s.map(f64::to_radians)),
            },
            be_n: Vector3::from(be_n.map(f64::from)),

            imu_timer: Periodic::new(config.imu.rate_hz),
            mag_timer: Periodic::new(config.mag.rate_hz),
            baro_timer: Periodic::new(config.baro.rate_hz),
            gps_timer: gps.map(|c| Periodic::new(c.rate_hz)),
            airspeed_timer: airspeed.map(|c| Periodic::new(c.rate_hz)),

            gyro_noise: NoiseSource::new(config.imu.gyro_noise_std_rad_s, &mut seeder)?,
            accel_noise: NoiseSource::new(config.imu.accel_noise_std_m_s2, &mut seeder)?,
            mag_noise: NoiseSource::new(config.mag.noise_std, &mut seeder)?,
            baro_noise: NoiseSource::new(config.baro.noise_std_m, &mut seeder)?,
            gps_pos_noise: NoiseSource::new(gps.map_or(0.0, |c| c.pos_noise_std_m), &mut seeder)?,
            gps_vel_noise: NoiseSource::new(
                gps.map_or(0.0, |c| c.vel_noise_std_m_s),
                &mut seeder,
            )?,
            airspeed_noise: NoiseSource::new(
                airspeed.map_or(0.0, |c| c.noise_std_m_s),
                &mut seeder,
            )?,
        })
    }

    pub fn truth(&self) -> &Truth {
        &self.truth
    }

    pub fn propagate(&mut self, dt: f64) {
        self.truth.propagate(dt);
    }

    /// Samples every sensor due at `t_s`.
    pub fn sample(&mut self, t_s: f64) -> SensorFrame {
        let mut frame = SensorFrame::default();

        if self.imu_timer.due(t_s) {
            let gyro_bias = Vector3::from(self.config.imu.gyro_bias_rad_s);
            let accel_bias = Vector3::from(self.config.imu.accel_bias_m_s2);

            let gyro = self.truth.angvel_b_rad_s + gyro_bias + self.gyro_noise.sample3();
            let accel = self.truth.specific_force_b() + accel_bias + self.accel_noise.sample3();

            frame.gyro = Some(GyroSensorSample {
                angvel_rad_s: gyro.cast(),
            });
            frame.accel = Some(AccelSensorSample {
                accel_m_s2: accel.cast(),
            });
        }

        if self.mag_timer.due(t_s) {
            let mag = self.truth.quat_nb.inverse_transform_vector(&self.be_n)
                + self.mag_noise.sample3();
            frame.mag = Some(MagnetometerSensorSample {
                mag_field_b: mag.cast(),
            });
        }

        if self.baro_timer.due(t_s) {
            let alt = self.config.baro.reference_alt_m - self.truth.pos_n_m.z
                + self.baro_noise.sample();
            frame.baro = Some(BaroSensorSample {
                altitude_m: alt as f32,
            });
        }

        if self.gps_timer.as_mut().is_some_and(|t| t.due(t_s)) {
            let pos = self.truth.pos_n_m + self.gps_pos_noise.sample3();
            let vel = self.truth.vel_n_m_s + self.gps_vel_noise.sample3();
            frame.gps = Some(GpsSensorSample {
                pos_n_m: pos.cast(),
                vel_n_m_s: vel.cast(),
            });
        }

        if self.airspeed_timer.as_mut().is_some_and(|t| t.due(t_s)) {
            let cas = self.truth.vel_n_m_s.norm() + self.airspeed_noise.sample();
            frame.airspeed = Some(AirspeedSensorSample {
                calibrated_m_s: cas as f32,
            });
        }

        frame
    }
}
