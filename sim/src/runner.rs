use anyhow::{Result, anyhow};
use chrono::TimeDelta;
use insgps_gnc::{
    Instant,
    components::state_estimation::{
        Schedule, StateEstimationComponent, StateEstimationHarness, TickOutcome,
    },
    datatypes::{
        gnc::NavigationOutput,
        sensors::{
            AccelSensorSample, AirspeedSensorSample, BaroSensorSample, GpsSensorSample,
            GyroSensorSample, MagnetometerSensorSample,
        },
    },
    estimation::alarm::AlarmSeverity,
    hal::{
        Hal,
        channel::{Receiver, Sender},
        queue::{QueueChannel, QueueReceiver, QueueSender},
    },
};
use log::{debug, info, warn};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::Serialize;

use crate::{
    config::SimConfig,
    core::time::{SimulatedClock, TD},
    scenario::{Scenario, SensorFrame},
};

const QUEUE_LEN: usize = 16;

/// Upper bound on back to back ticks in one simulation step.
const MAX_TICKS_PER_STEP: usize = 8;

/// One output line, written once per published navigation solution.
#[derive(Debug, Clone, Serialize)]
pub struct LogRow {
    pub t_s: f64,
    pub attitude_alarm: String,
    pub nav_alarm: String,

    pub true_roll_deg: f64,
    pub true_pitch_deg: f64,
    pub true_yaw_deg: f64,
    pub est_roll_deg: f64,
    pub est_pitch_deg: f64,
    pub est_yaw_deg: f64,
    pub attitude_err_deg: f64,

    pub true_n_m: f64,
    pub true_e_m: f64,
    pub true_d_m: f64,
    pub est_n_m: f64,
    pub est_e_m: f64,
    pub est_d_m: f64,
    pub pos_err_m: f64,

    pub est_vn_m_s: f64,
    pub est_ve_m_s: f64,
    pub est_vd_m_s: f64,
    pub vel_err_m_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub ticks: usize,
    pub rows: usize,
    pub attitude_alarm: AlarmSeverity,
    pub nav_alarm: AlarmSeverity,
    pub final_attitude_err_deg: Option<f64>,
    pub final_pos_err_m: Option<f64>,
}

struct SensorSenders {
    gyro: QueueSender<GyroSensorSample, QUEUE_LEN>,
    accel: QueueSender<AccelSensorSample, QUEUE_LEN>,
    mag: QueueSender<MagnetometerSensorSample, QUEUE_LEN>,
    baro: QueueSender<BaroSensorSample, QUEUE_LEN>,
    gps: QueueSender<GpsSensorSample, QUEUE_LEN>,
    airspeed: QueueSender<AirspeedSensorSample, QUEUE_LEN>,
}

impl SensorSenders {
    fn send(&mut self, now: Instant, frame: SensorFrame) {
        let mut lagged = false;
        if let Some(s) = frame.gyro {
            lagged |= self.gyro.try_send(now, s).is_err();
        }
        if let Some(s) = frame.accel {
            lagged |= self.accel.try_send(now, s).is_err();
        }
        if let Some(s) = frame.mag {
            lagged |= self.mag.try_send(now, s).is_err();
        }
        if let Some(s) = frame.baro {
            lagged |= self.baro.try_send(now, s).is_err();
        }
        if let Some(s) = frame.gps {
            lagged |= self.gps.try_send(now, s).is_err();
        }
        if let Some(s) = frame.airspeed {
            lagged |= self.airspeed.try_send(now, s).is_err();
        }

        if lagged {
            warn!("Sensor queue full at {:?}, sample dropped", now);
        }
    }
}

/// Closed loop of synthetic sensors and the state estimation component.
///
/// Time advances in IMU periods. Every step pushes the due samples into
/// the component's input queues and ticks it until it asks to wait.
pub struct SimulationRunner {
    config: SimConfig,
    clock: SimulatedClock,
    step: TimeDelta,
    scenario: Scenario,
    senders: SensorSenders,
    rx_nav: QueueReceiver<NavigationOutput, QUEUE_LEN>,
    component: StateEstimationComponent,
    next_tick: Instant,
}

impl SimulationRunner {
    pub fn new(config: SimConfig) -> Result<Self> {
        let mut gyro = QueueChannel::new();
        let mut accel = QueueChannel::new();
        let mut mag = QueueChannel::new();
        let mut baro = QueueChannel::new();
        let mut gps = QueueChannel::new();
        let mut airspeed = QueueChannel::new();
        let mut nav = QueueChannel::<NavigationOutput, QUEUE_LEN>::new();

        let harness = StateEstimationHarness {
            rx_gyro: gyro.boxed_receiver()?,
            rx_accel: accel.boxed_receiver()?,
            rx_mag: mag.boxed_receiver()?,
            rx_baro: baro.boxed_receiver()?,
            rx_gps: gps.boxed_receiver()?,
            rx_airspeed: airspeed.boxed_receiver()?,
            tx_nav_out: nav.boxed_sender(),
        };

        let scenario = Scenario::new(&config.scenario, config.estimation.home.be, config.seed)?;

        info!(
            "Simulating {} for {:.1} s, seed {}",
            config.estimation.fusion_algorithm.name(),
            config.duration_s,
            config.seed
        );

        Ok(SimulationRunner {
            step: TD::from_seconds_f64(1.0 / config.scenario.imu.rate_hz),
            clock: SimulatedClock::default(),
            scenario,
            senders: SensorSenders {
                gyro: gyro.sender(),
                accel: accel.sender(),
                mag: mag.sender(),
                baro: baro.sender(),
                gps: gps.sender(),
                airspeed: airspeed.sender(),
            },
            rx_nav: nav.receiver()?,
            component: StateEstimationComponent::new(harness, config.estimation),
            next_tick: Instant::from_micros(0),
            config,
        })
    }

    /// Runs until the configured duration elapses, handing every row to
    /// `on_row`.
    pub fn run(&mut self, mut on_row: impl FnMut(&LogRow) -> Result<()>) -> Result<RunSummary> {
        let mut summary = RunSummary {
            steps: 0,
            ticks: 0,
            rows: 0,
            attitude_alarm: AlarmSeverity::Uninitialised,
            nav_alarm: AlarmSeverity::Uninitialised,
            final_attitude_err_deg: None,
            final_pos_err_m: None,
        };
        let dt = TD(self.step).seconds();

        while self.clock.elapsed_seconds_f64() < self.config.duration_s {
            let t_s = self.clock.elapsed_seconds_f64();
            let now = self.clock.system_time();

            let frame = self.scenario.sample(t_s);
            self.senders.send(now, frame);

            if now >= self.next_tick {
                for _ in 0..MAX_TICKS_PER_STEP {
                    let outcome = self.component.tick(now, self.config.armed);
                    summary.ticks += 1;
                    summary.attitude_alarm = outcome.attitude_alarm;
                    summary.nav_alarm = outcome.nav_alarm;

                    if let Some(nav) = self.rx_nav.try_recv_last() {
                        let row = self.log_row(t_s, &outcome, &nav.v);
                        summary.rows += 1;
                        summary.final_attitude_err_deg = Some(row.attitude_err_deg);
                        summary.final_pos_err_m = Some(row.pos_err_m);
                        on_row(&row)?;
                    }

                    match outcome.schedule {
                        Schedule::Immediately => continue,
                        Schedule::At(next) => {
                            self.next_tick = next;
                            break;
                        }
                    }
                }
            }

            self.scenario.propagate(dt);
            self.clock.step(self.step);
            summary.steps += 1;

            if summary.steps % 1000 == 0 {
                debug!(
                    "t={:.2} s, attitude {:?}, nav {:?}",
                    t_s, summary.attitude_alarm, summary.nav_alarm
                );
            }
        }

        if summary.steps == 0 {
            return Err(anyhow!("Simulation duration is shorter than one step"));
        }

        info!(
            "Done after {} steps, attitude alarm {:?}, nav alarm {:?}",
            summary.steps, summary.attitude_alarm, summary.nav_alarm
        );

        Ok(summary)
    }

    fn log_row(&self, t_s: f64, outcome: &TickOutcome, nav: &NavigationOutput) -> LogRow {
        let truth = self.scenario.truth();
        let q_est = to_f64_quat(&nav.quat_nb);
        let (true_roll, true_pitch, true_yaw) = truth.quat_nb.euler_angles();
        let (est_roll, est_pitch, est_yaw) = q_est.euler_angles();
        let pos: Vector3<f64> = nav.pos_n_m.cast();
        let vel: Vector3<f64> = nav.vel_n_m_s.cast();

        LogRow {
            t_s,
            attitude_alarm: format!("{:?}", outcome.attitude_alarm),
            nav_alarm: format!("{:?}", outcome.nav_alarm),

            true_roll_deg: true_roll.to_degrees(),
            true_pitch_deg: true_pitch.to_degrees(),
            true_yaw_deg: true_yaw.to_degrees(),
            est_roll_deg: est_roll.to_degrees(),
            est_pitch_deg: est_pitch.to_degrees(),
            est_yaw_deg: est_yaw.to_degrees(),
            attitude_err_deg: truth.quat_nb.angle_to(&q_est).to_degrees(),

            true_n_m: truth.pos_n_m.x,
            true_e_m: truth.pos_n_m.y,
            true_d_m: truth.pos_n_m.z,
            est_n_m: pos.x,
            est_e_m: pos.y,
            est_d_m: pos.z,
            pos_err_m: (pos - truth.pos_n_m).norm(),

            est_vn_m_s: vel.x,
            est_ve_m_s: vel.y,
            est_vd_m_s: vel.z,
            vel_err_m_s: (vel - truth.vel_n_m_s).norm(),
        }
    }
}

fn to_f64_quat(q: &UnitQuaternion<f32>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(
        q.w as f64, q.i as f64, q.j as f64, q.k as f64,
    ))
}
