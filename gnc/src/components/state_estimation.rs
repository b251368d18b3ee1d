use alloc::boxed::Box;
use defmt_or_log::{error, info, warn};
use statig::prelude::*;

use crate::{
    Duration, Instant,
    common::Ts,
    datatypes::{
        gnc::NavigationOutput,
        sensors::{
            AccelSensorSample, AirspeedSensorSample, BaroSensorSample, GpsSensorSample,
            GyroSensorSample, MagnetometerSensorSample, SanityCheck,
        },
    },
    estimation::{
        alarm::{ALARM_HYSTERESIS_CYCLES, AlarmSeverity, Hysteresis, nav_alarm},
        filter::FilterResult,
        pipeline::FilterPipeline,
        settings::{EstimationSettings, FusionAlgorithm, HomeLocation},
        state::{SensorUpdates, StateEstimation},
    },
    hal::channel::{Receiver, Sender},
    math::quat_from_array,
};

/// Ticks discarding all input after startup, while sensors settle.
const BOOT_DELAY_TICKS: u16 = 64;

/// Tick period when no input is pending. Also the longest gap between
/// inputs before the estimate is considered stale.
const TICK_TIMEOUT_MS: u64 = 10;

pub struct StateEstimationHarness {
    pub rx_gyro: Box<dyn Receiver<GyroSensorSample> + Send>,
    pub rx_accel: Box<dyn Receiver<AccelSensorSample> + Send>,
    pub rx_mag: Box<dyn Receiver<MagnetometerSensorSample> + Send>,
    pub rx_baro: Box<dyn Receiver<BaroSensorSample> + Send>,
    pub rx_gps: Box<dyn Receiver<GpsSensorSample> + Send>,
    pub rx_airspeed: Box<dyn Receiver<AirspeedSensorSample> + Send>,

    pub tx_nav_out: Box<dyn Sender<NavigationOutput> + Send>,
}

impl StateEstimationHarness {
    fn input_pending(&self) -> bool {
        !(self.rx_gyro.is_empty()
            && self.rx_accel.is_empty()
            && self.rx_mag.is_empty()
            && self.rx_baro.is_empty()
            && self.rx_gps.is_empty()
            && self.rx_airspeed.is_empty())
    }

    fn discard_inputs(&mut self) {
        self.rx_gyro.try_recv_last();
        self.rx_accel.try_recv_last();
        self.rx_mag.try_recv_last();
        self.rx_baro.try_recv_last();
        self.rx_gps.try_recv_last();
        self.rx_airspeed.try_recv_last();
    }
}

/// When the host should call [`StateEstimationComponent::tick`] next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Immediately,
    At(Instant),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub attitude_alarm: AlarmSeverity,
    pub nav_alarm: AlarmSeverity,
    /// Fusion algorithm of the running pipeline.
    pub algorithm: Option<FusionAlgorithm>,
    /// Snapshot of the estimate, `updated` marks what changed this tick.
    pub export: Option<StateEstimation>,
    pub schedule: Schedule,
}

#[derive(Debug, Clone, Copy)]
pub enum Event {
    Tick,
    SettingsUpdated(EstimationSettings),
    HomeLocationUpdated(HomeLocation),
}

pub struct TickContext {
    now: Instant,
    armed: bool,
    outcome: TickOutcome,
}

impl TickContext {
    fn new(now: Instant, armed: bool) -> Self {
        TickContext {
            now,
            armed,
            outcome: TickOutcome {
                attitude_alarm: AlarmSeverity::Uninitialised,
                nav_alarm: AlarmSeverity::Uninitialised,
                algorithm: None,
                export: None,
                schedule: Schedule::Immediately,
            },
        }
    }
}

/// Scheduler facing state estimation task.
///
/// Each tick takes at most one sample per sensor, runs the configured
/// filter pipeline and publishes the navigation output. The host decides
/// when to tick again from [`TickOutcome::schedule`].
pub struct StateEstimationComponent {
    state_machine: StateMachine<EstimatorStateMachine>,
    last_tick: Instant,
}

impl StateEstimationComponent {
    pub fn new(harness: StateEstimationHarness, settings: EstimationSettings) -> Self {
        Self {
            state_machine: EstimatorStateMachine::new(harness, settings).state_machine(),
            last_tick: Instant::from_micros(0),
        }
    }

    /// Applied at the next tick while disarmed.
    pub fn update_settings(&mut self, settings: EstimationSettings) {
        self.handle(Event::SettingsUpdated(settings));
    }

    /// Reinitializes the pipeline with the new home location at the next
    /// tick while disarmed.
    pub fn update_home_location(&mut self, home: HomeLocation) {
        self.handle(Event::HomeLocationUpdated(home));
    }

    pub fn tick(&mut self, now: Instant, armed: bool) -> TickOutcome {
        self.last_tick = now;
        let mut context = TickContext::new(now, armed);
        self.state_machine
            .handle_with_context(&Event::Tick, &mut context);
        context.outcome
    }

    fn handle(&mut self, event: Event) {
        let mut context = TickContext::new(self.last_tick, false);
        self.state_machine.handle_with_context(&event, &mut context);
    }
}

/// Takes one sample from `rx`, dropping it if it is not sane.
fn recv_sane<T: SanityCheck>(rx: &mut (dyn Receiver<T> + Send), received: &mut bool) -> Option<Ts<T>> {
    let sample = rx.try_recv()?;
    *received = true;

    if sample.v.is_sane() {
        Some(sample)
    } else {
        warn!("Dropping non-finite sensor sample");
        None
    }
}

struct EstimatorStateMachine {
    harness: StateEstimationHarness,

    settings: EstimationSettings,
    settings_pending: bool,
    settings_rejected: bool,
    pipeline: Option<FilterPipeline>,

    boot_ticks: u16,
    record: StateEstimation,
    attitude_alarm: Hysteresis<FilterResult>,
    nav_ok: Hysteresis<bool>,
    last_input: Option<Instant>,
}

impl EstimatorStateMachine {
    fn new(harness: StateEstimationHarness, settings: EstimationSettings) -> Self {
        Self {
            harness,
            settings,
            settings_pending: true,
            settings_rejected: false,
            pipeline: None,
            boot_ticks: 0,
            record: StateEstimation::default(),
            attitude_alarm: Hysteresis::new(FilterResult::Uninitialised, ALARM_HYSTERESIS_CYCLES),
            nav_ok: Hysteresis::new(false, ALARM_HYSTERESIS_CYCLES),
            last_input: None,
        }
    }

    /// Builds the pipeline for the current settings. On failure the
    /// previous pipeline, if any, stays in place.
    fn configure(&mut self) -> bool {
        self.settings_pending = false;

        match FilterPipeline::build(self.settings.fusion_algorithm, &self.settings) {
            Ok(pipeline) => {
                info!(
                    "State estimation running {}",
                    self.settings.fusion_algorithm.name()
                );
                self.pipeline = Some(pipeline);
                self.settings_rejected = false;
                self.record.mag_ok = false;
                self.record.nav_ok = false;
                self.record.nav_used = false;
                true
            }
            Err(err) => {
                error!(
                    "Rejected {} configuration: {}",
                    self.settings.fusion_algorithm.name(),
                    err
                );
                self.settings_rejected = true;
                false
            }
        }
    }

    /// Copies the next sample of every sensor into the record. Returns the
    /// gyro timestamp, if a gyro sample arrived, and whether anything was
    /// received at all.
    fn read_inputs(&mut self) -> (Option<Instant>, bool) {
        let harness = &mut self.harness;
        let record = &mut self.record;
        let mut received = false;
        let mut gyro_time = None;

        if let Some(gyro) = recv_sane(harness.rx_gyro.as_mut(), &mut received) {
            record.gyro_rad_s = gyro.v.angvel_rad_s;
            record.mark(SensorUpdates::GYRO);
            gyro_time = Some(gyro.t);
        }
        if let Some(accel) = recv_sane(harness.rx_accel.as_mut(), &mut received) {
            record.accel_m_s2 = accel.v.accel_m_s2;
            record.mark(SensorUpdates::ACCEL);
        }
        if let Some(mag) = recv_sane(harness.rx_mag.as_mut(), &mut received) {
            record.mag_b = mag.v.mag_field_b;
            record.mark(SensorUpdates::MAG);
        }
        if let Some(baro) = recv_sane(harness.rx_baro.as_mut(), &mut received) {
            record.baro_alt_m = baro.v.altitude_m;
            record.mark(SensorUpdates::BARO);
        }
        if let Some(gps) = recv_sane(harness.rx_gps.as_mut(), &mut received) {
            record.pos_n_m = gps.v.pos_n_m;
            record.vel_n_m_s = gps.v.vel_n_m_s;
            record.mark(SensorUpdates::POS | SensorUpdates::VEL);
        }
        if let Some(airspeed) = recv_sane(harness.rx_airspeed.as_mut(), &mut received) {
            record.calibrated_airspeed_m_s = airspeed.v.calibrated_m_s;
            record.mark(SensorUpdates::AIRSPEED);
        }

        (gyro_time, received)
    }

    fn is_stale(&mut self, now: Instant, received: bool) -> bool {
        if received {
            self.last_input = Some(now);
            return false;
        }

        match self.last_input {
            Some(last) => now
                .checked_since(last)
                .is_some_and(|elapsed| elapsed > Duration::millis(TICK_TIMEOUT_MS)),
            None => true,
        }
    }

    fn process(&mut self, context: &mut TickContext) {
        self.record.updated = SensorUpdates::empty();
        self.record.armed = context.armed;

        let (gyro_time, received) = self.read_inputs();
        let stale = self.is_stale(context.now, received);

        let mut result = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.run(gyro_time.unwrap_or(context.now), &mut self.record),
            None => FilterResult::Uninitialised,
        };
        if stale {
            result = result.max(FilterResult::Warning);
        }
        if self.settings_rejected {
            result = FilterResult::Error;
        }

        let outcome = &mut context.outcome;
        outcome.attitude_alarm = self.attitude_alarm.update(result).into();
        // Recovery is reported at once, a loss only once it persists
        let nav_ok = self.nav_ok.update(self.record.nav_ok);
        outcome.nav_alarm = nav_alarm(self.record.nav_used, nav_ok);
        outcome.algorithm = self.pipeline.as_ref().map(|p| p.algorithm());
        outcome.export = Some(self.record);

        if self.record.is_set(SensorUpdates::ATTITUDE) {
            self.publish_navigation(context.now);
        }
    }

    fn publish_navigation(&mut self, now: Instant) {
        let nav = NavigationOutput {
            quat_nb: quat_from_array(&self.record.quat_nb),
            pos_n_m: self.record.pos_n_m,
            vel_n_m_s: self.record.vel_n_m_s,
            angvel_unbias_b_rad_s: self.record.gyro_rad_s,
            acc_b_m_s2: self.record.accel_m_s2,
        };

        if self.harness.tx_nav_out.try_send(now, nav).is_err() {
            warn!("Navigation output channel full");
        }
    }

    fn finish_tick(&self, context: &mut TickContext) {
        context.outcome.schedule = if self.harness.input_pending() {
            Schedule::Immediately
        } else {
            Schedule::At(context.now + Duration::millis(TICK_TIMEOUT_MS))
        };
    }
}

#[state_machine(
    initial = "State::booting()",
    state(derive(Debug)),
    superstate(derive(Debug))
)]
impl EstimatorStateMachine {
    #[superstate]
    fn active(&mut self, event: &Event) -> Response<State> {
        match event {
            Event::SettingsUpdated(settings) => {
                self.settings = *settings;
                self.settings_pending = true;
                self.settings_rejected = false;
                Handled
            }
            Event::HomeLocationUpdated(home) => {
                self.settings.home = *home;
                self.settings_pending = true;
                self.settings_rejected = false;
                Handled
            }
            Event::Tick => Handled,
        }
    }

    #[state(superstate = "active")]
    fn booting(&mut self, context: &mut TickContext, event: &Event) -> Response<State> {
        match event {
            Event::Tick => {
                self.harness.discard_inputs();
                self.boot_ticks += 1;
                self.finish_tick(context);

                if self.boot_ticks >= BOOT_DELAY_TICKS {
                    Transition(State::unconfigured())
                } else {
                    Handled
                }
            }
            _ => Super,
        }
    }

    /// The first configuration is applied regardless of the arming state.
    #[state(superstate = "active")]
    fn unconfigured(&mut self, context: &mut TickContext, event: &Event) -> Response<State> {
        match event {
            Event::Tick => {
                if !self.settings_rejected && self.configure() {
                    self.process(context);
                    self.finish_tick(context);
                    return Transition(State::running());
                }

                self.harness.discard_inputs();
                context.outcome.attitude_alarm =
                    self.attitude_alarm.update(FilterResult::Error).into();
                self.finish_tick(context);
                Handled
            }
            _ => Super,
        }
    }

    #[state(superstate = "active")]
    fn running(&mut self, context: &mut TickContext, event: &Event) -> Response<State> {
        match event {
            Event::Tick => {
                // Never swap the pipeline under an armed vehicle
                if self.settings_pending && !context.armed {
                    self.configure();
                }

                self.process(context);
                self.finish_tick(context);
                Handled
            }
            _ => Super,
        }
    }
}
