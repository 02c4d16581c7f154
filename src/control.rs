//! Relay control loop
//!
//! Polls the light source on a fixed interval and drives the relay from the
//! threshold (auto) or from the manual switch. Telemetry goes to the sensor
//! channel on its own interval.

use crate::clock::Clock;
use crate::config;
use crate::light_sensor::{LightMeter, SensorReading};
use crate::log_store::{LogKind, LogSink};
use crate::state_machine::SensorStateMachine;
use alloc::format;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use rand_core::RngCore;

/// Runtime settings of the node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// Relay turns on below this many lux (auto mode)
    pub light_threshold: f32,
    pub auto_mode: bool,
    /// Relay state while in manual mode
    pub manual_on: bool,
    pub check_interval_ms: u64,
    pub sensor_log_interval_ms: u64,
    pub debug_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            light_threshold: config::light_threshold(),
            auto_mode: true,
            manual_on: false,
            check_interval_ms: config::CHECK_INTERVAL_MS,
            sensor_log_interval_ms: config::SENSOR_LOG_INTERVAL_MS,
            debug_enabled: true,
        }
    }
}

/// Who decides the relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Auto,
    Manual,
}

/// Switchable load output
pub trait Relay {
    fn drive(&mut self, on: bool);
}

/// Relay on a GPIO, active high
pub struct PinRelay<P> {
    pin: P,
}

impl<P: OutputPin> PinRelay<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: OutputPin> Relay for PinRelay<P> {
    fn drive(&mut self, on: bool) {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.ok();
    }
}

/// Relay plus the state last driven onto it
pub struct RelayController<R> {
    relay: R,
    on: bool,
}

impl<R: Relay> RelayController<R> {
    pub fn new(relay: R) -> Self {
        Self { relay, on: false }
    }

    /// Drive the output low whatever it was left at
    pub fn begin(&mut self, log: &mut impl LogSink) {
        self.relay.drive(false);
        self.on = false;
        log.log(LogKind::Debug, "[CTRL] Relay controller ready");
    }

    /// Switch the relay, logging an event only on change
    pub fn set(&mut self, on: bool, log: &mut impl LogSink) {
        if self.on == on {
            return;
        }
        self.relay.drive(on);
        self.on = on;
        log.log(
            LogKind::Event,
            if on { "[CTRL] Relay ON" } else { "[CTRL] Relay OFF" },
        );
    }

    pub fn toggle(&mut self, log: &mut impl LogSink) {
        self.set(!self.on, log);
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn state_str(&self) -> &'static str {
        if self.on { "ON" } else { "OFF" }
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }
}

/// Anything that yields one lux reading per poll
pub trait LuxSource {
    fn poll(&mut self, log: &mut impl LogSink) -> SensorReading;
}

impl<S, C, D, R> LuxSource for SensorStateMachine<S, C, D, R>
where
    S: LightMeter,
    C: Clock,
    D: DelayNs,
    R: RngCore,
{
    fn poll(&mut self, log: &mut impl LogSink) -> SensorReading {
        self.get_lux(log)
    }
}

/// The node's single control loop
pub struct ControlLoop<R> {
    settings: Settings,
    relay: RelayController<R>,
    last_check_ms: Option<u64>,
    last_telemetry_ms: Option<u64>,
    last_usable: Option<SensorReading>,
}

impl<R: Relay> ControlLoop<R> {
    pub fn new(settings: Settings, relay: R) -> Self {
        Self {
            settings,
            relay: RelayController::new(relay),
            last_check_ms: None,
            last_telemetry_ms: None,
            last_usable: None,
        }
    }

    pub fn begin(&mut self, log: &mut impl LogSink) {
        self.relay.begin(log);
        log.log(
            LogKind::System,
            &format!(
                "[CTRL] Mode {:?}, threshold {:.0} lux, check every {}ms",
                self.mode(),
                self.settings.light_threshold,
                self.settings.check_interval_ms
            ),
        );
    }

    /// Run one iteration. Returns the reading if the source was polled.
    pub fn tick(
        &mut self,
        now_ms: u64,
        source: &mut impl LuxSource,
        log: &mut impl LogSink,
    ) -> Option<SensorReading> {
        let polled = if due(self.last_check_ms, now_ms, self.settings.check_interval_ms) {
            self.last_check_ms = Some(now_ms);
            let reading = source.poll(log);
            if reading.is_usable() {
                self.last_usable = Some(reading);
            }
            Some(reading)
        } else {
            None
        };

        match self.mode() {
            RelayMode::Manual => self.relay.set(self.settings.manual_on, log),
            RelayMode::Auto => {
                if let Some(reading) = polled.filter(SensorReading::is_usable) {
                    self.relay
                        .set(reading.lux < self.settings.light_threshold, log);
                }
            }
        }

        if due(self.last_telemetry_ms, now_ms, self.settings.sensor_log_interval_ms) {
            if let Some(reading) = self.last_usable {
                self.last_telemetry_ms = Some(now_ms);
                log.telemetry(reading.lux, self.relay.is_on());
            }
        }

        polled
    }

    pub fn mode(&self) -> RelayMode {
        if self.settings.auto_mode {
            RelayMode::Auto
        } else {
            RelayMode::Manual
        }
    }

    /// Switch mode. Entering auto re-evaluates on the next tick.
    pub fn set_mode(&mut self, mode: RelayMode, log: &mut impl LogSink) {
        if self.mode() == mode {
            return;
        }
        self.settings.auto_mode = mode == RelayMode::Auto;
        if mode == RelayMode::Auto {
            self.last_check_ms = None;
        }
        log.log(LogKind::Event, &format!("[CTRL] Mode set to {:?}", mode));
    }

    /// Set the manual relay state, applied on the next tick in manual mode
    pub fn set_manual(&mut self, on: bool) {
        self.settings.manual_on = on;
    }

    pub fn set_threshold(&mut self, lux: f32, log: &mut impl LogSink) {
        self.settings.light_threshold = lux;
        log.log(LogKind::Event, &format!("[CTRL] Threshold set to {:.0} lux", lux));
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn relay_on(&self) -> bool {
        self.relay.is_on()
    }

    pub fn relay(&self) -> &RelayController<R> {
        &self.relay
    }

    /// Newest hardware or simulated reading
    pub fn last_reading(&self) -> Option<SensorReading> {
        self.last_usable
    }
}

fn due(last: Option<u64>, now: u64, interval: u64) -> bool {
    match last {
        Some(last) => now.saturating_sub(last) >= interval,
        None => true,
    }
}
