//! Light acquisition state machine
//!
//! Produces one lux reading per poll whatever the sensor is doing. The startup
//! probe is the only blocking step; after that every path through `get_lux` is
//! either a single bus read or a time-gated reconnect attempt.

use crate::clock::Clock;
use crate::config;
use crate::light_sensor::{LightMeter, SensorReading};
use crate::log_store::{LogKind, LogSink};
use alloc::format;
use embedded_hal::delay::DelayNs;
use rand_core::RngCore;

/// Acquisition states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    // Before `begin`
    Uninitialized,
    // Startup handshake in progress
    Probing,

    // Hardware answering
    Connected,
    // A read failed, reconnect pending
    Disconnected,

    // Probe budget exhausted or simulation forced
    SimulatedFallback,
}

/// Timing, retry and simulation settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionConfig {
    pub probe_attempts: u32,
    pub probe_delay_ms: u32,
    pub bus_settle_ms: u32,
    pub simulation_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    /// Simulated value before the first update
    pub sim_initial: f32,
    pub sim_min: f32,
    pub sim_max: f32,
    /// Value taken when the walk drops below `sim_min`
    pub sim_reseed_low: f32,
    /// Value taken when the walk rises above `sim_max`
    pub sim_reseed_high: f32,
    /// Each update moves the value by a delta in `[-sim_step, sim_step)`
    pub sim_step: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            probe_attempts: config::SENSOR_PROBE_ATTEMPTS,
            probe_delay_ms: config::SENSOR_PROBE_DELAY_MS,
            bus_settle_ms: config::SENSOR_BUS_SETTLE_MS,
            simulation_interval_ms: config::SENSOR_SIMULATION_INTERVAL_MS,
            reconnect_interval_ms: config::SENSOR_RECONNECT_INTERVAL_MS,
            sim_initial: 1000.0,
            sim_min: 0.0,
            sim_max: 2000.0,
            sim_reseed_low: 100.0,
            sim_reseed_high: 1500.0,
            sim_step: 100,
        }
    }
}

/// Light sensor state machine
pub struct SensorStateMachine<S, C, D, R> {
    sensor: S,
    clock: C,
    delay: D,
    rng: R,
    config: AcquisitionConfig,
    current_state: AcquisitionState,
    previous_state: Option<AcquisitionState>,
    hardware_found: bool,
    attempt_count: u32,
    simulated_lux: f32,
    last_simulation_ms: u64,
    // None means the next poll may retry immediately
    last_retry_ms: Option<u64>,
}

impl<S, C, D, R> SensorStateMachine<S, C, D, R>
where
    S: LightMeter,
    C: Clock,
    D: DelayNs,
    R: RngCore,
{
    /// Create a machine in `Uninitialized`; nothing touches the bus until `begin`
    pub fn new(sensor: S, clock: C, delay: D, rng: R, config: AcquisitionConfig) -> Self {
        Self {
            sensor,
            clock,
            delay,
            rng,
            config,
            current_state: AcquisitionState::Uninitialized,
            previous_state: None,
            hardware_found: false,
            attempt_count: 0,
            simulated_lux: config.sim_initial,
            last_simulation_ms: 0,
            last_retry_ms: None,
        }
    }

    /// Reset the bus and probe the sensor. Blocks for at most
    /// `bus_settle_ms + (probe_attempts - 1) * probe_delay_ms`.
    /// Returns true if real hardware answered.
    pub fn begin(&mut self, log: &mut impl LogSink) -> bool {
        self.transition_to_state(AcquisitionState::Probing, log);

        self.sensor.reset_bus();
        self.delay.delay_ms(self.config.bus_settle_ms);

        for attempt in 1..=self.config.probe_attempts {
            self.attempt_count += 1;
            match self.sensor.handshake() {
                Ok(()) => {
                    self.hardware_found = true;
                    log.log(
                        LogKind::Debug,
                        &format!("[SENSOR] BH1750 connected on attempt {}", attempt),
                    );
                    self.transition_to_state(AcquisitionState::Connected, log);
                    return true;
                }
                Err(e) => {
                    log.log(
                        LogKind::Debug,
                        &format!(
                            "[SENSOR] Handshake {}/{} failed: {}",
                            attempt, self.config.probe_attempts, e
                        ),
                    );
                    if attempt < self.config.probe_attempts {
                        self.delay.delay_ms(self.config.probe_delay_ms);
                    }
                }
            }
        }

        self.hardware_found = false;
        self.enter_simulation(log);
        false
    }

    /// One reading per call, never blocking beyond a single bus transaction
    /// (or the bounded reconnect when its interval is due)
    pub fn get_lux(&mut self, log: &mut impl LogSink) -> SensorReading {
        match self.current_state {
            AcquisitionState::SimulatedFallback => self.simulated_reading(log),
            AcquisitionState::Connected => self.hardware_reading(log),
            AcquisitionState::Disconnected => {
                let now = self.clock.now_ms();
                let due = match self.last_retry_ms {
                    Some(last) => now.saturating_sub(last) >= self.config.reconnect_interval_ms,
                    None => true,
                };
                if due {
                    self.try_reconnect(now, log);
                }
                SensorReading::unavailable()
            }
            AcquisitionState::Uninitialized | AcquisitionState::Probing => {
                SensorReading::unavailable()
            }
        }
    }

    /// True while real hardware is answering
    pub fn is_available(&self) -> bool {
        self.current_state == AcquisitionState::Connected
    }

    /// Force or release the simulated signal
    pub fn set_simulation_mode(&mut self, simulate: bool, log: &mut impl LogSink) {
        if simulate {
            if self.current_state != AcquisitionState::SimulatedFallback {
                self.enter_simulation(log);
            }
        } else if self.current_state == AcquisitionState::SimulatedFallback {
            if self.hardware_found {
                self.transition_to_state(AcquisitionState::Connected, log);
            } else {
                self.last_retry_ms = None;
                self.transition_to_state(AcquisitionState::Disconnected, log);
            }
        }

        log.log(
            LogKind::Event,
            if simulate {
                "[SENSOR] Simulation mode ON"
            } else {
                "[SENSOR] Simulation mode OFF"
            },
        );
    }

    /// Human readable description of the current source
    pub fn get_sensor_info(&self) -> &'static str {
        match self.current_state {
            AcquisitionState::SimulatedFallback => "BH1750 (simulated)",
            AcquisitionState::Connected => "BH1750 (GY-30) continuous high-res",
            _ => "Sensor unavailable",
        }
    }

    /// Current acquisition state
    pub fn get_current_state(&self) -> AcquisitionState {
        self.current_state
    }

    /// State before the last transition
    pub fn get_previous_state(&self) -> Option<AcquisitionState> {
        self.previous_state
    }

    /// Handshakes made since construction, startup and reconnects together
    pub fn get_attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    fn hardware_reading(&mut self, log: &mut impl LogSink) -> SensorReading {
        match self.sensor.read_lux() {
            Ok(lux) if lux >= 0.0 => {
                log.log(LogKind::Debug, &format!("[SENSOR] BH1750: {:.2} lux", lux));
                SensorReading::hardware(lux)
            }
            result => {
                match result {
                    Err(e) => log.log(LogKind::Debug, &format!("[SENSOR] BH1750 read failed: {}", e)),
                    Ok(lux) => log.log(
                        LogKind::Debug,
                        &format!("[SENSOR] BH1750 returned invalid value {}", lux),
                    ),
                }
                self.hardware_found = false;
                self.last_retry_ms = Some(self.clock.now_ms());
                self.transition_to_state(AcquisitionState::Disconnected, log);
                SensorReading::unavailable()
            }
        }
    }

    fn simulated_reading(&mut self, log: &mut impl LogSink) -> SensorReading {
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_simulation_ms) >= self.config.simulation_interval_ms {
            let span = self.config.sim_step.saturating_mul(2).max(1);
            let delta = (self.rng.next_u32() % span) as f32 - self.config.sim_step as f32;

            let mut lux = self.simulated_lux + delta;
            if lux < self.config.sim_min {
                lux = self.config.sim_reseed_low;
            } else if lux > self.config.sim_max {
                lux = self.config.sim_reseed_high;
            }
            self.simulated_lux = lux;
            self.last_simulation_ms = now;

            log.log(LogKind::Debug, &format!("[SENSOR] Simulated: {:.2} lux", lux));
        }
        SensorReading::simulated(self.simulated_lux)
    }

    fn try_reconnect(&mut self, now: u64, log: &mut impl LogSink) {
        self.last_retry_ms = Some(now);
        self.attempt_count += 1;
        log.log(LogKind::Debug, "[SENSOR] Reconnecting BH1750...");

        self.sensor.reset_bus();
        self.delay.delay_ms(self.config.bus_settle_ms);

        match self.sensor.handshake() {
            Ok(()) => {
                self.hardware_found = true;
                self.transition_to_state(AcquisitionState::Connected, log);
            }
            Err(e) => {
                log.log(LogKind::Debug, &format!("[SENSOR] Reconnect failed: {}", e));
            }
        }
    }

    fn enter_simulation(&mut self, log: &mut impl LogSink) {
        self.last_simulation_ms = self.clock.now_ms();
        self.transition_to_state(AcquisitionState::SimulatedFallback, log);
    }

    /// Record the transition and log the notable ones
    fn transition_to_state(&mut self, new_state: AcquisitionState, log: &mut impl LogSink) {
        if new_state == self.current_state {
            return;
        }

        match new_state {
            AcquisitionState::Connected => {
                log.log(LogKind::Event, "[SENSOR] Light sensor connected");
            }
            AcquisitionState::Disconnected => {
                log.log(
                    LogKind::Event,
                    &format!(
                        "[SENSOR] Light sensor lost, retrying every {}s",
                        self.config.reconnect_interval_ms / 1000
                    ),
                );
            }
            AcquisitionState::SimulatedFallback => {
                log.log(
                    LogKind::Event,
                    &format!(
                        "[SENSOR] Simulated light signal active ({:.0} lux)",
                        self.simulated_lux
                    ),
                );
            }
            AcquisitionState::Probing => {
                log.log(LogKind::Debug, "[SENSOR] Probing BH1750...");
            }
            AcquisitionState::Uninitialized => {}
        }

        self.previous_state = Some(self.current_state);
        self.current_state = new_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::light_sensor::Provenance;
    use crate::NodeError;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    /// Sensor whose answers are set by the test
    struct ScriptedMeter {
        handshake_ok: bool,
        lux: Result<f32, NodeError>,
        handshakes: u32,
        reads: u32,
        resets: u32,
    }

    impl ScriptedMeter {
        fn present(lux: f32) -> Self {
            Self {
                handshake_ok: true,
                lux: Ok(lux),
                handshakes: 0,
                reads: 0,
                resets: 0,
            }
        }

        fn absent() -> Self {
            Self {
                handshake_ok: false,
                lux: Err(NodeError::TransientReadFailure),
                ..Self::present(0.0)
            }
        }
    }

    impl LightMeter for ScriptedMeter {
        fn reset_bus(&mut self) {
            self.resets += 1;
        }

        fn handshake(&mut self) -> Result<(), NodeError> {
            self.handshakes += 1;
            if self.handshake_ok {
                Ok(())
            } else {
                Err(NodeError::BusHandshakeFailure)
            }
        }

        fn read_lux(&mut self) -> Result<f32, NodeError> {
            self.reads += 1;
            self.lux
        }
    }

    #[derive(Default)]
    struct CountingDelay {
        total_ns: u64,
    }

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += ns as u64;
        }
    }

    impl CountingDelay {
        fn total_ms(&self) -> u64 {
            self.total_ns / 1_000_000
        }
    }

    /// Generator returning the same word forever
    struct FixedRng(u32);

    impl RngCore for FixedRng {
        fn next_u32(&mut self) -> u32 {
            self.0
        }

        fn next_u64(&mut self) -> u64 {
            self.0 as u64
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            dst.fill(self.0 as u8);
        }
    }

    #[derive(Default)]
    struct RecordingLog {
        entries: Vec<(LogKind, String)>,
    }

    impl LogSink for RecordingLog {
        fn log(&mut self, kind: LogKind, text: &str) {
            self.entries.push((kind, text.to_string()));
        }
    }

    impl RecordingLog {
        fn contains(&self, kind: LogKind, needle: &str) -> bool {
            self.entries
                .iter()
                .any(|(k, text)| *k == kind && text.contains(needle))
        }
    }

    fn machine<R: RngCore>(
        sensor: ScriptedMeter,
        clock: &ManualClock,
        rng: R,
    ) -> SensorStateMachine<ScriptedMeter, &ManualClock, CountingDelay, R> {
        SensorStateMachine::new(
            sensor,
            clock,
            CountingDelay::default(),
            rng,
            AcquisitionConfig::default(),
        )
    }

    #[test]
    fn failing_probe_falls_back_after_exact_budget() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::absent(), &clock, SmallRng::seed_from_u64(1));

        assert!(!sm.begin(&mut log));

        assert_eq!(sm.get_current_state(), AcquisitionState::SimulatedFallback);
        assert_eq!(sm.get_previous_state(), Some(AcquisitionState::Probing));
        assert_eq!(sm.get_attempt_count(), 3);
        assert_eq!(sm.sensor_mut().handshakes, 3);
        assert_eq!(sm.sensor_mut().resets, 1);
        assert_eq!(sm.delay.total_ms(), 100 + 2 * 500);
        assert!(!sm.is_available());
        assert_eq!(sm.get_sensor_info(), "BH1750 (simulated)");
        assert!(log.contains(LogKind::Debug, "Handshake 3/3 failed"));
        assert!(log.contains(LogKind::Event, "Simulated light signal active"));
    }

    #[test]
    fn simulated_signal_stays_in_bounds_and_never_blocks() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::absent(), &clock, SmallRng::seed_from_u64(42));
        sm.begin(&mut log);
        let delayed = sm.delay.total_ns;

        for _ in 0..500 {
            clock.advance(5_000);
            let reading = sm.get_lux(&mut log);
            assert_eq!(reading.provenance, Provenance::Simulated);
            assert!((0.0..=2000.0).contains(&reading.lux), "out of range: {}", reading.lux);
        }

        assert_eq!(sm.delay.total_ns, delayed);
        assert_eq!(sm.sensor_mut().reads, 0);
    }

    #[test]
    fn simulated_value_holds_between_intervals() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::absent(), &clock, FixedRng(150));
        sm.begin(&mut log);

        assert_eq!(sm.get_lux(&mut log).lux, 1000.0);
        clock.advance(4_999);
        assert_eq!(sm.get_lux(&mut log).lux, 1000.0);
        clock.advance(1);
        assert_eq!(sm.get_lux(&mut log).lux, 1050.0);
        for _ in 0..100 {
            assert_eq!(sm.get_lux(&mut log).lux, 1050.0);
        }
        assert!(log.contains(LogKind::Debug, "Simulated: 1050.00 lux"));
    }

    #[test]
    fn simulated_walk_reseeds_at_both_bounds() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut falling = machine(ScriptedMeter::absent(), &clock, FixedRng(0));
        falling.begin(&mut log);
        let mut values = Vec::new();
        for _ in 0..11 {
            clock.advance(5_000);
            values.push(falling.get_lux(&mut log).lux);
        }
        assert_eq!(values[9], 0.0);
        assert_eq!(values[10], 100.0);

        let mut rising = machine(ScriptedMeter::absent(), &clock, FixedRng(199));
        rising.begin(&mut log);
        let mut last = 0.0;
        for _ in 0..11 {
            clock.advance(5_000);
            last = rising.get_lux(&mut log).lux;
        }
        assert_eq!(last, 1500.0);
    }

    #[test]
    fn successful_probe_reads_hardware() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::present(321.5), &clock, FixedRng(0));

        assert!(sm.begin(&mut log));
        assert!(sm.is_available());
        assert_eq!(sm.get_attempt_count(), 1);
        assert_eq!(sm.delay.total_ms(), 100);

        let reading = sm.get_lux(&mut log);
        assert_eq!(reading, SensorReading::hardware(321.5));
        assert!(log.contains(LogKind::Debug, "BH1750: 321.50 lux"));
        assert!(log.contains(LogKind::Event, "Light sensor connected"));
    }

    #[test]
    fn zero_lux_is_a_valid_hardware_reading() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::present(0.0), &clock, FixedRng(0));
        sm.begin(&mut log);

        let reading = sm.get_lux(&mut log);
        assert_eq!(reading.provenance, Provenance::Hardware);
        assert_eq!(reading.lux, 0.0);
        assert!(sm.is_available());
    }

    #[test]
    fn single_read_failure_yields_one_unavailable_then_waits_for_retry() {
        let clock = ManualClock::new(1_000);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::present(50.0), &clock, FixedRng(0));
        sm.begin(&mut log);

        sm.sensor_mut().lux = Err(NodeError::TransientReadFailure);
        let failed = sm.get_lux(&mut log);
        assert_eq!(failed.provenance, Provenance::Unavailable);
        assert_eq!(sm.get_current_state(), AcquisitionState::Disconnected);
        assert!(log.contains(LogKind::Event, "Light sensor lost"));

        // sensor is back, but the retry window has not elapsed
        sm.sensor_mut().lux = Ok(75.0);
        for _ in 0..20 {
            clock.advance(450);
            assert_eq!(sm.get_lux(&mut log), SensorReading::unavailable());
        }
        assert_eq!(sm.sensor_mut().handshakes, 1);
        assert_eq!(sm.get_current_state(), AcquisitionState::Disconnected);

        clock.advance(1_000);
        assert_eq!(sm.get_lux(&mut log).provenance, Provenance::Unavailable);
        assert_eq!(sm.sensor_mut().handshakes, 2);
        assert_eq!(sm.get_current_state(), AcquisitionState::Connected);
        assert!(log.contains(LogKind::Debug, "Reconnecting BH1750"));

        assert_eq!(sm.get_lux(&mut log), SensorReading::hardware(75.0));
    }

    #[test]
    fn failed_reconnect_waits_a_full_interval_again() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::present(10.0), &clock, FixedRng(0));
        sm.begin(&mut log);

        sm.sensor_mut().lux = Ok(-1.0);
        assert!(!sm.get_lux(&mut log).is_usable());
        sm.sensor_mut().handshake_ok = false;

        clock.advance(10_000);
        sm.get_lux(&mut log);
        assert_eq!(sm.sensor_mut().handshakes, 2);
        assert!(log.contains(LogKind::Debug, "Reconnect failed"));

        clock.advance(9_999);
        sm.get_lux(&mut log);
        assert_eq!(sm.sensor_mut().handshakes, 2);

        clock.advance(1);
        sm.get_lux(&mut log);
        assert_eq!(sm.sensor_mut().handshakes, 3);
        assert_eq!(sm.get_current_state(), AcquisitionState::Disconnected);
    }

    #[test]
    fn polling_before_begin_is_unavailable() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::present(10.0), &clock, FixedRng(0));

        assert_eq!(sm.get_lux(&mut log), SensorReading::unavailable());
        assert_eq!(sm.get_current_state(), AcquisitionState::Uninitialized);
        assert_eq!(sm.sensor_mut().reads, 0);
    }

    #[test]
    fn manual_simulation_toggle() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::present(10.0), &clock, FixedRng(0));
        sm.begin(&mut log);

        sm.set_simulation_mode(true, &mut log);
        assert_eq!(sm.get_current_state(), AcquisitionState::SimulatedFallback);
        assert_eq!(sm.get_lux(&mut log).provenance, Provenance::Simulated);
        assert!(log.contains(LogKind::Event, "Simulation mode ON"));

        sm.set_simulation_mode(false, &mut log);
        assert_eq!(sm.get_current_state(), AcquisitionState::Connected);
        assert_eq!(sm.get_lux(&mut log), SensorReading::hardware(10.0));
    }

    #[test]
    fn leaving_forced_simulation_without_hardware_retries_immediately() {
        let clock = ManualClock::new(0);
        let mut log = RecordingLog::default();
        let mut sm = machine(ScriptedMeter::absent(), &clock, FixedRng(0));
        sm.begin(&mut log);
        sm.sensor_mut().handshake_ok = true;

        sm.set_simulation_mode(false, &mut log);
        assert_eq!(sm.get_current_state(), AcquisitionState::Disconnected);

        assert_eq!(sm.get_lux(&mut log).provenance, Provenance::Unavailable);
        assert_eq!(sm.get_current_state(), AcquisitionState::Connected);
        assert_eq!(sm.sensor_mut().handshakes, 4);
    }
}
