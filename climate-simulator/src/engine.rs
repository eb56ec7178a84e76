//! Simulation engine for one climate device
//!
//! Four operating modes, one tick transition each:
//! - Normal: random drift, threshold-triggered compressor/dehumidifier with hysteresis
//!   (switch on above the max threshold, off at the setpoint)
//! - ForcedCooling / ForcedDehumidifying: actuator forced on until the min threshold,
//!   then back to Normal
//! - EnergySaving: damped drift, wider compressor band, no humidity actuation
//!
//! The engine holds no lock. `update_state` and `process_command` are its only
//! mutators and callers must serialize them (see `actor`).

use chrono::Utc;
use climate_shared::{DeviceCommand, DeviceState, OperatingMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::str::FromStr;
use tracing::{info, warn};

use crate::config::SimulationConfig;

const BASE_POWER_W: f64 = 100.0;
const COMPRESSOR_POWER_W: f64 = 500.0;
const DEHUMIDIFIER_POWER_W: f64 = 200.0;
const ENERGY_SAVING_FACTOR: f64 = 0.7;
const POWER_JITTER_W: f64 = 10.0;

/// Extra margin above the max threshold before the compressor starts in EnergySaving
const ENERGY_SAVING_TEMP_MARGIN: f64 = 2.0;
/// Compressor stops at setpoint + this margin in EnergySaving
const ENERGY_SAVING_STOP_MARGIN: f64 = 1.0;

/// Commands understood by the engine, parsed case-insensitively
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeCommand {
    ActivateCompressor,
    ActivateDehumidifier,
    EnergySaving,
    NormalMode,
}

impl FromStr for ModeCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ACTIVATE_COMPRESSOR" => Ok(ModeCommand::ActivateCompressor),
            "ACTIVATE_DEHUMIDIFIER" => Ok(ModeCommand::ActivateDehumidifier),
            "ENERGY_SAVING" => Ok(ModeCommand::EnergySaving),
            "NORMAL_MODE" => Ok(ModeCommand::NormalMode),
            _ => Err(s.to_string()),
        }
    }
}

impl ModeCommand {
    pub fn target_mode(&self) -> OperatingMode {
        match self {
            ModeCommand::ActivateCompressor => OperatingMode::ForcedCooling,
            ModeCommand::ActivateDehumidifier => OperatingMode::ForcedDehumidifying,
            ModeCommand::EnergySaving => OperatingMode::EnergySaving,
            ModeCommand::NormalMode => OperatingMode::Normal,
        }
    }
}

pub struct SimulationEngine<R = StdRng> {
    config: SimulationConfig,
    state: DeviceState,
    rng: R,
}

impl SimulationEngine<StdRng> {
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Reproducible engine for tests and replays
    pub fn seeded(config: SimulationConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> SimulationEngine<R> {
    /// Starts at the setpoints, actuators off, Normal mode, base power draw
    pub fn with_rng(config: SimulationConfig, rng: R) -> Self {
        let state = DeviceState {
            temperature: config.temperature_setpoint,
            humidity: config.humidity_setpoint,
            power_consumption: BASE_POWER_W,
            compressor_active: false,
            dehumidifier_active: false,
            mode: OperatingMode::Normal,
            last_update: Utc::now(),
        };
        Self { config, state, rng }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Advance the device by one tick
    pub fn update_state(&mut self) {
        match self.state.mode {
            OperatingMode::Normal => self.update_normal(),
            OperatingMode::ForcedCooling => self.update_forced_cooling(),
            OperatingMode::ForcedDehumidifying => self.update_forced_dehumidifying(),
            OperatingMode::EnergySaving => self.update_energy_saving(),
        }

        self.update_power_consumption();
        self.state.last_update = Utc::now();
    }

    /// Apply a remote command. Returns false (state untouched) for unknown commands.
    pub fn process_command(&mut self, command: &DeviceCommand) -> bool {
        info!("Processing command: {}", command.command);

        let parsed = match command.command.parse::<ModeCommand>() {
            Ok(parsed) => parsed,
            Err(unknown) => {
                warn!("Unknown command: {}", unknown);
                return false;
            }
        };

        self.state.mode = parsed.target_mode();
        if parsed == ModeCommand::NormalMode {
            self.state.compressor_active = false;
            self.state.dehumidifier_active = false;
        }
        true
    }

    /// U(0, max)
    fn draw(&mut self, max: f64) -> f64 {
        self.rng.gen::<f64>() * max
    }

    /// +U(0, max) with probability `increase_chance`, else -U(0, max)
    fn drift(&mut self, increase_chance: f64, max: f64) -> f64 {
        if self.rng.gen::<f64>() < increase_chance {
            self.draw(max)
        } else {
            -self.draw(max)
        }
    }

    fn update_normal(&mut self) {
        let cfg = self.config.clone();

        let temperature_change = self.drift(cfg.increase_chance, cfg.max_temperature_change);
        let humidity_change = self.drift(cfg.increase_chance, cfg.max_humidity_change);
        self.state.temperature += temperature_change;
        self.state.humidity += humidity_change;

        let compressor_was_active = self.state.compressor_active;
        let dehumidifier_was_active = self.state.dehumidifier_active;

        if self.state.temperature > cfg.temperature_max_threshold {
            self.state.compressor_active = true;
            info!(
                "Temperature exceeded threshold ({:.1}°C). Compressor activated.",
                self.state.temperature
            );
        }
        if self.state.humidity > cfg.humidity_max_threshold {
            self.state.dehumidifier_active = true;
            info!(
                "Humidity exceeded threshold ({:.1}%). Dehumidifier activated.",
                self.state.humidity
            );
        }

        // an actuator switched on during this tick keeps running at least until the next one
        if self.state.compressor_active {
            let pull = self.draw(cfg.max_temperature_change * 2.0);
            self.state.temperature -= pull;
            if compressor_was_active && self.state.temperature <= cfg.temperature_setpoint {
                self.state.compressor_active = false;
                info!("Temperature normalized. Compressor deactivated.");
            }
        }
        if self.state.dehumidifier_active {
            let pull = self.draw(cfg.max_humidity_change * 2.0);
            self.state.humidity -= pull;
            if dehumidifier_was_active && self.state.humidity <= cfg.humidity_setpoint {
                self.state.dehumidifier_active = false;
                info!("Humidity normalized. Dehumidifier deactivated.");
            }
        }
    }

    fn update_forced_cooling(&mut self) {
        self.state.compressor_active = true;
        let pull = self.draw(self.config.max_temperature_change * 1.5);
        self.state.temperature -= pull;

        if self.state.temperature <= self.config.temperature_min_threshold {
            self.state.mode = OperatingMode::Normal;
            self.state.compressor_active = false;
            info!("Temperature reached minimum threshold. Switching to normal mode.");
        }
    }

    fn update_forced_dehumidifying(&mut self) {
        self.state.dehumidifier_active = true;
        let pull = self.draw(self.config.max_humidity_change * 1.5);
        self.state.humidity -= pull;

        if self.state.humidity <= self.config.humidity_min_threshold {
            self.state.mode = OperatingMode::Normal;
            self.state.dehumidifier_active = false;
            info!("Humidity reached minimum threshold. Switching to normal mode.");
        }
    }

    fn update_energy_saving(&mut self) {
        let cfg = self.config.clone();
        let start_above = cfg.temperature_max_threshold + ENERGY_SAVING_TEMP_MARGIN;

        let temperature_change = self.drift(0.5, cfg.max_temperature_change * 0.5);
        self.state.temperature += temperature_change;

        if self.state.temperature > start_above && !self.state.compressor_active {
            self.state.compressor_active = true;
            info!(
                "Temperature above energy saving band ({:.1}°C). Compressor activated.",
                self.state.temperature
            );
        } else if self.state.temperature <= cfg.temperature_setpoint + ENERGY_SAVING_STOP_MARGIN {
            self.state.compressor_active = false;
        }

        self.state.humidity += (self.rng.gen::<f64>() - 0.5) * cfg.max_humidity_change * 0.3;
    }

    /// Uniform jitter in [-POWER_JITTER_W, POWER_JITTER_W] on top of the nominal draw
    fn update_power_consumption(&mut self) {
        let jitter = (self.rng.gen::<f64>() - 0.5) * 2.0 * POWER_JITTER_W;
        self.state.power_consumption = nominal_power(&self.state) + jitter;
    }
}

/// 100 W base, +500 W compressor, +200 W dehumidifier, x0.7 in EnergySaving
pub fn nominal_power(state: &DeviceState) -> f64 {
    let mut power = BASE_POWER_W;
    if state.compressor_active {
        power += COMPRESSOR_POWER_W;
    }
    if state.dehumidifier_active {
        power += DEHUMIDIFIER_POWER_W;
    }
    if state.mode == OperatingMode::EnergySaving {
        power *= ENERGY_SAVING_FACTOR;
    }
    power
}
