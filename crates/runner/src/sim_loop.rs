use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use controller::{
    clamp_command, ControlInput, ControlMode, Controller, Manual, Mpc, OnOff, PidPair,
};
use log::{debug, error, info};
use parking_lot::RwLock;
use serde::Serialize;
use sim::{Noise, Plant, PlantParams, PlantState};

use crate::config::ConfigStore;
use crate::history::{window_len, History, Sample, Series};
use crate::RunError;

/// Longest uninterrupted sleep between run-flag polls.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Knobs that are fixed for the lifetime of a loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopOptions {
    /// Half width of the uniform disturbance on the convection coefficient.
    pub process_noise: f64,
    /// Half width of the uniform noise added to each reported temperature, K.
    pub measurement_noise: f64,
    /// `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            process_noise: 0.5,
            measurement_noise: 0.5,
            seed: None,
        }
    }
}

impl LoopOptions {
    /// No noise anywhere; useful for reproducible runs.
    pub fn quiet() -> Self {
        Self {
            process_noise: 0.0,
            measurement_noise: 0.0,
            seed: Some(0),
        }
    }
}

/// What the front end renders after each cycle.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Telemetry {
    pub running: bool,
    pub series: Series,
    pub latest: Option<Sample>,
    pub cycles: u64,
    pub solver_failures: u64,
    pub fault: Option<String>,
}

enum Strategy {
    Manual(Manual),
    OnOff(OnOff),
    Pid(PidPair),
    Mpc(Box<Mpc>),
}

impl Strategy {
    fn for_mode(mode: ControlMode, cfg: &ConfigStore) -> Self {
        match mode {
            ControlMode::Manual => Strategy::Manual(Manual::new(cfg.manual_command())),
            ControlMode::OnOff => Strategy::OnOff(OnOff::new(cfg.on_off())),
            ControlMode::Pid => Strategy::Pid(PidPair::new(cfg.pid())),
            ControlMode::Mpc => Strategy::Mpc(Box::new(Mpc::new(cfg.mpc()))),
        }
    }

    /// Pull the current parameters for this strategy from the store.
    fn configure(&mut self, cfg: &ConfigStore) {
        match self {
            Strategy::Manual(c) => c.set_command(cfg.manual_command()),
            Strategy::OnOff(c) => c.set_config(cfg.on_off()),
            Strategy::Pid(c) => c.set_config(cfg.pid()),
            Strategy::Mpc(c) => c.set_config(cfg.mpc()),
        }
    }

    fn controller(&mut self) -> &mut dyn Controller {
        match self {
            Strategy::Manual(c) => c,
            Strategy::OnOff(c) => c,
            Strategy::Pid(c) => c,
            Strategy::Mpc(c) => c.as_mut(),
        }
    }

    fn solver_failures(&self) -> u64 {
        match self {
            Strategy::Mpc(c) => c.failures(),
            _ => 0,
        }
    }
}

/// Plant, history and active controller for one mode.
pub struct SimulationLoop {
    mode: ControlMode,
    plant: Plant,
    state: PlantState,
    sensor_noise: Noise,
    history: History,
    strategy: Strategy,
    command: [f64; 2],
    time_s: f64,
    cycles: u64,
}

impl SimulationLoop {
    /// Fresh loop at the initial plant temperature with an empty history.
    pub fn new(mode: ControlMode, cfg: &ConfigStore, options: &LoopOptions) -> Self {
        let plant = Plant::new(
            PlantParams::default(),
            Noise::new(options.process_noise, options.seed.map(|s| s ^ 0xA1)),
        );
        let state = PlantState::default();
        Self {
            mode,
            plant,
            state,
            sensor_noise: Noise::new(options.measurement_noise, options.seed.map(|s| s ^ 0xB2)),
            history: History::new(window_len(cfg.step_s())),
            strategy: Strategy::for_mode(mode, cfg),
            command: cfg.manual_command(),
            time_s: 0.0,
            cycles: 0,
        }
    }

    /// Run MPC with a caller-built controller, e.g. one with a custom optimizer.
    pub fn with_mpc(mut self, mpc: Mpc) -> Self {
        self.mode = ControlMode::Mpc;
        self.strategy = Strategy::Mpc(Box::new(mpc));
        self
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn state(&self) -> &PlantState {
        &self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn command(&self) -> [f64; 2] {
        self.command
    }

    pub fn time_s(&self) -> f64 {
        self.time_s
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn solver_failures(&self) -> u64 {
        self.strategy.solver_failures()
    }

    /// Record the starting point of the series if nothing has been recorded
    /// yet. [`SimulationLoop::cycle`] does this on its own.
    pub fn prime(&mut self, cfg: &ConfigStore) {
        if self.history.is_empty() {
            let first = Sample::new(
                self.time_s,
                self.state.sensor_c(),
                self.command,
                cfg.setpoints(),
            );
            self.history.push(first);
        }
    }

    /// Run one control cycle with the parameters current at the time of
    /// the call.
    pub fn cycle(&mut self, cfg: &ConfigStore) -> Result<Sample, RunError> {
        self.prime(cfg);
        let dt_s = cfg.step_s();
        let setpoint = cfg.setpoints();

        let reported = match self.history.latest() {
            Some(s) => s.temps(),
            None => self.state.sensor_c(),
        };
        let previous = self.history.previous().map_or(reported, Sample::temps);
        // The relay switches on the sensor itself; PID and MPC see the reading.
        let measured = match self.strategy {
            Strategy::OnOff(_) => self.state.sensor_c(),
            _ => reported,
        };

        let input = ControlInput {
            setpoint,
            measured,
            previous,
            dt_s,
            command: self.command,
        };
        self.strategy.configure(cfg);
        let command = self.strategy.controller().compute(&input).map(clamp_command);

        self.state = self.plant.integrate(&self.state, command, dt_s)?;
        self.time_s += dt_s;

        let noise = &mut self.sensor_noise;
        let reading = self.state.sensor_c().map(|t| t + noise.sample());
        let sample = Sample::new(self.time_s, reading, command, setpoint);

        self.history.set_capacity(window_len(dt_s));
        self.history.push(sample);
        self.command = command;
        self.cycles += 1;
        Ok(sample)
    }

    pub fn telemetry(&self, running: bool) -> Telemetry {
        Telemetry {
            running,
            series: self.history.series(),
            latest: self.history.latest().copied(),
            cycles: self.cycles,
            solver_failures: self.solver_failures(),
            fault: None,
        }
    }

    /// Cycle until `running` is cleared or the plant fails.
    ///
    /// The flag is polled once per cycle and during the inter-cycle sleep;
    /// an in-flight integration or MPC solve is never interrupted. On a
    /// plant failure the flag is cleared before returning.
    pub fn run(
        &mut self,
        cfg: &ConfigStore,
        running: &AtomicBool,
        telemetry: &RwLock<Telemetry>,
    ) -> Result<(), RunError> {
        info!("{} loop started at t={:.0}s", self.mode.label(), self.time_s);

        while running.load(Ordering::Acquire) {
            match self.cycle(cfg) {
                Ok(s) => {
                    debug!(
                        "t={:.0}s T=({:.2}, {:.2}) Q=({:.1}, {:.1})",
                        s.t_s, s.t1_c, s.t2_c, s.q1, s.q2
                    );
                    *telemetry.write() = self.telemetry(true);
                }
                Err(e) => {
                    running.store(false, Ordering::Release);
                    error!("{} loop stopped: {e}", self.mode.label());
                    let mut t = self.telemetry(false);
                    t.fault = Some(e.to_string());
                    *telemetry.write() = t;
                    return Err(e);
                }
            }
            pause(Duration::from_secs_f64(cfg.sleep_s()), running);
        }

        telemetry.write().running = false;
        info!(
            "{} loop stopped after {} cycles",
            self.mode.label(),
            self.cycles
        );
        Ok(())
    }
}

fn pause(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(POLL_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim::INITIAL_TEMP_K;

    #[test]
    fn first_cycle_records_the_starting_point() {
        let cfg = ConfigStore::new();
        let mut sim = SimulationLoop::new(ControlMode::Pid, &cfg, &LoopOptions::quiet());
        assert!(sim.history().is_empty());
        assert_eq!(*sim.state(), PlantState::uniform(INITIAL_TEMP_K));

        sim.cycle(&cfg).unwrap();
        assert_eq!(sim.history().len(), 2);
        let first = sim.history().iter().next().unwrap();
        assert_eq!(first.t_s, 0.0);
        assert!((first.t1_c - 20.0).abs() < 1e-9);
        assert_eq!(first.commands(), [0.0, 0.0]);
    }

    #[test]
    fn manual_mode_applies_user_command() {
        let cfg = ConfigStore::new();
        let mut sim = SimulationLoop::new(ControlMode::Manual, &cfg, &LoopOptions::quiet());
        cfg.set_manual_command(0, 70.0).unwrap();
        let s = sim.cycle(&cfg).unwrap();
        assert_eq!(s.commands(), [70.0, 0.0]);
        assert_eq!(s.t_s, 4.0);
        assert!(s.t1_c > s.t2_c);
    }

    #[test]
    fn parameters_are_read_every_cycle() {
        let cfg = ConfigStore::new();
        let mut sim = SimulationLoop::new(ControlMode::OnOff, &cfg, &LoopOptions::quiet());
        assert_eq!(sim.cycle(&cfg).unwrap().commands(), [100.0, 100.0]);

        cfg.set_setpoint(1, 20.0).unwrap();
        cfg.apply_on_off(controller::OnOffConfig {
            deadband_k: [0.1, 0.0],
        })
        .unwrap();
        cfg.apply_general(crate::GeneralSettings {
            step_s: 2.0,
            sleep_s: 0.0,
        })
        .unwrap();
        let s = sim.cycle(&cfg).unwrap();
        assert_eq!(s.q2, 0.0);
        assert_eq!(s.sp2_c, 20.0);
        assert_eq!(s.t_s, 6.0);
        assert_eq!(sim.history().capacity(), 250);
    }

    #[test]
    fn relay_ignores_measurement_noise() {
        let cfg = ConfigStore::new();
        let noisy = LoopOptions {
            process_noise: 0.0,
            measurement_noise: 0.5,
            seed: Some(11),
        };
        let mut quiet = SimulationLoop::new(ControlMode::OnOff, &cfg, &LoopOptions::quiet());
        let mut loud = SimulationLoop::new(ControlMode::OnOff, &cfg, &noisy);
        for _ in 0..150 {
            let a = quiet.cycle(&cfg).unwrap();
            let b = loud.cycle(&cfg).unwrap();
            assert_eq!(a.commands(), b.commands(), "t={}", a.t_s);
        }
        assert_eq!(quiet.state(), loud.state());
        assert_ne!(quiet.history().latest(), loud.history().latest());
    }

    #[test]
    fn pid_reads_the_noisy_sample() {
        let cfg = ConfigStore::new();
        let noisy = LoopOptions {
            process_noise: 0.0,
            measurement_noise: 0.5,
            seed: Some(11),
        };
        let mut quiet = SimulationLoop::new(ControlMode::Pid, &cfg, &LoopOptions::quiet());
        let mut loud = SimulationLoop::new(ControlMode::Pid, &cfg, &noisy);
        let differs = (0..150).any(|_| {
            quiet.cycle(&cfg).unwrap().commands() != loud.cycle(&cfg).unwrap().commands()
        });
        assert!(differs);
    }

    #[test]
    fn plant_failure_is_fatal_and_clears_the_flag() {
        let cfg = ConfigStore::new();
        let mut sim = SimulationLoop::new(ControlMode::Manual, &cfg, &LoopOptions::quiet());
        sim.state.heater_k[0] = f64::INFINITY;

        let running = AtomicBool::new(true);
        let telemetry = RwLock::new(Telemetry::default());
        let err = sim.run(&cfg, &running, &telemetry).unwrap_err();
        assert!(matches!(err, RunError::Plant(_)));
        assert!(!running.load(Ordering::SeqCst));
        assert!(telemetry.read().fault.is_some());
        assert_eq!(sim.cycles(), 0);
    }

    #[test]
    fn run_returns_once_flag_is_clear() {
        let cfg = ConfigStore::new();
        let mut sim = SimulationLoop::new(ControlMode::Manual, &cfg, &LoopOptions::quiet());
        let running = AtomicBool::new(false);
        let telemetry = RwLock::new(Telemetry::default());
        sim.run(&cfg, &running, &telemetry).unwrap();
        assert_eq!(sim.cycles(), 0);
    }
}
