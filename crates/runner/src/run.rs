//! Start, stop and mode-switch orchestration for the simulation worker.
//!
//! At most one worker thread owns the [`SimulationLoop`] at a time. While
//! idle the loop is parked in the controller; `start` moves it onto a fresh
//! thread and `stop` clears the run flag and joins that thread, taking the
//! loop back. A mode switch stops first, then replaces the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use controller::ControlMode;
use log::{error, info, warn};
use parking_lot::RwLock;

use crate::config::ConfigStore;
use crate::sim_loop::{LoopOptions, SimulationLoop, Telemetry};
use crate::RunError;

type Worker = JoinHandle<(SimulationLoop, Result<(), RunError>)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running(ControlMode),
}

pub struct RunController {
    config: Arc<ConfigStore>,
    telemetry: Arc<RwLock<Telemetry>>,
    options: LoopOptions,
    mode: ControlMode,
    running: Arc<AtomicBool>,
    /// Parked loop; `None` while a worker owns it.
    sim: Option<SimulationLoop>,
    worker: Option<Worker>,
    fault: Option<RunError>,
}

impl RunController {
    /// Idle in manual mode with default parameters.
    pub fn new(options: LoopOptions) -> Self {
        Self::with_config(Arc::new(ConfigStore::new()), options)
    }

    pub fn with_config(config: Arc<ConfigStore>, options: LoopOptions) -> Self {
        let mode = ControlMode::default();
        let sim = SimulationLoop::new(mode, &config, &options);
        Self {
            telemetry: Arc::new(RwLock::new(sim.telemetry(false))),
            config,
            options,
            mode,
            running: Arc::new(AtomicBool::new(false)),
            sim: Some(sim),
            worker: None,
            fault: None,
        }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<RwLock<Telemetry>> {
        Arc::clone(&self.telemetry)
    }

    /// Copy of the latest published telemetry.
    pub fn snapshot(&self) -> Telemetry {
        self.telemetry.read().clone()
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> RunState {
        if self.is_running() {
            RunState::Running(self.mode)
        } else {
            RunState::Idle
        }
    }

    /// The parked loop, if no worker holds it.
    pub fn sim(&self) -> Option<&SimulationLoop> {
        self.sim.as_ref()
    }

    /// Begin cycling in the current mode.
    ///
    /// Returns `Ok(false)` without doing anything if a loop is already running.
    pub fn start(&mut self) -> Result<bool, RunError> {
        self.reap()?;
        if self.worker.is_some() {
            return Ok(false);
        }

        let mut sim = match self.sim.take() {
            Some(sim) => sim,
            None => SimulationLoop::new(self.mode, &self.config, &self.options),
        };
        self.fault = None;
        self.running.store(true, Ordering::Release);

        let config = Arc::clone(&self.config);
        let running = Arc::clone(&self.running);
        let telemetry = Arc::clone(&self.telemetry);
        let spawned = thread::Builder::new()
            .name("sim-loop".into())
            .spawn(move || {
                let result = sim.run(&config, &running, &telemetry);
                (sim, result)
            });

        match spawned {
            Ok(handle) => {
                info!("started {} run", self.mode.label());
                self.worker = Some(handle);
                Ok(true)
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.sim = Some(SimulationLoop::new(self.mode, &self.config, &self.options));
                Err(RunError::Spawn(e))
            }
        }
    }

    /// Clear the run flag and wait for the worker to hand the loop back.
    ///
    /// A no-op when idle. Waits for any in-flight cycle, including an MPC
    /// solve, to finish.
    pub fn stop(&mut self) -> Result<(), RunError> {
        if self.worker.is_none() {
            return Ok(());
        }
        self.running.store(false, Ordering::Release);
        self.join()?;
        info!("stopped {} run", self.mode.label());
        Ok(())
    }

    /// Stop, reset setpoints and manual commands, and start over from the
    /// initial plant state with a fresh controller for `mode`.
    pub fn set_mode(&mut self, mode: ControlMode) -> Result<(), RunError> {
        self.stop()?;
        self.config.reset_direct();
        let sim = SimulationLoop::new(mode, &self.config, &self.options);
        *self.telemetry.write() = sim.telemetry(false);
        self.sim = Some(sim);
        self.mode = mode;
        self.fault = None;
        info!("switched to {} mode", mode.label());
        Ok(())
    }

    /// The error that ended the last run on its own, if any.
    pub fn take_fault(&mut self) -> Option<RunError> {
        if let Err(e) = self.reap() {
            return Some(e);
        }
        self.fault.take()
    }

    /// Collect a worker that exited without being asked to.
    fn reap(&mut self) -> Result<(), RunError> {
        match &self.worker {
            Some(w) if w.is_finished() => self.join(),
            _ => Ok(()),
        }
    }

    fn join(&mut self) -> Result<(), RunError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok((sim, result)) => {
                self.sim = Some(sim);
                if let Err(e) = result {
                    warn!("{} run ended with a fault: {e}", self.mode.label());
                    self.fault = Some(e);
                }
                Ok(())
            }
            Err(_) => {
                error!("simulation thread panicked");
                self.running.store(false, Ordering::Release);
                self.sim = Some(SimulationLoop::new(self.mode, &self.config, &self.options));
                Err(RunError::WorkerPanicked)
            }
        }
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(w) = self.worker.take() {
            let _ = w.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeneralSettings;
    use std::time::{Duration, Instant};

    fn fast() -> RunController {
        let rc = RunController::new(LoopOptions::quiet());
        rc.config()
            .apply_general(GeneralSettings {
                step_s: 4.0,
                sleep_s: 0.0,
            })
            .unwrap();
        rc
    }

    fn wait_for_cycles(rc: &RunController, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while rc.snapshot().cycles < n {
            assert!(Instant::now() < deadline, "worker made no progress");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn starts_idle_in_manual() {
        let rc = fast();
        assert_eq!(rc.state(), RunState::Idle);
        assert_eq!(rc.mode(), ControlMode::Manual);
        assert!(rc.sim().is_some());
    }

    #[test]
    fn stop_while_idle_is_a_no_op() {
        let mut rc = fast();
        rc.stop().unwrap();
        rc.stop().unwrap();
        assert_eq!(rc.state(), RunState::Idle);
        assert_eq!(rc.sim().unwrap().cycles(), 0);
    }

    #[test]
    fn second_start_is_ignored() {
        let mut rc = fast();
        assert!(rc.start().unwrap());
        assert!(!rc.start().unwrap());
        assert_eq!(rc.state(), RunState::Running(ControlMode::Manual));
        assert!(rc.sim().is_none());
        rc.stop().unwrap();
        assert_eq!(rc.state(), RunState::Idle);
        assert!(rc.sim().is_some());
    }

    #[test]
    fn stop_and_start_resume_the_same_plant() {
        let mut rc = fast();
        rc.config().set_manual_command(0, 100.0).unwrap();
        rc.start().unwrap();
        wait_for_cycles(&rc, 3);
        rc.stop().unwrap();

        let sim = rc.sim().unwrap();
        let (t, n) = (sim.time_s(), sim.history().len());
        assert!(t >= 12.0);
        assert!(!rc.snapshot().running);

        let before = rc.snapshot().cycles;
        rc.start().unwrap();
        wait_for_cycles(&rc, before + 1);
        rc.stop().unwrap();
        let sim = rc.sim().unwrap();
        assert!(sim.time_s() > t);
        assert!(sim.history().len() > n);
        assert_eq!(sim.history().iter().next().unwrap().t_s, 0.0);
    }

    #[test]
    fn mode_switch_resets_everything() {
        let mut rc = fast();
        rc.config().set_setpoint(0, 45.0).unwrap();
        rc.config().set_manual_command(1, 80.0).unwrap();
        rc.start().unwrap();
        wait_for_cycles(&rc, 2);

        rc.set_mode(ControlMode::Pid).unwrap();
        assert_eq!(rc.state(), RunState::Idle);
        assert_eq!(rc.mode(), ControlMode::Pid);
        assert_eq!(rc.config().setpoints(), [30.0, 30.0]);
        assert_eq!(rc.config().manual_command(), [0.0, 0.0]);

        let sim = rc.sim().unwrap();
        assert_eq!(*sim.state(), sim::PlantState::uniform(sim::INITIAL_TEMP_K));
        assert!(sim.history().is_empty());
        assert_eq!(sim.time_s(), 0.0);
        assert!(rc.snapshot().series.t_s.is_empty());
    }
}
