//! Receding-horizon model predictive control.
//!
//! Every cycle the controller re-solves a finite-horizon problem from the
//! latest measurement, applies the first planned move and keeps the rest only
//! as a warm start for the next solve. The model state is carried from cycle
//! to cycle; the gap between each measurement and the model's sensor value
//! is added to every predicted sensor value over the horizon.
//!
//! Solves run synchronously and have no time limit; a slow solve delays the
//! cycle. A failed solve never reaches the caller: the previous command is
//! held and the failure is counted.

pub mod model;
mod optimizer;

pub use optimizer::{Optimizer, PatternSearch, ProjectedGradient, Solution, SolveError};

use sim::{to_celsius, to_kelvin, PlantParams};

use crate::{clamp_command, ControlInput, Controller, COMMAND_MAX, COMMAND_MIN};
use model::{ModelState, INTERVALS};

/// Weight on controlled-variable error relative to move suppression.
/// Deadband violations are weighted linearly, trajectory errors squared.
const CV_WEIGHT: f64 = 20.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SolverKind {
    #[default]
    ProjectedGradient,
    PatternSearch,
}

impl SolverKind {
    pub const ALL: [SolverKind; 2] = [SolverKind::ProjectedGradient, SolverKind::PatternSearch];

    pub fn label(self) -> &'static str {
        match self {
            SolverKind::ProjectedGradient => "Projected gradient",
            SolverKind::PatternSearch => "Pattern search",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ObjectiveKind {
    /// Penalise leaving a band around the setpoint.
    #[default]
    Deadband,
    /// Penalise deviation from an exponential approach to the setpoint.
    Trajectory,
}

impl ObjectiveKind {
    pub const ALL: [ObjectiveKind; 2] = [ObjectiveKind::Deadband, ObjectiveKind::Trajectory];

    pub fn label(self) -> &'static str {
        match self {
            ObjectiveKind::Deadband => "Deadband",
            ObjectiveKind::Trajectory => "Trajectory",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MpcZoneConfig {
    /// Half width of the CV band, K.
    pub deadband_k: f64,
    /// Time constant of the reference trajectory, s.
    pub tau_s: f64,
    /// Largest command move per horizon interval, %.
    pub dmax: f64,
    /// Move-suppression weight.
    pub dcost: f64,
}

impl Default for MpcZoneConfig {
    fn default() -> Self {
        Self {
            deadband_k: 0.1,
            tau_s: 10.0,
            dmax: 30.0,
            dcost: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct MpcConfig {
    pub solver: SolverKind,
    pub objective: ObjectiveKind,
    pub zones: [MpcZoneConfig; 2],
}

/// One horizon problem, frozen at the start of a cycle.
struct Problem {
    model: PlantParams,
    y0: ModelState,
    /// Measured minus modelled sensor temperature, K.
    bias: [f64; 2],
    grid: [f64; 15],
    command0: [f64; 2],
    measured: [f64; 2],
    setpoint: [f64; 2],
    cfg: MpcConfig,
    max_substep_s: f64,
}

impl Problem {
    /// Decision vector layout: zone 1 moves, then zone 2 moves.
    fn commands(&self, moves: &[f64]) -> Vec<[f64; 2]> {
        let mut q = self.command0;
        (0..INTERVALS)
            .map(|k| {
                for z in 0..2 {
                    q[z] = (q[z] + moves[z * INTERVALS + k]).clamp(COMMAND_MIN, COMMAND_MAX);
                }
                q
            })
            .collect()
    }

    /// Predicted sensor temperatures (°C) at each horizon point after the first.
    fn forecast(&self, path: &[[f64; 2]]) -> Vec<[f64; 2]> {
        model::simulate(&self.model, self.y0, &self.grid, path, self.max_substep_s)
            .iter()
            .map(|y| [0, 1].map(|z| to_celsius(y[2 + z]) + self.bias[z]))
            .collect()
    }

    fn cost(&self, moves: &[f64]) -> f64 {
        let path = self.commands(moves);

        let mut j = 0.0;
        for (k, tc) in self.forecast(&path).iter().enumerate() {
            let t = self.grid[k + 1];
            for z in 0..2 {
                let zc = &self.cfg.zones[z];
                let y0 = self.measured[z];
                let decay = (-t / zc.tau_s).exp();
                j += CV_WEIGHT
                    * match self.cfg.objective {
                        ObjectiveKind::Trajectory => {
                            let sp = self.setpoint[z];
                            let err = tc[z] - (sp + (y0 - sp) * decay);
                            err * err
                        }
                        ObjectiveKind::Deadband => {
                            let hi = self.setpoint[z] + zc.deadband_k;
                            let lo = self.setpoint[z] - zc.deadband_k;
                            let hi_t = hi + (y0 - hi) * decay;
                            let lo_t = lo + (y0 - lo) * decay;
                            (tc[z] - hi_t).max(0.0) + (lo_t - tc[z]).max(0.0)
                        }
                    };
            }
        }

        let mut prev = self.command0;
        for q in &path {
            for z in 0..2 {
                let dq = q[z] - prev[z];
                j += self.cfg.zones[z].dcost * dq * dq;
            }
            prev = *q;
        }
        j
    }
}

pub struct Mpc {
    cfg: MpcConfig,
    model: PlantParams,
    /// Model state advanced with every applied command. Heater temperatures
    /// are never measured; sensor values differ from the plant by the bias.
    estimate: Option<ModelState>,
    /// Last optimal move vector, reused shifted as the next starting point.
    plan: Vec<f64>,
    forecast: Vec<[f64; 2]>,
    optimizer: Option<Box<dyn Optimizer>>,
    failures: u64,
    solves: u64,
}

impl Mpc {
    pub fn new(cfg: MpcConfig) -> Self {
        Self {
            cfg,
            model: model::prediction_params(),
            estimate: None,
            plan: Vec::new(),
            forecast: Vec::new(),
            optimizer: None,
            failures: 0,
            solves: 0,
        }
    }

    /// Use `optimizer` for every solve instead of the configured solver kind.
    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn set_config(&mut self, cfg: MpcConfig) {
        self.cfg = cfg;
    }

    pub fn config(&self) -> &MpcConfig {
        &self.cfg
    }

    /// Solves that failed and held the previous command.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn solves(&self) -> u64 {
        self.solves
    }

    /// Sensor temperatures (°C) the last successful solve expects at each
    /// horizon point after now, bias included.
    pub fn forecast(&self) -> &[[f64; 2]] {
        &self.forecast
    }

    /// Model state to predict from; the first cycle starts the whole model
    /// at the measured temperatures.
    fn model_state(&self, input: &ControlInput) -> ModelState {
        self.estimate.unwrap_or_else(|| {
            let k = input.measured.map(to_kelvin);
            model::model_state(k, k)
        })
    }

    fn bias(y: &ModelState, input: &ControlInput) -> [f64; 2] {
        [0, 1].map(|z| input.measured[z] - to_celsius(y[2 + z]))
    }

    fn warm_start(&self) -> Vec<f64> {
        let mut x = vec![0.0; 2 * INTERVALS];
        if self.plan.len() == x.len() {
            for z in 0..2 {
                let zone = &self.plan[z * INTERVALS..(z + 1) * INTERVALS];
                x[z * INTERVALS..(z + 1) * INTERVALS - 1].copy_from_slice(&zone[1..]);
            }
        }
        x
    }

    /// Solve the horizon problem and return the first planned command.
    ///
    /// Does not advance the model state; [`Controller::compute`] does that
    /// with whichever command it ends up applying.
    pub fn solve(&mut self, input: &ControlInput) -> Result<[f64; 2], SolveError> {
        let y0 = self.model_state(input);
        let problem = Problem {
            model: self.model,
            y0,
            bias: Self::bias(&y0, input),
            grid: model::horizon(input.dt_s),
            command0: input.command.map(clamp_command),
            measured: input.measured,
            setpoint: input.setpoint,
            cfg: self.cfg,
            max_substep_s: (input.dt_s / 2.0).max(0.1),
        };

        let mut lower = Vec::with_capacity(2 * INTERVALS);
        let mut upper = Vec::with_capacity(2 * INTERVALS);
        for zone in &self.cfg.zones {
            lower.extend(std::iter::repeat(-zone.dmax).take(INTERVALS));
            upper.extend(std::iter::repeat(zone.dmax).take(INTERVALS));
        }

        let x0 = self.warm_start();
        let gradient = ProjectedGradient::default();
        let pattern = PatternSearch::default();
        let optimizer: &dyn Optimizer = match (&self.optimizer, self.cfg.solver) {
            (Some(o), _) => o.as_ref(),
            (None, SolverKind::ProjectedGradient) => &gradient,
            (None, SolverKind::PatternSearch) => &pattern,
        };

        self.solves += 1;
        let solution = optimizer.minimize(&|x: &[f64]| problem.cost(x), &x0, &lower, &upper)?;
        log::debug!(
            "mpc {} converged in {} iterations, cost {:.4}",
            optimizer.name(),
            solution.iterations,
            solution.cost
        );

        let path = problem.commands(&solution.x);
        self.forecast = problem.forecast(&path);
        self.plan = solution.x;
        Ok(path[0])
    }

    fn advance_estimate(&mut self, input: &ControlInput, command: [f64; 2]) {
        let y0 = self.model_state(input);
        let y = model::advance(&self.model, y0, command, input.dt_s, (input.dt_s / 2.0).max(0.1));
        self.estimate = y.iter().all(|v| v.is_finite()).then_some(y);
    }
}

impl Controller for Mpc {
    fn compute(&mut self, input: &ControlInput) -> [f64; 2] {
        let command = match self.solve(input) {
            Ok(u) => u,
            Err(e) => {
                self.failures += 1;
                log::warn!("mpc solve failed ({e}), holding previous command");
                input.command
            }
        };
        self.advance_estimate(input, command);
        command
    }

    fn reset(&mut self) {
        self.estimate = None;
        self.plan.clear();
        self.forecast.clear();
    }
}
