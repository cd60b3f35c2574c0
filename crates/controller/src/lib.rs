//! Control strategies for the two-zone thermal plant.
//!
//! Every strategy maps the latest measurements and setpoints to a pair of
//! heater commands in percent through the [`Controller`] trait.

mod manual;
pub mod mpc;
mod on_off;
mod pid;

pub use manual::Manual;
pub use mpc::{
    Mpc, MpcConfig, MpcZoneConfig, ObjectiveKind, Optimizer, PatternSearch, ProjectedGradient,
    Solution, SolveError, SolverKind,
};
pub use on_off::{OnOff, OnOffConfig};
pub use pid::{Pid, PidConfig, PidPair, PidTerms};

pub const COMMAND_MIN: f64 = 0.0;
pub const COMMAND_MAX: f64 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ControlMode {
    #[default]
    Manual,
    OnOff,
    Pid,
    Mpc,
}

impl ControlMode {
    pub const ALL: [ControlMode; 4] = [
        ControlMode::Manual,
        ControlMode::OnOff,
        ControlMode::Pid,
        ControlMode::Mpc,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ControlMode::Manual => "Manual",
            ControlMode::OnOff => "On-Off",
            ControlMode::Pid => "PID",
            ControlMode::Mpc => "MPC",
        }
    }
}

/// What a controller sees each cycle. Temperatures are °C.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlInput {
    pub setpoint: [f64; 2],
    pub measured: [f64; 2],
    /// Measurement from the cycle before `measured`.
    pub previous: [f64; 2],
    pub dt_s: f64,
    /// Command applied over the last step.
    pub command: [f64; 2],
}

pub trait Controller: Send {
    fn compute(&mut self, input: &ControlInput) -> [f64; 2];

    /// Drop accumulated internal state.
    fn reset(&mut self) {}
}

pub fn clamp_command(u: f64) -> f64 {
    if u.is_nan() {
        return COMMAND_MIN;
    }
    u.clamp(COMMAND_MIN, COMMAND_MAX)
}
