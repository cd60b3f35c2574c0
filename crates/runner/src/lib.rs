//! Simulation loop, shared configuration and run orchestration for the
//! thermal control demo.

mod config;
mod error;
mod history;
mod run;
mod sim_loop;

pub use config::{
    bounds, ConfigStore, GeneralSettings, ParamError, DEFAULT_COMMAND, DEFAULT_SETPOINT_C,
};
pub use error::RunError;
pub use history::{window_len, History, Sample, Series, WINDOW_S};
pub use run::{RunController, RunState};
pub use sim_loop::{LoopOptions, SimulationLoop, Telemetry};
