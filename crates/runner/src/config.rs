//! Shared tunables, written by the front end and read by the simulation
//! worker.
//!
//! Every field is its own atomic cell. A write is visible to the next read of
//! that field; there is no multi-field snapshot, so a cycle may see half of a
//! parameter group that is being applied concurrently. Group setters validate
//! every field before storing any of them.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use controller::{
    MpcConfig, MpcZoneConfig, ObjectiveKind, OnOffConfig, PidConfig, SolverKind,
};
use thiserror::Error;

/// Inclusive bounds, matching the front end's sliders.
pub mod bounds {
    pub const STEP_S: (f64, f64) = (1.0, 10.0);
    pub const SLEEP_S: (f64, f64) = (0.0, 1.5);
    pub const SETPOINT_C: (f64, f64) = (20.0, 60.0);
    pub const COMMAND: (f64, f64) = (0.0, 100.0);
    pub const ON_OFF_DEADBAND_K: (f64, f64) = (0.0, 2.0);
    pub const PID_GAIN: (f64, f64) = (0.0, 20.0);
    pub const PID_RESET_S: (f64, f64) = (0.0, 200.0);
    pub const PID_RATE_S: (f64, f64) = (0.0, 10.0);
    pub const MPC_DEADBAND_K: (f64, f64) = (0.1, 1.0);
    pub const MPC_TAU_S: (f64, f64) = (1.0, 100.0);
    pub const MPC_DMAX: (f64, f64) = (1.0, 100.0);
    pub const MPC_DCOST: (f64, f64) = (0.0, 10.0);
}

pub const DEFAULT_SETPOINT_C: f64 = 30.0;
pub const DEFAULT_COMMAND: f64 = 0.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    #[error("{name} must be a finite number")]
    NotFinite { name: &'static str },
    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("zone {0} does not exist (expected 0 or 1)")]
    NoSuchZone(usize),
}

fn check(name: &'static str, value: f64, (min, max): (f64, f64)) -> Result<f64, ParamError> {
    if !value.is_finite() {
        return Err(ParamError::NotFinite { name });
    }
    if value < min || value > max {
        return Err(ParamError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

fn check_zone(zone: usize) -> Result<(), ParamError> {
    if zone < 2 {
        Ok(())
    } else {
        Err(ParamError::NoSuchZone(zone))
    }
}

struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

fn pair(v: f64) -> [AtomicF64; 2] {
    [AtomicF64::new(v), AtomicF64::new(v)]
}

fn load_pair(cells: &[AtomicF64; 2]) -> [f64; 2] {
    [cells[0].load(), cells[1].load()]
}

fn solver_to_u8(s: SolverKind) -> u8 {
    match s {
        SolverKind::ProjectedGradient => 0,
        SolverKind::PatternSearch => 1,
    }
}

fn solver_from_u8(v: u8) -> SolverKind {
    match v {
        1 => SolverKind::PatternSearch,
        _ => SolverKind::ProjectedGradient,
    }
}

fn objective_to_u8(o: ObjectiveKind) -> u8 {
    match o {
        ObjectiveKind::Deadband => 0,
        ObjectiveKind::Trajectory => 1,
    }
}

fn objective_from_u8(v: u8) -> ObjectiveKind {
    match v {
        1 => ObjectiveKind::Trajectory,
        _ => ObjectiveKind::Deadband,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeneralSettings {
    /// Simulated time per cycle, s.
    pub step_s: f64,
    /// Wall-clock pause between cycles, s.
    pub sleep_s: f64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            step_s: 4.0,
            sleep_s: 0.5,
        }
    }
}

pub struct ConfigStore {
    step_s: AtomicF64,
    sleep_s: AtomicF64,

    setpoint_c: [AtomicF64; 2],
    manual_command: [AtomicF64; 2],

    on_off_deadband_k: [AtomicF64; 2],

    pid_gain: [AtomicF64; 2],
    pid_reset_s: [AtomicF64; 2],
    pid_rate_s: [AtomicF64; 2],

    mpc_solver: AtomicU8,
    mpc_objective: AtomicU8,
    mpc_deadband_k: [AtomicF64; 2],
    mpc_tau_s: [AtomicF64; 2],
    mpc_dmax: [AtomicF64; 2],
    mpc_dcost: [AtomicF64; 2],
}

impl Default for ConfigStore {
    fn default() -> Self {
        let general = GeneralSettings::default();
        let on_off = OnOffConfig::default();
        let pid = PidConfig::default();
        let mpc = MpcConfig::default();
        let zone = MpcZoneConfig::default();
        Self {
            step_s: AtomicF64::new(general.step_s),
            sleep_s: AtomicF64::new(general.sleep_s),
            setpoint_c: pair(DEFAULT_SETPOINT_C),
            manual_command: pair(DEFAULT_COMMAND),
            on_off_deadband_k: pair(on_off.deadband_k[0]),
            pid_gain: pair(pid.gain),
            pid_reset_s: pair(pid.reset_s),
            pid_rate_s: pair(pid.rate_s),
            mpc_solver: AtomicU8::new(solver_to_u8(mpc.solver)),
            mpc_objective: AtomicU8::new(objective_to_u8(mpc.objective)),
            mpc_deadband_k: pair(zone.deadband_k),
            mpc_tau_s: pair(zone.tau_s),
            mpc_dmax: pair(zone.dmax),
            mpc_dcost: pair(zone.dcost),
        }
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    // General

    pub fn step_s(&self) -> f64 {
        self.step_s.load()
    }

    pub fn sleep_s(&self) -> f64 {
        self.sleep_s.load()
    }

    pub fn general(&self) -> GeneralSettings {
        GeneralSettings {
            step_s: self.step_s(),
            sleep_s: self.sleep_s(),
        }
    }

    pub fn apply_general(&self, g: GeneralSettings) -> Result<(), ParamError> {
        let step = check("step", g.step_s, bounds::STEP_S)?;
        let sleep = check("sleep", g.sleep_s, bounds::SLEEP_S)?;
        self.store_general(GeneralSettings {
            step_s: step,
            sleep_s: sleep,
        });
        Ok(())
    }

    pub fn reset_general(&self) {
        self.store_general(GeneralSettings::default());
    }

    /// Change only the pause between cycles.
    pub fn set_sleep_s(&self, value: f64) -> Result<(), ParamError> {
        let v = check("sleep", value, bounds::SLEEP_S)?;
        self.sleep_s.store(v);
        Ok(())
    }

    fn store_general(&self, g: GeneralSettings) {
        self.step_s.store(g.step_s);
        self.sleep_s.store(g.sleep_s);
    }

    // Setpoints and manual commands

    pub fn setpoints(&self) -> [f64; 2] {
        load_pair(&self.setpoint_c)
    }

    pub fn set_setpoint(&self, zone: usize, value_c: f64) -> Result<(), ParamError> {
        check_zone(zone)?;
        let v = check("setpoint", value_c, bounds::SETPOINT_C)?;
        self.setpoint_c[zone].store(v);
        Ok(())
    }

    pub fn manual_command(&self) -> [f64; 2] {
        load_pair(&self.manual_command)
    }

    pub fn set_manual_command(&self, zone: usize, value: f64) -> Result<(), ParamError> {
        check_zone(zone)?;
        let v = check("manual command", value, bounds::COMMAND)?;
        self.manual_command[zone].store(v);
        Ok(())
    }

    /// Setpoints and manual commands back to their defaults.
    pub fn reset_direct(&self) {
        for i in 0..2 {
            self.setpoint_c[i].store(DEFAULT_SETPOINT_C);
            self.manual_command[i].store(DEFAULT_COMMAND);
        }
    }

    // On-Off

    pub fn on_off(&self) -> OnOffConfig {
        OnOffConfig {
            deadband_k: load_pair(&self.on_off_deadband_k),
        }
    }

    pub fn apply_on_off(&self, cfg: OnOffConfig) -> Result<(), ParamError> {
        let d0 = check("on-off deadband", cfg.deadband_k[0], bounds::ON_OFF_DEADBAND_K)?;
        let d1 = check("on-off deadband", cfg.deadband_k[1], bounds::ON_OFF_DEADBAND_K)?;
        self.store_on_off(OnOffConfig {
            deadband_k: [d0, d1],
        });
        Ok(())
    }

    pub fn reset_on_off(&self) {
        self.store_on_off(OnOffConfig::default());
    }

    fn store_on_off(&self, cfg: OnOffConfig) {
        for (cell, v) in self.on_off_deadband_k.iter().zip(cfg.deadband_k) {
            cell.store(v);
        }
    }

    // PID

    /// Only gain, reset time and rate time are stored; bias and output
    /// limits come from [`PidConfig::default`].
    pub fn pid(&self) -> [PidConfig; 2] {
        [0, 1].map(|i| PidConfig {
            gain: self.pid_gain[i].load(),
            reset_s: self.pid_reset_s[i].load(),
            rate_s: self.pid_rate_s[i].load(),
            ..PidConfig::default()
        })
    }

    pub fn apply_pid(&self, cfg: [PidConfig; 2]) -> Result<(), ParamError> {
        let mut checked = [PidConfig::default(); 2];
        for (slot, c) in checked.iter_mut().zip(&cfg) {
            *slot = PidConfig {
                gain: check("pid gain", c.gain, bounds::PID_GAIN)?,
                reset_s: check("pid reset time", c.reset_s, bounds::PID_RESET_S)?,
                rate_s: check("pid rate time", c.rate_s, bounds::PID_RATE_S)?,
                ..PidConfig::default()
            };
        }
        self.store_pid(checked);
        Ok(())
    }

    pub fn reset_pid(&self) {
        self.store_pid([PidConfig::default(); 2]);
    }

    fn store_pid(&self, cfg: [PidConfig; 2]) {
        for (i, c) in cfg.iter().enumerate() {
            self.pid_gain[i].store(c.gain);
            self.pid_reset_s[i].store(c.reset_s);
            self.pid_rate_s[i].store(c.rate_s);
        }
    }

    // MPC

    pub fn mpc(&self) -> MpcConfig {
        MpcConfig {
            solver: solver_from_u8(self.mpc_solver.load(Ordering::Relaxed)),
            objective: objective_from_u8(self.mpc_objective.load(Ordering::Relaxed)),
            zones: [0, 1].map(|i| MpcZoneConfig {
                deadband_k: self.mpc_deadband_k[i].load(),
                tau_s: self.mpc_tau_s[i].load(),
                dmax: self.mpc_dmax[i].load(),
                dcost: self.mpc_dcost[i].load(),
            }),
        }
    }

    pub fn apply_mpc(&self, cfg: MpcConfig) -> Result<(), ParamError> {
        let mut checked = [MpcZoneConfig::default(); 2];
        for (slot, z) in checked.iter_mut().zip(&cfg.zones) {
            *slot = MpcZoneConfig {
                deadband_k: check("mpc deadband", z.deadband_k, bounds::MPC_DEADBAND_K)?,
                tau_s: check("mpc tau", z.tau_s, bounds::MPC_TAU_S)?,
                dmax: check("mpc dmax", z.dmax, bounds::MPC_DMAX)?,
                dcost: check("mpc dcost", z.dcost, bounds::MPC_DCOST)?,
            };
        }
        self.store_mpc(MpcConfig {
            zones: checked,
            ..cfg
        });
        Ok(())
    }

    pub fn reset_mpc(&self) {
        self.store_mpc(MpcConfig::default());
    }

    fn store_mpc(&self, cfg: MpcConfig) {
        self.mpc_solver.store(solver_to_u8(cfg.solver), Ordering::Relaxed);
        self.mpc_objective
            .store(objective_to_u8(cfg.objective), Ordering::Relaxed);
        for (i, z) in cfg.zones.iter().enumerate() {
            self.mpc_deadband_k[i].store(z.deadband_k);
            self.mpc_tau_s[i].store(z.tau_s);
            self.mpc_dmax[i].store(z.dmax);
            self.mpc_dcost[i].store(z.dcost);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ConfigStore::new();
        assert_eq!(c.general(), GeneralSettings::default());
        assert_eq!(c.setpoints(), [30.0, 30.0]);
        assert_eq!(c.manual_command(), [0.0, 0.0]);
        assert_eq!(c.on_off().deadband_k, [0.1, 0.1]);
        let pid = c.pid();
        assert_eq!((pid[1].gain, pid[1].reset_s, pid[1].rate_s), (10.0, 50.0, 1.0));
        assert_eq!(c.mpc(), MpcConfig::default());
    }

    #[test]
    fn out_of_range_is_rejected_and_nothing_changes() {
        let c = ConfigStore::new();
        let mut bad = [PidConfig::default(); 2];
        bad[0].gain = 12.0;
        bad[1].gain = -1.0;
        assert!(matches!(
            c.apply_pid(bad),
            Err(ParamError::OutOfRange { name: "pid gain", .. })
        ));
        assert_eq!(c.pid()[0].gain, 10.0);

        assert!(c.set_setpoint(0, 75.0).is_err());
        assert!(c.set_manual_command(1, f64::NAN).is_err());
        assert_eq!(c.set_setpoint(2, 30.0), Err(ParamError::NoSuchZone(2)));
        assert!(c.apply_general(GeneralSettings { step_s: 0.0, sleep_s: 0.5 }).is_err());
        assert_eq!(c.step_s(), 4.0);
    }

    #[test]
    fn apply_and_reset_round_trip() {
        let c = ConfigStore::new();
        let pid = [PidConfig {
            gain: 2.0,
            reset_s: 0.0,
            rate_s: 0.5,
            ..PidConfig::default()
        }; 2];
        c.apply_pid(pid).unwrap();
        assert_eq!(c.pid()[1].reset_s, 0.0);
        c.reset_pid();
        c.reset_pid();
        assert_eq!(c.pid(), [PidConfig::default(); 2]);

        let mpc = MpcConfig {
            solver: SolverKind::PatternSearch,
            objective: ObjectiveKind::Trajectory,
            zones: [MpcZoneConfig {
                deadband_k: 0.5,
                tau_s: 30.0,
                dmax: 10.0,
                dcost: 0.0,
            }; 2],
        };
        c.apply_mpc(mpc).unwrap();
        assert_eq!(c.mpc(), mpc);
        c.reset_mpc();
        assert_eq!(c.mpc(), MpcConfig::default());

        c.set_setpoint(1, 45.0).unwrap();
        c.set_manual_command(0, 60.0).unwrap();
        c.reset_direct();
        assert_eq!(c.setpoints(), [30.0, 30.0]);
        assert_eq!(c.manual_command(), [0.0, 0.0]);
    }

    #[test]
    fn resets_restore_defaults_after_any_apply() {
        let c = ConfigStore::new();
        c.apply_general(GeneralSettings {
            step_s: 9.0,
            sleep_s: 1.5,
        })
        .unwrap();
        c.apply_on_off(OnOffConfig {
            deadband_k: [2.0, 0.0],
        })
        .unwrap();
        c.apply_pid([PidConfig {
            gain: 20.0,
            reset_s: 200.0,
            rate_s: 10.0,
            ..PidConfig::default()
        }; 2])
        .unwrap();
        let mut mpc = MpcConfig {
            objective: ObjectiveKind::Trajectory,
            ..MpcConfig::default()
        };
        mpc.zones[1].dmax = 100.0;
        c.apply_mpc(mpc).unwrap();

        c.reset_general();
        c.reset_on_off();
        c.reset_pid();
        c.reset_mpc();
        assert_eq!(c.general(), GeneralSettings::default());
        assert_eq!(c.on_off(), OnOffConfig::default());
        assert_eq!(c.pid(), [PidConfig::default(); 2]);
        assert_eq!(c.mpc(), MpcConfig::default());
    }

    #[test]
    fn sleep_can_change_alone() {
        let c = ConfigStore::new();
        c.set_sleep_s(0.25).unwrap();
        let expected = GeneralSettings {
            sleep_s: 0.25,
            ..GeneralSettings::default()
        };
        assert_eq!(c.general(), expected);
        assert!(c.set_sleep_s(2.0).is_err());
        assert_eq!(c.sleep_s(), 0.25);
    }

    #[test]
    fn mpc_deadband_has_a_floor() {
        let c = ConfigStore::new();
        let mut cfg = MpcConfig::default();
        cfg.zones[0].deadband_k = 0.0;
        assert!(c.apply_mpc(cfg).is_err());
    }
}
