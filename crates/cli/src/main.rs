use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use controller::{ControlMode, MpcZoneConfig, ObjectiveKind, OnOffConfig, PidConfig, SolverKind};
use runner::{ConfigStore, GeneralSettings, LoopOptions, SimulationLoop};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Manual,
    OnOff,
    Pid,
    Mpc,
}

impl From<Mode> for ControlMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Manual => ControlMode::Manual,
            Mode::OnOff => ControlMode::OnOff,
            Mode::Pid => ControlMode::Pid,
            Mode::Mpc => ControlMode::Mpc,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Solver {
    Gradient,
    Pattern,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Objective {
    Deadband,
    Trajectory,
}

#[derive(Parser, Debug)]
#[command(
    name = "thermal-control-demo",
    version,
    about = "Two-heater thermal plant under manual, on-off, PID or MPC control"
)]
struct Args {
    #[arg(value_enum, long, default_value = "on-off")]
    mode: Mode,

    /// Number of control cycles to run
    #[arg(long, default_value_t = 150)]
    cycles: u64,

    /// Simulated seconds per cycle
    #[arg(long, default_value_t = 4.0)]
    step: f64,

    /// Setpoint for zone 1 (°C)
    #[arg(long, default_value_t = 30.0)]
    sp1: f64,

    /// Setpoint for zone 2 (°C)
    #[arg(long, default_value_t = 30.0)]
    sp2: f64,

    /// Manual heater 1 output (%)
    #[arg(long, default_value_t = 0.0)]
    q1: f64,

    /// Manual heater 2 output (%)
    #[arg(long, default_value_t = 0.0)]
    q2: f64,

    /// On-off hysteresis half width (K), both zones
    #[arg(long, default_value_t = 0.1)]
    deadband: f64,

    /// PID controller gain, both zones
    #[arg(long, default_value_t = 10.0)]
    kc: f64,

    /// PID reset time (s); 0 gives a very large integral gain
    #[arg(long, default_value_t = 50.0)]
    tau_i: f64,

    /// PID rate time (s)
    #[arg(long, default_value_t = 1.0)]
    tau_d: f64,

    #[arg(value_enum, long, default_value = "gradient")]
    solver: Solver,

    #[arg(value_enum, long, default_value = "deadband")]
    objective: Objective,

    /// MPC reference time constant (s), both zones
    #[arg(long, default_value_t = 10.0)]
    tau: f64,

    /// RNG seed for reproducible noise
    #[arg(long)]
    seed: Option<u64>,

    /// Disable process and measurement noise
    #[arg(long)]
    no_noise: bool,
}

fn configure(args: &Args) -> Result<ConfigStore> {
    let cfg = ConfigStore::new();
    cfg.apply_general(GeneralSettings {
        step_s: args.step,
        sleep_s: 0.0,
    })
    .context("invalid --step")?;

    for (zone, (sp, q)) in [(args.sp1, args.q1), (args.sp2, args.q2)].into_iter().enumerate() {
        cfg.set_setpoint(zone, sp).context("invalid setpoint")?;
        cfg.set_manual_command(zone, q).context("invalid manual output")?;
    }

    cfg.apply_on_off(OnOffConfig {
        deadband_k: [args.deadband; 2],
    })
    .context("invalid --deadband")?;

    cfg.apply_pid(
        [PidConfig {
            gain: args.kc,
            reset_s: args.tau_i,
            rate_s: args.tau_d,
            ..PidConfig::default()
        }; 2],
    )
    .context("invalid PID tuning")?;

    let mut mpc = cfg.mpc();
    mpc.solver = match args.solver {
        Solver::Gradient => SolverKind::ProjectedGradient,
        Solver::Pattern => SolverKind::PatternSearch,
    };
    mpc.objective = match args.objective {
        Objective::Deadband => ObjectiveKind::Deadband,
        Objective::Trajectory => ObjectiveKind::Trajectory,
    };
    mpc.zones = mpc.zones.map(|z| MpcZoneConfig {
        tau_s: args.tau,
        ..z
    });
    cfg.apply_mpc(mpc).context("invalid MPC tuning")?;

    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = configure(&args)?;

    let options = if args.no_noise {
        LoopOptions {
            seed: args.seed,
            ..LoopOptions::quiet()
        }
    } else {
        LoopOptions {
            seed: args.seed,
            ..LoopOptions::default()
        }
    };

    let mode = ControlMode::from(args.mode);
    let mut sim = SimulationLoop::new(mode, &cfg, &options);
    log::info!("running {} for {} cycles", mode.label(), args.cycles);

    // Output JSONL trace to stdout (one object per line)
    sim.prime(&cfg);
    if let Some(first) = sim.history().latest() {
        println!("{}", serde_json::to_string(first)?);
    }
    for _ in 0..args.cycles {
        let sample = sim.cycle(&cfg)?;
        println!("{}", serde_json::to_string(&sample)?);
    }

    if sim.solver_failures() > 0 {
        log::warn!("{} MPC solves failed and held the previous output", sim.solver_failures());
    }
    Ok(())
}
