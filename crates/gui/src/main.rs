use std::time::Duration;

use controller::{ControlMode, MpcConfig, ObjectiveKind, OnOffConfig, PidConfig, SolverKind};
use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use runner::{bounds, GeneralSettings, LoopOptions, RunController, RunState, Series, Telemetry};

const GUI_SLEEP_S: f64 = 0.25;

/// Edits in the configuration sections only reach the running loop on Apply.
struct Drafts {
    general: GeneralSettings,
    on_off: OnOffConfig,
    pid: [PidConfig; 2],
    mpc: MpcConfig,
}

struct App {
    rc: RunController,
    drafts: Drafts,
    setpoint_c: [f64; 2],
    manual: [f64; 2],
    last_error: Option<String>,
}

impl Default for App {
    fn default() -> Self {
        let rc = RunController::new(LoopOptions::default());
        let cfg = rc.config();
        // The GUI starts with a quicker pace than the library default.
        let last_error = cfg.set_sleep_s(GUI_SLEEP_S).err().map(|e| {
            log::warn!("{e}");
            e.to_string()
        });
        let drafts = Drafts {
            general: cfg.general(),
            on_off: cfg.on_off(),
            pid: cfg.pid(),
            mpc: cfg.mpc(),
        };
        let (setpoint_c, manual) = (cfg.setpoints(), cfg.manual_command());
        Self {
            rc,
            drafts,
            setpoint_c,
            manual,
            last_error,
        }
    }
}

fn slider(ui: &mut egui::Ui, value: &mut f64, (min, max): (f64, f64), text: &str) -> bool {
    ui.add(egui::Slider::new(value, min..=max).text(text)).changed()
}

fn apply_reset(ui: &mut egui::Ui) -> (bool, bool) {
    ui.horizontal(|ui| (ui.button("Apply").clicked(), ui.button("Reset").clicked()))
        .inner
}

impl App {
    fn report<E: std::fmt::Display>(&mut self, r: Result<(), E>) {
        if let Err(e) = r {
            log::warn!("{e}");
            self.last_error = Some(e.to_string());
        }
    }

    fn switch_mode(&mut self, mode: ControlMode) {
        let r = self.rc.set_mode(mode);
        self.report(r);
        let cfg = self.rc.config();
        self.setpoint_c = cfg.setpoints();
        self.manual = cfg.manual_command();
    }

    fn run_controls(&mut self, ui: &mut egui::Ui) {
        let running = matches!(self.rc.state(), RunState::Running(_));
        ui.horizontal(|ui| {
            if ui.add_enabled(!running, egui::Button::new("Start")).clicked() {
                let r = self.rc.start().map(|_| ());
                self.report(r);
            }
            if ui.add_enabled(running, egui::Button::new("Stop")).clicked() {
                let r = self.rc.stop();
                self.report(r);
            }
        });

        // Mode changes only while stopped.
        let mut mode = self.rc.mode();
        ui.add_enabled_ui(!running, |ui| {
            egui::ComboBox::from_id_salt("mode")
                .selected_text(mode.label())
                .show_ui(ui, |ui| {
                    for m in ControlMode::ALL {
                        ui.selectable_value(&mut mode, m, m.label());
                    }
                });
        });
        if mode != self.rc.mode() {
            self.switch_mode(mode);
        }
    }

    fn direct_controls(&mut self, ui: &mut egui::Ui) {
        ui.label("Setpoints");
        for z in 0..2 {
            let text = format!("SP{} (°C)", z + 1);
            if slider(ui, &mut self.setpoint_c[z], bounds::SETPOINT_C, &text) {
                let r = self.rc.config().set_setpoint(z, self.setpoint_c[z]);
                self.report(r);
            }
        }

        let manual = self.rc.mode() == ControlMode::Manual;
        ui.add_enabled_ui(manual, |ui| {
            ui.label("Manual outputs");
            for z in 0..2 {
                let text = format!("Q{} (%)", z + 1);
                if slider(ui, &mut self.manual[z], bounds::COMMAND, &text) {
                    let r = self.rc.config().set_manual_command(z, self.manual[z]);
                    self.report(r);
                }
            }
        });
    }

    fn config_sections(&mut self, ui: &mut egui::Ui) {
        egui::CollapsingHeader::new("General").show(ui, |ui| {
            let g = &mut self.drafts.general;
            slider(ui, &mut g.step_s, bounds::STEP_S, "step (s)");
            slider(ui, &mut g.sleep_s, bounds::SLEEP_S, "sleep (s)");
            let (apply, reset) = apply_reset(ui);
            if apply {
                let r = self.rc.config().apply_general(self.drafts.general);
                self.report(r);
            }
            if reset {
                self.rc.config().reset_general();
                self.drafts.general = self.rc.config().general();
            }
        });

        egui::CollapsingHeader::new("On-Off").show(ui, |ui| {
            for z in 0..2 {
                let text = format!("deadband {} (K)", z + 1);
                slider(ui, &mut self.drafts.on_off.deadband_k[z], bounds::ON_OFF_DEADBAND_K, &text);
            }
            let (apply, reset) = apply_reset(ui);
            if apply {
                let r = self.rc.config().apply_on_off(self.drafts.on_off);
                self.report(r);
            }
            if reset {
                self.rc.config().reset_on_off();
                self.drafts.on_off = self.rc.config().on_off();
            }
        });

        egui::CollapsingHeader::new("PID").show(ui, |ui| {
            for (z, p) in self.drafts.pid.iter_mut().enumerate() {
                ui.label(format!("Loop {}", z + 1));
                slider(ui, &mut p.gain, bounds::PID_GAIN, "Kc");
                slider(ui, &mut p.reset_s, bounds::PID_RESET_S, "τI (s)");
                slider(ui, &mut p.rate_s, bounds::PID_RATE_S, "τD (s)");
            }
            let (apply, reset) = apply_reset(ui);
            if apply {
                let r = self.rc.config().apply_pid(self.drafts.pid);
                self.report(r);
            }
            if reset {
                self.rc.config().reset_pid();
                self.drafts.pid = self.rc.config().pid();
            }
        });

        egui::CollapsingHeader::new("MPC").show(ui, |ui| {
            let m = &mut self.drafts.mpc;
            egui::ComboBox::from_id_salt("solver")
                .selected_text(m.solver.label())
                .show_ui(ui, |ui| {
                    for s in SolverKind::ALL {
                        ui.selectable_value(&mut m.solver, s, s.label());
                    }
                });
            egui::ComboBox::from_id_salt("objective")
                .selected_text(m.objective.label())
                .show_ui(ui, |ui| {
                    for o in ObjectiveKind::ALL {
                        ui.selectable_value(&mut m.objective, o, o.label());
                    }
                });
            for (z, zone) in m.zones.iter_mut().enumerate() {
                ui.label(format!("Zone {}", z + 1));
                slider(ui, &mut zone.deadband_k, bounds::MPC_DEADBAND_K, "CV deadband (K)");
                slider(ui, &mut zone.tau_s, bounds::MPC_TAU_S, "τ (s)");
                slider(ui, &mut zone.dmax, bounds::MPC_DMAX, "DMAX (%)");
                slider(ui, &mut zone.dcost, bounds::MPC_DCOST, "DCOST");
            }
            let (apply, reset) = apply_reset(ui);
            if apply {
                let r = self.rc.config().apply_mpc(self.drafts.mpc);
                self.report(r);
            }
            if reset {
                self.rc.config().reset_mpc();
                self.drafts.mpc = self.rc.config().mpc();
            }
        });
    }
}

fn minutes(series: &Series, y: &[f64]) -> PlotPoints {
    series
        .t_s
        .iter()
        .zip(y)
        .map(|(t, v)| [t / 60.0, *v])
        .collect()
}

fn plots(ui: &mut egui::Ui, t: &Telemetry) {
    let s = &t.series;
    let height = (ui.available_height() / 3.0 - 8.0).max(120.0);

    for z in 0..2 {
        Plot::new(format!("zone_{z}"))
            .height(height)
            .legend(Legend::default())
            .show(ui, |plot_ui| {
                plot_ui.line(Line::new(minutes(s, &s.temp_c[z])).name(format!("T{} (°C)", z + 1)));
                plot_ui.line(
                    Line::new(minutes(s, &s.setpoint_c[z])).name(format!("SP{} (°C)", z + 1)),
                );
            });
    }

    Plot::new("outputs")
        .height(height)
        .legend(Legend::default())
        .x_axis_label("time (min)")
        .show(ui, |plot_ui| {
            plot_ui.line(Line::new(minutes(s, &s.command[0])).name("Q1 (%)"));
            plot_ui.line(Line::new(minutes(s, &s.command[1])).name("Q2 (%)"));
        });
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(fault) = self.rc.take_fault() {
            self.last_error = Some(fault.to_string());
        }
        let telemetry = self.rc.snapshot();
        let state = self.rc.state();

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Thermal Control Demo");
                ui.separator();
                let (label, color) = match state {
                    RunState::Running(m) => {
                        (format!("RUNNING: {}", m.label()), egui::Color32::GREEN)
                    }
                    RunState::Idle => {
                        (format!("IDLE: {}", self.rc.mode().label()), egui::Color32::GRAY)
                    }
                };
                ui.colored_label(color, label);
                if let Some(s) = telemetry.latest {
                    ui.separator();
                    ui.label(format!(
                        "t={:.0}s  T1={:.2}°C  T2={:.2}°C  Q1={:.1}%  Q2={:.1}%",
                        s.t_s, s.t1_c, s.t2_c, s.q1, s.q2
                    ));
                }
                if telemetry.solver_failures > 0 {
                    ui.separator();
                    ui.colored_label(
                        egui::Color32::YELLOW,
                        format!("solver failures: {}", telemetry.solver_failures),
                    );
                }
            });
        });

        egui::SidePanel::left("left")
            .resizable(false)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.run_controls(ui);
                    ui.separator();
                    self.direct_controls(ui);
                    ui.separator();
                    self.config_sections(ui);

                    if let Some(err) = &self.last_error {
                        ui.separator();
                        ui.colored_label(egui::Color32::RED, err);
                    }
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            if telemetry.series.t_s.is_empty() {
                ui.label("No data yet. Press Start.");
                return;
            }
            plots(ui, &telemetry);
        });

        if self.rc.is_running() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }
}

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let native_options = eframe::NativeOptions::default();
    eframe::run_native(
        "Thermal Control Demo",
        native_options,
        Box::new(|_cc| Ok(Box::new(App::default()))),
    )
}
