use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use controller::PidConfig;
use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use runtime::{MonotonicClock, RunConfig, RunSnapshot, RunState, Session};
use sim::{NoisySensor, TankRig, VesselParams};
use tracing::{info, warn};

mod view;

const MAX_SAMPLES: usize = 30_000;
const VESSEL_SIZE: egui::Vec2 = egui::vec2(60.0, 28.0);
const WATER: egui::Color32 = egui::Color32::from_rgb(0, 119, 190);

#[derive(Clone, Copy, Debug)]
struct Sample {
    t: f64,
    sensor: f64,
    setpoint: f64,
    servo: f64,
}

struct App {
    session: Option<Session>,
    state: Arc<RunState>,
    pid: PidConfig,
    increment: f64,
    samples: Vec<Sample>,
    last_tick: u64,
    close_when_done: bool,
    outcome: Option<Result<String, String>>,
}

impl App {
    fn new(session: Session, cfg: &RunConfig) -> Self {
        Self {
            state: session.state().clone(),
            session: Some(session),
            pid: cfg.pid_config(),
            increment: cfg.control.setpoint_increment,
            samples: Vec::new(),
            last_tick: 0,
            close_when_done: false,
            outcome: None,
        }
    }

    fn handle_input(&mut self, ctx: &egui::Context) {
        let (left, right, enter, close) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::ArrowLeft),
                i.key_pressed(egui::Key::ArrowRight),
                i.key_pressed(egui::Key::Enter),
                i.viewport().close_requested(),
            )
        });

        if left {
            self.state.adjust_setpoint(self.increment);
        }
        if right {
            self.state.adjust_setpoint(-self.increment);
        }
        if enter || close {
            self.close_when_done = true;
            self.state.request_shutdown();
        }
        if close && self.session.is_some() {
            // close after the workers are joined and the log is flushed
            ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
        }
    }

    fn record(&mut self, snap: &RunSnapshot) {
        if snap.tick == self.last_tick {
            return;
        }
        self.last_tick = snap.tick;
        self.samples.push(Sample {
            t: snap.time_elapsed,
            sensor: snap.sensor_value,
            setpoint: snap.setpoint,
            servo: snap.servo_value,
        });
        if self.samples.len() > MAX_SAMPLES {
            let excess = self.samples.len() - MAX_SAMPLES;
            self.samples.drain(..excess);
        }
    }

    /// Join the workers once both have exited, whoever stopped the run.
    fn finish_if_stopped(&mut self, ctx: &egui::Context) {
        let exited = self.session.as_ref().is_some_and(Session::is_finished);
        let finished = if exited { self.session.take() } else { None };
        if let Some(session) = finished {
            self.outcome = Some(match session.finish() {
                Ok(report) => {
                    info!(ticks = report.control.ticks, rows = report.rows, "run finished");
                    Ok(format!(
                        "Run finished: {} ticks, {} overruns, {} rows logged",
                        report.control.ticks, report.control.overruns, report.rows
                    ))
                }
                Err(e) => {
                    warn!(error = %e, "run ended with an error");
                    Err(format!("Run ended: {e}"))
                }
            });
        }
        if self.close_when_done && self.session.is_none() {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
    }

    fn tank_view(&self, ui: &mut egui::Ui, snap: &RunSnapshot) {
        let size = egui::vec2(ui.available_width(), 140.0);
        let (rect, _) = ui.allocate_exact_size(size, egui::Sense::hover());
        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, 4.0, WATER);

        let track = rect.shrink2(egui::vec2(VESSEL_SIZE.x / 2.0 + 4.0, 0.0));
        let travel = self.state.travel();
        let x_of = |v: f64| track.left() + view::tank_fraction(v, travel) as f32 * track.width();

        let vessel = egui::Rect::from_center_size(
            egui::pos2(x_of(snap.sensor_value), rect.center().y - 16.0),
            VESSEL_SIZE,
        );
        painter.rect_filled(vessel, 6.0, egui::Color32::from_rgb(230, 60, 60));

        let setline = if view::on_target(snap.setpoint, snap.sensor_value) {
            egui::Color32::GREEN
        } else {
            egui::Color32::RED
        };
        let sx = x_of(snap.setpoint);
        painter.line_segment(
            [
                egui::pos2(sx, rect.center().y + 10.0),
                egui::pos2(sx, rect.bottom() - 8.0),
            ],
            egui::Stroke::new(4.0, setline),
        );
    }
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_input(ctx);

        let snap = self.state.snapshot();
        self.record(&snap);
        self.finish_if_stopped(ctx);

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Tank positioning");
                ui.separator();
                let (label, color) = if snap.running {
                    ("RUNNING", egui::Color32::GREEN)
                } else {
                    ("STOPPED", egui::Color32::GRAY)
                };
                ui.colored_label(color, label);
                ui.separator();
                ui.label(format!("t = {:.1}s", snap.time_elapsed));
            });
        });

        egui::SidePanel::left("left")
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(format!("start point: {:.0}", snap.start_point));
                ui.label(format!("setpoint: {:.0}", snap.setpoint));
                ui.label(format!("sensor: {:.1}", snap.sensor_value));
                ui.label(format!("servo: {:.3}", snap.servo_value));

                ui.separator();
                ui.label(format!("P = {:+.3}", snap.pid.p_term));
                ui.label(format!("I = {:.3}", snap.pid.i_term));
                ui.label(format!("D = {:+.3}", snap.pid.d_term));

                ui.separator();
                let thrust = view::thrust_fraction(snap.servo_value, &self.pid);
                ui.add(
                    egui::ProgressBar::new(thrust as f32)
                        .text(format!("thrust {:.0}%", thrust * 100.0)),
                );

                ui.separator();
                ui.small("Left/Right: move setpoint");
                ui.small("Enter: stop and close");

                if let Some(outcome) = &self.outcome {
                    ui.separator();
                    match outcome {
                        Ok(msg) => ui.label(msg),
                        Err(msg) => ui.colored_label(egui::Color32::RED, msg),
                    };
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.tank_view(ui, &snap);

            ui.heading("Traces");
            let sensor: PlotPoints = self.samples.iter().map(|s| [s.t, s.sensor]).collect();
            let setpoint: PlotPoints = self.samples.iter().map(|s| [s.t, s.setpoint]).collect();
            let servo: PlotPoints = self.samples.iter().map(|s| [s.t, s.servo]).collect();

            Plot::new("position_plot")
                .height(240.0)
                .legend(Legend::default())
                .show(ui, |plot_ui| {
                    plot_ui.line(Line::new(sensor).name("Sensor"));
                    plot_ui.line(Line::new(setpoint).name("Setpoint"));
                });

            Plot::new("servo_plot")
                .height(160.0)
                .legend(Legend::default())
                .show(ui, |plot_ui| {
                    plot_ui.line(Line::new(servo).name("Servo command"));
                });
        });

        if self.session.is_some() {
            ctx.request_repaint_after(Duration::from_millis(30));
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let cfg = match std::env::args_os().nth(1) {
        Some(path) => RunConfig::load(&path)
            .with_context(|| format!("loading {}", path.to_string_lossy()))?,
        None => RunConfig::default(),
    };

    let clock = Arc::new(MonotonicClock);
    let (sensor, actuator) = TankRig::new(
        VesselParams::default(),
        cfg.sim.start_position,
        NoisySensor::new(cfg.sim.noise_std, cfg.sim.seed),
        clock.clone(),
    );
    let session = Session::start(&cfg, Box::new(sensor), Box::new(actuator), clock, |_| {})
        .context("starting run")?;
    let app = App::new(session, &cfg);

    let native_options = eframe::NativeOptions::default();
    eframe::run_native(
        "Tank positioning",
        native_options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow::anyhow!("window failed: {e}"))
}
