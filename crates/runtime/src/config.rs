//! Run configuration loaded from an optional TOML file.
//!
//! Every section and field has a default, so an empty file (or no file at all)
//! gives the stock rig settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use controller::PidConfig;
use filter::FilterConfig;
use serde::Deserialize;

use crate::control_loop::LoopConfig;
use crate::error::ConfigError;
use crate::state::DEFAULT_TANK_WIDTH;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PidSection {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub out_min: f64,
    pub out_max: f64,
}

impl Default for PidSection {
    fn default() -> Self {
        let d = PidConfig::default();
        Self {
            kp: d.kp,
            ki: d.ki,
            kd: d.kd,
            out_min: d.out_min,
            out_max: d.out_max,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FilterSection {
    pub resolution: f64,
    pub snap_multiplier: f64,
}

impl Default for FilterSection {
    fn default() -> Self {
        let d = FilterConfig::default();
        Self {
            resolution: d.resolution,
            snap_multiplier: d.snap_multiplier,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoopSection {
    pub period_ms: u64,
    pub log_period_ms: u64,
    /// Falls back to `pid.out_max` when unset.
    pub neutral_command: Option<f64>,
    pub setpoint_offset: f64,
    pub tank_width: f64,
    pub setpoint_increment: f64,
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            period_ms: 20,
            log_period_ms: 100,
            neutral_command: None,
            setpoint_offset: -60.0,
            tank_width: DEFAULT_TANK_WIDTH,
            setpoint_increment: 3.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub log_path: PathBuf,
    pub plot: bool,
    pub plot_program: String,
    pub plot_image: Option<PathBuf>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("tank-run.tsv"),
            plot: true,
            plot_program: "gnuplot".to_string(),
            plot_image: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SimSection {
    pub noise_std: f64,
    pub seed: u64,
    pub start_position: f64,
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            noise_std: 1.5,
            seed: 7,
            start_position: 480.0,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub pid: PidSection,
    pub filter: FilterSection,
    #[serde(rename = "loop")]
    pub control: LoopSection,
    pub output: OutputSection,
    pub sim: SimSection,
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.pid.out_min > self.pid.out_max {
            return invalid(format!(
                "pid.out_min ({}) exceeds pid.out_max ({})",
                self.pid.out_min, self.pid.out_max
            ));
        }
        if self.control.period_ms == 0 {
            return invalid("loop.period_ms must be positive".into());
        }
        if self.control.log_period_ms == 0 {
            return invalid("loop.log_period_ms must be positive".into());
        }
        if self.filter.resolution < 2.0 {
            return invalid(format!("filter.resolution ({}) is too small", self.filter.resolution));
        }
        if !(self.filter.snap_multiplier > 0.0) {
            return invalid("filter.snap_multiplier must be positive".into());
        }
        if self.control.tank_width < 0.0 {
            return invalid("loop.tank_width must not be negative".into());
        }
        if self.sim.noise_std < 0.0 {
            return invalid("sim.noise_std must not be negative".into());
        }
        Ok(())
    }

    pub fn pid_config(&self) -> PidConfig {
        PidConfig {
            kp: self.pid.kp,
            ki: self.pid.ki,
            kd: self.pid.kd,
            out_min: self.pid.out_min,
            out_max: self.pid.out_max,
        }
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            resolution: self.filter.resolution,
            snap_multiplier: self.filter.snap_multiplier,
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            period: Duration::from_millis(self.control.period_ms),
            pid: self.pid_config(),
            filter: self.filter_config(),
            neutral_command: self.control.neutral_command.unwrap_or(self.pid.out_max),
        }
    }

    pub fn log_period(&self) -> Duration {
        Duration::from_millis(self.control.log_period_ms)
    }
}
