//! Render a finished data log with an external plotting program.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::info;

use crate::error::PlotError;

#[derive(Clone, Debug)]
pub struct PlotRequest {
    pub program: String,
    pub log_path: PathBuf,
    /// Write a PNG here instead of opening an interactive window.
    pub image_path: Option<PathBuf>,
    pub title: String,
}

fn quoted(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

impl PlotRequest {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            program: "gnuplot".to_string(),
            log_path: log_path.into(),
            image_path: None,
            title: "tank positioning run".to_string(),
        }
    }

    pub fn script(&self) -> String {
        let log = quoted(&self.log_path);
        let mut s = String::new();
        if let Some(image) = &self.image_path {
            s.push_str("set terminal pngcairo size 1200,700\n");
            s.push_str(&format!("set output {}\n", quoted(image)));
        }
        s.push_str("set datafile separator '\\t'\n");
        s.push_str("set datafile commentschars '#'\n");
        s.push_str("set key autotitle columnhead\n");
        s.push_str(&format!("set title '{}'\n", self.title.replace('\'', "''")));
        s.push_str("set xlabel 'time [s]'\n");
        s.push_str("set ylabel 'position [sensor units]'\n");
        s.push_str("set y2label 'servo command'\n");
        s.push_str("set ytics nomirror\n");
        s.push_str("set y2tics\n");
        s.push_str(&format!(
            "plot {log} using 1:2 with lines, \
             {log} using 1:4 with lines, \
             {log} using 1:3 axes x1y2 with lines\n"
        ));
        s
    }

    /// Spawn the plotting program and feed it the script on stdin.
    pub fn render(&self) -> Result<(), PlotError> {
        let mut cmd = Command::new(&self.program);
        if self.image_path.is_none() {
            cmd.arg("-persist");
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| PlotError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(self.script().as_bytes())?;
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(PlotError::Failed(status));
        }
        info!(log = %self.log_path.display(), "plot rendered");
        Ok(())
    }
}
