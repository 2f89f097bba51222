//! Tab-separated run log written by the logging context.
//!
//! Layout: one `#` metadata line, one header line, then one row per record.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use controller::PidConfig;
use serde::Serialize;

use crate::error::DataLogError;
use crate::state::{RunSnapshot, RunState};

pub const COLUMNS: [&str; 7] = [
    "time_elapsed",
    "sensor_value",
    "servo_value",
    "setpoint",
    "p_term",
    "i_term",
    "d_term",
];

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LogRecord {
    pub time_elapsed: f64,
    pub sensor_value: f64,
    pub servo_value: f64,
    pub setpoint: f64,
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
}

impl From<&RunSnapshot> for LogRecord {
    fn from(s: &RunSnapshot) -> Self {
        Self {
            time_elapsed: s.time_elapsed,
            sensor_value: s.sensor_value,
            servo_value: s.servo_value,
            setpoint: s.setpoint,
            p_term: s.pid.p_term,
            i_term: s.pid.i_term,
            d_term: s.pid.d_term,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogMetadata {
    pub pid: PidConfig,
    pub start_point: f64,
    pub period: Duration,
    /// Seconds since the Unix epoch when the run started, if known.
    pub started_unix: Option<u64>,
}

impl LogMetadata {
    fn line(&self) -> String {
        let mut line = format!(
            "# kp={} ki={} kd={} out_min={} out_max={} start_point={} period_ms={}",
            self.pid.kp,
            self.pid.ki,
            self.pid.kd,
            self.pid.out_min,
            self.pid.out_max,
            self.start_point,
            self.period.as_millis(),
        );
        if let Some(t) = self.started_unix {
            line.push_str(&format!(" started_unix={t}"));
        }
        line
    }
}

pub struct DataLog<W: Write> {
    out: W,
    rows: u64,
}

impl DataLog<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, meta: &LogMetadata) -> Result<Self, DataLogError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), meta)
    }
}

impl<W: Write> DataLog<W> {
    /// Writes the metadata and header lines immediately.
    pub fn new(mut out: W, meta: &LogMetadata) -> Result<Self, DataLogError> {
        writeln!(out, "{}", meta.line())?;
        writeln!(out, "{}", COLUMNS.join("\t"))?;
        Ok(Self { out, rows: 0 })
    }

    pub fn append(&mut self, r: &LogRecord) -> Result<(), DataLogError> {
        writeln!(
            self.out,
            "{:.3}\t{:.2}\t{:.3}\t{:.2}\t{:.4}\t{:.4}\t{:.4}",
            r.time_elapsed, r.sensor_value, r.servo_value, r.setpoint, r.p_term, r.i_term, r.d_term
        )?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn flush(&mut self) -> Result<(), DataLogError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Logging context body: every `period`, append the newest committed sample.
///
/// Samples already logged are not repeated. Returns once the control context
/// has finished ([`RunState::finish_control`]) and its last committed sample has
/// been written. `on_record` sees every row written.
pub fn run_logger<W, F>(
    state: &RunState,
    period: Duration,
    log: &mut DataLog<W>,
    mut on_record: F,
) -> Result<u64, DataLogError>
where
    W: Write,
    F: FnMut(&LogRecord),
{
    let mut last_tick = 0;
    loop {
        // read before the snapshot so a finished loop's last commit is in it
        let finished = state.control_finished();
        let snap = state.snapshot();
        if snap.tick > last_tick {
            let record = LogRecord::from(&snap);
            log.append(&record)?;
            on_record(&record);
            last_tick = snap.tick;
        }
        if finished {
            break;
        }
        state.control_done_signal().wait_timeout(period);
    }
    log.flush()?;
    Ok(log.rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use controller::PidOutput;
    use std::sync::Arc;
    use std::thread;

    fn meta() -> LogMetadata {
        LogMetadata {
            pid: PidConfig::default(),
            start_point: 480.0,
            period: Duration::from_millis(20),
            started_unix: None,
        }
    }

    #[test]
    fn writes_metadata_header_and_rows() {
        let mut log = DataLog::new(Vec::new(), &meta()).unwrap();
        log.append(&LogRecord {
            time_elapsed: 0.5,
            sensor_value: 470.25,
            servo_value: 104.5,
            setpoint: 420.0,
            p_term: -2.95,
            i_term: 106.0,
            d_term: 0.125,
        })
        .unwrap();
        assert_eq!(log.rows(), 1);

        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("# kp=0.059 ki=0.05 kd=0.035"));
        assert!(lines[0].contains("start_point=480"));
        assert!(lines[0].contains("period_ms=20"));
        assert_eq!(lines[1].split('\t').collect::<Vec<_>>(), COLUMNS.to_vec());
        assert_eq!(
            lines[2],
            "0.500\t470.25\t104.500\t420.00\t-2.9500\t106.0000\t0.1250"
        );
    }

    #[test]
    fn metadata_includes_start_time_when_known() {
        let m = LogMetadata {
            started_unix: Some(1_490_000_000),
            ..meta()
        };
        assert!(m.line().ends_with("started_unix=1490000000"));
    }

    #[test]
    fn logger_writes_each_sample_once_and_exits_on_shutdown() {
        let state = Arc::new(RunState::new(480.0, 420.0, 270.0));

        let logger = {
            let state = state.clone();
            thread::spawn(move || {
                let mut log = DataLog::new(Vec::new(), &meta()).unwrap();
                let mut seen = 0;
                let rows = run_logger(&state, Duration::from_millis(2), &mut log, |_| seen += 1)
                    .unwrap();
                (rows, seen, log.into_inner())
            })
        };

        for i in 1..=5 {
            state.write_control_sample(480.0 - i as f64, 104.0, PidOutput::default(), i as f64 * 0.02);
            thread::sleep(Duration::from_millis(10));
        }
        state.finish_control();

        let (rows, seen, bytes) = logger.join().unwrap();
        assert_eq!(rows, seen);
        assert!(rows >= 1 && rows <= 5, "rows = {rows}");

        let text = String::from_utf8(bytes).unwrap();
        let last = text.lines().last().unwrap();
        assert!(last.starts_with("0.100\t475.00"), "last row: {last}");
    }

    #[test]
    fn logger_waits_for_the_control_context_before_its_last_row() {
        let state = Arc::new(RunState::new(480.0, 420.0, 270.0));
        let logger = {
            let state = state.clone();
            thread::spawn(move || {
                let mut log = DataLog::new(Vec::new(), &meta()).unwrap();
                run_logger(&state, Duration::from_millis(2), &mut log, |_| {}).unwrap();
                log.into_inner()
            })
        };

        state.write_control_sample(470.0, 104.0, PidOutput::default(), 0.02);
        state.request_shutdown();
        // a tick already in flight when shutdown was requested
        thread::sleep(Duration::from_millis(20));
        state.write_control_sample(465.0, 104.0, PidOutput::default(), 0.04);
        state.finish_control();

        let text = String::from_utf8(logger.join().unwrap()).unwrap();
        let last = text.lines().last().unwrap();
        assert!(last.starts_with("0.040\t465.00"), "last row: {last}");
    }

    #[test]
    fn create_writes_to_file() {
        let path = std::env::temp_dir().join(format!("tank-datalog-{}.tsv", std::process::id()));
        {
            let mut log = DataLog::create(&path, &meta()).unwrap();
            log.append(&LogRecord::from(&RunSnapshot::default())).unwrap();
            log.flush().unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        std::fs::remove_file(&path).ok();
    }
}
