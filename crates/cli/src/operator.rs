//! Line-based operator commands read from stdin.

use runtime::RunState;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OperatorCommand {
    /// Move the setpoint by this many sensor units.
    Nudge(f64),
    Set(f64),
    Shutdown,
}

/// `a`/`left` and `d`/`right` mirror the arrow keys of the window front-end.
pub fn parse(line: &str, increment: f64) -> Result<OperatorCommand, String> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(OperatorCommand::Shutdown);
    };
    match cmd.to_ascii_lowercase().as_str() {
        "a" | "left" => Ok(OperatorCommand::Nudge(increment)),
        "d" | "right" => Ok(OperatorCommand::Nudge(-increment)),
        "q" | "quit" => Ok(OperatorCommand::Shutdown),
        "s" | "set" => {
            let value = words
                .next()
                .ok_or_else(|| "usage: s <setpoint>".to_string())?;
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(OperatorCommand::Set)
                .ok_or_else(|| format!("not a setpoint: {value}"))
        }
        other => Err(format!("unknown command: {other}")),
    }
}

pub fn apply(state: &RunState, cmd: OperatorCommand) {
    match cmd {
        OperatorCommand::Nudge(delta) => {
            let setpoint = state.adjust_setpoint(delta);
            info!(setpoint, "setpoint adjusted");
        }
        OperatorCommand::Set(value) => {
            let setpoint = state.write_setpoint(value);
            info!(setpoint, "setpoint set");
        }
        OperatorCommand::Shutdown => state.request_shutdown(),
    }
}
