// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Guest script parsing.
//!
//! A script is a sequence of whitespace-separated steps, each `name` or
//! `name:argument`. `#` starts a comment that runs to the end of the line.

use std::time::Duration;
use thiserror::Error;
use virtio_watchdog_protocol::WatchdogEventKind;

/// One guest or host action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Submit a well-formed command and kick the queue.
    Send(WatchdogEventKind),
    /// Submit arbitrary bytes and kick the queue.
    Raw(Vec<u8>),
    /// Let virtual time pass.
    Advance(Duration),
    /// Snapshot the device.
    Save,
    /// Restore the last snapshot onto a fresh device and time base.
    Restore,
    /// Reset the PCI function.
    Reset,
    /// Log the configuration region.
    ReadConfig,
    /// Write bytes into the configuration region.
    WriteConfig { offset: u64, data: Vec<u8> },
    /// Fail unless exactly this many recovery actions have happened.
    ExpectRecoveries(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: unknown step '{step}'")]
    UnknownStep { line: usize, step: String },
    #[error("line {line}: step '{step}' requires an argument")]
    MissingArgument { line: usize, step: String },
    #[error("line {line}: invalid argument '{arg}' for step '{step}'")]
    InvalidArgument {
        line: usize,
        step: String,
        arg: String,
    },
}

/// Parses a script file's contents.
pub fn parse_script(text: &str) -> Result<Vec<Step>, ParseError> {
    let mut steps = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let code = line.split('#').next().unwrap_or_default();
        for token in code.split_whitespace() {
            steps.push(parse_step(i + 1, token)?);
        }
    }
    Ok(steps)
}

/// Parses a single step. `line` is only used for error reporting.
pub fn parse_step(line: usize, token: &str) -> Result<Step, ParseError> {
    let (name, arg) = match token.split_once(':') {
        Some((name, arg)) => (name, Some(arg)),
        None => (token, None),
    };
    let invalid = || ParseError::InvalidArgument {
        line,
        step: name.to_owned(),
        arg: arg.unwrap_or_default().to_owned(),
    };
    let required = || {
        arg.ok_or_else(|| ParseError::MissingArgument {
            line,
            step: name.to_owned(),
        })
    };
    let bare = |step: Step| match arg {
        Some(_) => Err(invalid()),
        None => Ok(step),
    };

    let step = match name {
        "enable" => bare(Step::Send(WatchdogEventKind::ENABLE))?,
        "heartbeat" => bare(Step::Send(WatchdogEventKind::HEARTBEAT))?,
        "disable" => bare(Step::Send(WatchdogEventKind::DISABLE))?,
        "save" => bare(Step::Save)?,
        "restore" => bare(Step::Restore)?,
        "reset" => bare(Step::Reset)?,
        "config" => bare(Step::ReadConfig)?,
        "raw" => Step::Raw(parse_hex(required()?).ok_or_else(invalid)?),
        "advance" => Step::Advance(parse_duration(required()?).ok_or_else(invalid)?),
        "write-config" => {
            let (offset, data) = required()?.split_once(':').ok_or_else(invalid)?;
            Step::WriteConfig {
                offset: offset.parse().map_err(|_| invalid())?,
                data: parse_hex(data).ok_or_else(invalid)?,
            }
        }
        "expect" => Step::ExpectRecoveries(required()?.parse().map_err(|_| invalid())?),
        _ => {
            return Err(ParseError::UnknownStep {
                line,
                step: name.to_owned(),
            });
        }
    };
    Ok(step)
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

fn parse_duration(s: &str) -> Option<Duration> {
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    s.strip_suffix('s')
        .unwrap_or(s)
        .parse()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_steps() {
        let steps = parse_script(
            "enable   # arm it\n\
             advance:9 heartbeat advance:500ms\n\
             raw:02 raw: disable save restore reset config\n\
             write-config:1:01 expect:0\n",
        )
        .unwrap();
        assert_eq!(
            steps,
            [
                Step::Send(WatchdogEventKind::ENABLE),
                Step::Advance(Duration::from_secs(9)),
                Step::Send(WatchdogEventKind::HEARTBEAT),
                Step::Advance(Duration::from_millis(500)),
                Step::Raw(vec![2]),
                Step::Raw(vec![]),
                Step::Send(WatchdogEventKind::DISABLE),
                Step::Save,
                Step::Restore,
                Step::Reset,
                Step::ReadConfig,
                Step::WriteConfig {
                    offset: 1,
                    data: vec![1]
                },
                Step::ExpectRecoveries(0),
            ]
        );
    }

    #[test]
    fn reports_line_numbers() {
        assert_eq!(
            parse_script("enable\n\nreboot").unwrap_err(),
            ParseError::UnknownStep {
                line: 3,
                step: "reboot".into()
            }
        );
        assert_eq!(
            parse_script("advance").unwrap_err(),
            ParseError::MissingArgument {
                line: 1,
                step: "advance".into()
            }
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        for token in ["raw:2", "raw:zz", "advance:soon", "enable:1", "write-config:1"] {
            assert!(
                matches!(
                    parse_step(1, token),
                    Err(ParseError::InvalidArgument { .. })
                ),
                "{token}"
            );
        }
    }
}
