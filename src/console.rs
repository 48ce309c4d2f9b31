//! Operator console on stdin
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::device::ArduinoDriver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Help,
    ToggleRawMode,
    Status,
    /// Line to forward to the device as a bare command
    Raw(String),
    Unknown(String),
    Empty,
}

impl ConsoleInput {
    /// In raw mode everything except `help` and the toggle goes to the device.
    pub fn parse(line: &str, raw_mode: bool) -> Self {
        let line = line.trim();
        match line {
            "" => ConsoleInput::Empty,
            "help" => ConsoleInput::Help,
            "sA" | "sendArduinoMode" => ConsoleInput::ToggleRawMode,
            _ if raw_mode => ConsoleInput::Raw(line.to_string()),
            "status" => ConsoleInput::Status,
            _ => ConsoleInput::Unknown(line.to_string()),
        }
    }
}

const HELP: &str = "Commands: help, status, sA|sendArduinoMode (toggle sending raw lines to the device)";

/// Forward stdin lines from a plain thread so a blocked read never holds up
/// runtime shutdown.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Act on each console line until the input closes
pub async fn run_console(driver: Arc<ArduinoDriver>, mut lines: mpsc::Receiver<String>) {
    let mut raw_mode = false;

    while let Some(line) = lines.recv().await {
        match ConsoleInput::parse(&line, raw_mode) {
            ConsoleInput::Empty => {}
            ConsoleInput::Help => log::info!("{}", HELP),
            ConsoleInput::ToggleRawMode => {
                raw_mode = !raw_mode;
                log::info!("Send-to-device mode toggled ({})", raw_mode);
            }
            ConsoleInput::Status => match serde_json::to_string_pretty(&driver.status().await) {
                Ok(status) => log::info!("{}", status),
                Err(e) => log::error!("Failed to render status: {}", e),
            },
            ConsoleInput::Raw(command) => {
                if let Err(e) = driver.send_command(&command, None).await {
                    log::error!("Failed to send '{}': {}", command, e);
                }
            }
            ConsoleInput::Unknown(other) => log::info!("Unknown command '{}'. {}", other, HELP),
        }
    }

    log::debug!("Console input closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outside_raw_mode() {
        assert_eq!(ConsoleInput::parse("help", false), ConsoleInput::Help);
        assert_eq!(ConsoleInput::parse(" sA ", false), ConsoleInput::ToggleRawMode);
        assert_eq!(ConsoleInput::parse("status", false), ConsoleInput::Status);
        assert_eq!(ConsoleInput::parse("led", false), ConsoleInput::Unknown("led".into()));
        assert_eq!(ConsoleInput::parse("   ", false), ConsoleInput::Empty);
    }

    #[test]
    fn test_parse_in_raw_mode() {
        assert_eq!(ConsoleInput::parse("status", true), ConsoleInput::Raw("status".into()));
        assert_eq!(ConsoleInput::parse("sendArduinoMode", true), ConsoleInput::ToggleRawMode);
        assert_eq!(ConsoleInput::parse("help", true), ConsoleInput::Help);
    }
}
