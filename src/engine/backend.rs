use std::process::{Command, Stdio};

use log::{debug, info};

use crate::config::BackendConfig;
use crate::error::{DriverError, DriverResult};

/// Outcome of probing for the potential backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAvailability {
    Available,
    Unavailable { reason: String },
}

impl BackendAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, BackendAvailability::Available)
    }

    /// Turns an unavailable backend into the named configuration error.
    pub fn require(self, config: &BackendConfig) -> DriverResult<()> {
        match self {
            BackendAvailability::Available => Ok(()),
            BackendAvailability::Unavailable { reason } => Err(DriverError::BackendUnavailable {
                command: config.command.clone(),
                reason,
            }),
        }
    }
}

/// Runs the backend launch line (`command`, `args`, `probe_arg`) and requires
/// it to exit successfully, so a backend that is installed but cannot import
/// its model counts as unavailable.
pub fn probe(config: &BackendConfig) -> BackendAvailability {
    debug!(
        "Probing backend: {} {} {}",
        config.command,
        config.args.join(" "),
        config.probe_arg
    );
    let output = Command::new(&config.command)
        .args(&config.args)
        .arg(&config.probe_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();

    match output {
        Ok(out) if out.status.success() => {
            info!("Potential backend '{}' found", config.command);
            BackendAvailability::Available
        }
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            BackendAvailability::Unavailable {
                reason: format!("probe exited with {}: {}", out.status, stderr.trim()),
            }
        }
        Err(e) => BackendAvailability::Unavailable {
            reason: format!(
                "could not execute '{}' ({}). Install the apax bindings or add the backend to PATH.",
                config.command, e
            ),
        },
    }
}
