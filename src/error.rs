use std::io;

use thiserror::Error;

use crate::core::template::TemplateError;

/// Fixed usage text printed when the driver receives the wrong arguments.
pub const USAGE: &str = "\
APAX driver requires specification of a model checkpoint path,
and a template file that describes the chemical makeup of the structure.

Example: apax-driver -o directory/experiment,template.xyz";

#[derive(Debug, Error)]
pub enum DriverError {
    /// The potential backend cannot be started in this environment.
    #[error("potential backend '{command}' is unavailable: {reason}")]
    BackendUnavailable { command: String, reason: String },

    #[error("expected 2 driver arguments, got {got}\n{}", USAGE)]
    Usage { got: usize },

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("failed to start potential backend: {0}")]
    Spawn(#[source] io::Error),

    /// Anything raised by the potential during a step. Never retried.
    #[error("potential evaluation failed: {0:#}")]
    Computation(#[source] anyhow::Error),

    #[error("potential produced no results for the current geometry")]
    MissingResults,

    #[error("{what}: expected {expected} values, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("failed to serialize extras: {0}")]
    Extras(#[from] serde_json::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;
