//! Command implementations

pub mod deploy;

use std::io::IsTerminal;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use dapplets::ops::DeployError;
use dapplets::util::diagnostic::{emit, Diagnostic};

/// A command line that parsed but cannot be acted on.
#[derive(Debug, Error, MietteDiagnostic)]
#[error("{message}")]
#[diagnostic(code(dapplets::cli::usage))]
pub struct UsageError {
    message: String,
    #[help]
    help: Option<String>,
}

impl UsageError {
    pub fn new(message: impl Into<String>, help: &str) -> Self {
        UsageError {
            message: message.into(),
            help: Some(help.to_string()),
        }
    }
}

/// Print a failed command's error to stderr, with help text when the error
/// carries any.
pub fn report(err: &anyhow::Error) {
    let diag = if let Some(e) = err.downcast_ref::<DeployError>() {
        Diagnostic::from_error(e)
    } else if let Some(e) = err.downcast_ref::<UsageError>() {
        Diagnostic::from_error(e)
    } else {
        Diagnostic::error(format!("{:#}", err))
    };
    emit(&diag, std::io::stderr().is_terminal());
}
