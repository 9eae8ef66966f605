//! Centralized shell output and progress management.
//!
//! The Shell module provides a unified API for all CLI output, including:
//! - Status messages with consistent formatting
//! - A spinner (via indicatif) while long operations run
//! - Scoped timing spans
//! - JSON output mode for machine-readable output
//!
//! # Design Principles
//!
//! 1. **Commands never manage spacing/indentation directly** - Shell handles all formatting
//! 2. **JSON mode is mutually exclusive** - No human output when JSON mode is enabled
//! 3. **Timing is always shown** - End messages include duration unless in quiet mode

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// Shell output mode - Human and Json are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellMode {
    /// Human-readable output with optional colors and a spinner.
    Human {
        verbosity: Verbosity,
        color: ColorChoice,
    },
    /// Machine-readable JSON output only.
    Json,
}

/// Output verbosity level (Human mode only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// --quiet: nothing but errors, no spinner
    Quiet,
    /// Default: status messages + spinner
    Normal,
    /// --verbose: debug logs, no spinner
    Verbose,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    /// Detect TTY and use colors if available.
    Auto,
    /// Always use ANSI colors.
    Always,
    /// Never use ANSI colors.
    Never,
}

impl std::str::FromStr for ColorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(format!(
                "invalid color choice '{}'; expected 'auto', 'always', or 'never'",
                s
            )),
        }
    }
}

/// Status types for output messages.
///
/// Shell handles all formatting - callers just specify the semantic status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    // Success statuses (green)
    Published,
    Finished,

    // In-progress statuses (cyan)
    Deploying,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Published => "Published",
            Status::Finished => "Finished",
            Status::Deploying => "Deploying",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Status::Published | Status::Finished => "\x1b[1;32m",
            Status::Deploying => "\x1b[1;36m",
        }
    }

    /// Get the width for alignment (12 characters).
    fn width(&self) -> usize {
        12
    }
}

/// Central shell for all CLI output.
#[derive(Debug)]
pub struct Shell {
    mode: ShellMode,
    use_color: bool,
}

impl Shell {
    /// Create a new shell with the given mode.
    pub fn new(mode: ShellMode) -> Self {
        let use_color = match &mode {
            ShellMode::Json => false,
            ShellMode::Human { color, .. } => match color {
                ColorChoice::Auto => io::stderr().is_terminal(),
                ColorChoice::Always => true,
                ColorChoice::Never => false,
            },
        };

        Shell { mode, use_color }
    }

    /// Create a shell from CLI flags with proper precedence.
    ///
    /// JSON mode takes precedence over quiet/verbose.
    pub fn from_flags(
        quiet: bool,
        verbose: bool,
        color: ColorChoice,
        message_format_json: bool,
    ) -> Self {
        let mode = if message_format_json {
            ShellMode::Json
        } else {
            let verbosity = if quiet {
                Verbosity::Quiet
            } else if verbose {
                Verbosity::Verbose
            } else {
                Verbosity::Normal
            };
            ShellMode::Human { verbosity, color }
        };

        Shell::new(mode)
    }

    pub fn is_quiet(&self) -> bool {
        matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Quiet,
                ..
            }
        )
    }

    pub fn is_json(&self) -> bool {
        matches!(self.mode, ShellMode::Json)
    }

    /// Print a status message.
    ///
    /// Format: `{status:>12} {message}`
    ///
    /// Quiet and JSON modes print nothing (use json_event for JSON output).
    /// Errors bypass the shell and go through `diagnostic::emit`.
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_json() || self.is_quiet() {
            return;
        }

        eprintln!("{} {}", self.format_status(status), msg);
    }

    /// Print an indented detail line under the last status.
    pub fn detail(&self, label: &str, value: impl Display) {
        if self.is_json() || self.is_quiet() {
            return;
        }
        eprintln!("{:>width$} {}: {}", "", label, value, width = 12);
    }

    /// Print a JSON event to stdout.
    ///
    /// Only works in JSON mode; silently ignored in human mode.
    pub fn json_event(&self, event: &serde_json::Value) {
        if !self.is_json() {
            return;
        }

        let json_str = serde_json::to_string(event).unwrap_or_default();
        println!("{}", json_str);
        let _ = io::stdout().flush();
    }

    fn format_status(&self, status: Status) -> String {
        let text = status.as_str();
        let width = status.width();

        if self.use_color {
            format!("{}{:>width$}\x1b[0m", status.color_code(), text, width = width)
        } else {
            format!("{:>width$}", text, width = width)
        }
    }

    /// Start a timed span.
    ///
    /// The start message is printed immediately; a spinner runs while the
    /// span is alive when stderr is a terminal in normal verbosity.
    pub fn span(self: &Arc<Self>, status: Status, msg: impl Display) -> Span {
        Span::new(Arc::clone(self), status, msg.to_string())
    }
}

/// A scoped timing span with an optional spinner.
pub struct Span {
    shell: Arc<Shell>,
    spinner: Option<ProgressBar>,
    start: Instant,
    finished: bool,
}

impl Span {
    const TICK: Duration = Duration::from_millis(100);

    fn new(shell: Arc<Shell>, status: Status, message: String) -> Self {
        shell.status(status, &message);

        let interactive = matches!(
            shell.mode,
            ShellMode::Human {
                verbosity: Verbosity::Normal,
                ..
            }
        ) && io::stderr().is_terminal();

        let spinner = interactive.then(|| {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                pb.set_style(style);
            }
            pb.set_message(message);
            pb.enable_steady_tick(Self::TICK);
            pb
        });

        Span {
            shell,
            spinner,
            start: Instant::now(),
            finished: false,
        }
    }

    /// Clear the spinner and print a finish line with the elapsed time.
    pub fn finish_with_message(mut self, msg: impl Display) {
        self.finished = true;
        self.clear();

        if !self.shell.is_quiet() {
            let duration_str = format_duration(self.start.elapsed());
            self.shell
                .status(Status::Finished, format!("{} in {}", msg, duration_str));
        }
    }

    fn clear(&self) {
        if let Some(pb) = &self.spinner {
            pb.finish_and_clear();
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if !self.finished {
            self.clear();
        }
    }
}

/// Format a duration in a human-readable way.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}
