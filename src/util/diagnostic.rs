//! User-friendly diagnostic messages.
//!
//! Every error printed by the CLI carries its cause chain and, where one
//! exists, a suggested fix.

use std::error::Error as _;
use std::fmt;

use miette::Diagnostic as MietteDiagnostic;

/// Common suggestion messages for consistent error handling.
pub mod suggestions {
    /// Suggestion when no module name was given.
    pub const NO_MODULE_NAME: &str =
        "Pass the module name as an argument, with --module-name, or set MODULE_NAME";

    /// Suggestion when the development server URL is missing.
    pub const NO_DEV_SERVER: &str =
        "Pass --dev-server-url or set DEV_SERVER_URL to the manifest served by your dev server";

    /// Suggestion when the target registry is missing.
    pub const NO_TARGET_REGISTRY: &str =
        "Pass --target-registry or set TARGET_REGISTRY, for example `dapplet-base.eth`";
}

/// An error message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Primary message
    pub message: String,
    /// Error code, like `dapplets::deploy::version_not_newer`
    pub code: Option<String>,
    /// Additional context lines
    pub context: Vec<String>,
    /// Suggested fixes
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            code: None,
            context: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Build an error diagnostic from a library error.
    ///
    /// The cause chain becomes context lines; the error's help text, if
    /// any, becomes the suggestion.
    pub fn from_error(err: &(dyn MietteDiagnostic + 'static)) -> Self {
        let mut diag = Diagnostic::error(err.to_string());
        diag.code = err.code().map(|c| c.to_string());

        let mut source = err.source();
        while let Some(cause) = source {
            diag = diag.with_context(cause.to_string());
            source = cause.source();
        }

        if let Some(help) = err.help() {
            diag = diag.with_suggestion(help.to_string());
        }
        diag
    }

    /// Add context to the diagnostic.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        let severity_str = if color {
            "\x1b[1;31merror\x1b[0m"
        } else {
            "error"
        };

        match &self.code {
            Some(code) => output.push_str(&format!("{}[{}]: {}\n", severity_str, code, self.message)),
            None => output.push_str(&format!("{}: {}\n", severity_str, self.message)),
        }

        for ctx in &self.context {
            output.push_str(&format!("  caused by: {}\n", ctx));
        }

        if !self.suggestions.is_empty() {
            output.push('\n');
            let help_prefix = if color {
                "\x1b[1;32mhelp\x1b[0m"
            } else {
                "help"
            };
            if let [only] = self.suggestions.as_slice() {
                output.push_str(&format!("{}: {}\n", help_prefix, only));
            } else {
                output.push_str(&format!("{}: consider:\n", help_prefix));
                for (i, suggestion) in self.suggestions.iter().enumerate() {
                    output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
                }
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}
