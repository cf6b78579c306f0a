//! Error types for jsrunner
//!
//! Every fallible operation on a [`Session`](crate::Session) or an
//! [`EventLoopRunner`](crate::EventLoopRunner) returns a [`RunnerError`].
//! Script-side failures carry the engine's own diagnostic as a
//! [`ScriptException`].

use crate::value::JsValue;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exception name used for calls the host refuses in the current state.
///
/// Scripts that hit a disabled capability see an `Error` with this name, and
/// the host gets [`RunnerError::Usage`] back.
pub const USAGE_ERROR_NAME: &str = "UsageError";

/// Diagnostic captured from a thrown script value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptException {
    /// Constructor name (`SyntaxError`, `TypeError`, ...), empty for thrown primitives.
    pub name: String,
    /// Error message, or the string form of a thrown non-error value.
    pub message: String,
    /// Engine stack trace when available.
    pub stack: Option<String>,
}

impl ScriptException {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Whether the engine rejected the source before running it.
    pub fn is_syntax_error(&self) -> bool {
        self.name == "SyntaxError"
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// Errors returned by sessions and event-loop runners
#[derive(Error, Debug)]
pub enum RunnerError {
    /// External script content could not be read
    #[error("failed to load script {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source was rejected by the parser
    #[error("parse error: {0}")]
    Parse(ScriptException),

    /// Script threw while running
    #[error("runtime error: {0}")]
    Runtime(ScriptException),

    /// Named function was missing or threw
    #[error("failed to call function {function}: {reason}")]
    Invocation {
        function: String,
        reason: InvocationFailure,
    },

    /// Awaited promise settled to a rejection
    #[error("promise rejected: {}", reason.export_string())]
    Rejection { reason: JsValue },

    /// Bounded pump exceeded its deadline
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// API called in the wrong state, or a disabled capability was used
    #[error("usage error: {0}")]
    Usage(String),

    /// Engine setup or conversion failure outside of script code
    #[error("engine error: {0}")]
    Engine(String),

    /// Worker-side failure (panic, lost reply)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a named call failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationFailure {
    /// Name does not resolve to a callable value
    NotCallable(String),
    /// Call itself threw
    Threw(ScriptException),
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCallable(detail) => write!(f, "{}", detail),
            Self::Threw(exception) => write!(f, "{}", exception),
        }
    }
}

impl RunnerError {
    /// Classify a caught exception from evaluating source text.
    pub fn from_exception(exception: ScriptException) -> Self {
        if exception.name == USAGE_ERROR_NAME {
            Self::Usage(exception.message)
        } else if exception.is_syntax_error() {
            Self::Parse(exception)
        } else {
            Self::Runtime(exception)
        }
    }

    /// Re-tag an evaluation failure as a failed call of `function`.
    pub fn into_invocation(self, function: &str) -> Self {
        match self {
            Self::Parse(exception) | Self::Runtime(exception) => Self::Invocation {
                function: function.to_string(),
                reason: InvocationFailure::Threw(exception),
            },
            other => other,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn engine(message: impl fmt::Display) -> Self {
        Self::Engine(message.to_string())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The engine diagnostic, for errors raised by script code.
    pub fn exception(&self) -> Option<&ScriptException> {
        match self {
            Self::Parse(exception) | Self::Runtime(exception) => Some(exception),
            Self::Invocation {
                reason: InvocationFailure::Threw(exception),
                ..
            } => Some(exception),
            _ => None,
        }
    }
}

/// Result type alias for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_errors_classify_as_parse() {
        let err = RunnerError::from_exception(ScriptException::new("SyntaxError", "unexpected token"));
        assert!(matches!(err, RunnerError::Parse(_)));
        assert_eq!(err.to_string(), "parse error: SyntaxError: unexpected token");
    }

    #[test]
    fn test_thrown_errors_classify_as_runtime() {
        let err = RunnerError::from_exception(ScriptException::new("TypeError", "x is not a function"));
        assert!(matches!(err, RunnerError::Runtime(_)));
        assert_eq!(err.exception().map(|e| e.name.as_str()), Some("TypeError"));
    }

    #[test]
    fn test_usage_exception_maps_to_usage() {
        let err = RunnerError::from_exception(ScriptException::new(USAGE_ERROR_NAME, "network access is disabled"));
        assert!(matches!(err, RunnerError::Usage(ref m) if m == "network access is disabled"));
    }

    #[test]
    fn test_into_invocation_keeps_other_kinds() {
        let err = RunnerError::from_exception(ScriptException::new("Error", "boom")).into_invocation("render");
        match err {
            RunnerError::Invocation { function, reason } => {
                assert_eq!(function, "render");
                assert_eq!(reason.to_string(), "Error: boom");
            }
            other => panic!("unexpected error: {other}"),
        }

        let timeout = RunnerError::Timeout(Duration::from_millis(5)).into_invocation("render");
        assert!(matches!(timeout, RunnerError::Timeout(_)));
    }

    #[test]
    fn test_thrown_primitive_display() {
        let exception = ScriptException::new("", "plain string");
        assert_eq!(exception.to_string(), "plain string");
    }
}
