// Error types for e2e-harness

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to a scenario by sessions, locators, actions and assertions
#[derive(Debug, Error)]
pub enum Error {
    /// Navigation target unreachable, or the load did not settle in time
    #[error("Navigation to '{url}' failed: {message}")]
    NavigationError { url: String, message: String },

    /// The locator resolved to zero elements once the wait window closed
    #[error("{operation}: no element matches selector '{selector}'")]
    ElementNotFound { selector: String, operation: String },

    /// The element exists but the operation can never apply to it
    ///
    /// Raised without waiting for conditions that polling cannot fix, such as
    /// unchecking a radio button or checking a disabled control.
    #[error("{operation}: element '{selector}' is not actionable: {reason}")]
    ElementNotActionable {
        selector: String,
        operation: String,
        reason: String,
    },

    /// A bounded wait ran out
    #[error("Timeout {duration:?} exceeded: {operation}")]
    Timeout { operation: String, duration: Duration },

    /// A value mismatch, either immediate or after polling gave up
    #[error("Assertion failed for {what}: expected {expected}, actual {actual}")]
    AssertionFailed {
        what: String,
        expected: String,
        actual: String,
    },

    /// Caller misuse
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A file handed to `set_input_files` could not be read
    #[error("Cannot read '{}': {source}", path.display())]
    FileAccessError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single-element operation matched more than one element
    #[error("Strict mode violation: selector '{selector}' resolved to {count} elements")]
    StrictModeViolation { selector: String, count: usize },

    /// The session was closed before the operation started
    #[error("Session is closed")]
    SessionClosed,

    /// The Playwright Node.js driver could not be located
    ///
    /// Install it with `npm install playwright`, or point
    /// `PLAYWRIGHT_DRIVER_PATH` at an unpacked driver directory.
    #[error("Playwright driver not found. Install with: npm install playwright")]
    DriverNotFound,

    /// The driver process or the browser failed to start
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    /// Transport-level error (stdio communication)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol-level error reported by the driver
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Channel closed unexpectedly
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The scenario body panicked
    #[error("Scenario panicked: {0}")]
    Panicked(String),

    /// Error with additional context
    #[error("{0}: {1}")]
    Context(String, #[source] Box<Error>),
}

impl Error {
    /// Adds context to the error
    pub fn context(self, msg: impl Into<String>) -> Self {
        Error::Context(msg.into(), Box::new(self))
    }

    /// Whether a polling probe may retry after this error.
    ///
    /// The DOM may still be rendering, so a missing or ambiguous match can
    /// resolve on a later poll. Everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ElementNotFound { .. } | Error::StrictModeViolation { .. } => true,
            Error::Context(_, inner) => inner.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub(crate) fn not_found(selector: impl Into<String>, operation: impl Into<String>) -> Self {
        Error::ElementNotFound {
            selector: selector.into(),
            operation: operation.into(),
        }
    }

    pub(crate) fn not_actionable(
        selector: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::ElementNotActionable {
            selector: selector.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::not_found("#a", "click").is_transient());
        assert!(
            Error::StrictModeViolation {
                selector: "li".into(),
                count: 3
            }
            .is_transient()
        );
        assert!(
            Error::not_found("#a", "click")
                .context("while polling")
                .is_transient()
        );
        assert!(!Error::SessionClosed.is_transient());
        assert!(!Error::timeout("click", Duration::from_secs(1)).is_transient());
        assert!(!Error::not_actionable("#r", "uncheck", "radio").is_transient());
    }

    #[test]
    fn test_messages_name_selector_and_operation() {
        let err = Error::not_actionable("#radio", "uncheck", "radio buttons cannot be unchecked");
        let msg = err.to_string();
        assert!(msg.contains("#radio"));
        assert!(msg.contains("uncheck"));

        let err = Error::AssertionFailed {
            what: "url".into(),
            expected: "\"a\"".into(),
            actual: "\"b\"".into(),
        };
        assert_eq!(
            err.to_string(),
            "Assertion failed for url: expected \"a\", actual \"b\""
        );
    }
}
