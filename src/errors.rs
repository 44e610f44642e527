//! Error types for the breaker and interval policy surface

use thiserror::Error;

use crate::circuit::State;

/// Errors produced by the crate itself.
///
/// Caller errors are never wrapped: the breaker records their outcome and the
/// caller keeps the original value.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value or call argument was out of range
    #[error("invalid value for `{field}`: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    /// A named base configuration was referenced but does not exist
    #[error("no configuration named '{0}'")]
    ConfigurationNotFound(String),

    /// The breaker denied the permission request
    #[error("circuit breaker '{breaker}' is {state} and does not permit further calls")]
    CallNotPermitted {
        breaker: String,
        state: State,
        /// Advisory mirror of `writable_stack_trace_enabled`; stack capture
        /// is not configurable on this platform, so the flag is pure payload.
        writable_stack_trace: bool,
    },
}

impl Error {
    pub(crate) fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_cites_field() {
        let err = Error::invalid_argument("sliding_window_size", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid value for `sliding_window_size`: must be at least 1"
        );
    }

    #[test]
    fn test_call_not_permitted_names_breaker_and_state() {
        let err = Error::CallNotPermitted {
            breaker: "payment_api".to_string(),
            state: State::Open,
            writable_stack_trace: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("payment_api"), "message was: {msg}");
        assert!(msg.contains("OPEN"), "message was: {msg}");
    }
}
