//! Declare error types for tor-circattach

use thiserror::Error;

use crate::circuit::CircFailReason;
use crate::ident::CircId;

/// An error returned through a [`CircuitCompletion`](crate::CircuitCompletion).
///
/// These are the only errors a caller of
/// [`CircuitAttacher::request_circuit`](crate::CircuitAttacher::request_circuit)
/// will ever see: the event handlers themselves never fail.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The requested path had no hops in it.
    #[error("Cannot build a circuit along an empty path")]
    EmptyPath,

    /// The control session refused to start building the circuit at all.
    #[error("Control session refused to launch circuit: {0}")]
    BuildRejected(#[source] SessionError),

    /// Tor started building the circuit, but the build failed.
    #[error("Circuit {circ_id} failed to build: {reason}")]
    BuildFailed {
        /// The circuit that failed.
        circ_id: CircId,
        /// The reason that Tor reported for the failure.
        reason: CircFailReason,
    },

    /// The request was dropped before anyone resolved it.
    ///
    /// This happens if the attacher (or the task launching the circuit)
    /// went away, for example because the executor shut down.
    #[error("Circuit request was abandoned before it completed")]
    Abandoned,

    /// A problem talking to the control session while configuring Tor.
    #[error("Problem with control session: {0}")]
    Session(#[from] SessionError),
}

/// A `Result` as returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error reported by a [`ControlSession`](crate::ControlSession) or a
/// [`TorConfigSession`](crate::TorConfigSession).
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum SessionError {
    /// The control connection has closed.
    #[error("Control connection closed")]
    Closed,

    /// Tor answered a command with an error reply.
    #[error("Tor rejected command: {code} {message}")]
    Rejected {
        /// The numeric status code of the reply, e.g. 552.
        code: u16,
        /// The text that came with the reply.
        message: String,
    },

    /// Some other failure inside the session implementation.
    #[error("Control session failure: {0}")]
    Other(String),
}

/// An error that occurred while building a configuration object.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConfigBuildError {
    /// A mandatory field was not present.
    #[error("Field was not provided: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },
    /// A field had an unusable value.
    #[error("Value of {field} was incorrect: {problem}")]
    Invalid {
        /// The name of the offending field.
        field: String,
        /// What was wrong with it.
        problem: String,
    },
}

impl From<derive_builder::UninitializedFieldError> for ConfigBuildError {
    fn from(val: derive_builder::UninitializedFieldError) -> Self {
        ConfigBuildError::MissingField {
            field: val.field_name().to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn display() {
        let e = Error::BuildFailed {
            circ_id: CircId::from(7_u32),
            reason: CircFailReason::Timeout,
        };
        assert_eq!(e.to_string(), "Circuit 7 failed to build: TIMEOUT");

        let e = Error::BuildRejected(SessionError::Rejected {
            code: 552,
            message: "No such router \"R9\"".into(),
        });
        assert_eq!(
            e.to_string(),
            "Control session refused to launch circuit: Tor rejected command: 552 No such router \"R9\""
        );
    }

    #[test]
    fn uninitialized() {
        let e = ConfigBuildError::from(derive_builder::UninitializedFieldError::new("foo"));
        assert_eq!(
            e,
            ConfigBuildError::MissingField {
                field: "foo".into()
            }
        );
    }
}
