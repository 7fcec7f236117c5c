//! The interfaces we need from a Tor control session.
//!
//! Launching Tor, authenticating, and speaking the control protocol are
//! somebody else's job.  This module says what we need from whoever does
//! that job: a way to start circuit builds, and event feeds for streams
//! and circuits.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::circuit::{CircFailReason, ControlledCircuit};
use crate::completion::CircuitCompletion;
use crate::err::SessionError;
use crate::ident::{RelaySelector, StreamInfo};

/// A control session that can build circuits and report on them.
///
/// Implementations must deliver observer callbacks one at a time.
///
/// A lifecycle event for a circuit may arrive before the task that called
/// `build_circuit` has been woken with the reply; the attacher holds on to
/// a bounded number of such events until the launch completes.
#[async_trait]
pub trait ControlSession: Send + Sync + 'static {
    /// The circuit handles this session hands out.
    type Circuit: ControlledCircuit;

    /// Ask Tor to start building a circuit along `path`.
    ///
    /// Returns as soon as Tor has accepted the request and assigned the
    /// circuit an ID: the circuit is not yet usable.  The outcome of the
    /// build is reported later through
    /// [`CircuitObserver::circuit_built`] or
    /// [`CircuitObserver::circuit_failed`].
    async fn build_circuit(
        &self,
        path: &[RelaySelector],
        use_guards: bool,
    ) -> Result<Self::Circuit, SessionError>;

    /// Register an observer for stream events.
    fn add_stream_observer(&self, observer: Arc<dyn StreamObserver<Self::Circuit>>);

    /// Register an observer for circuit lifecycle events.
    fn add_circuit_observer(&self, observer: Arc<dyn CircuitObserver<Self::Circuit>>);
}

/// Something that wants to hear about streams.
///
/// Every method has a do-nothing default, so implementors only need to
/// override the events they care about.
pub trait StreamObserver<C>: Send + Sync {
    /// A new stream has appeared, and Tor has not yet attached it.
    ///
    /// Return a completion for the circuit that the stream should use, or
    /// `None` to let Tor (or another observer) decide.  The session is
    /// responsible for attaching the stream once the completion resolves.
    fn new_stream(&self, stream: &StreamInfo) -> Option<CircuitCompletion<C>> {
        let _ = stream;
        None
    }

    /// A stream has closed.
    fn stream_closed(&self, stream: &StreamInfo) {
        let _ = stream;
    }
}

/// Something that wants to hear about circuit builds.
pub trait CircuitObserver<C>: Send + Sync {
    /// A circuit has finished building and is ready for use.
    fn circuit_built(&self, circ: &C) {
        let _ = circ;
    }

    /// A circuit could not be built.
    fn circuit_failed(&self, circ: &C, reason: &CircFailReason) {
        let _ = (circ, reason);
    }
}

/// A control session through which we can adjust Tor's configuration.
#[async_trait]
pub trait TorConfigSession: Send + Sync {
    /// Return the current value of the option `key`, or `None` if it is unset.
    async fn get_conf(&self, key: &str) -> Result<Option<String>, SessionError>;

    /// Set every option in `options`, in a single command.
    async fn set_conf(&self, options: &[(String, String)]) -> Result<(), SessionError>;

    /// Return a future that resolves when Tor next announces a new consensus.
    ///
    /// Only consensuses that arrive after this method is called count, so
    /// call it before doing whatever is expected to trigger one.
    fn next_consensus(&self) -> BoxFuture<'static, Result<(), SessionError>>;
}
