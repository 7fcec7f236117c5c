//! Close circuits promptly once their stream is done with them.

use tracing::trace;

use crate::circuit::ControlledCircuit;
use crate::ident::StreamInfo;
use crate::session::StreamObserver;

/// A [`StreamObserver`] that closes one circuit when a stream closes.
///
/// Without this, a circuit that we built for a single measurement would
/// linger until Tor's idle-circuit timeout expired.  Register one of
/// these for the client's stream once its circuit is ready.
///
/// The close is only a request, and only if the circuit is unused, so
/// it never disturbs another stream that is still on the circuit.
#[derive(Debug, Clone)]
pub struct StreamCloseReaper<C> {
    /// The circuit to close.
    circuit: C,
}

impl<C: ControlledCircuit> StreamCloseReaper<C> {
    /// Return a new `StreamCloseReaper` for `circuit`.
    pub fn new(circuit: C) -> Self {
        StreamCloseReaper { circuit }
    }

    /// Return the circuit this reaper will close.
    pub fn circuit(&self) -> &C {
        &self.circuit
    }
}

impl<C: ControlledCircuit> StreamObserver<C> for StreamCloseReaper<C> {
    fn stream_closed(&self, stream: &StreamInfo) {
        trace!(
            "Stream {} closed; closing circuit {} if unused",
            stream.id,
            self.circuit.id()
        );
        self.circuit.close(true);
    }
}
