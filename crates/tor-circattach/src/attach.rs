//! Match client streams to the circuits that were built for them.
//!
//! A request for a circuit involves two independent races:
//!
//!  * Tor builds (or fails to build) the circuit, and tells us so through
//!    a circuit event that names the circuit by its [`CircId`].
//!  * The client opens its connection, and Tor tells us about the new
//!    stream, which we can only recognize by its [`ClientIdentity`].
//!
//! The caller never sees circuit IDs, and Tor never sees client
//! identities in circuit events, so we keep two tables with two
//! different keys.  Both lead to the same [`CircuitCompletion`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::task::{Spawn, SpawnExt as _};
use tracing::{debug, trace, warn};

use crate::circuit::{CircFailReason, CircPurpose, ControlledCircuit};
use crate::completion::{self, CircuitCompletion, CompletionSender};
use crate::err::SessionError;
use crate::ident::{CircId, ClientIdentity, RelaySelector, StreamInfo};
use crate::session::{CircuitObserver, ControlSession, StreamObserver};
use crate::tables::{InFlight, InFlightCircuits, PendingRequests};
use crate::{Error, Result};

/// How many early circuit outcomes we remember while launches are outstanding.
///
/// A control session may report that a circuit was built or failed before
/// the task that launched it has seen Tor's reply to the launch.  We hold
/// on to such outcomes, since they might belong to us, but only a few.
const MAX_EARLY_OUTCOMES: usize = 64;

/// Mutable state of a [`Correlator`].
struct Tables<C> {
    /// Requests waiting for their client's stream.
    pending: PendingRequests<C>,
    /// Requests waiting for their circuit to finish building.
    in_flight: InFlightCircuits<C>,
    /// Number of launches for which the session has not yet answered.
    launching: usize,
    /// Outcomes for unknown circuits that arrived while `launching > 0`.
    ///
    /// Oldest first.
    early: VecDeque<(CircId, Result<C>)>,
}

impl<C> Tables<C> {
    /// Remember an outcome for a circuit we might be about to learn about.
    fn remember_early(&mut self, id: CircId, outcome: Result<C>) {
        if self.early.len() >= MAX_EARLY_OUTCOMES {
            self.early.pop_front();
        }
        self.early.push_back((id, outcome));
    }

    /// Remove and return any early outcome recorded for `id`.
    fn take_early(&mut self, id: &CircId) -> Option<Result<C>> {
        let pos = self.early.iter().position(|(eid, _)| eid == id)?;
        self.early.remove(pos).map(|(_, outcome)| outcome)
    }
}

/// The stream and circuit observer behind a [`CircuitAttacher`].
///
/// One `Correlator` is registered with the control session under both
/// observer roles.
pub(crate) struct Correlator<C> {
    /// The tables, behind a lock.
    ///
    /// We never hold this lock across an await point.
    tables: Mutex<Tables<C>>,
}

impl<C: ControlledCircuit> Correlator<C> {
    /// Construct a new `Correlator` with empty tables.
    fn new() -> Self {
        Correlator {
            tables: Mutex::new(Tables {
                pending: PendingRequests::default(),
                in_flight: InFlightCircuits::default(),
                launching: 0,
                early: VecDeque::new(),
            }),
        }
    }

    /// Lock and return the tables.
    fn lock(&self) -> MutexGuard<'_, Tables<C>> {
        self.tables.lock().expect("correlator lock poisoned")
    }

    /// Register a request for `client`, and note that a launch is starting.
    ///
    /// The returned guard must be kept until the session has answered.
    fn start_launch(
        self: &Arc<Self>,
        client: ClientIdentity,
        completion: &CircuitCompletion<C>,
    ) -> LaunchGuard<C> {
        let mut tables = self.lock();
        if tables.pending.register(client, completion.clone()).is_some() {
            // The earlier request will still learn about its circuit, but
            // its stream will now be matched to this one instead.
            warn!(
                "Circuit already requested for client {}; replacing the earlier request",
                client
            );
        }
        tables.launching += 1;
        debug!("Requested circuit for client {}", client);
        LaunchGuard {
            correlator: Arc::clone(self),
            client,
            completion: completion.clone(),
            settled: false,
        }
    }

    /// Report the outcome of the build of circuit `id`, if it is ours.
    fn resolve(&self, id: &CircId, outcome: Result<C>) {
        let mut tables = self.lock();
        let request = tables.in_flight.take(id);
        match request {
            Some(request) => {
                if outcome.is_err() {
                    // No point waiting for a stream that can't be carried.
                    tables
                        .pending
                        .take_if_same(&request.client, &request.completion);
                }
                drop(tables);
                debug!(
                    "Circuit {} for client {} {}",
                    id,
                    request.client,
                    if outcome.is_ok() { "built" } else { "failed" }
                );
                request.sender.resolve(outcome);
            }
            None if tables.launching > 0 => {
                trace!("Holding outcome for unknown circuit {} during launch", id);
                tables.remember_early(id.clone(), outcome);
            }
            None => trace!("Ignoring event for untracked circuit {}", id),
        }
    }

    /// Return the number of requests still waiting for their stream.
    fn n_pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Return the number of requests still waiting for their circuit.
    fn n_in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }
}

impl<C: ControlledCircuit> StreamObserver<C> for Correlator<C> {
    fn new_stream(&self, stream: &StreamInfo) -> Option<CircuitCompletion<C>> {
        let Some(client) = stream.client_identity() else {
            trace!("Stream {} has no source address; not ours", stream.id);
            return None;
        };
        let found = self.lock().pending.take(&client);
        if found.is_some() {
            debug!("Attaching stream {} from {} to its requested circuit", stream.id, client);
        } else {
            trace!("No circuit was requested for stream {} from {}", stream.id, client);
        }
        found
    }
}

/// Lifecycle events for circuits we are not tracking are ignored, with one
/// exception: while a launch is outstanding, they are remembered (up to
/// [`MAX_EARLY_OUTCOMES`] of them) in case they belong to that launch.
impl<C: ControlledCircuit> CircuitObserver<C> for Correlator<C> {
    fn circuit_built(&self, circ: &C) {
        if circ.purpose() != &CircPurpose::General {
            trace!(
                "Ignoring built circuit {} with purpose {}",
                circ.id(),
                circ.purpose()
            );
            return;
        }
        self.resolve(circ.id(), Ok(circ.clone()));
    }

    fn circuit_failed(&self, circ: &C, reason: &CircFailReason) {
        let err = Error::BuildFailed {
            circ_id: circ.id().clone(),
            reason: reason.clone(),
        };
        self.resolve(circ.id(), Err(err));
    }
}

/// Proof that a launch is outstanding.
///
/// Dropping this tells the [`Correlator`] that the launch is over, whether
/// or not it succeeded.  If it is dropped before the session answered, the
/// launch task was lost, and the request is withdrawn.
struct LaunchGuard<C: ControlledCircuit> {
    /// The correlator where the launch was registered.
    correlator: Arc<Correlator<C>>,
    /// The client the circuit is for.
    client: ClientIdentity,
    /// A copy of the request's completion.
    completion: CircuitCompletion<C>,
    /// True once the session has answered the launch, either way.
    settled: bool,
}

impl<C: ControlledCircuit> LaunchGuard<C> {
    /// The session has accepted the launch and created `circ`.
    fn accepted(mut self, circ: &C, sender: CompletionSender<C>) {
        self.settled = true;
        let id = circ.id().clone();
        let mut tables = self.correlator.lock();
        let early = tables.take_early(&id);
        if let Some(outcome) = early {
            if outcome.is_err() {
                tables.pending.take_if_same(&self.client, &self.completion);
            }
            drop(tables);
            debug!("Circuit {} for client {} finished before launch returned", id, self.client);
            sender.resolve(outcome);
            return;
        }
        let request = InFlight {
            client: self.client,
            completion: self.completion.clone(),
            sender,
        };
        if let Some(old) = tables.in_flight.track(id.clone(), request) {
            // Tor doesn't reuse the ID of a live circuit, so the old
            // request can never be resolved.
            warn!(
                "Circuit ID {} reused; abandoning request from client {}",
                id, old.client
            );
        }
        trace!("Circuit {} launched for client {}", id, self.client);
    }

    /// The session refused to launch the circuit.
    fn rejected(mut self, sender: CompletionSender<C>, err: SessionError) {
        self.settled = true;
        self.correlator
            .lock()
            .pending
            .take_if_same(&self.client, &self.completion);
        debug!("Unable to launch circuit for client {}: {}", self.client, err);
        sender.fail(Error::BuildRejected(err));
    }
}

impl<C: ControlledCircuit> Drop for LaunchGuard<C> {
    fn drop(&mut self) {
        if let Ok(mut tables) = self.correlator.tables.lock() {
            if !self.settled {
                // Our sender is gone with the task, so no stream should wait
                // on this request.
                tables.pending.take_if_same(&self.client, &self.completion);
                debug!("Launch for client {} abandoned", self.client);
            }
            tables.launching = tables.launching.saturating_sub(1);
            if tables.launching == 0 {
                tables.early.clear();
            }
        }
    }
}

/// Launch a circuit through `session`, and hand the result to `launch`.
async fn launch_circuit<S: ControlSession>(
    session: Arc<S>,
    launch: LaunchGuard<S::Circuit>,
    path: Vec<RelaySelector>,
    use_guards: bool,
    sender: CompletionSender<S::Circuit>,
) {
    match session.build_circuit(&path, use_guards).await {
        Ok(circ) => launch.accepted(&circ, sender),
        Err(e) => launch.rejected(sender, e),
    }
}

/// Builds caller-chosen paths and attaches the matching client streams to them.
///
/// Create one of these per control session.  It registers itself with the
/// session as soon as it is constructed.
pub struct CircuitAttacher<S: ControlSession, R> {
    /// The control session we launch circuits through.
    session: Arc<S>,
    /// Executor for launch tasks.
    runtime: R,
    /// The observer that keeps our tables.
    correlator: Arc<Correlator<S::Circuit>>,
}

impl<S: ControlSession, R: Spawn> CircuitAttacher<S, R> {
    /// Create a new `CircuitAttacher` and register it with `session`.
    pub fn new(session: Arc<S>, runtime: R) -> Self {
        let correlator = Arc::new(Correlator::new());
        session.add_stream_observer(Arc::clone(&correlator) as _);
        session.add_circuit_observer(Arc::clone(&correlator) as _);
        CircuitAttacher {
            session,
            runtime,
            correlator,
        }
    }

    /// Ask for a circuit along `path`, for the stream that `client` is
    /// about to open.
    ///
    /// Returns immediately.  The returned completion resolves once Tor has
    /// built the circuit, or with an error if it could not.  When the
    /// client's stream appears, it is attached to the same circuit.
    ///
    /// There is no timeout here: callers who want one should race the
    /// completion against a timer, and call
    /// [`cancel_request`](Self::cancel_request) if the timer wins.
    ///
    /// Asking twice for the same `client` before its stream arrives
    /// replaces the first request's claim on the stream.
    pub fn request_circuit(
        &self,
        client: ClientIdentity,
        path: Vec<RelaySelector>,
        use_guards: bool,
    ) -> CircuitCompletion<S::Circuit> {
        let (sender, completion) = completion::channel();
        if path.is_empty() {
            sender.fail(Error::EmptyPath);
            return completion;
        }

        let launch = self.correlator.start_launch(client, &completion);
        let task = launch_circuit(Arc::clone(&self.session), launch, path, use_guards, sender);
        if let Err(e) = self.runtime.spawn(task) {
            // The task has been dropped, taking its request with it, and the
            // completion will report that it was abandoned.
            warn!("Unable to spawn circuit launch task: {}", e);
        }
        completion
    }

    /// Forget the request for `client`'s stream, if there is one.
    ///
    /// Returns true if a request was removed.  Use this to clean up after
    /// a client connection that never materialized.  The circuit itself is
    /// not affected.
    pub fn cancel_request(&self, client: &ClientIdentity) -> bool {
        let removed = self.correlator.lock().pending.take(client).is_some();
        if removed {
            debug!("Cancelled circuit request for client {}", client);
        }
        removed
    }

    /// Return the number of requests whose stream has not yet appeared.
    pub fn n_pending(&self) -> usize {
        self.correlator.n_pending()
    }

    /// Return the number of requests whose circuit is still being built.
    pub fn n_in_flight(&self) -> usize {
        self.correlator.n_in_flight()
    }
}
