//! The two registries behind a [`Correlator`](crate::attach::Correlator).
//!
//! These are plain maps with no locking of their own: their owner
//! serializes access to them.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use educe::Educe;

use crate::completion::{CircuitCompletion, CompletionSender};
use crate::ident::{CircId, ClientIdentity};

/// Requests that are waiting for their client's stream to show up.
#[derive(Educe)]
#[educe(Default)]
pub(crate) struct PendingRequests<C> {
    /// Map from client identity to the completion the stream should wait on.
    by_client: HashMap<ClientIdentity, CircuitCompletion<C>>,
}

impl<C: Clone> PendingRequests<C> {
    /// Register `completion` as the circuit for `client`'s stream.
    ///
    /// Returns the completion this replaces, if there was one.
    pub(crate) fn register(
        &mut self,
        client: ClientIdentity,
        completion: CircuitCompletion<C>,
    ) -> Option<CircuitCompletion<C>> {
        self.by_client.insert(client, completion)
    }

    /// Remove and return the completion registered for `client`.
    pub(crate) fn take(&mut self, client: &ClientIdentity) -> Option<CircuitCompletion<C>> {
        self.by_client.remove(client)
    }

    /// Remove the entry for `client`, but only if it belongs to the same
    /// request as `completion`.
    ///
    /// Returns true if an entry was removed.
    pub(crate) fn take_if_same(
        &mut self,
        client: &ClientIdentity,
        completion: &CircuitCompletion<C>,
    ) -> bool {
        match self.by_client.entry(*client) {
            Entry::Occupied(ent) if ent.get().same_request(completion) => {
                ent.remove();
                true
            }
            _ => false,
        }
    }

    /// Return the number of requests still waiting for a stream.
    pub(crate) fn len(&self) -> usize {
        self.by_client.len()
    }
}

/// A circuit that Tor has started building for one of our requests.
#[derive(Educe)]
#[educe(Debug)]
pub(crate) struct InFlight<C> {
    /// The client whose request launched this circuit.
    pub(crate) client: ClientIdentity,
    /// A copy of the request's completion, to recognize its pending entry.
    #[educe(Debug(ignore))]
    pub(crate) completion: CircuitCompletion<C>,
    /// Where to report the outcome of the build.
    pub(crate) sender: CompletionSender<C>,
}

/// Circuits that Tor has started building on our behalf.
#[derive(Educe)]
#[educe(Default)]
pub(crate) struct InFlightCircuits<C> {
    /// Map from circuit ID to the request waiting on that circuit.
    by_circ: HashMap<CircId, InFlight<C>>,
}

impl<C> InFlightCircuits<C> {
    /// Start tracking the circuit `id` for `request`.
    ///
    /// Returns the request this replaces, if there was one.
    pub(crate) fn track(&mut self, id: CircId, request: InFlight<C>) -> Option<InFlight<C>> {
        self.by_circ.insert(id, request)
    }

    /// Stop tracking the circuit `id`, returning its request.
    pub(crate) fn take(&mut self, id: &CircId) -> Option<InFlight<C>> {
        self.by_circ.remove(id)
    }

    /// Return the number of circuits being tracked.
    pub(crate) fn len(&self) -> usize {
        self.by_circ.len()
    }
}
