//! A single-resolution handle for the outcome of a circuit request.
//!
//! Every request has exactly one [`CompletionSender`], which is consumed
//! when it reports the outcome, so a request cannot be resolved twice.
//! The receiving side, [`CircuitCompletion`], can be cloned: the caller
//! holds one copy, and the copy registered for the client's stream is
//! given to the control session when that stream shows up.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use educe::Educe;
use futures::FutureExt as _;
use futures::channel::oneshot;
use futures::future::Shared;

use crate::{Error, Result};

/// The value carried from a [`CompletionSender`] to its completions.
type Outcome<C> = Result<C>;

/// Return a new connected [`CompletionSender`] and [`CircuitCompletion`].
pub(crate) fn channel<C: Clone>() -> (CompletionSender<C>, CircuitCompletion<C>) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSender { tx },
        CircuitCompletion { inner: rx.shared() },
    )
}

/// The resolving side of a circuit request.
#[derive(Educe)]
#[educe(Debug)]
pub(crate) struct CompletionSender<C> {
    /// Channel to every clone of the matching [`CircuitCompletion`].
    #[educe(Debug(ignore))]
    tx: oneshot::Sender<Outcome<C>>,
}

impl<C> CompletionSender<C> {
    /// Resolve the request with an error.
    pub(crate) fn fail(self, err: Error) {
        self.resolve(Err(err));
    }

    /// Resolve the request with `outcome`.
    pub(crate) fn resolve(self, outcome: Outcome<C>) {
        // Nobody may be waiting any more; that's fine.
        let _ = self.tx.send(outcome);
    }
}

/// A future for the circuit that was requested for one client connection.
///
/// Resolves once Tor reports that the circuit was built, or with an
/// [`Error`] if it could not be.  Clones all resolve to the same outcome.
#[derive(Educe)]
#[educe(Clone)]
#[must_use = "a CircuitCompletion does nothing unless polled"]
pub struct CircuitCompletion<C> {
    /// The shared receiving end of the oneshot channel.
    inner: Shared<oneshot::Receiver<Outcome<C>>>,
}

/// Show whether a completion has resolved, but not its contents.
///
/// A completion counts as resolved here once some clone of it has been polled.
impl<C: Clone> fmt::Debug for CircuitCompletion<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.peek() {
            None => "pending",
            Some(Ok(Ok(_))) => "built",
            Some(Ok(Err(_))) => "failed",
            Some(Err(_)) => "abandoned",
        };
        f.debug_struct("CircuitCompletion")
            .field("state", &format_args!("{}", state))
            .finish()
    }
}

impl<C: Clone> CircuitCompletion<C> {
    /// Return the outcome, if this request has already been resolved.
    ///
    /// Does not register for wakeups; use the `Future` implementation to wait.
    pub fn peek(&self) -> Option<Result<C>> {
        self.clone().now_or_never()
    }

    /// Return true if `self` and `other` belong to the same request.
    pub fn same_request(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

/// Turn a dropped sender into [`Error::Abandoned`].
fn flatten<C>(r: std::result::Result<Outcome<C>, oneshot::Canceled>) -> Outcome<C> {
    r.unwrap_or(Err(Error::Abandoned))
}

impl<C: Clone> Future for CircuitCompletion<C> {
    type Output = Result<C>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx).map(flatten)
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
    use futures::executor::block_on;

    #[test]
    fn resolve_once_seen_by_all_clones() {
        let (tx, c1) = channel::<u32>();
        let c2 = c1.clone();
        assert!(c1.peek().is_none());
        assert_eq!(format!("{:?}", c1), "CircuitCompletion { state: pending }");

        tx.resolve(Ok(17));
        assert_eq!(block_on(c1).unwrap(), 17);
        assert_eq!(c2.peek().unwrap().unwrap(), 17);
        assert_eq!(block_on(c2).unwrap(), 17);
    }

    #[test]
    fn failure() {
        let (tx, c) = channel::<u32>();
        tx.fail(Error::EmptyPath);
        assert!(matches!(block_on(c.clone()), Err(Error::EmptyPath)));
        assert_eq!(format!("{:?}", c), "CircuitCompletion { state: failed }");
    }

    #[test]
    fn dropped_sender_is_abandoned() {
        let (tx, c) = channel::<u32>();
        drop(tx);
        assert!(matches!(block_on(c), Err(Error::Abandoned)));
    }

    #[test]
    fn same_request() {
        let (_tx1, a) = channel::<u32>();
        let (_tx2, b) = channel::<u32>();
        assert!(a.same_request(&a.clone()));
        assert!(!a.same_request(&b));
    }

    #[test]
    fn nobody_listening() {
        let (tx, c) = channel::<u32>();
        drop(c);
        // Must not panic.
        tx.resolve(Ok(3));
    }
}
