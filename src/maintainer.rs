//! Background matcher between blocked acquires and returned resources

use crate::errors::{PoolError, PoolResult};
use crate::metrics::MetricsTracker;
use crate::pool::Shared;

use crossbeam::channel::{self, Receiver, Sender, select};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// What a waiter is granted by the maintainer
pub(crate) enum Handoff<T> {
    /// A returned resource
    Resource(T),

    /// A construction slot freed by a failed constructor; the waiter builds
    /// its own resource
    Construct,
}

pub(crate) type Answer<T, E> = PoolResult<Handoff<T>, E>;

/// Where the answer to a pending request goes
pub(crate) enum Reply<T, E> {
    Blocking(Sender<Answer<T, E>>),
    Async(oneshot::Sender<Answer<T, E>>),
}

impl<T, E> Reply<T, E> {
    /// Hands the answer back when the requester is gone.
    fn send(self, result: Answer<T, E>) -> Result<(), Answer<T, E>> {
        match self {
            Reply::Blocking(tx) => tx.send(result).map_err(|err| err.into_inner()),
            Reply::Async(tx) => tx.send(result),
        }
    }

    fn is_abandoned(&self) -> bool {
        match self {
            // a blocked thread cannot walk away
            Reply::Blocking(_) => false,
            Reply::Async(tx) => tx.is_closed(),
        }
    }
}

/// An acquire that found the pool saturated
pub(crate) struct Request<T, E> {
    pub deadline: Instant,
    pub reply: Reply<T, E>,
}

/// Owner-side handle of the maintainer thread
pub(crate) struct MaintainerHandle<T, E> {
    requests: Sender<Request<T, E>>,
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl<T, E> MaintainerHandle<T, E> {
    pub fn submit(&self, request: Request<T, E>) -> Result<(), Request<T, E>> {
        self.requests.send(request).map_err(|err| err.into_inner())
    }

    /// Stops the maintainer and waits for it to exit. Queued requests are
    /// dropped, which closes their reply channels.
    pub fn shutdown(self) {
        let MaintainerHandle { requests, shutdown, thread } = self;
        drop(shutdown);
        drop(requests);
        if thread.join().is_err() {
            warn!("pool maintainer panicked");
        }
    }
}

pub(crate) struct Maintainer<T, E> {
    shared: Arc<Shared<T>>,
    requests: Receiver<Request<T, E>>,
    returns: Receiver<()>,
    shutdown: Receiver<()>,
}

impl<T: Send + 'static, E: Send + 'static> Maintainer<T, E> {
    pub fn spawn(shared: Arc<Shared<T>>, returns: Receiver<()>) -> MaintainerHandle<T, E> {
        let (requests_tx, requests) = channel::unbounded();
        let (shutdown_tx, shutdown) = channel::bounded(0);

        let maintainer = Maintainer { shared, requests, returns, shutdown };
        let thread = std::thread::Builder::new()
            .name("respool-maintainer".to_string())
            .spawn(move || maintainer.run())
            .expect("failed to spawn pool maintainer thread");

        MaintainerHandle {
            requests: requests_tx,
            shutdown: shutdown_tx,
            thread,
        }
    }

    fn run(self) {
        debug!("pool maintainer started");
        loop {
            select! {
                recv(self.requests) -> request => match request {
                    Ok(request) => {
                        if self.serve(request).is_break() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(self.shutdown) -> _ => break,
            }
        }
        debug!("pool maintainer stopped");
    }

    /// Resolves one pending request: a returned resource, a freed slot, a
    /// timeout, or shutdown.
    fn serve(&self, request: Request<T, E>) -> ControlFlow<()> {
        let Request { deadline, reply } = request;

        // Anything returned before now is visible in the idle set.
        while self.returns.try_recv().is_ok() {}

        loop {
            if reply.is_abandoned() {
                trace!("waiting acquire was abandoned");
                self.shared.abandon_wait();
                return ControlFlow::Continue(());
            }

            if let Some(handoff) = self.shared.claim_for_waiter() {
                match reply.send(Ok(handoff)) {
                    Ok(()) => MetricsTracker::incr(&self.shared.metrics.waits_fulfilled),
                    Err(Ok(handoff)) => self.shared.give_back(handoff),
                    Err(Err(_)) => {}
                }
                return ControlFlow::Continue(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.shared.abandon_wait();
                MetricsTracker::incr(&self.shared.metrics.wait_timeouts);
                let timeout = self.shared.config.wait_timeout;
                warn!(?timeout, "no resource returned in time");
                let _ = reply.send(Err(PoolError::ResourceUnavailable(timeout)));
                return ControlFlow::Continue(());
            }

            select! {
                recv(self.returns) -> _ => trace!("resource returned to a saturated pool"),
                recv(self.shutdown) -> _ => {
                    self.shared.abandon_wait();
                    let _ = reply.send(Err(PoolError::Closed));
                    return ControlFlow::Break(());
                }
                default(remaining) => {}
            }
        }
    }
}
