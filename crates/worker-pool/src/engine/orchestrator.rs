//! The single thread that runs workflow bodies and routes items.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Poll, Waker};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use futures::FutureExt;

use super::barrier::{Barrier, BarrierId};
use super::completion::CompletionSink;
use super::error::WorkError;
use super::handle::{AnyHandle, Erased};
use super::item::{Envelope, ItemId, Payload};
use super::pool::panic_message;
use super::workflow::Context;

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) type Routes = HashMap<&'static str, Sender<Envelope>>;

struct Waiter {
    handle: Rc<dyn Erased>,
    barriers: Vec<BarrierId>,
}

/// State shared by every workflow body on the orchestrator thread.
pub(crate) struct Core {
    routes: Arc<Routes>,
    inbox: Sender<Envelope>,
    sink: Arc<CompletionSink>,
    waiters: HashMap<ItemId, Waiter>,
    barriers: HashMap<BarrierId, Barrier>,
    next_barrier: BarrierId,
}

impl Core {
    fn new(routes: Arc<Routes>, inbox: Sender<Envelope>, sink: Arc<CompletionSink>) -> Self {
        Self {
            routes,
            inbox,
            sink,
            waiters: HashMap::new(),
            barriers: HashMap::new(),
            next_barrier: 1,
        }
    }

    /// Submit `handle` if it has not been yet. Returns whether it was
    /// submitted by this call.
    pub(crate) fn submit(&mut self, handle: &AnyHandle, workflow: ItemId) -> bool {
        let Some(mut envelope) = handle.inner.take_envelope() else {
            return false;
        };
        envelope.parent = Some(workflow);
        self.waiters.insert(
            envelope.id,
            Waiter {
                handle: Rc::clone(&handle.inner),
                barriers: Vec::new(),
            },
        );
        tracing::trace!(
            id = envelope.id,
            kind = envelope.kind,
            parent = workflow,
            fire_and_forget = envelope.fire_and_forget,
            "Submitting item"
        );
        self.route(envelope);
        true
    }

    /// Workflows go back to this thread's inbox, work items to their pool.
    fn route(&self, mut envelope: Envelope) {
        let target = if matches!(envelope.payload, Payload::Workflow(_)) {
            Some(&self.inbox)
        } else {
            self.routes.get(envelope.kind)
        };

        let Some(target) = target else {
            tracing::error!(kind = envelope.kind, "No worker pool registered for item kind");
            let kind = envelope.kind;
            envelope.fail(WorkError::failed(format!(
                "No worker pool registered for {}",
                kind
            )));
            self.reinject(envelope);
            return;
        };

        if let Err(e) = target.send(envelope) {
            let mut envelope = e.into_inner();
            envelope.fail(WorkError::Shutdown);
            self.reinject(envelope);
        }
    }

    fn reinject(&self, envelope: Envelope) {
        if self.inbox.send(envelope).is_err() {
            tracing::warn!("Orchestrator inbox closed, dropping item");
        }
    }

    pub(crate) fn add_barrier(&mut self, barrier: Barrier) -> BarrierId {
        let id = self.next_barrier;
        self.next_barrier += 1;
        for item in barrier.outstanding() {
            if let Some(waiter) = self.waiters.get_mut(&item) {
                waiter.barriers.push(id);
            }
        }
        self.barriers.insert(id, barrier);
        id
    }

    pub(crate) fn poll_barrier(&mut self, id: BarrierId, waker: &Waker) -> Poll<Result<(), WorkError>> {
        let satisfied = match self.barriers.get_mut(&id) {
            Some(barrier) if barrier.is_satisfied() => true,
            Some(barrier) => {
                barrier.set_waker(waker);
                false
            }
            None => return Poll::Ready(Err(WorkError::failed("join barrier lost"))),
        };
        if !satisfied {
            return Poll::Pending;
        }
        match self.remove_barrier(id) {
            Some(barrier) => Poll::Ready(barrier.into_result()),
            None => Poll::Ready(Err(WorkError::failed("join barrier lost"))),
        }
    }

    pub(crate) fn remove_barrier(&mut self, id: BarrierId) -> Option<Barrier> {
        let barrier = self.barriers.remove(&id)?;
        for item in barrier.outstanding() {
            if let Some(waiter) = self.waiters.get_mut(&item) {
                waiter.barriers.retain(|b| *b != id);
            }
        }
        Some(barrier)
    }

    /// Store a completed item in its handle and wake any satisfied barrier.
    fn deliver(&mut self, envelope: Envelope) {
        let Some(waiter) = self.waiters.remove(&envelope.id) else {
            tracing::debug!(id = envelope.id, kind = envelope.kind, "Completed item has no waiter");
            return;
        };

        let id = envelope.id;
        let outcome = match &envelope.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        };
        if let Err(e) = &outcome {
            if waiter.barriers.is_empty() && envelope.fire_and_forget {
                tracing::debug!(id, kind = envelope.kind, error = %e, "Fire-and-forget item failed");
            }
        }

        waiter.handle.complete(envelope);

        for barrier_id in waiter.barriers {
            if let Some(barrier) = self.barriers.get_mut(&barrier_id) {
                if barrier.record(id, &outcome) {
                    barrier.wake();
                }
            }
        }
    }

    /// Hand a finished workflow to its parent, or out of the engine for roots.
    fn finish_workflow(&self, envelope: Envelope) {
        if envelope.root {
            self.sink.complete(envelope.into_completion());
        } else {
            self.reinject(envelope);
        }
    }
}

/// Runs workflow bodies on a local executor and dispatches inbox envelopes.
pub(crate) struct Orchestrator {
    core: Rc<RefCell<Core>>,
    pool: LocalPool,
    spawner: LocalSpawner,
    inbox: Receiver<Envelope>,
    stop: Arc<AtomicBool>,
}

impl Orchestrator {
    pub(crate) fn new(
        routes: Arc<Routes>,
        inbox_tx: Sender<Envelope>,
        inbox: Receiver<Envelope>,
        sink: Arc<CompletionSink>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            core: Rc::new(RefCell::new(Core::new(routes, inbox_tx, sink))),
            pool,
            spawner,
            inbox,
            stop,
        }
    }

    pub(crate) fn run(mut self) {
        tracing::debug!("Orchestrator started");
        while !self.stop.load(Ordering::Acquire) {
            self.pool.run_until_stalled();
            match self.inbox.recv_timeout(POLL_INTERVAL) {
                Ok(envelope) => self.dispatch(envelope),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!("Orchestrator stopped");
    }

    fn dispatch(&mut self, envelope: Envelope) {
        if !envelope.done && matches!(envelope.payload, Payload::Workflow(_)) {
            self.start(envelope);
        } else {
            self.core.borrow_mut().deliver(envelope);
        }
    }

    fn start(&mut self, envelope: Envelope) {
        let Envelope {
            id,
            kind,
            payload,
            parent,
            fire_and_forget,
            root,
            ..
        } = envelope;
        let Payload::Workflow(start) = payload else {
            return;
        };

        tracing::debug!(id, kind, ?parent, root, "Starting workflow");
        let ctx = Context::new(Rc::clone(&self.core), id);
        let core = Rc::clone(&self.core);

        let body = async move {
            let result = AssertUnwindSafe(start(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(WorkError::Panicked(panic_message(panic.as_ref()))));

            match &result {
                Ok(_) => tracing::debug!(id, kind, "Workflow finished"),
                Err(e) => tracing::debug!(id, kind, error = %e, "Workflow failed"),
            }

            let done = Envelope::finished(id, kind, parent, fire_and_forget, root, result);
            core.borrow().finish_workflow(done);
        };

        if let Err(e) = self.spawner.spawn_local(body) {
            tracing::error!(id, kind, error = ?e, "Failed to start workflow");
        }
    }
}
