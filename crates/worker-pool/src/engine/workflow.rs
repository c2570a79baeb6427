//! Workflows and the context their bodies suspend through.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};

use super::barrier::{Barrier, BarrierId};
use super::error::WorkError;
use super::handle::{AnyHandle, Handle, Slot};
use super::item::{ItemId, WorkItem};
use super::orchestrator::Core;

/// A cooperative routine run on the orchestrator thread.
///
/// The body suspends only at the `Context` await points. Work items and
/// child workflows it yields run elsewhere; the body resumes once the join
/// it is waiting on resolves.
#[allow(async_fn_in_trait)]
pub trait Workflow: Send + 'static {
    type Output: Clone + Send + 'static;

    async fn run(self, ctx: Context) -> Result<Self::Output, WorkError>;
}

/// Handle a workflow body uses to submit and await items.
#[derive(Clone)]
pub struct Context {
    core: Rc<RefCell<Core>>,
    id: ItemId,
}

impl Context {
    pub(crate) fn new(core: Rc<RefCell<Core>>, id: ItemId) -> Self {
        Self { core, id }
    }

    /// Id of the running workflow.
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Submit `handle` as fire-and-forget without waiting for it.
    pub fn spawn<O: 'static>(&self, handle: Handle<O>) -> Handle<O> {
        let handle = handle.fire_and_forget();
        self.core.borrow_mut().submit(&handle.erase(), self.id);
        handle
    }

    /// Yield a single handle.
    ///
    /// The first yield of a fire-and-forget handle returns `Slot::Pending`
    /// right away.
    pub async fn wait<O: Clone + 'static>(&self, handle: &Handle<O>) -> Result<Slot<O>, WorkError> {
        self.suspend(vec![handle.erase()], false).await?;
        Ok(handle.slot())
    }

    /// Run one work item to completion and return the processed item.
    pub async fn run<T: WorkItem>(&self, item: T) -> Result<T, WorkError> {
        let handle = Handle::work(item);
        self.suspend(vec![handle.erase()], false).await?;
        handle.slot().into_result()
    }

    /// Run a child workflow to completion.
    pub async fn call<W: Workflow>(&self, flow: W) -> Result<W::Output, WorkError> {
        let handle = Handle::workflow(flow);
        self.suspend(vec![handle.erase()], false).await?;
        handle.slot().into_result()
    }

    /// And-join: resume once every handle is done, except fire-and-forget
    /// handles yielded for the first time. The first error raised by a
    /// waited-on item is returned instead.
    ///
    /// Slots are in the order of `handles`.
    pub async fn join<O: Clone + 'static>(&self, handles: &[Handle<O>]) -> Result<Vec<Slot<O>>, WorkError> {
        self.suspend(handles.iter().map(Handle::erase).collect(), false)
            .await?;
        Ok(handles.iter().map(Handle::slot).collect())
    }

    /// Or-join: resume once at least one handle is done. Fire-and-forget
    /// handles get no exemption here.
    pub async fn join_any<O: Clone + 'static>(&self, handles: &[Handle<O>]) -> Result<Vec<Slot<O>>, WorkError> {
        self.suspend(handles.iter().map(Handle::erase).collect(), true)
            .await?;
        Ok(handles.iter().map(Handle::slot).collect())
    }

    /// Run all items in parallel and return them in submission order.
    pub async fn join_all<T: WorkItem>(&self, items: Vec<T>) -> Result<Vec<T>, WorkError> {
        let handles: Vec<Handle<T>> = items.into_iter().map(Handle::work).collect();
        self.join(&handles)
            .await?
            .into_iter()
            .map(Slot::into_result)
            .collect()
    }

    /// Run child workflows in parallel and return their outputs in order.
    pub async fn join_workflows<W: Workflow>(&self, flows: Vec<W>) -> Result<Vec<W::Output>, WorkError> {
        let handles: Vec<Handle<W::Output>> = flows.into_iter().map(Handle::workflow).collect();
        self.join(&handles)
            .await?
            .into_iter()
            .map(Slot::into_result)
            .collect()
    }

    /// Or-join over handles of different types. Returns the index of the
    /// first completed handle.
    pub async fn first_of(&self, handles: &[AnyHandle]) -> Result<usize, WorkError> {
        self.suspend(handles.to_vec(), true).await?;
        handles
            .iter()
            .position(AnyHandle::is_done)
            .ok_or_else(|| WorkError::failed("wait-any resumed with nothing done"))
    }

    fn suspend(&self, handles: Vec<AnyHandle>, wait_any: bool) -> Suspend {
        Suspend {
            core: Rc::clone(&self.core),
            workflow: self.id,
            handles,
            wait_any,
            barrier: None,
        }
    }
}

/// Suspension point of a workflow body.
///
/// The first poll submits every unsubmitted handle and registers a barrier.
/// Later polls check whether the orchestrator has resolved it.
struct Suspend {
    core: Rc<RefCell<Core>>,
    workflow: ItemId,
    handles: Vec<AnyHandle>,
    wait_any: bool,
    barrier: Option<BarrierId>,
}

impl Future for Suspend {
    type Output = Result<(), WorkError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut core = this.core.borrow_mut();

        let barrier_id = match this.barrier {
            Some(id) => id,
            None => {
                let mut barrier = Barrier::new(this.wait_any);
                for handle in &this.handles {
                    let first_yield = core.submit(handle, this.workflow);
                    let exempt =
                        !this.wait_any && first_yield && handle.inner.is_fire_and_forget();
                    barrier.push(handle.id(), exempt, handle.inner.outcome());
                }
                if barrier.is_satisfied() {
                    return Poll::Ready(barrier.into_result());
                }
                let id = core.add_barrier(barrier);
                this.barrier = Some(id);
                id
            }
        };

        let poll = core.poll_barrier(barrier_id, cx.waker());
        if poll.is_ready() {
            this.barrier = None;
        }
        poll
    }
}

impl Drop for Suspend {
    fn drop(&mut self) {
        if let Some(id) = self.barrier.take() {
            if let Ok(mut core) = self.core.try_borrow_mut() {
                core.remove_barrier(id);
            }
        }
    }
}
