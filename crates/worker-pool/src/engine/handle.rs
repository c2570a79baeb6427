//! Handles to submitted items as seen from inside a workflow body.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::error::WorkError;
use super::item::{Envelope, ItemId, Payload, WorkItem};
use super::workflow::Workflow;

enum State<O> {
    Unsubmitted(Envelope),
    InFlight,
    Done(Result<O, WorkError>),
}

pub(crate) struct HandleInner<O> {
    id: ItemId,
    kind: &'static str,
    state: RefCell<State<O>>,
    fire_and_forget: Cell<bool>,
    decode: fn(Envelope) -> Result<O, WorkError>,
}

/// Type-erased view of a handle used by the orchestrator.
pub(crate) trait Erased {
    fn id(&self) -> ItemId;
    fn kind(&self) -> &'static str;
    fn is_fire_and_forget(&self) -> bool;
    /// Take the envelope for submission. `None` once submitted.
    fn take_envelope(&self) -> Option<Envelope>;
    /// `Some` once the item completed.
    fn outcome(&self) -> Option<Result<(), WorkError>>;
    fn complete(&self, envelope: Envelope);
}

impl<O: 'static> Erased for HandleInner<O> {
    fn id(&self) -> ItemId {
        self.id
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn is_fire_and_forget(&self) -> bool {
        self.fire_and_forget.get()
    }

    fn take_envelope(&self) -> Option<Envelope> {
        let mut state = self.state.borrow_mut();
        if !matches!(*state, State::Unsubmitted(_)) {
            return None;
        }
        match std::mem::replace(&mut *state, State::InFlight) {
            State::Unsubmitted(mut envelope) => {
                envelope.fire_and_forget = self.fire_and_forget.get();
                Some(envelope)
            }
            _ => None,
        }
    }

    fn outcome(&self) -> Option<Result<(), WorkError>> {
        match &*self.state.borrow() {
            State::Done(Ok(_)) => Some(Ok(())),
            State::Done(Err(e)) => Some(Err(e.clone())),
            _ => None,
        }
    }

    fn complete(&self, envelope: Envelope) {
        let result = (self.decode)(envelope);
        *self.state.borrow_mut() = State::Done(result);
    }
}

/// A work item or child workflow owned by a workflow body.
///
/// Yielding a handle (through [`Context`](super::Context)) submits it the
/// first time and waits for it according to the join rules. Once complete
/// the handle keeps its result, so yielding it again returns immediately.
pub struct Handle<O> {
    inner: Rc<HandleInner<O>>,
}

impl<O> Clone for Handle<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: WorkItem> Handle<T> {
    /// Handle for a work item. Its result is the processed item.
    pub fn work(item: T) -> Self {
        Self::from_envelope(Envelope::work(item), decode_work::<T>)
    }
}

impl<O: Clone + Send + 'static> Handle<O> {
    /// Handle for a child workflow.
    pub fn workflow<W: Workflow<Output = O>>(flow: W) -> Self {
        Self::from_envelope(Envelope::workflow(flow, false), decode_output::<O>)
    }
}

impl<O: 'static> Handle<O> {
    fn from_envelope(envelope: Envelope, decode: fn(Envelope) -> Result<O, WorkError>) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                id: envelope.id,
                kind: envelope.kind,
                state: RefCell::new(State::Unsubmitted(envelope)),
                fire_and_forget: Cell::new(false),
                decode,
            }),
        }
    }

    /// The first yield of this handle in an and-join will not wait for it.
    pub fn fire_and_forget(self) -> Self {
        self.inner.fire_and_forget.set(true);
        self
    }

    pub fn is_fire_and_forget(&self) -> bool {
        self.inner.fire_and_forget.get()
    }

    pub fn id(&self) -> ItemId {
        self.inner.id
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    pub fn is_submitted(&self) -> bool {
        !matches!(*self.inner.state.borrow(), State::Unsubmitted(_))
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.inner.state.borrow(), State::Done(_))
    }

    pub fn erase(&self) -> AnyHandle {
        AnyHandle {
            inner: Rc::clone(&self.inner) as Rc<dyn Erased>,
        }
    }
}

impl<O: Clone + 'static> Handle<O> {
    /// Stored result, if the item completed.
    pub fn result(&self) -> Option<Result<O, WorkError>> {
        match &*self.inner.state.borrow() {
            State::Done(result) => Some(result.clone()),
            _ => None,
        }
    }

    pub(crate) fn slot(&self) -> Slot<O> {
        match self.result() {
            Some(Ok(value)) => Slot::Ready(value),
            Some(Err(e)) => Slot::Failed(e),
            None => Slot::Pending(self.clone()),
        }
    }
}

impl<O> fmt::Debug for Handle<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.borrow() {
            State::Unsubmitted(_) => "unsubmitted",
            State::InFlight => "in_flight",
            State::Done(Ok(_)) => "done",
            State::Done(Err(_)) => "failed",
        };
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &state)
            .field("fire_and_forget", &self.inner.fire_and_forget.get())
            .finish()
    }
}

/// Handle with its output type erased, for joins over mixed item types.
#[derive(Clone)]
pub struct AnyHandle {
    pub(crate) inner: Rc<dyn Erased>,
}

impl AnyHandle {
    pub fn id(&self) -> ItemId {
        self.inner.id()
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    pub fn is_done(&self) -> bool {
        self.inner.outcome().is_some()
    }
}

impl fmt::Debug for AnyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyHandle")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("done", &self.is_done())
            .finish()
    }
}

/// One position in the result of a join.
#[derive(Debug)]
pub enum Slot<O> {
    Ready(O),
    /// Still running; only fire-and-forget items and wait-any joins leave these.
    Pending(Handle<O>),
    /// A fire-and-forget item that failed before the join resumed.
    Failed(WorkError),
}

impl<O: 'static> Slot<O> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Slot::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending(_))
    }

    pub fn ready(self) -> Option<O> {
        match self {
            Slot::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<O, WorkError> {
        match self {
            Slot::Ready(value) => Ok(value),
            Slot::Failed(e) => Err(e),
            Slot::Pending(handle) => Err(WorkError::failed(format!(
                "{} {} is still pending",
                handle.kind(),
                handle.id()
            ))),
        }
    }
}

fn decode_work<T: WorkItem>(envelope: Envelope) -> Result<T, WorkError> {
    if let Some(e) = envelope.error {
        return Err(e);
    }
    match envelope.payload {
        Payload::Work(item) => item.downcast::<T>().map(|item| *item).map_err(|_| {
            WorkError::failed(format!("{} returned an unexpected item type", envelope.kind))
        }),
        _ => Err(WorkError::failed(format!(
            "{} completed without its item",
            envelope.kind
        ))),
    }
}

fn decode_output<O: 'static>(envelope: Envelope) -> Result<O, WorkError> {
    if let Some(e) = envelope.error {
        return Err(e);
    }
    match envelope.payload {
        Payload::Output(output) => output.downcast::<O>().map(|output| *output).map_err(|_| {
            WorkError::failed(format!("{} produced an unexpected output type", envelope.kind))
        }),
        _ => Err(WorkError::failed(format!(
            "{} completed without a result",
            envelope.kind
        ))),
    }
}
