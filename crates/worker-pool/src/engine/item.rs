//! Work items and the envelope that carries them between threads.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{FutureExt, LocalBoxFuture};

use super::completion::Completion;
use super::error::WorkError;
use super::workflow::{Context, Workflow};

/// Process-unique id of a submitted item.
pub type ItemId = u64;

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

fn next_item_id() -> ItemId {
    NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed)
}

/// A unit of work handled by one worker pool.
///
/// `KIND` is the routing key: the item is delivered to the pool registered
/// for the same kind.
pub trait WorkItem: Clone + Send + 'static {
    const KIND: &'static str;
}

pub(crate) type Output = Box<dyn Any + Send>;

pub(crate) type WorkflowStart =
    Box<dyn FnOnce(Context) -> LocalBoxFuture<'static, Result<Output, WorkError>> + Send>;

pub(crate) enum Payload {
    /// A work item, before and after processing.
    Work(Box<dyn Any + Send>),
    /// A workflow that has not started yet.
    Workflow(WorkflowStart),
    /// Result of a finished workflow.
    Output(Output),
    /// A finished workflow that failed.
    Empty,
}

/// Type-erased item in flight between the orchestrator and the pools.
pub(crate) struct Envelope {
    pub(crate) id: ItemId,
    pub(crate) kind: &'static str,
    pub(crate) payload: Payload,
    /// Set at most once.
    pub(crate) error: Option<WorkError>,
    /// Goes false to true once.
    pub(crate) done: bool,
    /// Id of the workflow that submitted this item. Only used for logging.
    pub(crate) parent: Option<ItemId>,
    pub(crate) fire_and_forget: bool,
    /// Externally submitted workflow whose completion leaves the engine.
    pub(crate) root: bool,
}

impl Envelope {
    pub(crate) fn work<T: WorkItem>(item: T) -> Self {
        Self {
            id: next_item_id(),
            kind: T::KIND,
            payload: Payload::Work(Box::new(item)),
            error: None,
            done: false,
            parent: None,
            fire_and_forget: false,
            root: false,
        }
    }

    pub(crate) fn workflow<W: Workflow>(flow: W, root: bool) -> Self {
        let start: WorkflowStart = Box::new(move |ctx: Context| {
            async move {
                let output = flow.run(ctx).await?;
                Ok(Box::new(output) as Output)
            }
            .boxed_local()
        });

        Self {
            id: next_item_id(),
            kind: std::any::type_name::<W>(),
            payload: Payload::Workflow(start),
            error: None,
            done: false,
            parent: None,
            fire_and_forget: false,
            root,
        }
    }

    /// Completed workflow carrying its result or error.
    pub(crate) fn finished(
        id: ItemId,
        kind: &'static str,
        parent: Option<ItemId>,
        fire_and_forget: bool,
        root: bool,
        result: Result<Output, WorkError>,
    ) -> Self {
        let (payload, error) = match result {
            Ok(output) => (Payload::Output(output), None),
            Err(e) => (Payload::Empty, Some(e)),
        };
        Self {
            id,
            kind,
            payload,
            error,
            done: true,
            parent,
            fire_and_forget,
            root,
        }
    }

    pub(crate) fn is_workflow(&self) -> bool {
        matches!(self.payload, Payload::Workflow(_) | Payload::Output(_) | Payload::Empty)
    }

    /// Record `error` unless one is already set, and mark done.
    pub(crate) fn fail(&mut self, error: WorkError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.done = true;
    }

    pub(crate) fn into_completion(self) -> Completion {
        let result = match (self.error, self.payload) {
            (Some(e), _) => Err(e),
            (None, Payload::Output(output)) => Ok(output),
            (None, Payload::Work(item)) => Ok(item as Output),
            (None, _) => Err(WorkError::failed(format!(
                "{} completed without a result",
                self.kind
            ))),
        };
        Completion {
            id: self.id,
            kind: self.kind,
            result,
        }
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("done", &self.done)
            .field("error", &self.error)
            .field("parent", &self.parent)
            .field("fire_and_forget", &self.fire_and_forget)
            .field("root", &self.root)
            .finish()
    }
}
