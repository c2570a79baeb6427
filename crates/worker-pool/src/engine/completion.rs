//! Completions of root workflows leaving the engine.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crossbeam_channel::Sender;
use futures::channel::oneshot;

use super::error::WorkError;
use super::item::ItemId;

/// Finished root workflow.
pub struct Completion {
    pub id: ItemId,
    pub kind: &'static str,
    pub result: Result<Box<dyn Any + Send>, WorkError>,
}

impl Completion {
    /// Typed result of the workflow.
    pub fn downcast<O: 'static>(self) -> Result<O, WorkError> {
        let kind = self.kind;
        self.result?
            .downcast::<O>()
            .map(|output| *output)
            .map_err(|_| WorkError::failed(format!("{} produced an unexpected output type", kind)))
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

pub(crate) enum Subscriber {
    Blocking(Sender<Completion>),
    Async(oneshot::Sender<Completion>),
}

/// Routes a root completion to whoever waits on it, or to the shared channel.
pub(crate) struct CompletionSink {
    subscribers: Mutex<HashMap<ItemId, Subscriber>>,
    completions: Sender<Completion>,
}

impl CompletionSink {
    pub(crate) fn new(completions: Sender<Completion>) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            completions,
        }
    }

    pub(crate) fn subscribe(&self, id: ItemId, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, subscriber);
    }

    pub(crate) fn unsubscribe(&self, id: ItemId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub(crate) fn complete(&self, completion: Completion) {
        let subscriber = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&completion.id);

        let delivered = match subscriber {
            Some(Subscriber::Blocking(tx)) => tx.send(completion).is_ok(),
            Some(Subscriber::Async(tx)) => tx.send(completion).is_ok(),
            None => self.completions.send(completion).is_ok(),
        };
        if !delivered {
            tracing::debug!("Root completion dropped, nobody is waiting");
        }
    }

    /// Drop every pending subscriber so their waits fail with `Shutdown`.
    pub(crate) fn close(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
