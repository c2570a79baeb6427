//! Join bookkeeping for a suspended workflow.

use std::task::Waker;

use super::error::WorkError;
use super::item::ItemId;

pub(crate) type BarrierId = u64;

#[derive(Debug)]
struct Entry {
    id: ItemId,
    /// Fire-and-forget item yielded for the first time in an and-join.
    exempt: bool,
    done: bool,
}

/// Set of items a workflow is suspended on.
///
/// Resolves when a non-exempt entry fails, when any entry completes in
/// wait-any mode, or when every entry is done or exempt otherwise.
#[derive(Debug)]
pub(crate) struct Barrier {
    entries: Vec<Entry>,
    wait_any: bool,
    error: Option<WorkError>,
    waker: Option<Waker>,
}

impl Barrier {
    pub(crate) fn new(wait_any: bool) -> Self {
        Self {
            entries: Vec::new(),
            wait_any,
            error: None,
            waker: None,
        }
    }

    /// Add an entry. `outcome` is `Some` when the item already completed.
    pub(crate) fn push(&mut self, id: ItemId, exempt: bool, outcome: Option<Result<(), WorkError>>) {
        let done = outcome.is_some();
        if let Some(Err(e)) = outcome {
            if !exempt && self.error.is_none() {
                self.error = Some(e);
            }
        }
        self.entries.push(Entry { id, exempt, done });
    }

    /// Record the completion of `id`. Returns whether the barrier is now satisfied.
    pub(crate) fn record(&mut self, id: ItemId, outcome: &Result<(), WorkError>) -> bool {
        for entry in self.entries.iter_mut().filter(|e| e.id == id && !e.done) {
            entry.done = true;
            if let Err(e) = outcome {
                if !entry.exempt && self.error.is_none() {
                    self.error = Some(e.clone());
                }
            }
        }
        self.is_satisfied()
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        if self.error.is_some() {
            return true;
        }
        if self.wait_any {
            self.entries.is_empty() || self.entries.iter().any(|e| e.done)
        } else {
            self.entries.iter().all(|e| e.done || e.exempt)
        }
    }

    /// Ids still in flight.
    pub(crate) fn outstanding(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.entries.iter().filter(|e| !e.done).map(|e| e.id)
    }

    pub(crate) fn set_waker(&mut self, waker: &Waker) {
        match &self.waker {
            Some(w) if w.will_wake(waker) => {}
            _ => self.waker = Some(waker.clone()),
        }
    }

    pub(crate) fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    pub(crate) fn into_result(self) -> Result<(), WorkError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
