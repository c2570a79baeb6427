//! Fixed-size pools of OS threads processing one work item kind.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::error::WorkError;
use super::item::{Envelope, Payload, WorkItem};
use super::orchestrator::POLL_INTERVAL;

/// Per-thread handler for one work item kind.
///
/// Each pool thread owns its own processor, built by the factory passed to
/// [`EngineBuilder::pool`](super::EngineBuilder::pool).
pub trait Processor: Send + 'static {
    type Item: WorkItem;

    /// Fill in the item's results. An error is captured on the item and
    /// raised in the workflow that waits on it.
    fn process(&mut self, item: &mut Self::Item) -> Result<(), WorkError>;
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Process one envelope in place. Failures and panics are captured on it.
pub(crate) fn process_envelope<P: Processor>(processor: &mut P, envelope: &mut Envelope) {
    let kind = envelope.kind;
    let item = match &mut envelope.payload {
        Payload::Work(item) => item.downcast_mut::<P::Item>(),
        _ => None,
    };
    let Some(item) = item else {
        envelope.fail(WorkError::failed(format!(
            "{} pool received an item of kind {}",
            P::Item::KIND,
            kind
        )));
        return;
    };

    let result = catch_unwind(AssertUnwindSafe(|| processor.process(item)))
        .unwrap_or_else(|panic| Err(WorkError::Panicked(panic_message(panic.as_ref()))));

    match result {
        Ok(()) => envelope.done = true,
        Err(e) => {
            tracing::debug!(id = envelope.id, kind, error = %e, "Work item failed");
            envelope.fail(e);
        }
    }
}

/// Thread loop: receive, process, forward. Exits once `stop` is set or
/// either channel closes.
pub(crate) fn run_worker<P: Processor>(
    mut processor: P,
    input: Receiver<Envelope>,
    output: Sender<Envelope>,
    stop: Arc<AtomicBool>,
) {
    tracing::debug!(kind = P::Item::KIND, "Pool thread started");
    while !stop.load(Ordering::Acquire) {
        match input.recv_timeout(POLL_INTERVAL) {
            Ok(mut envelope) => {
                process_envelope(&mut processor, &mut envelope);
                if output.send(envelope).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!(kind = P::Item::KIND, "Pool thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Square {
        value: i64,
        squared: Option<i64>,
    }

    impl WorkItem for Square {
        const KIND: &'static str = "square";
    }

    struct SquareProcessor;

    impl Processor for SquareProcessor {
        type Item = Square;

        fn process(&mut self, item: &mut Square) -> Result<(), WorkError> {
            if item.value < 0 {
                return Err(WorkError::failed("negative"));
            }
            if item.value == 13 {
                panic!("unlucky");
            }
            item.squared = Some(item.value * item.value);
            Ok(())
        }
    }

    fn envelope(value: i64) -> Envelope {
        Envelope::work(Square {
            value,
            squared: None,
        })
    }

    fn squared(envelope: Envelope) -> Option<i64> {
        match envelope.payload {
            Payload::Work(item) => item.downcast::<Square>().ok().and_then(|s| s.squared),
            _ => None,
        }
    }

    #[test]
    fn test_process_success() {
        let mut env = envelope(7);
        process_envelope(&mut SquareProcessor, &mut env);
        assert!(env.done);
        assert!(env.error.is_none());
        assert_eq!(squared(env), Some(49));
    }

    #[test]
    fn test_process_error_is_captured() {
        let mut env = envelope(-1);
        process_envelope(&mut SquareProcessor, &mut env);
        assert!(env.done);
        assert_eq!(env.error, Some(WorkError::failed("negative")));
    }

    #[test]
    fn test_process_panic_is_captured() {
        let mut env = envelope(13);
        process_envelope(&mut SquareProcessor, &mut env);
        assert!(env.done);
        assert_eq!(env.error, Some(WorkError::Panicked("unlucky".to_string())));
    }

    #[test]
    fn test_worker_forwards_and_stops() {
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let worker = std::thread::spawn(move || run_worker(SquareProcessor, in_rx, out_tx, thread_stop));

        in_tx.send(envelope(3)).unwrap();
        in_tx.send(envelope(-2)).unwrap();
        let first = out_rx.recv().unwrap();
        let second = out_rx.recv().unwrap();
        assert_eq!(squared(first), Some(9));
        assert!(second.error.is_some());

        stop.store(true, Ordering::Release);
        worker.join().unwrap();
    }
}
