//! Delay items released by a min-heap of deadlines.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::error::WorkError;
use super::item::{Envelope, Payload, WorkItem};
use super::orchestrator::POLL_INTERVAL;

/// Completes after `delay`. Yield it to sleep inside a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerItem {
    pub delay: Duration,
    /// Time between queueing and release, set by the timer pool.
    pub elapsed: Option<Duration>,
}

impl TimerItem {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            elapsed: None,
        }
    }

    pub fn millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }
}

impl WorkItem for TimerItem {
    const KIND: &'static str = "timer";
}

struct Pending {
    deadline: Instant,
    seq: u64,
    queued: Instant,
    envelope: Envelope,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Timer thread loop. Items wait on the heap, and expired ones are released
/// whenever the thread wakes, whether from a new item or a receive timeout.
pub(crate) fn run_timer(input: Receiver<Envelope>, output: Sender<Envelope>, stop: Arc<AtomicBool>) {
    let mut heap: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();
    let mut seq = 0u64;

    tracing::debug!("Timer thread started");
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        while heap.peek().is_some_and(|Reverse(p)| p.deadline <= now) {
            let Some(Reverse(pending)) = heap.pop() else {
                break;
            };
            let mut envelope = pending.envelope;
            if let Payload::Work(item) = &mut envelope.payload {
                if let Some(timer) = item.downcast_mut::<TimerItem>() {
                    timer.elapsed = Some(pending.queued.elapsed());
                }
            }
            envelope.done = true;
            if output.send(envelope).is_err() {
                return;
            }
        }

        let wait = heap
            .peek()
            .map(|Reverse(p)| p.deadline.saturating_duration_since(now))
            .unwrap_or(POLL_INTERVAL)
            .min(POLL_INTERVAL);

        match input.recv_timeout(wait) {
            Ok(mut envelope) => {
                let delay = match &envelope.payload {
                    Payload::Work(item) => item.downcast_ref::<TimerItem>().map(|t| t.delay),
                    _ => None,
                };
                match delay {
                    Some(delay) => {
                        let queued = Instant::now();
                        seq += 1;
                        heap.push(Reverse(Pending {
                            deadline: queued + delay,
                            seq,
                            queued,
                            envelope,
                        }));
                    }
                    None => {
                        let kind = envelope.kind;
                        envelope.fail(WorkError::failed(format!(
                            "timer pool received an item of kind {}",
                            kind
                        )));
                        if output.send(envelope).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!(pending = heap.len(), "Timer thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_release_in_deadline_order() {
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let timer = std::thread::spawn(move || run_timer(in_rx, out_tx, thread_stop));

        let slow = Envelope::work(TimerItem::millis(80));
        let fast = Envelope::work(TimerItem::millis(5));
        let (slow_id, fast_id) = (slow.id, fast.id);
        in_tx.send(slow).unwrap();
        in_tx.send(fast).unwrap();

        let first = out_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = out_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.id, fast_id);
        assert_eq!(second.id, slow_id);
        assert!(first.done && second.done);

        match second.payload {
            Payload::Work(item) => {
                let timer = item.downcast::<TimerItem>().unwrap();
                assert!(timer.elapsed.unwrap() >= Duration::from_millis(80));
            }
            _ => panic!("expected a work payload"),
        }

        stop.store(true, Ordering::Release);
        timer.join().unwrap();
    }
}
