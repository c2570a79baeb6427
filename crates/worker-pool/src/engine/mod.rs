//! Cooperative task engine.
//!
//! Workflow bodies run on one orchestrator thread and suspend at join
//! points; work items run on fixed pools of OS threads, one pool per item
//! kind. Everything moves through channels as envelopes.

mod barrier;
mod completion;
mod error;
mod handle;
mod item;
mod orchestrator;
mod pool;
mod timer;
mod workflow;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::Context as _;
use crossbeam_channel::{Receiver, Sender};
use futures::channel::oneshot;

pub use completion::Completion;
pub use error::WorkError;
pub use handle::{AnyHandle, Handle, Slot};
pub use item::{ItemId, WorkItem};
pub use pool::Processor;
pub use timer::TimerItem;
pub use workflow::{Context, Workflow};

use completion::{CompletionSink, Subscriber};
use item::Envelope;
use orchestrator::{Orchestrator, Routes};

type Launcher = Box<dyn FnOnce() -> std::io::Result<Vec<JoinHandle<()>>>>;

/// Registers worker pools and starts the engine threads.
pub struct EngineBuilder {
    inbox_tx: Sender<Envelope>,
    inbox_rx: Receiver<Envelope>,
    routes: Routes,
    launchers: Vec<Launcher>,
    stop: Arc<AtomicBool>,
}

impl EngineBuilder {
    fn new() -> Self {
        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        Self {
            inbox_tx,
            inbox_rx,
            routes: HashMap::new(),
            launchers: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a pool of `threads` threads for `P::Item`. `factory` builds
    /// one processor per thread.
    pub fn pool<P, F>(mut self, threads: usize, mut factory: F) -> Self
    where
        P: Processor,
        F: FnMut() -> P,
    {
        let kind = P::Item::KIND;
        let (tx, rx) = crossbeam_channel::unbounded();
        if self.routes.insert(kind, tx).is_some() {
            tracing::warn!(kind, "Replacing previously registered pool");
        }

        let processors: Vec<P> = (0..threads.max(1)).map(|_| factory()).collect();
        let output = self.inbox_tx.clone();
        let stop = Arc::clone(&self.stop);

        self.launchers.push(Box::new(move || {
            processors
                .into_iter()
                .enumerate()
                .map(|(n, processor)| {
                    let (input, output, stop) = (rx.clone(), output.clone(), Arc::clone(&stop));
                    thread::Builder::new()
                        .name(format!("{}-{}", kind, n))
                        .spawn(move || pool::run_worker(processor, input, output, stop))
                })
                .collect()
        }));
        self
    }

    /// Register the timer pool that serves [`TimerItem`].
    pub fn timer_pool(mut self) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.routes.insert(TimerItem::KIND, tx);
        let output = self.inbox_tx.clone();
        let stop = Arc::clone(&self.stop);

        self.launchers.push(Box::new(move || {
            thread::Builder::new()
                .name("timer".to_string())
                .spawn(move || timer::run_timer(rx, output, stop))
                .map(|handle| vec![handle])
        }));
        self
    }

    /// Start the orchestrator and every registered pool.
    pub fn build(self) -> anyhow::Result<Engine> {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let sink = Arc::new(CompletionSink::new(completion_tx));
        let routes = Arc::new(self.routes);
        let kinds: Vec<&'static str> = routes.keys().copied().collect();

        let mut threads = Vec::new();
        let orchestrator = {
            let (routes, inbox_tx, inbox_rx, sink, stop) = (
                Arc::clone(&routes),
                self.inbox_tx.clone(),
                self.inbox_rx,
                Arc::clone(&sink),
                Arc::clone(&self.stop),
            );
            thread::Builder::new()
                .name("orchestrator".to_string())
                .spawn(move || Orchestrator::new(routes, inbox_tx, inbox_rx, sink, stop).run())
                .context("Failed to start orchestrator thread")?
        };
        threads.push(orchestrator);

        for launch in self.launchers {
            match launch() {
                Ok(handles) => threads.extend(handles),
                Err(e) => {
                    self.stop.store(true, Ordering::Release);
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(e).context("Failed to start worker pool");
                }
            }
        }

        tracing::info!(?kinds, threads = threads.len(), "Engine started");

        Ok(Engine {
            inbox: self.inbox_tx,
            completions: completion_rx,
            sink,
            stop: self.stop,
            threads: Mutex::new(threads),
        })
    }
}

/// Running engine: submit root workflows and collect their completions.
pub struct Engine {
    inbox: Sender<Envelope>,
    completions: Receiver<Completion>,
    sink: Arc<CompletionSink>,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Submit a root workflow. Its result arrives on [`Engine::completions`].
    pub fn submit<W: Workflow>(&self, flow: W) -> Result<ItemId, WorkError> {
        let envelope = Envelope::workflow(flow, true);
        let id = envelope.id;
        self.send(envelope)?;
        Ok(id)
    }

    /// Run a root workflow, blocking the calling thread until it finishes.
    pub fn run<W: Workflow>(&self, flow: W) -> Result<W::Output, WorkError> {
        let envelope = Envelope::workflow(flow, true);
        let id = envelope.id;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.sink.subscribe(id, Subscriber::Blocking(tx));
        if let Err(e) = self.send(envelope) {
            self.sink.unsubscribe(id);
            return Err(e);
        }
        rx.recv()
            .map_err(|_| WorkError::Shutdown)?
            .downcast::<W::Output>()
    }

    /// Run a root workflow and await its result.
    pub async fn run_async<W: Workflow>(&self, flow: W) -> Result<W::Output, WorkError> {
        let envelope = Envelope::workflow(flow, true);
        let id = envelope.id;
        let (tx, rx) = oneshot::channel();
        self.sink.subscribe(id, Subscriber::Async(tx));
        if let Err(e) = self.send(envelope) {
            self.sink.unsubscribe(id);
            return Err(e);
        }
        rx.await
            .map_err(|_| WorkError::Shutdown)?
            .downcast::<W::Output>()
    }

    /// Completions of roots started with [`Engine::submit`].
    pub fn completions(&self) -> &Receiver<Completion> {
        &self.completions
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }

    /// Stop every engine thread and wait for them to exit. Roots still
    /// running are abandoned and their waiters get `Shutdown`.
    pub fn shutdown(&self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sink.close();

        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in threads {
            let name = handle.thread().name().unwrap_or("engine").to_string();
            if handle.join().is_err() {
                tracing::warn!(thread = %name, "Engine thread panicked");
            }
        }
        tracing::info!("Engine stopped");
    }

    fn send(&self, envelope: Envelope) -> Result<(), WorkError> {
        if !self.is_running() {
            return Err(WorkError::Shutdown);
        }
        self.inbox.send(envelope).map_err(|_| WorkError::Shutdown)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
