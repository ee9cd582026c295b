//! Worker threads of the pool.
//!
//! A [`Worker`] owns one OS thread running a private event loop (see
//! [`event_loop`]). It shares the request and response queues with the
//! [`Master`](crate::Master) that built it and holds only the master's
//! response-ready signal, never the master itself.
//!
//! ## Lifecycle
//!
//! - [`Worker::new`]: state [`WorkerState::Stop`], nothing bound.
//! - [`Worker::bind`]: attach the shared queues and the response signal.
//! - [`Worker::start`]: spawn the thread; returns once the loop is `Idle`.
//! - [`Worker::stop`]: signal the loop and join the thread. Stopping a
//!   stopped worker is a no-op.
//!
//! ## Assignment
//!
//! The request queue is shared, but a worker only takes as many requests
//! from it as were assigned to it through its [`RequestSignal`]. The
//! assignment count is what makes round-robin dispatch hold at the handler:
//! a worker that is woken early cannot drain requests meant for its peers.

mod event_loop;
mod state;
#[cfg(test)]
mod tests;

pub use state::WorkerState;

use crate::{
    config::PoolConfig,
    error::{Error, Result},
    handler::{EchoHandler, RequestHandler},
    queue::MessageQueue,
    signal::{SignalReceiver, SignalSender, async_signal},
};
use core::fmt;
use event_loop::WorkerLoop;
use state::StateCell;
use portable_atomic::{AtomicUsize, Ordering};
use std::{
    sync::{Arc, mpsc},
    thread::{self, JoinHandle},
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Position of a worker in its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Shared resources a worker needs before it can start.
#[derive(Clone, Debug)]
pub struct WorkerBinding {
    pub request_queue: Arc<MessageQueue>,
    pub response_queue: Arc<MessageQueue>,
    /// Wakes the master's response drain.
    pub response_ready: SignalSender,
}

/// Hands requests to one worker.
///
/// Each [`RequestSignal::notify`] assigns one request to the worker and wakes
/// its drain watcher. Wake-ups coalesce, assignments do not: a worker woken
/// once for three assignments handles three requests.
#[derive(Clone, Debug)]
pub struct RequestSignal {
    assigned: Arc<AtomicUsize>,
    ready: SignalSender,
}

impl RequestSignal {
    /// Assigns one more request to the worker and wakes it.
    ///
    /// Call this while holding the request queue lock, after the request has
    /// been queued, so the worker never counts a request it cannot find.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SignalClosed`] if the worker is gone. The assignment
    /// is still recorded.
    pub fn notify(&self) -> Result<()> {
        self.assigned.fetch_add(1, Ordering::AcqRel);
        self.ready.notify()
    }

    /// Requests assigned to the worker and not yet taken.
    pub fn assigned(&self) -> usize {
        self.assigned.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.ready.is_closed()
    }
}

struct Running {
    stop: CancellationToken,
    thread: JoinHandle<Option<SignalReceiver>>,
}

/// A single worker thread and its event loop.
pub struct Worker {
    id: WorkerId,
    state: Arc<StateCell>,
    binding: Option<WorkerBinding>,
    handler: Option<Arc<dyn RequestHandler>>,
    assigned: Arc<AtomicUsize>,
    request_ready_tx: SignalSender,
    // Moves into the thread while running and comes back on join.
    request_ready_rx: Option<SignalReceiver>,
    running: Option<Running>,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        let (request_ready_tx, request_ready_rx) = async_signal();
        Self {
            id,
            state: Arc::new(StateCell::new(WorkerState::Stop)),
            binding: None,
            handler: None,
            assigned: Arc::new(AtomicUsize::new(0)),
            request_ready_tx,
            request_ready_rx: Some(request_ready_rx),
            running: None,
        }
    }

    pub const fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub const fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Attaches the shared queues. Takes effect on the next [`Worker::start`].
    pub fn bind(&mut self, binding: WorkerBinding) {
        self.binding = Some(binding);
    }

    /// Sets the handler run for every request. Without one, the worker echoes
    /// the request payload back. Takes effect on the next [`Worker::start`].
    pub fn set_request_handler(&mut self, handler: Arc<dyn RequestHandler>) {
        self.handler = Some(handler);
    }

    /// Handle that assigns requests to this worker and wakes it.
    pub fn request_signal(&self) -> RequestSignal {
        RequestSignal {
            assigned: Arc::clone(&self.assigned),
            ready: self.request_ready_tx.clone(),
        }
    }

    /// Spawns the worker thread and waits until its event loop is idle.
    ///
    /// A failed start leaves the worker stopped and able to start again.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the worker is already running or unbound.
    /// - [`Error::WorkerSpawn`] if the OS refuses to create the thread.
    /// - [`Error::WorkerPanicked`] if the thread died before its loop came up.
    pub fn start(&mut self, config: &PoolConfig) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::InvalidState {
                context: format!("{} is already running", self.id),
            });
        }
        let Some(binding) = self.binding.clone() else {
            return Err(Error::InvalidState {
                context: format!("{} has no queues bound", self.id),
            });
        };
        let Some(request_ready) = self.request_ready_rx.take() else {
            return Err(Error::InvalidState {
                context: format!("{} lost its request signal", self.id),
            });
        };

        self.state.set(WorkerState::Init);
        // The loop, and with it the request-ready receiver, only moves to the
        // thread once the thread exists.
        let (loop_tx, loop_rx) = oneshot::channel::<WorkerLoop>();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", config.thread_name, self.id.index()))
            .spawn(move || {
                loop_rx
                    .blocking_recv()
                    .ok()
                    .map(|event_loop| event_loop.run(ready_tx))
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(source) => {
                self.request_ready_rx = Some(request_ready);
                self.state.set(WorkerState::Stop);
                return Err(Error::WorkerSpawn {
                    worker: self.id,
                    source,
                });
            }
        };

        let stop = CancellationToken::new();
        let event_loop = WorkerLoop {
            id: self.id,
            state: Arc::clone(&self.state),
            request_queue: binding.request_queue,
            response_queue: binding.response_queue,
            response_ready: binding.response_ready,
            handler: self
                .handler
                .clone()
                .unwrap_or_else(|| Arc::new(EchoHandler)),
            assigned: Arc::clone(&self.assigned),
            request_ready,
            stop: stop.clone(),
            drain_timeout: config.drain_timeout,
            sweep_interval: config.sweep_interval,
        };

        if let Err(event_loop) = loop_tx.send(event_loop) {
            self.request_ready_rx = Some(event_loop.request_ready);
            let _ = thread.join();
            self.state.set(WorkerState::Stop);
            return Err(Error::WorkerPanicked { worker: self.id });
        }

        if ready_rx.recv().is_err() {
            // The loop never reported in, so the thread has already unwound.
            let _ = thread.join();
            self.state.set(WorkerState::Stop);
            return Err(Error::WorkerPanicked { worker: self.id });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("{} started", self.id);
        self.running = Some(Running { stop, thread });
        Ok(())
    }

    /// Stops the event loop and joins the worker thread.
    ///
    /// An idle worker with nothing assigned exits immediately. Otherwise the
    /// worker keeps taking its assigned requests, bounded by the pool's drain
    /// timeout. Calling this on a stopped worker
    /// returns `Ok(())` and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerPanicked`] if the thread panicked.
    pub fn stop(&mut self) -> Result<()> {
        let Some(Running { stop, thread }) = self.running.take() else {
            return Ok(());
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("Stopping {} ({})", self.id, self.state.get());
        stop.cancel();

        match thread.join() {
            Ok(request_ready) => {
                self.request_ready_rx = request_ready;
                Ok(())
            }
            Err(_) => {
                self.state.set(WorkerState::Stop);
                #[cfg(feature = "tracing")]
                tracing::error!("{} panicked", self.id);
                Err(Error::WorkerPanicked { worker: self.id })
            }
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("bound", &self.binding.is_some())
            .field("running", &self.running.is_some())
            .finish()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
