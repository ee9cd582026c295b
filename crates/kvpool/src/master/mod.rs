//! The master side of the pool.
//!
//! This module defines [`Master`], which owns the shared request and response
//! queues together with a fixed set of [`Worker`]s. Requests are appended to
//! the shared request queue and assigned to one worker each in
//! round-robin order. Responses come back through the shared response queue
//! and are handed to a [`ResponseHandler`] on the caller's tokio runtime.
//!
//! The rotation assigns each request to one worker. Workers take requests
//! from the head of the shared queue, but never more than were assigned to
//! them, so `n` requests on `n` idle workers are handled once by each.
//!
//! Stopping joins the workers first and then lets the response drain deliver
//! whatever they left in the response queue before it exits.

mod drain;
mod rotation;

use crate::{
    config::PoolConfig,
    error::{Error, Result},
    handler::{RequestHandler, ResponseHandler},
    message::Message,
    queue::MessageQueue,
    signal::{SignalReceiver, async_signal},
    worker::{RequestSignal, Worker, WorkerBinding, WorkerId, WorkerState},
};
use core::fmt;
use drain::ResponseDrain;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use rotation::Rotation;
use std::sync::Arc;
use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Allocated,
    Running,
    Stopped,
}

struct Lifecycle {
    phase: Phase,
    workers: Vec<Worker>,
    // Moves into the drain task on start.
    response_ready: Option<SignalReceiver>,
    drain: Option<JoinHandle<()>>,
    // Hands the drain a handle to finish delivering with once workers joined.
    finish: Option<oneshot::Sender<Master>>,
}

pub(crate) struct MasterInner {
    config: PoolConfig,
    request_queue: Arc<MessageQueue>,
    response_queue: Arc<MessageQueue>,
    rotation: Mutex<Rotation>,
    request_signals: Vec<RequestSignal>,
    accepting: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

/// Handle to a worker pool.
///
/// Cloning is cheap and every clone refers to the same pool. The pool is
/// torn down with [`Master::stop`], or when the last handle is dropped.
#[derive(Clone)]
pub struct Master {
    inner: Arc<MasterInner>,
}

impl Master {
    /// Allocates a pool of `worker_count` workers with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `worker_count` is zero.
    pub fn new(worker_count: usize) -> Result<Self> {
        Self::with_config(PoolConfig::new(worker_count))
    }

    /// Allocates the queues and workers described by `config`. No thread is
    /// spawned until [`Master::start`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is rejected by
    /// [`PoolConfig::validate`].
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let request_queue = Arc::new(MessageQueue::new());
        let response_queue = Arc::new(MessageQueue::new());
        let (response_tx, response_rx) = async_signal();

        let mut workers = Vec::with_capacity(config.worker_count);
        let mut request_signals = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let mut worker = Worker::new(WorkerId::new(index));
            worker.bind(WorkerBinding {
                request_queue: Arc::clone(&request_queue),
                response_queue: Arc::clone(&response_queue),
                response_ready: response_tx.clone(),
            });
            request_signals.push(worker.request_signal());
            workers.push(worker);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Allocated pool of {} workers", config.worker_count);

        Ok(Self {
            inner: Arc::new(MasterInner {
                rotation: Mutex::new(Rotation::new(config.worker_count)),
                config,
                request_queue,
                response_queue,
                request_signals,
                accepting: AtomicBool::new(true),
                lifecycle: Mutex::new(Lifecycle {
                    phase: Phase::Allocated,
                    workers,
                    response_ready: Some(response_rx),
                    drain: None,
                    finish: None,
                }),
            }),
        })
    }

    /// Starts the pool.
    ///
    /// Every worker is started with `on_request` as its handler, then the
    /// response drain is spawned on `handle`. `on_response` is invoked on that
    /// runtime once per response.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the pool was already started or stopped.
    /// - Any error from [`Worker::start`]. Workers started before the failure
    ///   are stopped again and the pool stays startable, unless a worker
    ///   thread panicked on the way up.
    pub fn start<R, Q>(&self, handle: &Handle, on_response: R, on_request: Q) -> Result<()>
    where
        R: ResponseHandler,
        Q: RequestHandler,
    {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.phase != Phase::Allocated {
            return Err(Error::InvalidState {
                context: format!("cannot start a pool in the {:?} phase", lifecycle.phase),
            });
        }
        let Some(response_ready) = lifecycle.response_ready.take() else {
            return Err(Error::InvalidState {
                context: "response signal already taken".to_string(),
            });
        };

        let on_request: Arc<dyn RequestHandler> = Arc::new(on_request);
        for i in 0..lifecycle.workers.len() {
            let worker = &mut lifecycle.workers[i];
            worker.set_request_handler(Arc::clone(&on_request));
            if let Err(e) = worker.start(&self.inner.config) {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to start pool: {e}");
                for started in &mut lifecycle.workers[..i] {
                    let _ = started.stop();
                }
                lifecycle.response_ready = Some(response_ready);
                return Err(e);
            }
        }

        let (finish_tx, finish_rx) = oneshot::channel();
        let drain = ResponseDrain {
            master: Arc::downgrade(&self.inner),
            response_queue: Arc::clone(&self.inner.response_queue),
            response_ready,
            finish: finish_rx,
            handler: Arc::new(on_response),
        };
        lifecycle.drain = Some(handle.spawn(drain.run()));
        lifecycle.finish = Some(finish_tx);
        lifecycle.phase = Phase::Running;

        #[cfg(feature = "tracing")]
        tracing::info!("Pool started with {} workers", lifecycle.workers.len());
        Ok(())
    }

    /// Stops the pool.
    ///
    /// New requests are refused from here on. Every worker is stopped and
    /// joined, which blocks the calling thread for at most the drain timeout
    /// per worker with requests still assigned. The response drain then
    /// delivers every response left in the queue on its runtime and exits;
    /// that delivery may complete after this returns. Calling this more than
    /// once is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::WorkerPanicked`] observed. The remaining
    /// workers are still stopped.
    pub fn stop(&self) -> Result<()> {
        {
            // Ordered against `put_request` through the request queue lock.
            let _requests = self.inner.request_queue.lock();
            self.inner.accepting.store(false, Ordering::Release);
        }

        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.phase != Phase::Running {
            lifecycle.phase = Phase::Stopped;
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Stopping pool of {} workers", lifecycle.workers.len());

        let mut result = Ok(());
        for worker in &mut lifecycle.workers {
            if let Err(e) = worker.stop() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        // The drain exits by itself once the response queue is flushed.
        lifecycle.drain = None;
        if let Some(finish) = lifecycle.finish.take() {
            if finish.send(self.clone()).is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!("Response drain already exited");
            }
        }
        lifecycle.phase = Phase::Stopped;

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Pool stopped ({} requests left queued, {} responses still to deliver)",
            self.inner.request_queue.len(),
            self.inner.response_queue.len()
        );
        result
    }

    /// Enqueues a request and assigns it to the next worker in the rotation.
    ///
    /// Returns the worker the request was assigned to. A failed wake-up is
    /// logged and does not fail the call, since the request is already queued
    /// and assigned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] after [`Master::stop`].
    pub fn put_request(&self, request: Message) -> Result<WorkerId> {
        let mut requests = self.inner.request_queue.lock();
        if !self.inner.accepting.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        requests.insert_tail(request);

        let Some(worker) = self.inner.rotation.lock().advance() else {
            return Err(Error::InvalidState {
                context: "pool has no workers".to_string(),
            });
        };
        if let Err(_e) = self.inner.request_signals[worker.index()].notify() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to signal {worker}: {_e}");
        }
        requests.unlock();

        Ok(worker)
    }

    pub fn worker_count(&self) -> usize {
        self.inner.request_signals.len()
    }

    /// Snapshot of every worker's state, indexed by [`WorkerId`].
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.inner
            .lifecycle
            .lock()
            .workers
            .iter()
            .map(Worker::state)
            .collect()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.request_queue.len()
    }

    pub fn pending_responses(&self) -> usize {
        self.inner.response_queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().phase == Phase::Running
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl fmt::Debug for Master {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Master")
            .field("workers", &self.worker_count())
            .field("pending_requests", &self.pending_requests())
            .field("pending_responses", &self.pending_responses())
            .finish_non_exhaustive()
    }
}

impl Drop for MasterInner {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if let Some(drain) = lifecycle.drain.take() {
            drain.abort();
        }
        // Workers join their threads as they drop.
    }
}
