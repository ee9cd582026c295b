//! The event loop each worker thread runs.
//!
//! The loop multiplexes three sources on a private current-thread runtime:
//!
//! - the **drain watcher**: while armed, every loop turn takes one request
//!   assigned to this worker out of the shared request queue, runs the
//!   handler and publishes the response, then yields back to the loop. It
//!   disarms itself once nothing is assigned.
//! - the **request-ready signal**: arms the watcher if requests are assigned.
//! - the **stop token**: leaves the loop right away when nothing is assigned.
//!   Otherwise the watcher keeps draining until the assignments are used up
//!   or the drain timeout expires.
//!
//! An optional periodic sweep re-checks the assignment count so that a
//! request whose wake-up was lost is still picked up.

use super::{WorkerId, state::StateCell, state::WorkerState};
use crate::{
    error::fatal, handler::RequestHandler, queue::MessageQueue, signal::SignalReceiver,
    signal::SignalSender,
};
use core::time::Duration;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc::SyncSender};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Outcome of one drain watcher turn.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Drain {
    /// One request was handled and its response published.
    Handled,
    /// Nothing is assigned; the watcher disarms.
    Empty,
}

/// Everything a worker thread owns while it runs.
pub(super) struct WorkerLoop {
    pub(super) id: WorkerId,
    pub(super) state: Arc<StateCell>,
    pub(super) request_queue: Arc<MessageQueue>,
    pub(super) response_queue: Arc<MessageQueue>,
    pub(super) response_ready: SignalSender,
    pub(super) handler: Arc<dyn RequestHandler>,
    /// Requests assigned to this worker and still queued. Only changed under
    /// the request queue lock.
    pub(super) assigned: Arc<AtomicUsize>,
    pub(super) request_ready: SignalReceiver,
    pub(super) stop: CancellationToken,
    pub(super) drain_timeout: Duration,
    pub(super) sweep_interval: Option<Duration>,
}

impl WorkerLoop {
    /// Thread entry point.
    ///
    /// Builds the worker's private runtime, reports readiness through
    /// `ready` once the loop is up, and runs until stopped. Returns the
    /// request-ready receiver so the worker can be started again.
    pub(super) fn run(mut self, ready: SyncSender<()>) -> SignalReceiver {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => fatal(&format!("{}: failed to build event loop: {e}", self.id)),
        };

        runtime.block_on(self.event_loop(ready));
        drop(runtime);

        self.state.set(WorkerState::Stop);
        #[cfg(feature = "tracing")]
        tracing::debug!("{} stopped", self.id);

        self.request_ready
    }

    async fn event_loop(&mut self, ready: SyncSender<()>) {
        // Armed from the start so requests queued before the worker came up
        // are not left waiting for a signal.
        let mut armed = true;
        let mut stop_deadline: Option<Instant> = None;
        let mut sweep = self.sweep_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        self.state.set(WorkerState::Idle);
        // The receiver only goes away if `start` gave up on us.
        let _ = ready.send(());
        #[cfg(feature = "tracing")]
        tracing::debug!("{} running", self.id);

        loop {
            if armed {
                if self.stop.is_cancelled() {
                    let deadline =
                        *stop_deadline.get_or_insert_with(|| Instant::now() + self.drain_timeout);
                    if Instant::now() >= deadline {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            "{} drain timed out with {} requests still assigned",
                            self.id,
                            self.assigned.load(Ordering::Acquire)
                        );
                        break;
                    }
                }

                match self.drain_one() {
                    Drain::Handled => tokio::task::yield_now().await,
                    Drain::Empty => armed = false,
                }
                continue;
            }

            tokio::select! {
                biased;
                () = self.stop.cancelled() => {
                    if !self.has_work() {
                        break;
                    }
                    armed = true;
                }
                woke = self.request_ready.notified() => {
                    if !woke {
                        break;
                    }
                    armed = self.has_work();
                }
                () = tick(&mut sweep) => {
                    armed = self.has_work();
                }
            }
        }
    }

    /// One turn of the drain watcher.
    pub(super) fn drain_one(&self) -> Drain {
        let mut requests = self.request_queue.lock();
        if self.assigned.load(Ordering::Acquire) == 0 {
            // Set under the lock so a concurrent producer either sees us idle
            // or sees its request taken.
            self.transition(WorkerState::Idle);
            return Drain::Empty;
        }
        let Some(request) = requests.pop_head() else {
            #[cfg(feature = "tracing")]
            tracing::warn!("{} was assigned requests that are no longer queued", self.id);
            self.assigned.store(0, Ordering::Release);
            self.transition(WorkerState::Idle);
            return Drain::Empty;
        };
        self.assigned.fetch_sub(1, Ordering::AcqRel);
        self.transition(WorkerState::Busy);
        requests.unlock();

        let payload = self.handler.handle(self.id, &request);
        let response = request.reply(payload);

        let mut responses = self.response_queue.lock();
        let was_empty = responses.is_empty();
        responses.insert_tail(response);
        if was_empty {
            if let Err(_e) = self.response_ready.notify() {
                #[cfg(feature = "tracing")]
                tracing::warn!("{} failed to signal response ready: {_e}", self.id);
            }
        }
        responses.unlock();

        Drain::Handled
    }

    fn has_work(&self) -> bool {
        self.assigned.load(Ordering::Acquire) > 0
    }

    fn transition(&self, state: WorkerState) {
        let _prev = self.state.set(state);
        #[cfg(feature = "tracing")]
        if _prev != state {
            tracing::trace!("{} {} -> {}", self.id, _prev, state);
        }
    }
}

async fn tick(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => core::future::pending().await,
    }
}
