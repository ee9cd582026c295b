//! The master's response drain.
//!
//! Runs as a task on the caller's runtime. It follows the same pattern as a
//! worker's request drain: while armed it hands one response to the
//! [`ResponseHandler`] per loop turn and disarms once it sees the queue
//! empty; the response-ready signal re-arms it.
//!
//! [`Master::stop`] hands the drain a handle once every worker has joined.
//! The drain then delivers what is left in the response queue and exits.

use super::{Master, MasterInner};
use crate::{handler::ResponseHandler, queue::MessageQueue, signal::SignalReceiver};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

pub(super) struct ResponseDrain {
    pub(super) master: Weak<MasterInner>,
    pub(super) response_queue: Arc<MessageQueue>,
    pub(super) response_ready: SignalReceiver,
    pub(super) finish: oneshot::Receiver<Master>,
    pub(super) handler: Arc<dyn ResponseHandler>,
}

impl ResponseDrain {
    pub(super) async fn run(mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Response drain running");

        loop {
            while let Some(response) = self.response_queue.pop_head() {
                // The master handle is gone, nobody is left to deliver to.
                let Some(inner) = self.master.upgrade() else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Master dropped, response drain exiting");
                    return;
                };
                self.handler.on_response(&Master { inner }, response);
                tokio::task::yield_now().await;
            }

            tokio::select! {
                biased;
                woke = self.response_ready.notified() => {
                    if !woke {
                        break;
                    }
                }
                finished = &mut self.finish => {
                    if let Ok(master) = finished {
                        self.flush(&master);
                    }
                    break;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Response drain exiting");
    }

    /// Delivers every queued response. Workers have joined, so nothing new
    /// arrives while this runs.
    fn flush(&self, master: &Master) {
        let mut _delivered = 0usize;
        while let Some(response) = self.response_queue.pop_head() {
            self.handler.on_response(master, response);
            _delivered += 1;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Delivered {_delivered} responses after stop");
    }
}
