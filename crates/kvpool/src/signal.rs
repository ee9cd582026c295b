//! Coalescing cross-thread wake-ups.
//!
//! An async signal tells another event loop "go look at the shared state
//! again". It carries no data and does not count: any number of
//! [`SignalSender::notify`] calls made before the receiving loop gets to run
//! collapse into a single wake-up. Receivers therefore always re-check the
//! queue they guard instead of trusting how often they were woken.
//!
//! Internally this is a bounded MPSC channel of capacity one. A full channel
//! means a wake-up is already pending, which is success; a closed channel
//! means the receiving loop is gone.

use crate::error::{Error, Result};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Creates a connected sender/receiver pair.
pub fn async_signal() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (SignalSender { tx }, SignalReceiver { rx })
}

/// Sending half of an async signal. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SignalSender {
    tx: mpsc::Sender<()>,
}

impl SignalSender {
    /// Wakes the receiving loop without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SignalClosed`] if the receiver has been dropped.
    pub fn notify(&self) -> Result<()> {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Closed(())) => Err(Error::SignalClosed {
                context: "receiving loop is gone".to_string(),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of an async signal, owned by exactly one event loop.
#[derive(Debug)]
pub struct SignalReceiver {
    rx: mpsc::Receiver<()>,
}

impl SignalReceiver {
    /// Waits for the next wake-up.
    ///
    /// Returns `false` once every sender has been dropped and no wake-up is
    /// pending.
    pub async fn notified(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Consumes a pending wake-up, if any, without waiting.
    pub fn try_notified(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
