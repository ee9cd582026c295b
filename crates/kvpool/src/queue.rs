//! Mutex-protected FIFO of [`Message`]s shared between threads.
//!
//! [`MessageQueue`] is the only mutable structure that crosses thread
//! boundaries in the pool. Every method on it takes the lock for the duration
//! of the call, so reads like [`MessageQueue::is_empty`] are point-in-time and
//! may be stale as soon as they return.
//!
//! Callers that must combine an inspection with a mutation (e.g. "if empty,
//! disarm the drain watcher") take the lock once with [`MessageQueue::lock`]
//! and perform the whole sequence through the returned [`QueueGuard`].

use crate::message::{Message, MessageId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;

/// A FIFO of owned messages guarded by a mutex.
#[derive(Debug, Default)]
pub struct MessageQueue {
    list: Mutex<VecDeque<Message>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the queue lock for a multi-step critical section.
    ///
    /// The lock is released when the guard is dropped or
    /// [`QueueGuard::unlock`]ed.
    pub fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            list: self.list.lock(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Id of the oldest message, if any.
    pub fn head_id(&self) -> Option<MessageId> {
        self.lock().head().map(Message::id)
    }

    /// Id of the newest message, if any.
    pub fn tail_id(&self) -> Option<MessageId> {
        self.lock().tail().map(Message::id)
    }

    pub fn insert_head(&self, msg: Message) {
        self.lock().insert_head(msg);
    }

    pub fn insert_tail(&self, msg: Message) {
        self.lock().insert_tail(msg);
    }

    pub fn remove(&self, id: MessageId) -> Option<Message> {
        self.lock().remove(id)
    }

    pub fn pop_head(&self) -> Option<Message> {
        self.lock().pop_head()
    }

    /// Detaches every message and hands them to the caller in FIFO order.
    pub fn clear(&self) -> Vec<Message> {
        self.lock().clear()
    }
}

/// Exclusive access to a [`MessageQueue`] for the lifetime of the guard.
pub struct QueueGuard<'a> {
    list: MutexGuard<'a, VecDeque<Message>>,
}

impl QueueGuard<'_> {
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn head(&self) -> Option<&Message> {
        self.list.front()
    }

    pub fn tail(&self) -> Option<&Message> {
        self.list.back()
    }

    pub fn insert_head(&mut self, msg: Message) {
        debug_assert!(!self.contains(msg.id()), "{} is already queued", msg.id());
        self.list.push_front(msg);
    }

    pub fn insert_tail(&mut self, msg: Message) {
        debug_assert!(!self.contains(msg.id()), "{} is already queued", msg.id());
        self.list.push_back(msg);
    }

    fn contains(&self, id: MessageId) -> bool {
        self.list.iter().any(|msg| msg.id() == id)
    }

    /// Removes the message with the given id, wherever it sits.
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        let pos = self.list.iter().position(|msg| msg.id() == id)?;
        self.list.remove(pos)
    }

    pub fn pop_head(&mut self) -> Option<Message> {
        self.list.pop_front()
    }

    pub fn clear(&mut self) -> Vec<Message> {
        self.list.drain(..).collect()
    }

    /// Releases the lock. Equivalent to dropping the guard.
    pub fn unlock(self) {}
}
