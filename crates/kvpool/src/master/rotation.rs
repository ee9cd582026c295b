use crate::worker::WorkerId;
use std::collections::VecDeque;

/// Round-robin order of workers.
///
/// The head is the worker signaled next. Advancing moves it to the tail, so
/// with `n` workers any `n` consecutive advances visit each worker once.
#[derive(Debug)]
pub(super) struct Rotation {
    order: VecDeque<WorkerId>,
}

impl Rotation {
    pub(super) fn new(worker_count: usize) -> Self {
        Self {
            order: (0..worker_count).map(WorkerId::new).collect(),
        }
    }

    /// Returns the worker at the head and moves it to the tail.
    pub(super) fn advance(&mut self) -> Option<WorkerId> {
        let next = self.order.pop_front()?;
        self.order.push_back(next);
        Some(next)
    }
}
