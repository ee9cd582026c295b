//! Pluggable callbacks at the two edges of the pool.
//!
//! - [`RequestHandler`] runs on a worker thread and produces the payload of
//!   the response to a request.
//! - [`ResponseHandler`] runs on the master's event loop and hands each
//!   finished response back to the connection layer.
//!
//! Both are implemented for plain closures, so most callers never name these
//! traits directly.

use crate::{master::Master, message::Message, worker::WorkerId};
use bytes::Bytes;

/// Business logic executed on a worker thread.
///
/// Implementations must not block: the worker's event loop is stalled for as
/// long as `handle` runs.
pub trait RequestHandler: Send + Sync + 'static {
    /// Produces the payload copied into the response to `request`.
    fn handle(&self, worker: WorkerId, request: &Message) -> Bytes;
}

impl<F> RequestHandler for F
where
    F: Fn(WorkerId, &Message) -> Bytes + Send + Sync + 'static,
{
    fn handle(&self, worker: WorkerId, request: &Message) -> Bytes {
        self(worker, request)
    }
}

/// Returns every request's payload unchanged.
///
/// Workers fall back to this behavior when no handler is bound.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, _worker: WorkerId, request: &Message) -> Bytes {
        request.payload().clone()
    }
}

/// Receives every completed response on the master's event loop.
///
/// The handler takes ownership of the response; it is expected to write the
/// payload to [`Message::reply_to`] and then let the message drop.
pub trait ResponseHandler: Send + Sync + 'static {
    fn on_response(&self, master: &Master, response: Message);
}

impl<F> ResponseHandler for F
where
    F: Fn(&Master, Message) + Send + Sync + 'static,
{
    fn on_response(&self, master: &Master, response: Message) {
        self(master, response)
    }
}

/// Discards every response.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardResponses;

impl ResponseHandler for DiscardResponses {
    fn on_response(&self, _master: &Master, _response: Message) {}
}
