//! Units of work and results moving between the producer and the pool.
//!
//! A [`Message`] has exactly one owner at a time. It moves into a
//! [`MessageQueue`](crate::MessageQueue) on insert and back out on removal, so
//! it can never be aliased across threads or sit in two queues at once.

use bytes::Bytes;
use core::fmt;
use portable_atomic::{AtomicU64, Ordering};

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Message`].
///
/// Queues look messages up by id rather than by address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg#{}", self.0)
    }
}

/// What a message asks the pool to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MessageKind {
    #[default]
    Unknown,
    Echo,
}

/// Opaque handle to the connection a request came from.
///
/// The core never interprets it; it is copied from a request onto its
/// response so the connection layer can route the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplyTarget(u64);

impl ReplyTarget {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

/// A request or response travelling through the pool.
#[derive(Debug, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    kind: MessageKind,
    payload: Bytes,
    reply_to: Option<ReplyTarget>,
    in_reply_to: Option<MessageId>,
}

impl Message {
    /// Creates a message with a fresh id and no reply target.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            id: MessageId::next(),
            kind,
            payload: payload.into(),
            reply_to: None,
            in_reply_to: None,
        }
    }

    /// Sets the connection the response to this message is routed to.
    #[must_use]
    pub fn with_reply_to(mut self, target: ReplyTarget) -> Self {
        self.reply_to = Some(target);
        self
    }

    /// Builds the response to this request.
    ///
    /// The response keeps the request's kind and reply target and records the
    /// request's id as its correlation.
    pub fn reply(&self, payload: impl Into<Bytes>) -> Self {
        Self {
            id: MessageId::next(),
            kind: self.kind,
            payload: payload.into(),
            reply_to: self.reply_to,
            in_reply_to: Some(self.id),
        }
    }

    pub const fn id(&self) -> MessageId {
        self.id
    }

    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the message, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub const fn reply_to(&self) -> Option<ReplyTarget> {
        self.reply_to
    }

    /// Id of the request this message answers, if it is a response.
    pub const fn in_reply_to(&self) -> Option<MessageId> {
        self.in_reply_to
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new(MessageKind::Unknown, Bytes::new())
    }
}
