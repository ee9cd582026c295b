//! TCP connection layer in front of the pool.
//!
//! Each accepted connection is registered under a fresh [`ReplyTarget`] and
//! split in two:
//!
//! - the read half turns every chunk it reads into an `Echo` request tagged
//!   with the connection's target and hands it to [`Master::put_request`].
//! - the write half is driven by a task that drains an unbounded channel of
//!   response payloads.
//!
//! The pool's response callback looks the target up in [`Connections`] and
//! forwards the payload to that channel. Responses for connections that have
//! already gone away are discarded.
//!
//! Consecutive chunks of one connection may be served by different workers
//! and finish in any order. Each connection records the ids of its requests
//! in read order and parks a response until every earlier one was written.

use bytes::{Bytes, BytesMut};
use kvpool::{Master, Message, MessageId, MessageKind, ReplyTarget, ResponseHandler};
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

/// Puts one connection's responses back into the order its requests were
/// read.
#[derive(Debug, Default)]
struct WriteOrder {
    pending: VecDeque<MessageId>,
    parked: HashMap<MessageId, Bytes>,
}

impl WriteOrder {
    fn expect(&mut self, request: MessageId) {
        self.pending.push_back(request);
    }

    /// Accepts the response to `request` and returns every payload that can
    /// be written now, oldest first.
    fn accept(&mut self, request: MessageId, payload: Bytes) -> Vec<Bytes> {
        if !self.pending.contains(&request) {
            return vec![payload];
        }
        self.parked.insert(request, payload);

        let mut ready = Vec::new();
        while let Some(next) = self.pending.front() {
            let Some(payload) = self.parked.remove(next) else {
                break;
            };
            self.pending.pop_front();
            ready.push(payload);
        }
        ready
    }
}

#[derive(Debug)]
struct Route {
    writer: mpsc::UnboundedSender<Bytes>,
    order: WriteOrder,
}

/// Registry of open connections, keyed by the target stamped on their
/// requests.
#[derive(Debug, Default)]
pub struct Connections {
    next_target: AtomicU64,
    routes: Mutex<HashMap<ReplyTarget, Route>>,
}

impl Connections {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new connection and returns its target together with the
    /// receiving end of its outbound channel.
    pub fn register(&self) -> (ReplyTarget, mpsc::UnboundedReceiver<Bytes>) {
        let target = ReplyTarget::new(self.next_target.fetch_add(1, Ordering::Relaxed));
        let (writer, rx) = mpsc::unbounded_channel();
        self.routes.lock().insert(
            target,
            Route {
                writer,
                order: WriteOrder::default(),
            },
        );
        (target, rx)
    }

    /// Records that `request` was read from the connection, so its response
    /// is written after the responses to every earlier request.
    pub fn expect(&self, target: ReplyTarget, request: MessageId) {
        if let Some(route) = self.routes.lock().get_mut(&target) {
            route.order.expect(request);
        }
    }

    /// Removes a connection. Its writer finishes once the payloads already
    /// queued for it are written.
    pub fn unregister(&self, target: ReplyTarget) {
        self.routes.lock().remove(&target);
    }

    /// Routes a response payload to the connection it answers.
    pub fn deliver(&self, response: Message) {
        let Some(target) = response.reply_to() else {
            #[cfg(feature = "tracing")]
            tracing::warn!("Dropping {} with no reply target", response.id());
            return;
        };

        let mut routes = self.routes.lock();
        let Some(route) = routes.get_mut(&target) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "Discarding {} for closed connection {}",
                response.id(),
                target.get()
            );
            return;
        };
        let ready = match response.in_reply_to() {
            Some(request) => route.order.accept(request, response.into_payload()),
            None => vec![response.into_payload()],
        };
        // Sent under the lock so concurrent deliveries keep the order.
        for payload in ready {
            if route.writer.send(payload).is_err() {
                #[cfg(feature = "tracing")]
                tracing::debug!("Writer for connection {} already exited", target.get());
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }
}

/// Response callback that writes every response back to its connection.
pub fn response_handler(connections: Arc<Connections>) -> impl ResponseHandler {
    move |_: &Master, response: Message| connections.deliver(response)
}

/// Accepts connections until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    master: Master,
    connections: Arc<Connections>,
    read_buffer_size: usize,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Accepted connection from {_peer}");
                    tokio::spawn(handle_connection(
                        stream,
                        master.clone(),
                        Arc::clone(&connections),
                        read_buffer_size,
                        shutdown.clone(),
                    ));
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Failed to accept connection: {_e}");
                }
            },
        }
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Stopped accepting connections ({} open)", connections.len());
}

async fn handle_connection(
    stream: TcpStream,
    master: Master,
    connections: Arc<Connections>,
    read_buffer_size: usize,
    shutdown: CancellationToken,
) {
    let (target, mut outbound) = connections.register();
    let (mut reader, mut writer) = stream.into_split();

    let write_task = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if writer.write_all(&payload).await.is_err() {
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(read_buffer_size);
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    let request = Message::new(MessageKind::Echo, buf.split().freeze())
                        .with_reply_to(target);
                    connections.expect(target, request.id());
                    if let Err(_e) = master.put_request(request) {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Closing connection {}: {_e}", target.get());
                        break;
                    }
                    buf.reserve(read_buffer_size);
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Read failed on connection {}: {_e}", target.get());
                    break;
                }
            },
        }
    }

    connections.unregister(target);
    let _ = write_task.await;
}
