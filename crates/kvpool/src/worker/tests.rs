use super::*;
use crate::message::{Message, MessageKind};
use bytes::Bytes;
use core::time::Duration;
use portable_atomic::Ordering;
use std::time::Instant;

struct Harness {
    worker: Worker,
    requests: Arc<MessageQueue>,
    responses: Arc<MessageQueue>,
    response_ready: SignalReceiver,
}

fn harness(id: usize) -> Harness {
    let requests = Arc::new(MessageQueue::new());
    let responses = Arc::new(MessageQueue::new());
    let (response_tx, response_ready) = async_signal();

    let mut worker = Worker::new(WorkerId::new(id));
    worker.bind(WorkerBinding {
        request_queue: Arc::clone(&requests),
        response_queue: Arc::clone(&responses),
        response_ready: response_tx,
    });

    Harness {
        worker,
        requests,
        responses,
        response_ready,
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

fn echo(payload: &'static str) -> Message {
    Message::new(MessageKind::Echo, payload)
}

/// Queues a request and assigns it to the harness worker.
fn submit(h: &Harness, request: Message) {
    let mut requests = h.requests.lock();
    requests.insert_tail(request);
    h.worker.request_signal().notify().unwrap();
    requests.unlock();
}

#[test]
fn new_worker_is_stopped_and_unbound() {
    let worker = Worker::new(WorkerId::new(3));
    assert_eq!(worker.id(), WorkerId::new(3));
    assert_eq!(worker.state(), WorkerState::Stop);
    assert!(!worker.is_bound());
    assert!(!worker.is_running());
}

#[test]
fn start_requires_binding() {
    let mut worker = Worker::new(WorkerId::new(0));
    let err = worker.start(&PoolConfig::new(1)).unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(worker.state(), WorkerState::Stop);
}

#[test]
fn start_and_stop() {
    let mut h = harness(0);

    h.worker.start(&PoolConfig::new(1)).unwrap();
    assert!(h.worker.is_running());
    assert_eq!(h.worker.state(), WorkerState::Idle);

    h.worker.stop().unwrap();
    assert!(!h.worker.is_running());
    assert_eq!(h.worker.state(), WorkerState::Stop);
    assert!(h.responses.is_empty());
}

#[test]
fn stop_is_idempotent() {
    let mut h = harness(0);
    assert!(h.worker.stop().is_ok());

    h.worker.start(&PoolConfig::new(1)).unwrap();
    h.worker.stop().unwrap();
    assert!(h.worker.stop().is_ok());
    assert_eq!(h.worker.state(), WorkerState::Stop);
}

#[test]
fn start_twice_is_rejected() {
    let mut h = harness(0);
    h.worker.start(&PoolConfig::new(1)).unwrap();
    assert!(matches!(
        h.worker.start(&PoolConfig::new(1)),
        Err(Error::InvalidState { .. })
    ));
    h.worker.stop().unwrap();
}

#[test]
fn restarts_after_stop() {
    let mut h = harness(0);
    let config = PoolConfig::new(1).with_sweep_interval(None);

    h.worker.start(&config).unwrap();
    h.worker.stop().unwrap();
    h.worker.start(&config).unwrap();

    submit(&h, echo("again"));
    assert!(wait_until(Duration::from_secs(5), || h.responses.len() == 1));

    h.worker.stop().unwrap();
}

#[test]
fn drains_requests_queued_before_start() {
    let mut h = harness(0);
    let ids: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|p| {
            let msg = echo(p);
            let id = msg.id();
            submit(&h, msg);
            id
        })
        .collect();

    h.worker.start(&PoolConfig::new(1)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || h.responses.len() == 3));
    h.worker.stop().unwrap();

    assert!(h.requests.is_empty());
    let responses = h.responses.clear();
    let correlations: Vec<_> = responses.iter().filter_map(Message::in_reply_to).collect();
    assert_eq!(correlations, ids);
    let payloads: Vec<_> = responses.into_iter().map(Message::into_payload).collect();
    assert_eq!(payloads, ["a", "b", "c"].map(|p| Bytes::from_static(p.as_bytes())));

    // Three responses landed on an empty queue once, so one wake-up.
    assert!(h.response_ready.try_notified());
    assert!(!h.response_ready.try_notified());
}

#[test]
fn wakes_on_request_signal() {
    let mut h = harness(0);
    h.worker
        .start(&PoolConfig::new(1).with_sweep_interval(None))
        .unwrap();

    submit(&h, echo("ping"));

    assert!(wait_until(Duration::from_secs(5), || {
        h.responses.len() == 1 && h.worker.state() == WorkerState::Idle
    }));
    h.worker.stop().unwrap();
}

#[test]
fn sweep_recovers_lost_wakeup() {
    let mut h = harness(0);
    h.worker
        .start(&PoolConfig::new(1).with_sweep_interval(Some(Duration::from_millis(10))))
        .unwrap();

    // Assigned, but no wake-up is sent.
    let mut requests = h.requests.lock();
    requests.insert_tail(echo("stranded"));
    h.worker.assigned.fetch_add(1, Ordering::AcqRel);
    requests.unlock();

    assert!(wait_until(Duration::from_secs(5), || h.responses.len() == 1));
    h.worker.stop().unwrap();
}

#[test]
fn handler_output_becomes_response_payload() {
    let mut h = harness(7);
    h.worker
        .set_request_handler(Arc::new(|worker: WorkerId, request: &Message| {
            Bytes::from(format!("{worker}:{}", request.payload().len()))
        }));
    h.worker.start(&PoolConfig::new(1)).unwrap();

    submit(&h, echo("hello"));
    assert!(wait_until(Duration::from_secs(5), || h.responses.len() == 1));
    h.worker.stop().unwrap();

    let response = h.responses.pop_head().unwrap();
    assert_eq!(response.kind(), MessageKind::Echo);
    assert_eq!(response.into_payload(), Bytes::from_static(b"worker-7:5"));
}

#[test]
fn stop_while_busy_finishes_the_drain() {
    const TOTAL: usize = 20;

    let mut h = harness(0);
    h.worker
        .set_request_handler(Arc::new(|_: WorkerId, request: &Message| {
            thread::sleep(Duration::from_millis(5));
            request.payload().clone()
        }));
    for _ in 0..TOTAL {
        submit(&h, echo("slow"));
    }

    h.worker.start(&PoolConfig::new(1)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || !h.responses.is_empty()));
    h.worker.stop().unwrap();

    assert!(h.requests.is_empty());
    assert_eq!(h.responses.len(), TOTAL);
    assert_eq!(h.worker.state(), WorkerState::Stop);
}

#[test]
fn stop_while_busy_respects_drain_timeout() {
    const TOTAL: usize = 200;

    let mut h = harness(0);
    h.worker
        .set_request_handler(Arc::new(|_: WorkerId, request: &Message| {
            thread::sleep(Duration::from_millis(5));
            request.payload().clone()
        }));
    for _ in 0..TOTAL {
        submit(&h, echo("slow"));
    }

    let config = PoolConfig::new(1).with_drain_timeout(Duration::from_millis(20));
    h.worker.start(&config).unwrap();
    assert!(wait_until(Duration::from_secs(5), || !h.responses.is_empty()));
    h.worker.stop().unwrap();

    // Nothing is lost or duplicated: leftovers stay queued and assigned.
    assert!(!h.requests.is_empty());
    assert_eq!(h.requests.len() + h.responses.len(), TOTAL);
    assert_eq!(h.worker.request_signal().assigned(), h.requests.len());
}

#[test]
fn takes_only_assigned_requests() {
    let mut h = harness(0);
    h.worker
        .start(&PoolConfig::new(1).with_sweep_interval(None))
        .unwrap();

    // Two requests belong to some other worker.
    h.requests.insert_tail(echo("other"));
    h.requests.insert_tail(echo("other"));
    submit(&h, echo("mine"));

    assert!(wait_until(Duration::from_secs(5), || {
        h.responses.len() == 1 && h.worker.state() == WorkerState::Idle
    }));
    thread::sleep(Duration::from_millis(20));
    h.worker.stop().unwrap();

    assert_eq!(h.responses.len(), 1);
    assert_eq!(h.requests.len(), 2);
    assert_eq!(h.worker.request_signal().assigned(), 0);
}

#[test]
fn stop_takes_requests_assigned_while_idle() {
    let mut h = harness(0);
    h.worker
        .start(&PoolConfig::new(1).with_sweep_interval(None))
        .unwrap();

    // Assigned without a wake-up, so only the stop path can see it.
    let mut requests = h.requests.lock();
    requests.insert_tail(echo("late"));
    h.worker.assigned.fetch_add(1, Ordering::AcqRel);
    requests.unlock();

    h.worker.stop().unwrap();
    assert!(h.requests.is_empty());
    assert_eq!(h.responses.len(), 1);
}

#[test]
fn failed_start_leaves_worker_startable() {
    let mut worker = Worker::new(WorkerId::new(1));
    assert!(worker.start(&PoolConfig::new(1)).is_err());
    assert_eq!(worker.state(), WorkerState::Stop);

    let (response_ready, _response_rx) = async_signal();
    worker.bind(WorkerBinding {
        request_queue: Arc::new(MessageQueue::new()),
        response_queue: Arc::new(MessageQueue::new()),
        response_ready,
    });
    worker.start(&PoolConfig::new(1)).unwrap();
    assert_eq!(worker.state(), WorkerState::Idle);
    worker.stop().unwrap();
}

#[test]
fn dropping_a_running_worker_joins_it() {
    let h = harness(0);
    let Harness {
        mut worker,
        responses,
        ..
    } = h;
    worker.start(&PoolConfig::new(1)).unwrap();
    let signal = worker.request_signal();
    drop(worker);

    assert!(responses.is_empty());
    // The sender kept here is the last one; the receiver went with the worker.
    assert!(signal.is_closed());
}
