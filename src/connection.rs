//! A single logical link to one server endpoint
//!
//! Each connection runs its own task: it opens the transport, reconnects
//! with exponential backoff while it is wanted, and reads inbound frames one
//! at a time. Responses are matched against the pending-request table right
//! here; everything else is handed to the pool as a [`PoolSignal`].

use crate::error::RemoteError;
use crate::request::{Request, Resolver};
use crate::transport::{Transport, TransportLink};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Transport-level state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// What a connection reports to its pool.
#[derive(Debug)]
pub(crate) enum PoolSignal {
    Connected(usize),
    Disconnected(usize),
    Message(usize, Value),
    Unexpected(usize, String),
    SubscribeResponse(usize, Value),
}

/// What the owner wants the connection task to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkTarget {
    Idle,
    Up,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    fn next(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

pub struct Connection {
    index: usize,
    url: String,
    state: Mutex<TransportState>,
    primary: AtomicBool,
    running: AtomicBool,
    target: watch::Sender<LinkTarget>,
    pending: Mutex<HashMap<u64, Resolver>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    signals: mpsc::UnboundedSender<PoolSignal>,
    backoff: Backoff,
}

impl Connection {
    pub(crate) fn new(
        index: usize,
        url: String,
        signals: mpsc::UnboundedSender<PoolSignal>,
        backoff: Backoff,
    ) -> Arc<Self> {
        let (target, _) = watch::channel(LinkTarget::Idle);
        Arc::new(Self {
            index,
            url,
            state: Mutex::new(TransportState::Closed),
            primary: AtomicBool::new(false),
            running: AtomicBool::new(false),
            target,
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            signals,
            backoff,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Open
    }

    pub fn is_primary(&self) -> bool {
        self.primary.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::SeqCst);
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock() = state;
    }

    /// Starts the connect/reconnect loop unless it is already running.
    pub(crate) fn connect(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        self.target.send_if_modified(|target| {
            if *target == LinkTarget::Idle {
                *target = LinkTarget::Up;
                true
            } else {
                false
            }
        });
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            conn.run(transport).await;
        });
    }

    /// Tears the link down; the loop idles instead of reconnecting.
    pub(crate) fn disconnect(&self) {
        self.target.send_if_modified(|target| {
            if *target == LinkTarget::Up {
                *target = LinkTarget::Idle;
                true
            } else {
                false
            }
        });
        if self.is_connected() {
            self.set_state(TransportState::Closing);
        }
    }

    /// Ends the connection task for good.
    pub(crate) fn shutdown(&self) {
        self.target.send_replace(LinkTarget::Shutdown);
    }

    async fn run(self: Arc<Self>, transport: Arc<dyn Transport>) {
        let mut target = self.target.subscribe();
        let mut delay = self.backoff.initial;

        loop {
            if next_target(&mut target).await == LinkTarget::Shutdown {
                break;
            }

            self.set_state(TransportState::Connecting);
            debug!("connection {} connecting to {}", self.index, self.url);

            let link = tokio::select! {
                link = transport.connect(&self.url) => link,
                _ = released(&mut target) => {
                    self.set_state(TransportState::Closed);
                    continue;
                }
            };

            match link {
                Ok(link) => {
                    delay = self.backoff.initial;
                    self.serve(link, &mut target).await;
                }
                Err(e) => {
                    warn!("connection {} to {} failed: {}", self.index, self.url, e);
                    self.set_state(TransportState::Closed);
                }
            }

            if !is_up(&mut target) {
                continue;
            }
            debug!("connection {} retrying in {:?}", self.index, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = released(&mut target) => continue,
            }
            delay = self.backoff.next(delay);
        }

        self.set_state(TransportState::Closed);
        debug!("connection {} task finished", self.index);
    }

    async fn serve(&self, link: TransportLink, target: &mut watch::Receiver<LinkTarget>) {
        let TransportLink {
            outbound,
            mut inbound,
            close,
        } = link;

        *self.outbound.lock() = Some(outbound);
        self.set_state(TransportState::Open);
        info!("connection {} open: {}", self.index, self.url);
        let _ = self.signals.send(PoolSignal::Connected(self.index));

        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(raw) => self.on_message(&raw),
                    None => break,
                },
                _ = released(target) => {
                    self.set_state(TransportState::Closing);
                    break;
                }
            }
        }

        self.outbound.lock().take();
        let _ = close.send(());
        self.set_state(TransportState::Closed);
        self.fail_pending(RemoteError::Disconnected);
        info!("connection {} closed: {}", self.index, self.url);
        let _ = self.signals.send(PoolSignal::Disconnected(self.index));
    }

    /// Writes `request` under `id` and remembers it until the response.
    /// Requests already settled elsewhere (timed out) are not written.
    pub(crate) fn send(&self, id: u64, request: &Request, resolver: Resolver) {
        if resolver.is_resolved() {
            trace!("connection {} skipping settled {}", self.index, request.command());
            return;
        }
        let outbound = self.outbound.lock();
        let Some(sender) = outbound.as_ref() else {
            resolver.resolve(Err(RemoteError::Disconnected));
            return;
        };

        trace!("connection {} sending #{} {}", self.index, id, request.command());
        {
            let mut pending = self.pending.lock();
            pending.retain(|_, waiting| !waiting.is_resolved());
            pending.insert(id, resolver);
        }
        if sender.send(request.to_wire(id)).is_err() {
            if let Some(resolver) = self.pending.lock().remove(&id) {
                resolver.resolve(Err(RemoteError::Transport(
                    "connection writer has stopped".to_string(),
                )));
            }
        }
    }

    /// Classifies one inbound frame. A bad frame is reported, never fatal.
    pub(crate) fn on_message(&self, raw: &str) {
        let message: Value = match serde_json::from_str(raw) {
            Ok(message @ Value::Object(_)) => message,
            Ok(_) | Err(_) => {
                warn!("connection {}: unexpected message from remote: {}", self.index, raw);
                let _ = self
                    .signals
                    .send(PoolSignal::Unexpected(self.index, raw.to_string()));
                return;
            }
        };

        if message.get("type").and_then(Value::as_str) != Some("response") {
            let _ = self.signals.send(PoolSignal::Message(self.index, message));
            return;
        }

        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            warn!("connection {}: response without id", self.index);
            return;
        };
        let Some(resolver) = self.pending.lock().remove(&id) else {
            debug!("connection {}: response #{} has no pending request", self.index, id);
            return;
        };

        let result = if message.get("status").and_then(Value::as_str) == Some("success") {
            Ok(message.get("result").cloned().unwrap_or(message))
        } else {
            Err(RemoteError::from_response(&message))
        };
        resolver.resolve(result);
    }

    fn fail_pending(&self, err: RemoteError) {
        let drained: Vec<Resolver> = self.pending.lock().drain().map(|(_, r)| r).collect();
        if !drained.is_empty() {
            debug!("connection {} failing {} pending requests", self.index, drained.len());
        }
        for resolver in drained {
            resolver.resolve(Err(err.clone()));
        }
    }
}

fn is_up(target: &mut watch::Receiver<LinkTarget>) -> bool {
    let current = *target.borrow_and_update();
    current == LinkTarget::Up
}

/// Waits until the connection is wanted up, or shut down.
async fn next_target(target: &mut watch::Receiver<LinkTarget>) -> LinkTarget {
    loop {
        let current = *target.borrow_and_update();
        if current != LinkTarget::Idle {
            return current;
        }
        if target.changed().await.is_err() {
            return LinkTarget::Shutdown;
        }
    }
}

/// Resolves once the connection is no longer wanted up.
async fn released(target: &mut watch::Receiver<LinkTarget>) {
    loop {
        if !is_up(target) {
            return;
        }
        if target.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Outcome, RequestHandle};

    fn test_connection() -> (Arc<Connection>, mpsc::UnboundedReceiver<PoolSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backoff = Backoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(100),
        };
        (Connection::new(0, "ws://test:1".to_string(), tx, backoff), rx)
    }

    fn attach_outbound(conn: &Connection) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *conn.outbound.lock() = Some(tx);
        conn.set_state(TransportState::Open);
        rx
    }

    #[test]
    fn test_response_resolves_matching_request() {
        let (conn, _signals) = test_connection();
        let mut wire = attach_outbound(&conn);
        let (resolver, handle) = RequestHandle::pair();

        conn.send(7, &Request::new("server_info"), resolver);
        let sent: Value = serde_json::from_str(&wire.try_recv().unwrap()).unwrap();
        assert_eq!(sent["id"], 7);
        assert_eq!(conn.pending_count(), 1);

        conn.on_message(r#"{"id":7,"type":"response","status":"success","result":{"info":{}}}"#);
        assert_eq!(conn.pending_count(), 0);
        match handle.outcome() {
            Outcome::Succeeded(result) => assert!(result.get("info").is_some()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_error_response_is_structured() {
        let (conn, _signals) = test_connection();
        let _wire = attach_outbound(&conn);
        let (resolver, handle) = RequestHandle::pair();

        conn.send(1, &Request::new("tx"), resolver);
        conn.on_message(
            r#"{"id":1,"type":"response","status":"error","error":"txnNotFound","error_message":"Transaction not found."}"#,
        );
        match handle.outcome() {
            Outcome::Failed(err) => assert_eq!(err.remote_code(), Some("txnNotFound")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_bad_frame_is_reported_not_fatal() {
        let (conn, mut signals) = test_connection();
        let _wire = attach_outbound(&conn);

        conn.on_message("{not json");
        conn.on_message("[1,2]");
        assert!(matches!(signals.try_recv(), Ok(PoolSignal::Unexpected(0, _))));
        assert!(matches!(signals.try_recv(), Ok(PoolSignal::Unexpected(0, _))));
        assert!(conn.is_connected());
    }

    #[test]
    fn test_notifications_are_forwarded() {
        let (conn, mut signals) = test_connection();
        conn.on_message(r#"{"type":"ledgerClosed","ledger_index":5,"ledger_hash":"AB"}"#);
        match signals.try_recv() {
            Ok(PoolSignal::Message(0, message)) => assert_eq!(message["ledger_index"], 5),
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[test]
    fn test_send_without_link_fails_immediately() {
        let (conn, _signals) = test_connection();
        let (resolver, handle) = RequestHandle::pair();
        conn.send(1, &Request::new("ping"), resolver);
        assert!(matches!(handle.outcome(), Outcome::Failed(RemoteError::Disconnected)));
    }

    #[test]
    fn test_settled_requests_leave_the_pending_table() {
        let (conn, _signals) = test_connection();
        let mut wire = attach_outbound(&conn);
        let (r1, h1) = RequestHandle::pair();
        conn.send(1, &Request::new("server_info"), r1.clone());
        wire.try_recv().unwrap();

        // the caller gave up on #1
        r1.resolve(Err(RemoteError::Timeout));
        let (r2, _h2) = RequestHandle::pair();
        conn.send(2, &Request::new("ping"), r2);
        assert_eq!(conn.pending_count(), 1);
        wire.try_recv().unwrap();

        // an already settled request is never written
        conn.send(3, &Request::new("ledger"), r1);
        assert!(wire.try_recv().is_err());
        assert_eq!(conn.pending_count(), 1);
        assert!(matches!(h1.outcome(), Outcome::Failed(RemoteError::Timeout)));
    }

    #[test]
    fn test_fail_pending_resolves_everything_once() {
        let (conn, _signals) = test_connection();
        let _wire = attach_outbound(&conn);
        let (r1, h1) = RequestHandle::pair();
        let (r2, h2) = RequestHandle::pair();
        conn.send(1, &Request::new("a"), r1);
        conn.send(2, &Request::new("b"), r2);

        conn.fail_pending(RemoteError::Disconnected);
        assert!(matches!(h1.outcome(), Outcome::Failed(RemoteError::Disconnected)));
        assert!(matches!(h2.outcome(), Outcome::Failed(RemoteError::Disconnected)));

        // a late response for an already failed request is dropped
        conn.on_message(r#"{"id":1,"type":"response","status":"success","result":{}}"#);
        assert!(matches!(h1.outcome(), Outcome::Failed(RemoteError::Disconnected)));
    }
}
