//! In-memory server side for driving a `Remote` in tests

#![allow(dead_code)]

use async_trait::async_trait;
use ledgerlink::config::{RemoteConfig, ServerConfig};
use ledgerlink::error::Result;
use ledgerlink::remote::Remote;
use ledgerlink::transport::{Transport, TransportLink};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const ALICE: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
pub const BOB: &str = "rPMh7Pi9ct699iZUTWaytJUoHcJ7cgyziK";

const STEP: Duration = Duration::from_secs(2);

/// Hands the server end of every link the client opens to the test.
pub struct MockTransport {
    servers: mpsc::UnboundedSender<MockServer>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        (Arc::new(Self { servers }), accepted)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<TransportLink> {
        let (outbound, requests) = mpsc::unbounded_channel();
        let (pushes, inbound) = mpsc::unbounded_channel();
        let (close, closed) = oneshot::channel();
        let _ = self.servers.send(MockServer {
            url: url.to_string(),
            requests,
            pushes: Some(pushes),
            closed,
        });
        Ok(TransportLink {
            outbound,
            inbound,
            close,
        })
    }
}

/// The server end of one link.
pub struct MockServer {
    pub url: String,
    requests: mpsc::UnboundedReceiver<String>,
    pushes: Option<mpsc::UnboundedSender<String>>,
    closed: oneshot::Receiver<()>,
}

impl MockServer {
    pub async fn next_request(&mut self) -> Value {
        let raw = tokio::time::timeout(STEP, self.requests.recv())
            .await
            .expect("no request arrived")
            .expect("client closed the link");
        serde_json::from_str(&raw).expect("client sent invalid JSON")
    }

    /// Next request, asserting its command.
    pub async fn expect(&mut self, command: &str) -> Value {
        let request = self.next_request().await;
        assert_eq!(request["command"], command, "unexpected request {request}");
        request
    }

    /// True if nothing is queued from the client right now.
    pub fn is_idle(&mut self) -> bool {
        self.requests.try_recv().is_err()
    }

    pub fn push(&self, message: Value) {
        if let Some(pushes) = &self.pushes {
            let _ = pushes.send(message.to_string());
        }
    }

    pub fn respond(&self, request: &Value, result: Value) {
        self.push(json!({
            "id": request["id"],
            "type": "response",
            "status": "success",
            "result": result,
        }));
    }

    pub fn respond_error(&self, request: &Value, error: &str) {
        self.push(json!({
            "id": request["id"],
            "type": "response",
            "status": "error",
            "error": error,
            "error_message": format!("{error} from mock"),
        }));
    }

    /// Resolves once the client tears its end of the link down.
    pub async fn client_closed(&mut self) {
        let _ = tokio::time::timeout(STEP, &mut self.closed)
            .await
            .expect("client kept the link open");
    }

    /// Drops the server end; the client sees the link close.
    pub fn close(&mut self) {
        self.pushes.take();
    }

    /// Answers the standing subscribe with a closed ledger.
    pub async fn accept_subscribe(&mut self, ledger_index: u32) -> Value {
        let request = self.expect("subscribe").await;
        self.respond(&request, ledger_result(ledger_index));
        request
    }

    pub fn close_ledger(&self, ledger_index: u32) {
        let mut message = ledger_result(ledger_index);
        message["type"] = json!("ledgerClosed");
        self.push(message);
    }
}

pub fn ledger_result(ledger_index: u32) -> Value {
    json!({
        "ledger_index": ledger_index,
        "ledger_hash": ledger_hash(ledger_index),
        "ledger_time": 1000 + ledger_index,
        "fee_base": 10,
        "fee_ref": 10,
        "reserve_base": 20_000_000,
        "reserve_inc": 5_000_000,
    })
}

pub fn ledger_hash(ledger_index: u32) -> String {
    format!("{:064X}", ledger_index)
}

pub fn config(servers: usize) -> RemoteConfig {
    let servers = (0..servers)
        .map(|i| ServerConfig::new(format!("mock{i}"), 6006, false))
        .collect();
    RemoteConfig {
        reconnect_delay_ms: 10,
        max_reconnect_delay_ms: 50,
        ..RemoteConfig::with_servers(servers)
    }
}

pub fn remote(config: RemoteConfig) -> (Remote, mpsc::UnboundedReceiver<MockServer>) {
    let (transport, accepted) = MockTransport::new();
    let remote = Remote::with_transport(config, transport).expect("valid config");
    (remote, accepted)
}

pub async fn accept(accepted: &mut mpsc::UnboundedReceiver<MockServer>) -> MockServer {
    tokio::time::timeout(STEP, accepted.recv())
        .await
        .expect("client did not connect")
        .expect("transport dropped")
}
