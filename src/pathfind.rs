//! Long-running `path_find` sessions
//!
//! Only one session is open per pool. Opening a new one supersedes the
//! previous session, which then stops receiving updates.

use crate::entity::{Listeners, Subscription};
use crate::identity::Issue;
use crate::remote::{LedgerClosed, Remote, RemoteInner};
use crate::request::{Request, RequestHandle};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum PathFindEvent {
    Update(Arc<Value>),
    LedgerClosed(Arc<LedgerClosed>),
    Superseded,
    Closed,
}

pub struct PathFind {
    remote: Weak<RemoteInner>,
    source_account: String,
    destination_account: String,
    destination_amount: Value,
    source_currencies: Vec<Issue>,
    listeners: Listeners<PathFindEvent>,
    finished: AtomicBool,
}

impl PathFind {
    pub(crate) fn new(
        remote: Weak<RemoteInner>,
        source_account: String,
        destination_account: String,
        destination_amount: Value,
        source_currencies: Vec<Issue>,
    ) -> Self {
        Self {
            remote,
            source_account,
            destination_account,
            destination_amount,
            source_currencies,
            listeners: Listeners::new(),
            finished: AtomicBool::new(false),
        }
    }

    /// The `path_find create` command for this session.
    pub(crate) fn create_request(&self) -> Request {
        let request = Request::new("path_find")
            .set("subcommand", "create")
            .set("source_account", self.source_account.as_str())
            .set("destination_account", self.destination_account.as_str())
            .set("destination_amount", self.destination_amount.clone());
        if self.source_currencies.is_empty() {
            return request;
        }
        let currencies: Vec<Value> = self.source_currencies.iter().map(Issue::to_json).collect();
        request.set("source_currencies", json!(currencies))
    }

    pub fn subscribe(&self) -> Subscription<PathFindEvent> {
        Subscription::new(self.listeners.attach(|| {}), Box::new(|| {}))
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn notify_update(&self, message: Arc<Value>) {
        if !self.is_finished() {
            self.listeners.emit(PathFindEvent::Update(message));
        }
    }

    pub(crate) fn notify_ledger_closed(&self, closed: Arc<LedgerClosed>) {
        if !self.is_finished() {
            self.listeners.emit(PathFindEvent::LedgerClosed(closed));
        }
    }

    pub(crate) fn notify_superseded(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            debug!("path_find {} -> {} superseded", self.source_account, self.destination_account);
            self.listeners.emit(PathFindEvent::Superseded);
        }
    }

    /// Sends `path_find close` and detaches the session from the pool.
    pub fn close(self: &Arc<Self>) -> Option<RequestHandle> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.listeners.emit(PathFindEvent::Closed);
        let remote = Remote::from_inner(self.remote.upgrade()?);
        remote.clear_path_find(self);
        Some(remote.request(Request::new("path_find").set("subcommand", "close")))
    }
}
