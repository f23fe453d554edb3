//! Outbound commands and their write-once outcomes
//!
//! A [`Request`] is mutable builder state until it is handed to the pool.
//! From then on the caller only holds a [`RequestHandle`], a cloneable
//! observer of a single outcome slot. The slot is written at most once; the
//! first writer wins and every later resolution attempt is ignored.

use crate::error::{RemoteError, Result};
use crate::identity::Issue;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub enum Outcome {
    Unresolved,
    Succeeded(Value),
    Failed(RemoteError),
}

impl Outcome {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Outcome::Unresolved)
    }

    fn into_result(self) -> Option<Result<Value>> {
        match self {
            Outcome::Unresolved => None,
            Outcome::Succeeded(value) => Some(Ok(value)),
            Outcome::Failed(err) => Some(Err(err)),
        }
    }
}

type Slot = Arc<watch::Sender<Outcome>>;

fn try_resolve(slot: &Slot, result: Result<Value>) -> bool {
    slot.send_if_modified(|outcome| {
        if outcome.is_resolved() {
            return false;
        }
        *outcome = match result {
            Ok(value) => Outcome::Succeeded(value),
            Err(err) => Outcome::Failed(err),
        };
        true
    })
}

/// Write side of an outcome slot, held by whoever will produce the result.
#[derive(Clone)]
pub struct Resolver {
    slot: Slot,
}

impl Resolver {
    /// Returns false when the outcome was already set.
    pub fn resolve(&self, result: Result<Value>) -> bool {
        try_resolve(&self.slot, result)
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_resolved()
    }
}

/// Read side of an outcome slot.
#[derive(Clone)]
pub struct RequestHandle {
    slot: Slot,
}

impl RequestHandle {
    pub fn pair() -> (Resolver, RequestHandle) {
        let (tx, _rx) = watch::channel(Outcome::Unresolved);
        let slot = Arc::new(tx);
        (Resolver { slot: slot.clone() }, RequestHandle { slot })
    }

    /// A handle that is already resolved, for locally answered requests.
    pub fn resolved(result: Result<Value>) -> RequestHandle {
        let (resolver, handle) = Self::pair();
        resolver.resolve(result);
        handle
    }

    pub fn outcome(&self) -> Outcome {
        self.slot.borrow().clone()
    }

    pub async fn wait(&self) -> Result<Value> {
        let mut rx = self.slot.subscribe();
        let outcome = match rx.wait_for(Outcome::is_resolved).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => Outcome::Failed(RemoteError::Disconnected),
        };
        outcome
            .into_result()
            .unwrap_or(Err(RemoteError::Disconnected))
    }

    /// Waits at most `duration`. On expiry the outcome is settled as
    /// `Timeout` for every observer, and a late response is ignored.
    pub async fn timeout(&self, duration: Duration) -> Result<Value> {
        if let Ok(result) = tokio::time::timeout(duration, self.wait()).await {
            return result;
        }
        try_resolve(&self.slot, Err(RemoteError::Timeout));
        self.outcome()
            .into_result()
            .unwrap_or(Err(RemoteError::Timeout))
    }
}

/// Which ledger a lookup is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerSelector {
    Current,
    Closed,
    Verified,
    Hash(String),
    Index(u32),
}

impl LedgerSelector {
    /// Anything longer than 12 characters is taken to be a hash.
    pub fn parse(spec: &str) -> Self {
        match spec {
            "current" => LedgerSelector::Current,
            "closed" => LedgerSelector::Closed,
            "verified" => LedgerSelector::Verified,
            other if other.len() > 12 => LedgerSelector::Hash(other.to_string()),
            other => other
                .parse()
                .map(LedgerSelector::Index)
                .unwrap_or_else(|_| LedgerSelector::Hash(other.to_string())),
        }
    }
}

/// An order book in a `subscribe` request.
#[derive(Debug, Clone)]
pub struct BookSpec {
    pub taker_gets: Issue,
    pub taker_pays: Issue,
    pub both: bool,
}

/// A single command under construction.
#[derive(Debug, Clone)]
pub struct Request {
    command: String,
    message: Map<String, Value>,
}

impl Request {
    pub fn new(command: &str) -> Self {
        let mut message = Map::new();
        message.insert("command".to_string(), Value::String(command.to_string()));
        Self {
            command: command.to_string(),
            message,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn message(&self) -> &Map<String, Value> {
        &self.message
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.message.get(key)
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.message.insert(key.to_string(), value.into());
        self
    }

    /// Serializes the request with its correlation id.
    pub fn to_wire(&self, id: u64) -> String {
        let mut message = self.message.clone();
        message.insert("id".to_string(), json!(id));
        Value::Object(message).to_string()
    }

    pub fn build_path(self, build: bool) -> Self {
        if build {
            self.set("build_path", true)
        } else {
            self
        }
    }

    /// Scopes to the open ledger when `current`, else to the last closed
    /// ledger hash.
    pub fn ledger_choose(
        self,
        current: bool,
        current_index: Option<u32>,
        closed_hash: Option<&str>,
    ) -> Self {
        if current {
            match current_index {
                Some(index) => self.set("ledger_index", index),
                None => self,
            }
        } else {
            match closed_hash {
                Some(hash) => self.set("ledger_hash", hash),
                None => self,
            }
        }
    }

    pub fn ledger_hash(self, hash: &str) -> Self {
        self.set("ledger_hash", hash)
    }

    pub fn ledger_index(self, index: u32) -> Self {
        self.set("ledger_index", index)
    }

    pub fn ledger_select(self, selector: &LedgerSelector) -> Self {
        match selector {
            LedgerSelector::Current => self.set("ledger_index", "current"),
            LedgerSelector::Closed => self.set("ledger_index", "closed"),
            LedgerSelector::Verified => self.set("ledger_index", "verified"),
            LedgerSelector::Hash(hash) => self.ledger_hash(hash),
            LedgerSelector::Index(index) => self.ledger_index(*index),
        }
    }

    pub fn account_root(self, account: &str) -> Self {
        self.set("account_root", account)
    }

    pub fn index(self, hash: &str) -> Self {
        self.set("index", hash)
    }

    pub fn offer_id(self, account: &str, seq: u32) -> Self {
        self.set("offer", json!({ "account": account, "seq": seq }))
    }

    pub fn offer_index(self, index: &str) -> Self {
        self.set("offer", index)
    }

    pub fn secret(self, secret: &str) -> Self {
        if secret.is_empty() {
            self
        } else {
            self.set("secret", secret)
        }
    }

    pub fn tx_hash(self, hash: &str) -> Self {
        self.set("tx_hash", hash)
    }

    pub fn tx_json(self, tx_json: Value) -> Self {
        self.set("tx_json", tx_json)
    }

    pub fn tx_blob(self, blob: &str) -> Self {
        self.set("tx_blob", blob)
    }

    pub fn ripple_state(self, account: &str, issuer: &str, currency: &str) -> Self {
        self.set(
            "ripple_state",
            json!({ "accounts": [account, issuer], "currency": currency }),
        )
    }

    pub fn accounts<S: AsRef<str>>(self, accounts: &[S], realtime: bool) -> Self {
        let list: Vec<Value> = accounts.iter().map(|a| json!(a.as_ref())).collect();
        let key = if realtime { "rt_accounts" } else { "accounts" };
        self.set(key, list)
    }

    pub fn rt_accounts<S: AsRef<str>>(self, accounts: &[S]) -> Self {
        self.accounts(accounts, true)
    }

    pub fn books(self, books: &[BookSpec], snapshot: bool) -> Self {
        let list: Vec<Value> = books
            .iter()
            .map(|book| {
                let mut entry = json!({
                    "taker_gets": book.taker_gets.to_json(),
                    "taker_pays": book.taker_pays.to_json(),
                });
                if snapshot {
                    entry["snapshot"] = json!(true);
                }
                if book.both {
                    entry["both"] = json!(true);
                }
                entry
            })
            .collect();
        self.set("books", list)
    }

    pub fn streams<S: AsRef<str>>(self, streams: &[S]) -> Self {
        let list: Vec<Value> = streams.iter().map(|s| json!(s.as_ref())).collect();
        self.set("streams", list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_resolution_wins() {
        let (resolver, handle) = RequestHandle::pair();
        assert!(resolver.resolve(Ok(json!({"first": true}))));
        assert!(!resolver.resolve(Err(RemoteError::Disconnected)));
        match handle.outcome() {
            Outcome::Succeeded(value) => assert_eq!(value["first"], true),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_many_observers_see_one_outcome() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let (resolver, handle) = RequestHandle::pair();
            let other = handle.clone();
            let waiter = tokio::spawn(async move { other.wait().await });
            resolver.resolve(Ok(json!(7)));
            assert_eq!(handle.wait().await.unwrap(), json!(7));
            assert_eq!(waiter.await.unwrap().unwrap(), json!(7));
        })
        .await
        .expect("test_many_observers_see_one_outcome timed out");
    }

    #[tokio::test]
    async fn test_timeout_settles_and_ignores_late_response() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let (resolver, handle) = RequestHandle::pair();
            let err = handle.timeout(Duration::from_millis(10)).await.unwrap_err();
            assert!(matches!(err, RemoteError::Timeout));
            assert!(!resolver.resolve(Ok(json!("late"))));
            assert!(matches!(handle.wait().await, Err(RemoteError::Timeout)));
        })
        .await
        .expect("test_timeout_settles_and_ignores_late_response timed out");
    }

    #[test]
    fn test_wire_format_carries_id() {
        let request = Request::new("transaction_entry")
            .tx_hash("ABCD")
            .ledger_hash("FFFF");
        let wire: Value = serde_json::from_str(&request.to_wire(42)).unwrap();
        assert_eq!(wire["command"], "transaction_entry");
        assert_eq!(wire["id"], 42);
        assert_eq!(wire["tx_hash"], "ABCD");
        assert_eq!(wire["ledger_hash"], "FFFF");
    }

    #[test]
    fn test_ledger_select() {
        assert_eq!(LedgerSelector::parse("closed"), LedgerSelector::Closed);
        assert_eq!(LedgerSelector::parse("1234"), LedgerSelector::Index(1234));
        let hash = "E6DB7365949BF9814D76BCC730B01818EB9136A89DB224F3F9F5AAE4569D758E";
        assert_eq!(
            LedgerSelector::parse(hash),
            LedgerSelector::Hash(hash.to_string())
        );
        let request = Request::new("ledger_entry").ledger_select(&LedgerSelector::Index(5));
        assert_eq!(request.get("ledger_index"), Some(&json!(5)));
    }

    #[test]
    fn test_books_builder() {
        let book = BookSpec {
            taker_gets: Issue::native(),
            taker_pays: Issue::new("USD", Some("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh")).unwrap(),
            both: true,
        };
        let request = Request::new("subscribe").books(&[book], true);
        let books = request.get("books").unwrap();
        assert_eq!(books[0]["taker_gets"]["currency"], "XRP");
        assert!(books[0]["taker_gets"].get("issuer").is_none());
        assert_eq!(books[0]["taker_pays"]["issuer"], "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh");
        assert_eq!(books[0]["snapshot"], true);
        assert_eq!(books[0]["both"], true);
    }
}
