//! Subscribable view of one account
//!
//! Created lazily by [`Remote::account`]. The pool holds a network
//! subscription for the account while any listener is attached, and merges
//! `AccountRoot` deltas from matching transactions into the cached entry.

use crate::entity::{Listeners, Subscription};
use crate::error::{RemoteError, Result};
use crate::remote::{Remote, RemoteInner, TransactionNotice};
use crate::request::Request;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum AccountEvent {
    Transaction(Arc<TransactionNotice>),
    /// The merged `AccountRoot` entry after a change.
    Entry(Value),
}

pub struct Account {
    remote: Weak<RemoteInner>,
    account_id: String,
    listeners: Arc<Listeners<AccountEvent>>,
    // only ever extended, never replaced
    entry: Mutex<Map<String, Value>>,
}

impl Account {
    pub(crate) fn new(remote: Weak<RemoteInner>, account_id: String) -> Self {
        Self {
            remote,
            account_id,
            listeners: Arc::new(Listeners::new()),
            entry: Mutex::new(Map::new()),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.count()
    }

    fn remote(&self) -> Result<Remote> {
        self.remote
            .upgrade()
            .map(Remote::from_inner)
            .ok_or(RemoteError::Disconnected)
    }

    /// Attaches a listener; the first one subscribes the account.
    pub fn subscribe(&self) -> Subscription<AccountEvent> {
        let receiver = self.listeners.attach(|| {
            if let Ok(remote) = self.remote() {
                remote.send_if_online(
                    Request::new("subscribe").accounts(&[self.account_id.as_str()], false),
                );
            }
        });

        let listeners = Arc::clone(&self.listeners);
        let remote = self.remote.clone();
        let account_id = self.account_id.clone();
        Subscription::new(
            receiver,
            Box::new(move || {
                listeners.detach(|| {
                    if let Some(inner) = remote.upgrade() {
                        Remote::from_inner(inner).send_if_online(
                            Request::new("unsubscribe").accounts(&[account_id.as_str()], false),
                        );
                    }
                });
            }),
        )
    }

    /// Snapshot of the merged `AccountRoot` fields seen so far.
    pub fn cached_entry(&self) -> Value {
        Value::Object(self.entry.lock().clone())
    }

    /// Fetches `account_info` and merges `account_data` into the entry.
    pub async fn entry(&self) -> Result<Value> {
        let remote = self.remote()?;
        let result = remote
            .request(remote.request_account_info(&self.account_id)?)
            .wait()
            .await?;
        if let Some(data) = result.get("account_data").and_then(Value::as_object) {
            let merged = {
                let mut entry = self.entry.lock();
                entry.extend(data.clone());
                Value::Object(entry.clone())
            };
            self.listeners.emit(AccountEvent::Entry(merged));
        }
        Ok(result)
    }

    pub async fn lines(&self) -> Result<Value> {
        let remote = self.remote()?;
        remote
            .request(remote.request_account_lines(&self.account_id, None, false)?)
            .wait()
            .await
    }

    /// Forgets every cached view of this account: the merged entry here and
    /// the pool's `account_root` snapshot.
    pub fn dirty(&self) {
        self.entry.lock().clear();
        if let Ok(remote) = self.remote() {
            remote.dirty_account_root(&self.account_id);
        }
    }

    /// Routes a transaction touching this account. Ignored while nothing is
    /// subscribed.
    pub(crate) fn notify(&self, notice: &Arc<TransactionNotice>) {
        if self.listeners.count() == 0 {
            return;
        }
        self.listeners
            .emit(AccountEvent::Transaction(Arc::clone(notice)));

        let merged = {
            let mut entry = self.entry.lock();
            let mut changed = false;
            for node in notice.meta.nodes_of_type("AccountRoot") {
                if node.field("Account").and_then(Value::as_str) == Some(self.account_id.as_str()) {
                    entry.extend(node.fields_new.clone());
                    entry.extend(node.fields_final.clone());
                    changed = true;
                }
            }
            changed.then(|| Value::Object(entry.clone()))
        };
        if let Some(merged) = merged {
            debug!("account {} entry updated", self.account_id);
            self.listeners.emit(AccountEvent::Entry(merged));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALICE: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    fn notice(balance: &str) -> Arc<TransactionNotice> {
        Arc::new(TransactionNotice::from_message(json!({
            "type": "transaction",
            "transaction": { "hash": "H" },
            "meta": { "AffectedNodes": [ { "ModifiedNode": {
                "LedgerEntryType": "AccountRoot",
                "LedgerIndex": "AA",
                "FinalFields": { "Account": ALICE, "Balance": balance }
            }}]}
        })))
    }

    #[test]
    fn test_notify_without_listeners_is_ignored() {
        let account = Account::new(Weak::new(), ALICE.to_string());
        account.notify(&notice("10"));
        assert_eq!(account.cached_entry(), json!({}));
    }

    #[test]
    fn test_notify_merges_fields() {
        let account = Account::new(Weak::new(), ALICE.to_string());
        account.entry.lock().insert("Sequence".to_string(), json!(4));
        let mut events = account.subscribe();

        account.notify(&notice("10"));
        assert!(matches!(events.try_recv(), Some(AccountEvent::Transaction(_))));
        match events.try_recv() {
            Some(AccountEvent::Entry(entry)) => {
                assert_eq!(entry["Balance"], "10");
                assert_eq!(entry["Sequence"], 4);
            }
            other => panic!("unexpected event {other:?}"),
        }

        drop(events);
        assert_eq!(account.listener_count(), 0);
    }

    #[test]
    fn test_dirty_forgets_merged_entry() {
        let account = Account::new(Weak::new(), ALICE.to_string());
        let _events = account.subscribe();
        account.notify(&notice("10"));
        assert_eq!(account.cached_entry()["Balance"], "10");

        account.dirty();
        assert_eq!(account.cached_entry(), json!({}));
    }
}
