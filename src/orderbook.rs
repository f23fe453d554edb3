//! Subscribable view of one order book

use crate::entity::{Listeners, Subscription};
use crate::error::{RemoteError, Result};
use crate::identity::{book_key, Issue};
use crate::meta::NodeKind;
use crate::remote::{Remote, RemoteInner, TransactionNotice};
use crate::request::{BookSpec, Request};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum OrderBookEvent {
    Transaction(Arc<TransactionNotice>),
    /// All cached offers after a change.
    Offers(Vec<Value>),
}

pub struct OrderBook {
    remote: Weak<RemoteInner>,
    taker_gets: Issue,
    taker_pays: Issue,
    key: String,
    listeners: Arc<Listeners<OrderBookEvent>>,
    // keyed by ledger index of the offer node
    offers: Mutex<BTreeMap<String, Map<String, Value>>>,
}

impl OrderBook {
    pub(crate) fn new(remote: Weak<RemoteInner>, taker_gets: Issue, taker_pays: Issue) -> Self {
        Self {
            remote,
            key: book_key(&taker_gets, &taker_pays),
            taker_gets,
            taker_pays,
            listeners: Arc::new(Listeners::new()),
            offers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn taker_gets(&self) -> &Issue {
        &self.taker_gets
    }

    pub fn taker_pays(&self) -> &Issue {
        &self.taker_pays
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.count()
    }

    pub(crate) fn spec(&self) -> BookSpec {
        BookSpec {
            taker_gets: self.taker_gets.clone(),
            taker_pays: self.taker_pays.clone(),
            both: false,
        }
    }

    fn remote(&self) -> Result<Remote> {
        self.remote
            .upgrade()
            .map(Remote::from_inner)
            .ok_or(RemoteError::Disconnected)
    }

    pub fn subscribe(&self) -> Subscription<OrderBookEvent> {
        let receiver = self.listeners.attach(|| {
            if let Ok(remote) = self.remote() {
                remote.send_if_online(Request::new("subscribe").books(&[self.spec()], true));
            }
        });

        let listeners = Arc::clone(&self.listeners);
        let remote = self.remote.clone();
        let spec = self.spec();
        Subscription::new(
            receiver,
            Box::new(move || {
                listeners.detach(|| {
                    if let Some(inner) = remote.upgrade() {
                        Remote::from_inner(inner)
                            .send_if_online(Request::new("unsubscribe").books(&[spec], false));
                    }
                });
            }),
        )
    }

    pub fn cached_offers(&self) -> Vec<Value> {
        self.offers
            .lock()
            .values()
            .map(|fields| Value::Object(fields.clone()))
            .collect()
    }

    /// Fetches `book_offers` and merges the result into the cache.
    pub async fn offers(&self) -> Result<Vec<Value>> {
        let remote = self.remote()?;
        let result = remote
            .request(remote.request_book_offers(&self.taker_gets, &self.taker_pays, None))
            .wait()
            .await?;

        let fetched = result
            .get("offers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        {
            let mut offers = self.offers.lock();
            for offer in &fetched {
                let (Some(index), Some(fields)) = (
                    offer.get("index").and_then(Value::as_str),
                    offer.as_object(),
                ) else {
                    continue;
                };
                offers
                    .entry(index.to_string())
                    .or_default()
                    .extend(fields.clone());
            }
        }
        Ok(fetched)
    }

    pub(crate) fn notify(&self, notice: &Arc<TransactionNotice>) {
        if self.listeners.count() == 0 {
            return;
        }
        self.listeners
            .emit(OrderBookEvent::Transaction(Arc::clone(notice)));

        let snapshot = {
            let mut offers = self.offers.lock();
            let mut changed = false;
            for node in notice.meta.nodes_of_type("Offer") {
                let gets = node.field("TakerGets").and_then(Issue::from_amount);
                let pays = node.field("TakerPays").and_then(Issue::from_amount);
                if gets.as_ref() != Some(&self.taker_gets) || pays.as_ref() != Some(&self.taker_pays) {
                    continue;
                }
                changed = true;
                if node.kind == NodeKind::Deleted {
                    offers.remove(&node.ledger_index);
                    continue;
                }
                let fields = offers.entry(node.ledger_index.clone()).or_default();
                fields.extend(node.fields_new.clone());
                fields.extend(node.fields_final.clone());
            }
            changed.then(|| {
                offers
                    .values()
                    .map(|fields| Value::Object(fields.clone()))
                    .collect::<Vec<_>>()
            })
        };
        if let Some(snapshot) = snapshot {
            debug!("book {} now holds {} offers", self.key, snapshot.len());
            self.listeners.emit(OrderBookEvent::Offers(snapshot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ISSUER: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    fn book() -> OrderBook {
        OrderBook::new(
            Weak::new(),
            Issue::native(),
            Issue::new("USD", Some(ISSUER)).unwrap(),
        )
    }

    fn offer_notice(wrapper: &str, index: &str) -> Arc<TransactionNotice> {
        let body = json!({
            "LedgerEntryType": "Offer",
            "LedgerIndex": index,
            "FinalFields": {
                "TakerGets": "1000",
                "TakerPays": { "currency": "USD", "issuer": ISSUER, "value": "2" }
            }
        });
        let mut node = Map::new();
        node.insert(wrapper.to_string(), body);
        Arc::new(TransactionNotice::from_message(json!({
            "transaction": { "hash": index },
            "meta": { "AffectedNodes": [Value::Object(node)] }
        })))
    }

    #[test]
    fn test_offers_tracked_and_removed() {
        let book = book();
        let mut events = book.subscribe();

        book.notify(&offer_notice("ModifiedNode", "O1"));
        assert_eq!(book.cached_offers().len(), 1);
        assert!(matches!(events.try_recv(), Some(OrderBookEvent::Transaction(_))));
        assert!(matches!(events.try_recv(), Some(OrderBookEvent::Offers(o)) if o.len() == 1));

        book.notify(&offer_notice("DeletedNode", "O1"));
        assert!(book.cached_offers().is_empty());
    }

    #[test]
    fn test_key_matches_issue_pair() {
        assert_eq!(book().key(), format!("XRP:USD/{ISSUER}"));
    }
}
