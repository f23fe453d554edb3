//! Aggregate state of the connection pool
//!
//! Written only by the pool's event loop. Callers read snapshots.

use super::events::{LedgerState, OnlineState};
use crate::request::{Request, Resolver};
use std::collections::BTreeSet;

/// An aggregate online/offline transition caused by one connection report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edge {
    None,
    Online,
    Offline,
}

/// The standing subscriptions moving to `to`. `from` is a still-open
/// connection that held them and has to be unsubscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubscriptionMove {
    pub to: usize,
    pub from: Option<usize>,
}

pub(crate) struct PoolState {
    pub online: OnlineState,
    /// Connections currently open, in fixed index order.
    pub open: BTreeSet<usize>,
    /// Connections explicitly flagged primary in the configuration.
    pub preferred: BTreeSet<usize>,
    pub primary: Option<usize>,
    /// Connection that holds the standing subscriptions.
    pub subscribed_on: Option<usize>,
    pub ledger: LedgerState,
    pub last_tx: Option<String>,
    pub deferred: Vec<(Request, Resolver)>,
    pub server_fatal: bool,
}

impl PoolState {
    pub fn new() -> Self {
        Self {
            online: OnlineState::Offline,
            open: BTreeSet::new(),
            preferred: BTreeSet::new(),
            primary: None,
            subscribed_on: None,
            ledger: LedgerState::default(),
            last_tx: None,
            deferred: Vec::new(),
            server_fatal: false,
        }
    }

    /// Records an opened connection. Returns the edge and a new primary, if
    /// the primary changed.
    pub fn connected(&mut self, index: usize) -> (Edge, Option<usize>) {
        if !self.open.insert(index) {
            return (Edge::None, None);
        }

        let take_over = match self.primary {
            None => true,
            Some(current) => {
                !self.open.contains(&current)
                    || (self.preferred.contains(&index) && !self.preferred.contains(&current))
            }
        };
        let changed = if take_over {
            self.primary = Some(index);
            Some(index)
        } else {
            None
        };

        if self.online == OnlineState::Online {
            return (Edge::None, changed);
        }
        self.online = OnlineState::Online;
        (Edge::Online, changed)
    }

    /// Records a closed connection, failing the primary over to the first
    /// remaining open connection.
    pub fn disconnected(&mut self, index: usize) -> (Edge, Option<usize>) {
        if !self.open.remove(&index) {
            return (Edge::None, None);
        }
        if self.subscribed_on == Some(index) {
            self.subscribed_on = None;
        }

        let mut changed = None;
        if self.primary == Some(index) {
            self.primary = self.first_available();
            changed = self.primary;
        }

        if !self.open.is_empty() || self.online == OnlineState::Offline {
            return (Edge::None, changed);
        }
        self.online = OnlineState::Offline;
        (Edge::Offline, changed)
    }

    fn first_available(&self) -> Option<usize> {
        self.open
            .iter()
            .find(|i| self.preferred.contains(i))
            .or_else(|| self.open.iter().next())
            .copied()
    }

    /// Connection the next outbound request goes to.
    pub fn route(&self) -> Option<usize> {
        self.primary.filter(|p| self.open.contains(p))
    }

    /// Claims the primary for a subscribe when it does not hold one yet.
    pub fn claim_subscription(&mut self) -> Option<SubscriptionMove> {
        let primary = self.route()?;
        if self.subscribed_on == Some(primary) {
            return None;
        }
        let from = self
            .subscribed_on
            .replace(primary)
            .filter(|previous| self.open.contains(previous));
        Some(SubscriptionMove { to: primary, from })
    }

    /// True if `hash` repeats the transaction seen immediately before.
    pub fn is_duplicate_tx(&mut self, hash: Option<&str>) -> bool {
        match hash {
            Some(hash) if self.last_tx.as_deref() == Some(hash) => true,
            Some(hash) => {
                self.last_tx = Some(hash.to_string());
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_edge_per_transition() {
        let mut pool = PoolState::new();
        assert_eq!(pool.connected(0).0, Edge::Online);
        assert_eq!(pool.connected(1).0, Edge::None);
        assert_eq!(pool.connected(1).0, Edge::None);
        assert_eq!(pool.disconnected(0).0, Edge::None);
        assert_eq!(pool.disconnected(1).0, Edge::Offline);
        assert_eq!(pool.disconnected(1).0, Edge::None);
        assert_eq!(pool.connected(2).0, Edge::Online);
    }

    #[test]
    fn test_edges_match_for_arbitrary_sequences() {
        // (connection, up) reports, including redundant ones
        let script = [
            (0, true), (1, true), (0, false), (0, false), (1, false),
            (2, true), (2, true), (1, true), (2, false), (1, false),
            (0, true), (0, false),
        ];
        let mut pool = PoolState::new();
        let mut open: BTreeSet<usize> = BTreeSet::new();
        let (mut ups, mut downs) = (0, 0);
        let (mut expected_ups, mut expected_downs) = (0, 0);

        for (index, up) in script {
            let was_online = !open.is_empty();
            if up {
                open.insert(index);
            } else {
                open.remove(&index);
            }
            match (was_online, !open.is_empty()) {
                (false, true) => expected_ups += 1,
                (true, false) => expected_downs += 1,
                _ => {}
            }

            let (edge, _) = if up {
                pool.connected(index)
            } else {
                pool.disconnected(index)
            };
            match edge {
                Edge::Online => ups += 1,
                Edge::Offline => downs += 1,
                Edge::None => {}
            }
        }
        assert_eq!((ups, downs), (expected_ups, expected_downs));
        assert_eq!((ups, downs), (3, 3));
    }

    #[test]
    fn test_primary_fails_over_in_fixed_order() {
        let mut pool = PoolState::new();
        pool.connected(2);
        pool.connected(0);
        pool.connected(1);
        assert_eq!(pool.primary, Some(2));

        let (_, changed) = pool.disconnected(2);
        assert_eq!(changed, Some(0));
        assert_eq!(pool.route(), Some(0));

        let (_, changed) = pool.disconnected(1);
        assert_eq!(changed, None);
        assert_eq!(pool.primary, Some(0));
    }

    #[test]
    fn test_flagged_primary_takes_over() {
        let mut pool = PoolState::new();
        pool.preferred.insert(1);
        pool.connected(0);
        assert_eq!(pool.primary, Some(0));
        let (_, changed) = pool.connected(1);
        assert_eq!(changed, Some(1));
    }

    #[test]
    fn test_subscription_claimed_once_per_primary() {
        let mut pool = PoolState::new();
        assert_eq!(pool.claim_subscription(), None);
        pool.connected(0);
        pool.connected(1);
        assert_eq!(pool.claim_subscription(), Some(SubscriptionMove { to: 0, from: None }));
        assert_eq!(pool.claim_subscription(), None);

        pool.disconnected(0);
        assert_eq!(pool.subscribed_on, None);
        assert_eq!(pool.claim_subscription(), Some(SubscriptionMove { to: 1, from: None }));
        assert_eq!(pool.claim_subscription(), None);
    }

    #[test]
    fn test_takeover_releases_open_subscriber() {
        let mut pool = PoolState::new();
        pool.preferred.insert(1);
        pool.connected(0);
        pool.claim_subscription();

        pool.connected(1);
        assert_eq!(
            pool.claim_subscription(),
            Some(SubscriptionMove { to: 1, from: Some(0) })
        );
        assert_eq!(pool.subscribed_on, Some(1));
    }

    #[test]
    fn test_duplicate_tx_compares_last_hash_only() {
        let mut pool = PoolState::new();
        assert!(!pool.is_duplicate_tx(Some("A")));
        assert!(pool.is_duplicate_tx(Some("A")));
        assert!(!pool.is_duplicate_tx(Some("B")));
        assert!(!pool.is_duplicate_tx(Some("A")));
        assert!(!pool.is_duplicate_tx(None));
    }
}
