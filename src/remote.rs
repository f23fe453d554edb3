//! The connection pool
//!
//! A [`Remote`] owns every [`Connection`], aggregates them into one
//! online/offline signal and routes requests to the primary. All pool-wide
//! state is written by a single event-loop task fed by the connections;
//! callers only read snapshots or issue new requests.

mod events;
mod fees;
mod pool;
mod requests;

pub use events::{LedgerClosed, LedgerState, OnlineState, RemoteEvent, TransactionNotice};
pub use requests::{AccountTxOptions, LedgerOptions, RippleBalance};

use crate::account::Account;
use crate::cache::{AccountSequenceCache, LedgerEntryCache, SeqAdvance};
use crate::config::{AccountSecret, RemoteConfig, ServerConfig};
use crate::connection::{Backoff, Connection, PoolSignal, TransportState};
use crate::crypto::{Secp256k1Signer, Signer};
use crate::entity::{Listeners, Subscription};
use crate::error::{RemoteError, Result};
use crate::identity::{book_key, validate_address, Issue};
use crate::orderbook::OrderBook;
use crate::pathfind::PathFind;
use crate::request::{BookSpec, Request, RequestHandle, Resolver};
use crate::transaction::Transaction;
use crate::transport::{Transport, WebSocketTransport};
use parking_lot::{Mutex, RwLock};
use pool::{Edge, PoolState, SubscriptionMove};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};

const EVENT_CAPACITY: usize = 1024;

pub(crate) struct RemoteInner {
    config: RemoteConfig,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
    connections: RwLock<Vec<Arc<Connection>>>,
    signals: mpsc::UnboundedSender<PoolSignal>,
    signals_rx: Mutex<Option<mpsc::UnboundedReceiver<PoolSignal>>>,
    wanted: AtomicBool,
    next_id: AtomicU64,
    state: Mutex<PoolState>,
    online: watch::Sender<OnlineState>,
    events: broadcast::Sender<RemoteEvent>,
    ledger_entries: LedgerEntryCache,
    sequences: AccountSequenceCache,
    accounts: Mutex<HashMap<String, Arc<Account>>>,
    books: Mutex<HashMap<String, Arc<OrderBook>>>,
    secrets: RwLock<HashMap<String, String>>,
    path_find: Mutex<Option<Arc<PathFind>>>,
    transaction_feed: Arc<Listeners<Arc<TransactionNotice>>>,
}

impl Drop for RemoteInner {
    fn drop(&mut self) {
        for connection in self.connections.get_mut().iter() {
            connection.shutdown();
        }
    }
}

/// Cheap to clone; every clone drives the same pool.
#[derive(Clone)]
pub struct Remote {
    inner: Arc<RemoteInner>,
}

impl Remote {
    /// A pool over WebSocket connections with the default signer.
    pub fn new(config: RemoteConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(WebSocketTransport::new()))
    }

    pub fn with_transport(config: RemoteConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_parts(config, transport, Arc::new(Secp256k1Signer::new()))
    }

    pub fn with_parts(
        config: RemoteConfig,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn Signer>,
    ) -> Result<Self> {
        config.validate()?;
        let config = config.normalized();
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (online, _) = watch::channel(OnlineState::Offline);

        let remote = Remote {
            inner: Arc::new(RemoteInner {
                config: config.clone(),
                transport,
                signer,
                connections: RwLock::new(Vec::new()),
                signals,
                signals_rx: Mutex::new(Some(signals_rx)),
                wanted: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                state: Mutex::new(PoolState::new()),
                online,
                events,
                ledger_entries: LedgerEntryCache::default(),
                sequences: AccountSequenceCache::new(),
                accounts: Mutex::new(HashMap::new()),
                books: Mutex::new(HashMap::new()),
                secrets: RwLock::new(HashMap::new()),
                path_find: Mutex::new(None),
                transaction_feed: Arc::new(Listeners::new()),
            }),
        };

        for server in &config.servers {
            remote.add_server(server);
        }
        for (nickname, AccountSecret { account, secret }) in &config.accounts {
            remote.set_secret(nickname, secret);
            remote.set_secret(account, secret);
        }
        Ok(remote)
    }

    pub(crate) fn from_inner(inner: Arc<RemoteInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RemoteInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.inner.config
    }

    pub fn is_trusted(&self) -> bool {
        self.inner.config.trusted
    }

    pub(crate) fn signer(&self) -> &dyn Signer {
        self.inner.signer.as_ref()
    }

    /// Adds `server.pool` connections for one endpoint.
    pub fn add_server(&self, server: &ServerConfig) {
        let backoff = Backoff {
            initial: Duration::from_millis(self.inner.config.reconnect_delay_ms),
            max: Duration::from_millis(self.inner.config.max_reconnect_delay_ms),
        };
        let url = server.url();
        let mut added = Vec::new();
        {
            let mut connections = self.inner.connections.write();
            for _ in 0..server.pool.max(1) {
                let index = connections.len();
                let connection =
                    Connection::new(index, url.clone(), self.inner.signals.clone(), backoff);
                if server.primary {
                    self.inner.state.lock().preferred.insert(index);
                }
                connections.push(Arc::clone(&connection));
                added.push(connection);
            }
        }
        debug!("added {} connection(s) to {}", added.len(), url);

        if self.inner.wanted.load(Ordering::SeqCst) {
            for connection in added {
                connection.connect(Arc::clone(&self.inner.transport));
            }
        }
    }

    /// Opens every connection. Must run inside a tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let connections = self.inner.connections.read().clone();
        if connections.is_empty() {
            return Err(RemoteError::Config("No servers available.".to_string()));
        }
        self.start_event_loop();
        self.inner.wanted.store(true, Ordering::SeqCst);
        {
            let mut state = self.inner.state.lock();
            if state.online == OnlineState::Offline {
                state.online = OnlineState::Connecting;
                self.inner.online.send_replace(OnlineState::Connecting);
            }
        }
        info!("connecting to {} server connection(s)", connections.len());
        for connection in connections {
            connection.connect(Arc::clone(&self.inner.transport));
        }
        Ok(())
    }

    /// Closes every connection. The pool goes offline as they report back.
    pub fn disconnect(&self) {
        self.inner.wanted.store(false, Ordering::SeqCst);
        for connection in self.inner.connections.read().iter() {
            connection.disconnect();
        }
        let mut state = self.inner.state.lock();
        if state.online == OnlineState::Connecting && state.open.is_empty() {
            state.online = OnlineState::Offline;
            self.inner.online.send_replace(OnlineState::Offline);
        }
    }

    /// Resolves once the pool is online.
    pub async fn wait_online(&self) {
        let mut online = self.inner.online.subscribe();
        let _ = online.wait_for(|state| *state == OnlineState::Online).await;
    }

    pub fn events(&self) -> broadcast::Receiver<RemoteEvent> {
        self.inner.events.subscribe()
    }

    pub fn online_state(&self) -> OnlineState {
        self.inner.state.lock().online
    }

    pub fn is_online(&self) -> bool {
        self.online_state() == OnlineState::Online
    }

    pub fn ledger_state(&self) -> LedgerState {
        self.inner.state.lock().ledger.clone()
    }

    pub fn ledger_current_index(&self) -> Option<u32> {
        self.inner.state.lock().ledger.ledger_current_index
    }

    pub fn ledger_hash(&self) -> Option<String> {
        self.inner.state.lock().ledger.ledger_hash.clone()
    }

    pub fn primary(&self) -> Option<usize> {
        self.inner.state.lock().route()
    }

    /// `(url, state, is_primary)` of every connection, in index order.
    pub fn connection_states(&self) -> Vec<(String, TransportState, bool)> {
        self.inner
            .connections
            .read()
            .iter()
            .map(|c| (c.url().to_string(), c.state(), c.is_primary()))
            .collect()
    }

    /// Marks the server as not coming back.
    pub fn server_fatal(&self) {
        self.inner.state.lock().server_fatal = true;
    }

    pub fn is_server_fatal(&self) -> bool {
        self.inner.state.lock().server_fatal
    }

    fn connection(&self, index: usize) -> Option<Arc<Connection>> {
        self.inner.connections.read().get(index).cloned()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn emit(&self, event: RemoteEvent) {
        let _ = self.inner.events.send(event);
    }

    // ---- outbound ----

    /// Sends `request` and returns the observer of its outcome.
    ///
    /// `account_root` lookups against the current ledger are answered from
    /// the ledger-entry cache when possible.
    pub fn request(&self, request: Request) -> RequestHandle {
        let cache_key = self.account_root_key(&request);
        if let Some(account) = &cache_key {
            if let Some(node) = self.inner.ledger_entries.get(account) {
                trace!("account_root {} answered from cache", account);
                return RequestHandle::resolved(Ok(json!({ "node": node })));
            }
        }

        let (resolver, handle) = RequestHandle::pair();
        self.dispatch(request, resolver);

        if let (Some(account), Ok(runtime)) = (cache_key, tokio::runtime::Handle::try_current()) {
            let remote = self.clone();
            let fetch = handle.clone();
            let ledger = self.ledger_current_index();
            runtime.spawn(async move {
                let Ok(result) = fetch.wait().await else {
                    return;
                };
                // a ledger closed meanwhile; the node may already be stale
                if remote.ledger_current_index() != ledger {
                    return;
                }
                if let Some(node) = result.get("node") {
                    remote.inner.ledger_entries.put(account, node.clone());
                }
            });
        }
        handle
    }

    /// Routes to the primary, or defers until the pool is next online.
    pub(crate) fn dispatch(&self, request: Request, resolver: Resolver) {
        if self.inner.connections.read().is_empty() {
            resolver.resolve(Err(RemoteError::Config("No servers available.".to_string())));
            return;
        }

        let target = {
            let mut state = self.inner.state.lock();
            if state.online != OnlineState::Online {
                debug!("deferring {} until online", request.command());
                state.deferred.retain(|(_, waiting)| !waiting.is_resolved());
                state.deferred.push((request, resolver));
                return;
            }
            state.route()
        };

        match target.and_then(|index| self.connection(index)) {
            Some(connection) => connection.send(self.next_id(), &request, resolver),
            None => {
                resolver.resolve(Err(RemoteError::Config(
                    "No servers available.".to_string(),
                )));
            }
        }
    }

    /// Fire-and-forget send that is skipped while offline; the standing
    /// subscribe on the next connect covers it.
    pub(crate) fn send_if_online(&self, request: Request) {
        if self.is_online() {
            let _ = self.request(request);
        }
    }

    fn account_root_key(&self, request: &Request) -> Option<String> {
        if request.command() != "ledger_entry" || request.get("ledger_hash").is_some() {
            return None;
        }
        let account = request.get("account_root")?.as_str()?;
        let current = match request.get("ledger_index") {
            None => true,
            Some(Value::String(s)) => s == "current",
            Some(index) => index.as_u64() == self.ledger_current_index().map(u64::from),
        };
        current.then(|| account.to_string())
    }

    /// The standing feeds as a `subscribe` for a new primary, or as the
    /// matching `unsubscribe` for the one it replaces.
    fn standing_request(&self, command: &str) -> Request {
        let mut streams = vec!["ledger", "server"];
        if self.inner.transaction_feed.count() > 0 {
            streams.push("transactions");
        }
        let accounts: Vec<String> = self
            .inner
            .accounts
            .lock()
            .values()
            .filter(|account| account.listener_count() > 0)
            .map(|account| account.account_id().to_string())
            .collect();
        let books: Vec<BookSpec> = self
            .inner
            .books
            .lock()
            .values()
            .filter(|book| book.listener_count() > 0)
            .map(|book| book.spec())
            .collect();

        let mut request = Request::new(command).streams(&streams);
        if !accounts.is_empty() {
            request = request.accounts(&accounts, false);
        }
        if !books.is_empty() {
            request = request.books(&books, command == "subscribe");
        }
        request
    }

    // ---- event loop ----

    fn start_event_loop(&self) {
        let Some(mut signals) = self.inner.signals_rx.lock().take() else {
            return;
        };
        let remote = self.downgrade();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let Some(inner) = remote.upgrade() else {
                    break;
                };
                Remote::from_inner(inner).handle_signal(signal);
            }
            debug!("pool event loop finished");
        });
    }

    fn handle_signal(&self, signal: PoolSignal) {
        match signal {
            PoolSignal::Connected(index) => self.on_connected(index),
            PoolSignal::Disconnected(index) => self.on_disconnected(index),
            PoolSignal::Message(index, message) => {
                trace!("message from connection {}", index);
                self.handle_message(message);
            }
            PoolSignal::Unexpected(index, raw) => {
                warn!("connection {} sent an unexpected message", index);
                self.emit(RemoteEvent::Error(RemoteError::Unexpected(raw)));
            }
            PoolSignal::SubscribeResponse(index, result) => {
                self.handle_subscribe_response(index, result)
            }
        }
    }

    fn on_connected(&self, index: usize) {
        let (edge, primary, deferred) = {
            let mut state = self.inner.state.lock();
            let (edge, primary) = state.connected(index);
            let deferred = if edge == Edge::Online {
                std::mem::take(&mut state.deferred)
            } else {
                Vec::new()
            };
            (edge, primary, deferred)
        };

        if let Some(primary) = primary {
            self.mark_primary(primary);
        }
        if edge == Edge::Online {
            self.publish_online(OnlineState::Online);
        }
        self.ensure_subscribed();

        if !deferred.is_empty() {
            debug!("retrying {} deferred request(s)", deferred.len());
        }
        for (request, resolver) in deferred {
            if resolver.is_resolved() {
                trace!("dropping settled deferred {}", request.command());
                continue;
            }
            self.dispatch(request, resolver);
        }
    }

    fn on_disconnected(&self, index: usize) {
        let (edge, primary) = self.inner.state.lock().disconnected(index);
        if let Some(connection) = self.connection(index) {
            connection.set_primary(false);
        }
        if let Some(primary) = primary {
            self.mark_primary(primary);
        }
        if edge == Edge::Offline {
            self.publish_online(OnlineState::Offline);
        } else {
            self.ensure_subscribed();
        }
    }

    fn mark_primary(&self, primary: usize) {
        for connection in self.inner.connections.read().iter() {
            connection.set_primary(connection.index() == primary);
        }
        if let Some(connection) = self.connection(primary) {
            info!("primary connection is now #{} ({})", primary, connection.url());
        }
        self.emit(RemoteEvent::PrimaryChanged(primary));
    }

    fn publish_online(&self, online: OnlineState) {
        info!("remote is {:?}", online);
        self.inner.online.send_replace(online);
        self.emit(RemoteEvent::State(online));
        match online {
            OnlineState::Online => self.emit(RemoteEvent::Connect),
            OnlineState::Offline => self.emit(RemoteEvent::Disconnect),
            OnlineState::Connecting => {}
        }
    }

    /// Issues the standing subscribe once against the current primary and
    /// releases it on a replaced primary that is still open.
    fn ensure_subscribed(&self) {
        let Some(SubscriptionMove { to: index, from }) =
            self.inner.state.lock().claim_subscription()
        else {
            return;
        };
        if let Some(previous) = from.and_then(|i| self.connection(i)) {
            debug!("unsubscribing standing feeds on connection {}", previous.index());
            let (resolver, _) = RequestHandle::pair();
            previous.send(self.next_id(), &self.standing_request("unsubscribe"), resolver);
        }
        let Some(connection) = self.connection(index) else {
            return;
        };

        let request = self.standing_request("subscribe");
        debug!("subscribing on connection {}", index);
        let (resolver, handle) = RequestHandle::pair();
        connection.send(self.next_id(), &request, resolver);

        let signals = self.inner.signals.clone();
        tokio::spawn(async move {
            match handle.wait().await {
                Ok(result) => {
                    let _ = signals.send(PoolSignal::SubscribeResponse(index, result));
                }
                Err(e) => warn!("subscribe on connection {} failed: {}", index, e),
            }
        });
    }

    fn handle_subscribe_response(&self, index: usize, result: Value) {
        let closed = {
            let mut state = self.inner.state.lock();
            let ledger = &mut state.ledger;
            if let Some(stand_alone) = result.get("stand_alone").and_then(Value::as_bool) {
                ledger.stand_alone = stand_alone;
            }
            if let Some(testnet) = result.get("testnet").and_then(Value::as_bool) {
                ledger.testnet = testnet;
            }
            if let Some(load_base) = result.get("load_base").and_then(Value::as_u64) {
                ledger.load_base = load_base.max(1);
            }
            if let Some(load_factor) = result.get("load_factor").and_then(Value::as_u64) {
                ledger.load_factor = load_factor;
            }
            ledger.apply_ledger_fields(&result)
        };
        info!("subscribed on connection {}", index);
        if let Some(closed) = closed {
            self.on_ledger_closed(closed);
        }
        self.emit(RemoteEvent::Subscribed);
    }

    fn handle_message(&self, message: Value) {
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            "ledgerClosed" => {
                let closed = self.inner.state.lock().ledger.apply_ledger_fields(&message);
                match closed {
                    Some(closed) => self.on_ledger_closed(closed),
                    None => debug!("ignoring stale or incomplete ledgerClosed"),
                }
            }
            "transaction" => self.on_transaction(message),
            "path_find" => {
                let message = Arc::new(message);
                let current = self.inner.path_find.lock().clone();
                if let Some(path_find) = current {
                    path_find.notify_update(Arc::clone(&message));
                }
                self.emit(RemoteEvent::PathFind(message));
            }
            "serverStatus" => self.on_server_status(&message),
            _ => {
                trace!("passing through {:?} message", kind);
                self.emit(RemoteEvent::Net {
                    kind,
                    message: Arc::new(message),
                });
            }
        }
    }

    fn on_ledger_closed(&self, closed: LedgerClosed) {
        debug!("ledger {} closed", closed.ledger_index);
        self.inner.ledger_entries.clear();
        let closed = Arc::new(closed);
        let current = self.inner.path_find.lock().clone();
        if let Some(path_find) = current {
            path_find.notify_ledger_closed(Arc::clone(&closed));
        }
        self.emit(RemoteEvent::LedgerClosed(closed));
    }

    fn on_transaction(&self, message: Value) {
        let notice = TransactionNotice::from_message(message);
        if self.inner.state.lock().is_duplicate_tx(notice.hash()) {
            trace!("dropping repeated transaction {:?}", notice.hash());
            return;
        }
        let notice = Arc::new(notice);

        for account_id in notice.meta.affected_accounts() {
            let account = self.inner.accounts.lock().get(&account_id).cloned();
            if let Some(account) = account {
                account.notify(&notice);
            }
        }
        for key in notice.meta.affected_books() {
            let book = self.inner.books.lock().get(&key).cloned();
            if let Some(book) = book {
                book.notify(&notice);
            }
        }

        self.inner.transaction_feed.emit(Arc::clone(&notice));
        self.emit(RemoteEvent::Transaction(notice));
    }

    fn on_server_status(&self, message: &Value) {
        let (Some(load_base), Some(load_factor)) = (
            message.get("load_base").and_then(Value::as_u64),
            message.get("load_factor").and_then(Value::as_u64),
        ) else {
            return;
        };
        {
            let mut state = self.inner.state.lock();
            if state.ledger.load_base == load_base && state.ledger.load_factor == load_factor {
                return;
            }
            state.ledger.load_base = load_base.max(1);
            state.ledger.load_factor = load_factor;
        }
        debug!("load changed: base {} factor {}", load_base, load_factor);
        self.emit(RemoteEvent::Load {
            load_base,
            load_factor,
        });
    }

    // ---- entities ----

    /// The shared view of `account_id`, created on first use.
    pub fn account(&self, account_id: &str) -> Result<Arc<Account>> {
        validate_address(account_id)?;
        let mut accounts = self.inner.accounts.lock();
        let account = accounts
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Account::new(self.downgrade(), account_id.to_string())));
        Ok(Arc::clone(account))
    }

    pub fn book(&self, taker_gets: Issue, taker_pays: Issue) -> Result<Arc<OrderBook>> {
        let taker_gets = Issue::new(&taker_gets.currency, taker_gets.issuer.as_deref())?;
        let taker_pays = Issue::new(&taker_pays.currency, taker_pays.issuer.as_deref())?;
        if taker_gets == taker_pays {
            return Err(RemoteError::InvalidIdentity(format!(
                "book sides are both {taker_gets}"
            )));
        }
        let key = book_key(&taker_gets, &taker_pays);
        let mut books = self.inner.books.lock();
        let book = books
            .entry(key)
            .or_insert_with(|| Arc::new(OrderBook::new(self.downgrade(), taker_gets, taker_pays)));
        Ok(Arc::clone(book))
    }

    /// Listener on the global transaction stream. The first one subscribes
    /// the pool to `transactions`.
    pub fn transaction_feed(&self) -> Subscription<Arc<TransactionNotice>> {
        let receiver = self.inner.transaction_feed.attach(|| {
            self.send_if_online(Request::new("subscribe").streams(&["transactions"]));
        });
        let feed = Arc::clone(&self.inner.transaction_feed);
        let remote = self.downgrade();
        Subscription::new(
            receiver,
            Box::new(move || {
                feed.detach(|| {
                    if let Some(inner) = remote.upgrade() {
                        Remote::from_inner(inner)
                            .send_if_online(Request::new("unsubscribe").streams(&["transactions"]));
                    }
                });
            }),
        )
    }

    /// Opens a path-find session, superseding the current one.
    pub fn path_find(
        &self,
        source_account: &str,
        destination_account: &str,
        destination_amount: Value,
        source_currencies: Vec<Issue>,
    ) -> Result<(Arc<PathFind>, RequestHandle)> {
        validate_address(source_account)?;
        validate_address(destination_account)?;
        let session = Arc::new(PathFind::new(
            self.downgrade(),
            source_account.to_string(),
            destination_account.to_string(),
            destination_amount,
            source_currencies,
        ));
        let previous = self.inner.path_find.lock().replace(Arc::clone(&session));
        if let Some(previous) = previous {
            previous.notify_superseded();
        }
        let handle = self.request(session.create_request());
        Ok((session, handle))
    }

    pub(crate) fn clear_path_find(&self, session: &Arc<PathFind>) {
        let mut current = self.inner.path_find.lock();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, session)) {
            *current = None;
        }
    }

    // ---- secrets and sequences ----

    /// Registers a secret so transactions from `account` can be signed.
    pub fn set_secret(&self, account: &str, secret: &str) {
        self.inner
            .secrets
            .write()
            .insert(account.to_string(), secret.to_string());
    }

    pub(crate) fn secret_for(&self, account: &str) -> Option<String> {
        self.inner.secrets.read().get(account).cloned()
    }

    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Cached next sequence for `account`, moved per `advance`.
    pub fn account_seq(&self, account: &str, advance: SeqAdvance) -> Result<Option<u32>> {
        self.inner.sequences.account_seq(account, advance)
    }

    pub fn set_account_seq(&self, account: &str, seq: u32) {
        self.inner.sequences.set_account_seq(account, seq);
    }

    pub(crate) fn rewind_account_seq(&self, account: &str, seq: u32) -> bool {
        self.inner.sequences.rewind_if_last(account, seq)
    }

    /// Refreshes the cached sequence from the ledger. Concurrent callers for
    /// one account share a single fetch.
    pub fn account_seq_cache(&self, account: &str, current: bool) -> RequestHandle {
        self.inner.sequences.fetch_or_start(account, || {
            let fetch = self.request(self.request_account_root(account, current));
            let (resolver, handle) = RequestHandle::pair();
            let remote = self.clone();
            let account = account.to_string();
            tokio::spawn(async move {
                let result = fetch.wait().await;
                let sequence = result
                    .as_ref()
                    .ok()
                    .and_then(|r| r.pointer("/node/Sequence"))
                    .and_then(Value::as_u64)
                    .and_then(|s| u32::try_from(s).ok());
                debug!("fetched sequence {:?} for {}", sequence, account);
                remote.inner.sequences.finish_fetch(&account, sequence);
                resolver.resolve(result);
            });
            handle
        })
    }

    /// Drops the cached `account_root` snapshot of `account`.
    pub fn dirty_account_root(&self, account: &str) {
        self.inner.ledger_entries.dirty(account);
    }
}
