//! Notifications published by the pool

use crate::error::RemoteError;
use crate::meta::Meta;
use serde_json::Value;
use std::sync::Arc;

/// Aggregate reachability of the whole pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineState {
    Offline,
    Connecting,
    Online,
}

/// Last known network parameters, written only by the pool's message path.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerState {
    pub ledger_current_index: Option<u32>,
    pub ledger_hash: Option<String>,
    pub ledger_time: Option<u64>,
    pub load_base: u64,
    pub load_factor: u64,
    pub fee_base: u64,
    pub fee_ref: u64,
    pub reserve_base: Option<u64>,
    pub reserve_inc: Option<u64>,
    pub stand_alone: bool,
    pub testnet: bool,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            ledger_current_index: None,
            ledger_hash: None,
            ledger_time: None,
            load_base: 256,
            load_factor: 256,
            fee_base: 10,
            fee_ref: 10,
            reserve_base: None,
            reserve_inc: None,
            stand_alone: false,
            testnet: false,
        }
    }
}

impl LedgerState {
    /// Applies the fields of a `ledgerClosed` message or subscribe response.
    /// Returns the closed ledger when the message names one newer than the
    /// last known.
    pub(crate) fn apply_ledger_fields(&mut self, message: &Value) -> Option<LedgerClosed> {
        let field = |key: &str| message.get(key).and_then(Value::as_u64);

        if let Some(fee_base) = field("fee_base") {
            self.fee_base = fee_base;
        }
        if let Some(fee_ref) = field("fee_ref").filter(|v| *v > 0) {
            self.fee_ref = fee_ref;
        }
        if let Some(reserve_base) = field("reserve_base") {
            self.reserve_base = Some(reserve_base);
        }
        if let Some(reserve_inc) = field("reserve_inc") {
            self.reserve_inc = Some(reserve_inc);
        }

        let index = field("ledger_index").and_then(|i| u32::try_from(i).ok())?;
        let hash = message.get("ledger_hash").and_then(Value::as_str)?;
        if self.ledger_current_index.is_some_and(|current| index < current) {
            return None;
        }

        self.ledger_time = field("ledger_time");
        self.ledger_hash = Some(hash.to_string());
        self.ledger_current_index = Some(index + 1);

        Some(LedgerClosed {
            ledger_index: index,
            ledger_hash: hash.to_string(),
            ledger_time: self.ledger_time,
            raw: message.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LedgerClosed {
    pub ledger_index: u32,
    pub ledger_hash: String,
    pub ledger_time: Option<u64>,
    pub raw: Value,
}

/// A `transaction` stream message with its parsed metadata.
#[derive(Debug, Clone)]
pub struct TransactionNotice {
    pub transaction: Value,
    pub meta: Meta,
    pub meta_json: Value,
    pub engine_result: Option<String>,
    pub engine_result_code: Option<i64>,
    pub ledger_index: Option<u32>,
    pub validated: bool,
    pub raw: Value,
}

impl TransactionNotice {
    pub fn from_message(message: Value) -> Self {
        let meta_json = message.get("meta").cloned().unwrap_or(Value::Null);
        Self {
            transaction: message.get("transaction").cloned().unwrap_or(Value::Null),
            meta: Meta::from_json(&meta_json),
            meta_json,
            engine_result: message
                .get("engine_result")
                .and_then(Value::as_str)
                .map(str::to_string),
            engine_result_code: message.get("engine_result_code").and_then(Value::as_i64),
            ledger_index: message
                .get("ledger_index")
                .and_then(Value::as_u64)
                .and_then(|i| u32::try_from(i).ok()),
            validated: message
                .get("validated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            raw: message,
        }
    }

    pub fn hash(&self) -> Option<&str> {
        self.transaction.get("hash").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub enum RemoteEvent {
    State(OnlineState),
    Connect,
    Disconnect,
    PrimaryChanged(usize),
    Subscribed,
    LedgerClosed(Arc<LedgerClosed>),
    Transaction(Arc<TransactionNotice>),
    PathFind(Arc<Value>),
    Load { load_base: u64, load_factor: u64 },
    /// Any other message type, for forward compatibility.
    Net { kind: String, message: Arc<Value> },
    Error(RemoteError),
}
