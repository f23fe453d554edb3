//! Command constructors and the helpers derived from them

use super::{Remote, RemoteEvent};
use crate::error::{RemoteError, Result};
use crate::identity::{validate_address, Issue, ACCOUNT_ONE};
use crate::request::{Request, RequestHandle};
use serde_json::{json, Value};

/// Options of the `ledger` command.
#[derive(Debug, Clone, Default)]
pub struct LedgerOptions {
    pub full: bool,
    pub expand: bool,
    pub transactions: bool,
    pub accounts: bool,
}

/// Options of the `account_tx` command. Unset fields are left out.
#[derive(Debug, Clone, Default)]
pub struct AccountTxOptions {
    pub ledger_index_min: Option<i64>,
    pub ledger_index_max: Option<i64>,
    pub binary: Option<bool>,
    pub count: Option<bool>,
    pub descending: Option<bool>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

/// A trust line seen from one account's side.
#[derive(Debug, Clone, PartialEq)]
pub struct RippleBalance {
    pub account_balance: Value,
    pub peer_balance: Value,
    pub account_limit: Value,
    pub peer_limit: Value,
    pub account_quality_in: Option<u64>,
    pub peer_quality_in: Option<u64>,
    pub account_quality_out: Option<u64>,
    pub peer_quality_out: Option<u64>,
}

impl RippleBalance {
    /// Splits a `RippleState` node into the two sides of the line.
    pub fn from_node(node: &Value, account: &str, issuer: &str) -> Result<Self> {
        let field = |key: &str| {
            node.get(key)
                .cloned()
                .ok_or_else(|| RemoteError::Unexpected(format!("RippleState without {key}")))
        };
        let low_limit = field("LowLimit")?;
        let high_limit = field("HighLimit")?;
        let balance = field("Balance")?;
        let quality = |key: &str| node.get(key).and_then(Value::as_u64);

        // the stored balance is what the low account holds
        let account_high = high_limit.get("issuer").and_then(Value::as_str) == Some(account);
        let (mine, theirs) = if account_high {
            (negated(&balance), balance.clone())
        } else {
            (balance.clone(), negated(&balance))
        };
        let (my_limit, peer_limit) = if account_high {
            (high_limit, low_limit)
        } else {
            (low_limit, high_limit)
        };
        let (my_side, peer_side) = if account_high { ("High", "Low") } else { ("Low", "High") };

        Ok(Self {
            account_balance: with_issuer(&mine, account),
            peer_balance: with_issuer(&theirs, issuer),
            account_limit: with_issuer(&my_limit, issuer),
            peer_limit: with_issuer(&peer_limit, account),
            account_quality_in: quality(&format!("{my_side}QualityIn")),
            peer_quality_in: quality(&format!("{peer_side}QualityIn")),
            account_quality_out: quality(&format!("{my_side}QualityOut")),
            peer_quality_out: quality(&format!("{peer_side}QualityOut")),
        })
    }
}

fn with_issuer(amount: &Value, issuer: &str) -> Value {
    let mut amount = amount.clone();
    if let Some(fields) = amount.as_object_mut() {
        fields.insert("issuer".to_string(), json!(issuer));
    }
    amount
}

fn negated(amount: &Value) -> Value {
    let mut amount = amount.clone();
    if let Some(value) = amount.get("value").and_then(Value::as_str) {
        let flipped = match value.strip_prefix('-') {
            Some(positive) => positive.to_string(),
            None if value.chars().all(|c| c == '0' || c == '.') => value.to_string(),
            None => format!("-{value}"),
        };
        amount["value"] = json!(flipped);
    }
    amount
}

fn untrusted(command: &str) -> RemoteError {
    RemoteError::local(
        "tejServerUntrusted",
        format!("{command} sends a secret; the server is not trusted"),
    )
}

impl Remote {
    fn choose(&self, request: Request, current: bool) -> Request {
        let hash = self.ledger_hash();
        request.ledger_choose(current, self.ledger_current_index(), hash.as_deref())
    }

    pub fn request_server_info(&self) -> Request {
        Request::new("server_info")
    }

    pub fn request_ledger(&self, options: &LedgerOptions) -> Request {
        let mut request = Request::new("ledger");
        for (key, on) in [
            ("full", options.full),
            ("expand", options.expand),
            ("transactions", options.transactions),
            ("accounts", options.accounts),
        ] {
            if on {
                request = request.set(key, true);
            }
        }
        request
    }

    pub fn request_ledger_closed(&self) -> Request {
        Request::new("ledger_closed")
    }

    pub fn request_ledger_header(&self) -> Request {
        Request::new("ledger_header")
    }

    pub fn request_ledger_current(&self) -> Request {
        Request::new("ledger_current")
    }

    /// A bare `ledger_entry`; pick the entry with the request builders.
    pub fn request_ledger_entry(&self) -> Request {
        Request::new("ledger_entry")
    }

    pub fn request_account_root(&self, account: &str, current: bool) -> Request {
        self.choose(self.request_ledger_entry().account_root(account), current)
    }

    pub fn request_subscribe(&self, streams: &[&str]) -> Request {
        let request = Request::new("subscribe");
        if streams.is_empty() {
            request
        } else {
            request.streams(streams)
        }
    }

    pub fn request_unsubscribe(&self, streams: &[&str]) -> Request {
        let request = Request::new("unsubscribe");
        if streams.is_empty() {
            request
        } else {
            request.streams(streams)
        }
    }

    pub fn request_transaction_entry(&self, hash: &str) -> Request {
        Request::new("transaction_entry").tx_hash(hash)
    }

    pub fn request_tx(&self, hash: &str) -> Request {
        Request::new("tx").set("transaction", hash)
    }

    pub fn request_account_info(&self, account: &str) -> Result<Request> {
        validate_address(account)?;
        Ok(Request::new("account_info")
            .set("ident", account)
            .set("account", account))
    }

    pub fn request_account_lines(
        &self,
        account: &str,
        account_index: Option<u32>,
        current: bool,
    ) -> Result<Request> {
        self.account_listing("account_lines", account, account_index, current)
    }

    pub fn request_account_offers(
        &self,
        account: &str,
        account_index: Option<u32>,
        current: bool,
    ) -> Result<Request> {
        self.account_listing("account_offers", account, account_index, current)
    }

    fn account_listing(
        &self,
        command: &str,
        account: &str,
        account_index: Option<u32>,
        current: bool,
    ) -> Result<Request> {
        validate_address(account)?;
        let mut request = Request::new(command).set("account", account);
        if let Some(index) = account_index {
            request = request.set("index", index);
        }
        Ok(self.choose(request, current))
    }

    pub fn request_account_tx(&self, account: &str, options: &AccountTxOptions) -> Result<Request> {
        validate_address(account)?;
        let mut request = Request::new("account_tx").set("account", account);
        if let Some(min) = options.ledger_index_min {
            request = request.set("ledger_index_min", min);
        }
        if let Some(max) = options.ledger_index_max {
            request = request.set("ledger_index_max", max);
        }
        if let Some(binary) = options.binary {
            request = request.set("binary", binary);
        }
        if let Some(count) = options.count {
            request = request.set("count", count);
        }
        if let Some(descending) = options.descending {
            request = request.set("descending", descending);
        }
        if let Some(offset) = options.offset {
            request = request.set("offset", offset);
        }
        if let Some(limit) = options.limit {
            request = request.set("limit", limit);
        }
        Ok(request)
    }

    pub fn request_book_offers(&self, gets: &Issue, pays: &Issue, taker: Option<&str>) -> Request {
        Request::new("book_offers")
            .set("taker_gets", gets.to_json())
            .set("taker_pays", pays.to_json())
            .set("taker", taker.unwrap_or(ACCOUNT_ONE))
    }

    pub fn request_wallet_accounts(&self, seed: &str) -> Result<Request> {
        if !self.is_trusted() {
            return Err(untrusted("wallet_accounts"));
        }
        Ok(Request::new("wallet_accounts").set("seed", seed))
    }

    pub fn request_sign(&self, secret: &str, tx_json: Value) -> Result<Request> {
        if !self.is_trusted() {
            return Err(untrusted("sign"));
        }
        Ok(Request::new("sign").secret(secret).tx_json(tx_json))
    }

    pub fn request_submit(&self) -> Request {
        Request::new("submit")
    }

    pub fn request_ripple_path_find(
        &self,
        source_account: &str,
        destination_account: &str,
        destination_amount: Value,
        source_currencies: &[Issue],
    ) -> Result<Request> {
        validate_address(source_account)?;
        validate_address(destination_account)?;
        let request = Request::new("ripple_path_find")
            .set("source_account", source_account)
            .set("destination_account", destination_account)
            .set("destination_amount", destination_amount);
        if source_currencies.is_empty() {
            return Ok(request);
        }
        let currencies: Vec<Value> = source_currencies.iter().map(Issue::to_json).collect();
        Ok(request.set("source_currencies", currencies))
    }

    pub fn request_path_find_close(&self) -> Request {
        Request::new("path_find").set("subcommand", "close")
    }

    pub fn request_unl_list(&self) -> Request {
        Request::new("unl_list")
    }

    pub fn request_unl_add(&self, node: &str, comment: Option<&str>) -> Request {
        let request = Request::new("unl_add").set("node", node);
        match comment {
            Some(comment) => request.set("comment", comment),
            None => request,
        }
    }

    pub fn request_unl_delete(&self, node: &str) -> Request {
        Request::new("unl_delete").set("node", node)
    }

    pub fn request_peers(&self) -> Request {
        Request::new("peers")
    }

    pub fn request_connect(&self, ip: &str, port: Option<u16>) -> Request {
        let request = Request::new("connect").set("ip", ip);
        match port {
            Some(port) => request.set("port", port),
            None => request,
        }
    }

    /// Asks a stand-alone server to close the current ledger.
    pub fn ledger_accept(&self) -> Result<RequestHandle> {
        if !self.ledger_state().stand_alone {
            self.emit(RemoteEvent::Error(RemoteError::NotStandAlone));
            return Err(RemoteError::NotStandAlone);
        }
        Ok(self.request(Request::new("ledger_accept")))
    }

    async fn account_root_field(&self, account: &str, current: bool, key: &str) -> Result<Value> {
        validate_address(account)?;
        let result = self
            .request(self.request_account_root(account, current))
            .wait()
            .await?;
        result
            .get("node")
            .and_then(|node| node.get(key))
            .cloned()
            .ok_or_else(|| RemoteError::Unexpected(format!("account_root without {key}")))
    }

    /// Native balance, in drops as sent by the server.
    pub async fn account_balance(&self, account: &str, current: bool) -> Result<Value> {
        self.account_root_field(account, current, "Balance").await
    }

    pub async fn account_flags(&self, account: &str, current: bool) -> Result<u32> {
        let flags = self.account_root_field(account, current, "Flags").await?;
        as_u32(&flags, "Flags")
    }

    pub async fn owner_count(&self, account: &str, current: bool) -> Result<u32> {
        let count = self.account_root_field(account, current, "OwnerCount").await?;
        as_u32(&count, "OwnerCount")
    }

    pub async fn ripple_balance(
        &self,
        account: &str,
        issuer: &str,
        currency: &str,
        current: bool,
    ) -> Result<RippleBalance> {
        validate_address(account)?;
        validate_address(issuer)?;
        let request = self.choose(
            self.request_ledger_entry()
                .ripple_state(account, issuer, currency),
            current,
        );
        let result = self.request(request).wait().await?;
        let node = result
            .get("node")
            .ok_or_else(|| RemoteError::Unexpected("ledger_entry without node".to_string()))?;
        RippleBalance::from_node(node, account, issuer)
    }
}

fn as_u32(value: &Value, key: &str) -> Result<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| RemoteError::Unexpected(format!("{key} is not an integer")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOW: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
    const HIGH: &str = "rPMh7Pi9ct699iZUTWaytJUoHcJ7cgyziK";

    fn ripple_state() -> Value {
        json!({
            "LedgerEntryType": "RippleState",
            "Balance": { "currency": "USD", "issuer": ACCOUNT_ONE, "value": "-5" },
            "LowLimit": { "currency": "USD", "issuer": LOW, "value": "0" },
            "HighLimit": { "currency": "USD", "issuer": HIGH, "value": "100" },
            "HighQualityIn": 7
        })
    }

    #[test]
    fn test_ripple_balance_from_high_side() {
        let line = RippleBalance::from_node(&ripple_state(), HIGH, LOW).unwrap();
        assert_eq!(line.account_balance["value"], "5");
        assert_eq!(line.account_balance["issuer"], HIGH);
        assert_eq!(line.peer_balance["value"], "-5");
        assert_eq!(line.account_limit["value"], "100");
        assert_eq!(line.account_limit["issuer"], LOW);
        assert_eq!(line.account_quality_in, Some(7));
        assert_eq!(line.peer_quality_in, None);
    }

    #[test]
    fn test_ripple_balance_from_low_side() {
        let line = RippleBalance::from_node(&ripple_state(), LOW, HIGH).unwrap();
        assert_eq!(line.account_balance["value"], "-5");
        assert_eq!(line.peer_limit["value"], "100");
        assert_eq!(line.peer_limit["issuer"], LOW);
    }

    #[test]
    fn test_negating_zero_keeps_sign() {
        let zero = json!({ "currency": "USD", "value": "0" });
        assert_eq!(negated(&zero)["value"], "0");
    }

    #[test]
    fn test_incomplete_ripple_state_is_unexpected() {
        let err = RippleBalance::from_node(&json!({}), LOW, HIGH).unwrap_err();
        assert_eq!(err.discriminator(), "remoteUnexpected");
    }
}
