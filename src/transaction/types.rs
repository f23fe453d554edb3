/// Transaction types for LedgerLink
use crate::error::{RemoteError, Result};
use crate::remote::Remote;
use serde_json::{json, Map, Value};
use std::fmt;

/// Fee units charged for a transaction of any type.
pub const FEE_UNITS_DEFAULT: u32 = 10;

/// Smallest transfer rate, in billionths (a rate of 1.0).
pub const TRANSFER_RATE_MIN: u32 = 1_000_000_000;

const ACCOUNT_SET_FLAGS: &[(&str, u32)] = &[
    ("RequireDestTag", 0x0001_0000),
    ("OptionalDestTag", 0x0002_0000),
    ("RequireAuth", 0x0004_0000),
    ("OptionalAuth", 0x0008_0000),
    ("DisallowXRP", 0x0010_0000),
    ("AllowXRP", 0x0020_0000),
];

const OFFER_CREATE_FLAGS: &[(&str, u32)] = &[
    ("Passive", 0x0001_0000),
    ("ImmediateOrCancel", 0x0002_0000),
    ("FillOrKill", 0x0004_0000),
    ("Sell", 0x0008_0000),
];

const PAYMENT_FLAGS: &[(&str, u32)] = &[
    ("NoRippleDirect", 0x0001_0000),
    ("PartialPayment", 0x0002_0000),
    ("LimitQuality", 0x0004_0000),
];

/// Bit value of a named flag for a transaction type.
pub fn flag_value(transaction_type: &str, flag: &str) -> Option<u32> {
    let table = match transaction_type {
        "AccountSet" => ACCOUNT_SET_FLAGS,
        "OfferCreate" => OFFER_CREATE_FLAGS,
        "Payment" => PAYMENT_FLAGS,
        _ => return None,
    };
    table
        .iter()
        .find(|(name, _)| *name == flag)
        .map(|(_, value)| *value)
}

/// Contiguous bands of engine result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultBand {
    /// Below -399: rejected by the local server.
    Local,
    /// -399 to -300.
    Malformed,
    /// -299 to -101.
    Failure,
    /// -100 to -1: may succeed if resubmitted.
    Retry,
    /// 0 to 99.
    Success,
    /// 100 and up: applied, fee claimed only.
    Claimed,
}

impl ResultBand {
    pub fn classify(code: i64) -> Self {
        match code {
            i64::MIN..=-400 => ResultBand::Local,
            -399..=-300 => ResultBand::Malformed,
            -299..=-101 => ResultBand::Failure,
            -100..=-1 => ResultBand::Retry,
            0..=99 => ResultBand::Success,
            _ => ResultBand::Claimed,
        }
    }

    /// Band of a result name, for responses without a numeric code.
    pub fn from_result_name(result: &str) -> Option<Self> {
        match result.get(..3)? {
            "tel" | "tej" => Some(ResultBand::Local),
            "tem" => Some(ResultBand::Malformed),
            "tef" => Some(ResultBand::Failure),
            "ter" => Some(ResultBand::Retry),
            "tes" => Some(ResultBand::Success),
            "tec" => Some(ResultBand::Claimed),
            _ => None,
        }
    }

    /// This server will not apply the transaction. Informational only: a
    /// different server may still apply it.
    pub fn is_rejected(self) -> bool {
        matches!(
            self,
            ResultBand::Local | ResultBand::Malformed | ResultBand::Failure
        )
    }
}

/// Where a submitted transaction stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    Building,
    ClientSubmitted,
    ClientProposed,
    ClientMissing,
    ClientLost,
    RemoteError,
    /// The authoritative result code, e.g. `tesSUCCESS`.
    Final(String),
}

impl TxState {
    pub fn as_str(&self) -> &str {
        match self {
            TxState::Building => "building",
            TxState::ClientSubmitted => "client_submitted",
            TxState::ClientProposed => "client_proposed",
            TxState::ClientMissing => "client_missing",
            TxState::ClientLost => "client_lost",
            TxState::RemoteError => "remoteError",
            TxState::Final(result) => result,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxState::ClientLost | TxState::RemoteError | TxState::Final(_)
        )
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction under construction.
pub struct Transaction {
    pub(crate) remote: Remote,
    pub(crate) tx_json: Map<String, Value>,
    pub(crate) secret: Option<String>,
    pub(crate) build_path: bool,
}

impl Transaction {
    pub fn new(remote: Remote) -> Self {
        let mut tx_json = Map::new();
        tx_json.insert("Flags".to_string(), json!(0));
        Self {
            remote,
            tx_json,
            secret: None,
            build_path: false,
        }
    }

    pub fn tx_json(&self) -> Value {
        Value::Object(self.tx_json.clone())
    }

    pub fn account(&self) -> Option<&str> {
        self.tx_json.get("Account").and_then(Value::as_str)
    }

    pub fn transaction_type(&self) -> Option<&str> {
        self.tx_json.get("TransactionType").and_then(Value::as_str)
    }

    pub fn fee_units(&self) -> u32 {
        FEE_UNITS_DEFAULT
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.tx_json.insert(field.to_string(), value.into());
        self
    }

    /// Starts a transaction of `kind` from `source`, picking up a secret
    /// registered for it.
    fn begin(mut self, kind: &str, source: &str) -> Self {
        if self.secret.is_none() {
            self.secret = self.remote.secret_for(source);
        }
        self.set("TransactionType", kind).set("Account", source)
    }

    pub fn payment(self, source: &str, destination: &str, amount: impl Into<Value>) -> Self {
        self.begin("Payment", source)
            .set("Destination", destination)
            .set("Amount", amount)
    }

    pub fn offer_create(
        self,
        source: &str,
        taker_pays: impl Into<Value>,
        taker_gets: impl Into<Value>,
        expiration: Option<u64>,
        cancel_sequence: Option<u32>,
    ) -> Self {
        let mut tx = self
            .begin("OfferCreate", source)
            .set("TakerPays", taker_pays)
            .set("TakerGets", taker_gets);
        if let Some(expiration) = expiration {
            tx = tx.set("Expiration", expiration);
        }
        if let Some(sequence) = cancel_sequence {
            tx = tx.set("OfferSequence", sequence);
        }
        tx
    }

    pub fn offer_cancel(self, source: &str, sequence: u32) -> Self {
        self.begin("OfferCancel", source)
            .set("OfferSequence", sequence)
    }

    pub fn account_set(self, source: &str) -> Self {
        self.begin("AccountSet", source)
    }

    /// A `TrustSet`. A zero limit is kept, so lines can be cleared.
    pub fn trust_set(
        self,
        source: &str,
        limit: Option<Value>,
        quality_in: Option<u32>,
        quality_out: Option<u32>,
    ) -> Self {
        let mut tx = self.begin("TrustSet", source);
        if let Some(limit) = limit {
            tx = tx.set("LimitAmount", limit);
        }
        if let Some(quality) = quality_in.filter(|q| *q > 0) {
            tx = tx.set("QualityIn", quality);
        }
        if let Some(quality) = quality_out.filter(|q| *q > 0) {
            tx = tx.set("QualityOut", quality);
        }
        tx
    }

    pub fn ripple_line_set(
        self,
        source: &str,
        limit: Option<Value>,
        quality_in: Option<u32>,
        quality_out: Option<u32>,
    ) -> Self {
        self.trust_set(source, limit, quality_in, quality_out)
    }

    pub fn destination_tag(self, tag: u32) -> Self {
        self.set("DestinationTag", tag)
    }

    pub fn source_tag(self, tag: u32) -> Self {
        self.set("SourceTag", tag)
    }

    pub fn send_max(self, amount: impl Into<Value>) -> Self {
        self.set("SendMax", amount)
    }

    /// Appends one path; each step carries some of account, currency, issuer.
    pub fn path_add(mut self, path: Vec<Value>) -> Self {
        let steps: Vec<Value> = path
            .into_iter()
            .map(|step| {
                let mut kept = Map::new();
                for key in ["account", "issuer", "currency"] {
                    if let Some(value) = step.get(key) {
                        kept.insert(key.to_string(), value.clone());
                    }
                }
                Value::Object(kept)
            })
            .collect();
        let paths = self
            .tx_json
            .entry("Paths")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(paths) = paths {
            paths.push(Value::Array(steps));
        }
        self
    }

    pub fn paths(self, paths: Vec<Vec<Value>>) -> Self {
        paths.into_iter().fold(self, Transaction::path_add)
    }

    /// ORs named flags into `Flags`. Unknown names are `tejInvalidFlag`.
    pub fn set_flags(mut self, flags: &[&str]) -> Result<Self> {
        let kind = self.transaction_type().unwrap_or_default().to_string();
        let mut bits = self
            .tx_json
            .get("Flags")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        for flag in flags {
            let value = flag_value(&kind, flag).ok_or_else(|| {
                RemoteError::local("tejInvalidFlag", format!("{flag} is not a {kind} flag"))
            })?;
            bits |= u64::from(value);
        }
        self.tx_json.insert("Flags".to_string(), json!(bits));
        Ok(self)
    }

    /// Rate in billionths; anything below 1e9 is `tejInvalidTransferRate`.
    pub fn transfer_rate(self, rate: u32) -> Result<Self> {
        if rate < TRANSFER_RATE_MIN {
            return Err(RemoteError::local(
                "tejInvalidTransferRate",
                format!("transfer rate {rate} is below {TRANSFER_RATE_MIN}"),
            ));
        }
        Ok(self.set("TransferRate", rate))
    }

    pub fn secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    /// Lets a trusted server construct the path.
    pub fn build_path(mut self, build: bool) -> Self {
        self.build_path = build;
        self
    }
}
