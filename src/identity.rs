//! Account and currency identities
//!
//! Address encoding itself is an external primitive; this module only does
//! the shape check needed to reject malformed identities before any
//! network traffic is issued.

use crate::error::{RemoteError, Result};
use serde_json::{json, Value};
use std::fmt;

const ADDRESS_ALPHABET: &str = "rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";
const MIN_ADDRESS_LENGTH: usize = 25;
const MAX_ADDRESS_LENGTH: usize = 35;

/// The native currency code; it never carries an issuer.
pub const NATIVE_CURRENCY: &str = "XRP";

/// Placeholder taker used by `book_offers` when none is given.
pub const ACCOUNT_ONE: &str = "rrrrrrrrrrrrrrrrrrrrBZbvji";

pub fn is_valid_address(address: &str) -> bool {
    address.starts_with('r')
        && (MIN_ADDRESS_LENGTH..=MAX_ADDRESS_LENGTH).contains(&address.len())
        && address.chars().all(|c| ADDRESS_ALPHABET.contains(c))
}

pub fn validate_address(address: &str) -> Result<()> {
    if is_valid_address(address) {
        Ok(())
    } else {
        Err(RemoteError::InvalidIdentity(format!(
            "malformed account address: {address:?}"
        )))
    }
}

pub fn is_valid_currency(code: &str) -> bool {
    (code.len() == 3 && code.chars().all(|c| c.is_ascii_alphanumeric()))
        || (code.len() == 40 && code.chars().all(|c| c.is_ascii_hexdigit()))
}

/// One side of an order book: a currency and, unless native, its issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Issue {
    pub currency: String,
    pub issuer: Option<String>,
}

impl Issue {
    pub fn native() -> Self {
        Self {
            currency: NATIVE_CURRENCY.to_string(),
            issuer: None,
        }
    }

    pub fn new(currency: &str, issuer: Option<&str>) -> Result<Self> {
        if currency == NATIVE_CURRENCY {
            return Ok(Self::native());
        }
        if !is_valid_currency(currency) {
            return Err(RemoteError::InvalidIdentity(format!(
                "malformed currency: {currency:?}"
            )));
        }
        let issuer = issuer.ok_or_else(|| {
            RemoteError::InvalidIdentity(format!("currency {currency} needs an issuer"))
        })?;
        validate_address(issuer)?;
        Ok(Self {
            currency: currency.to_string(),
            issuer: Some(issuer.to_string()),
        })
    }

    /// Parses `XRP` or `USD/rIssuer...`.
    pub fn parse(spec: &str) -> Result<Self> {
        match spec.split_once('/') {
            Some((currency, issuer)) => Self::new(currency, Some(issuer)),
            None => Self::new(spec, None),
        }
    }

    /// Derives the issue of an amount field as found in transaction JSON.
    /// Native amounts are plain strings of drops.
    pub fn from_amount(amount: &Value) -> Option<Self> {
        match amount {
            Value::String(_) | Value::Number(_) => Some(Self::native()),
            Value::Object(obj) => {
                let currency = obj.get("currency")?.as_str()?;
                if currency == NATIVE_CURRENCY {
                    return Some(Self::native());
                }
                Some(Self {
                    currency: currency.to_string(),
                    issuer: obj.get("issuer").and_then(Value::as_str).map(str::to_string),
                })
            }
            _ => None,
        }
    }

    pub fn is_native(&self) -> bool {
        self.currency == NATIVE_CURRENCY
    }

    pub fn to_json(&self) -> Value {
        match &self.issuer {
            Some(issuer) if !self.is_native() => json!({
                "currency": self.currency,
                "issuer": issuer,
            }),
            _ => json!({ "currency": self.currency }),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.issuer {
            Some(issuer) if !self.is_native() => write!(f, "{}/{}", self.currency, issuer),
            _ => write!(f, "{}", self.currency),
        }
    }
}

/// Cache key of an order book, `gets:pays`.
pub fn book_key(taker_gets: &Issue, taker_pays: &Issue) -> String {
    format!("{}:{}", taker_gets, taker_pays)
}
