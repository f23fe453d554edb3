//! Transaction metadata
//!
//! Parses the `AffectedNodes` list of a validated transaction so that
//! notifications can be routed to the accounts and order books they touch.

use crate::identity::{book_key, is_valid_address, Issue};
use serde_json::{Map, Value};

const ACCOUNT_FIELDS: [&str; 4] = ["Account", "Destination", "Owner", "Issuer"];
const AMOUNT_FIELDS: [&str; 4] = ["HighLimit", "LowLimit", "TakerGets", "TakerPays"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct AffectedNode {
    pub kind: NodeKind,
    pub entry_type: String,
    pub ledger_index: String,
    pub fields_new: Map<String, Value>,
    pub fields_final: Map<String, Value>,
    pub fields_prev: Map<String, Value>,
}

impl AffectedNode {
    fn from_json(wrapper: &Value) -> Option<Self> {
        let (kind, body) = [
            ("CreatedNode", NodeKind::Created),
            ("ModifiedNode", NodeKind::Modified),
            ("DeletedNode", NodeKind::Deleted),
        ]
        .iter()
        .find_map(|(key, kind)| wrapper.get(*key).map(|body| (*kind, body)))?;

        let fields = |key: &str| {
            body.get(key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };

        Some(Self {
            kind,
            entry_type: body.get("LedgerEntryType")?.as_str()?.to_string(),
            ledger_index: body
                .get("LedgerIndex")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            fields_new: fields("NewFields"),
            fields_final: fields("FinalFields"),
            fields_prev: fields("PreviousFields"),
        })
    }

    /// Looks a field up in the new fields first, then the final fields.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields_new
            .get(key)
            .or_else(|| self.fields_final.get(key))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Meta {
    pub nodes: Vec<AffectedNode>,
    pub transaction_result: Option<String>,
}

impl Meta {
    pub fn from_json(meta: &Value) -> Self {
        let nodes = meta
            .get("AffectedNodes")
            .and_then(Value::as_array)
            .map(|nodes| nodes.iter().filter_map(AffectedNode::from_json).collect())
            .unwrap_or_default();

        Self {
            nodes,
            transaction_result: meta
                .get("TransactionResult")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    pub fn nodes_of_type<'a>(&'a self, entry_type: &'a str) -> impl Iterator<Item = &'a AffectedNode> {
        self.nodes.iter().filter(move |n| n.entry_type == entry_type)
    }

    /// Every account mentioned by an affected node, in first-seen order.
    pub fn affected_accounts(&self) -> Vec<String> {
        let mut accounts: Vec<String> = Vec::new();
        let mut push = |candidate: Option<&str>| {
            if let Some(account) = candidate {
                if is_valid_address(account) && !accounts.iter().any(|a| a == account) {
                    accounts.push(account.to_string());
                }
            }
        };

        for node in &self.nodes {
            for key in ACCOUNT_FIELDS {
                push(node.field(key).and_then(Value::as_str));
            }
            for key in AMOUNT_FIELDS {
                push(
                    node.field(key)
                        .and_then(|amount| amount.get("issuer"))
                        .and_then(Value::as_str),
                );
            }
        }
        accounts
    }

    /// Book keys (`gets:pays`) of every affected offer.
    pub fn affected_books(&self) -> Vec<String> {
        let mut books = Vec::new();
        for node in self.nodes_of_type("Offer") {
            let gets = node.field("TakerGets").and_then(Issue::from_amount);
            let pays = node.field("TakerPays").and_then(Issue::from_amount);
            if let (Some(gets), Some(pays)) = (gets, pays) {
                let key = book_key(&gets, &pays);
                if !books.contains(&key) {
                    books.push(key);
                }
            }
        }
        books
    }
}
