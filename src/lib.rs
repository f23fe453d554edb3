//! LedgerLink - A resilient client for a ledger network's WebSocket API
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Connection Pool
//! - [`remote`] - The pool: routing, standing subscriptions, events
//! - [`connection`] - One reconnecting server connection
//! - [`transport`] - WebSocket transport behind a trait
//! - [`request`] - Commands and their write-once outcomes
//!
//! ## Entities
//! - [`entity`] - Listener counting shared by every entity
//! - [`account`] - Account entities
//! - [`orderbook`] - Order book entities
//! - [`pathfind`] - Path-find sessions
//! - [`meta`] - Transaction metadata parsing
//!
//! ## Transactions
//! - [`transaction`] - Builders and the submission state machine
//! - [`crypto`] - Signing
//!
//! ## State Management
//! - [`cache`] - Ledger-entry and account-sequence caches
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`identity`] - Accounts, currencies and issues

#![forbid(unsafe_code)]

// ============================================================================
// Connection Pool
// ============================================================================
pub mod connection;
pub mod remote;
pub mod request;
pub mod transport;

// ============================================================================
// Entities
// ============================================================================
pub mod account;
pub mod entity;
pub mod meta;
pub mod orderbook;
pub mod pathfind;

// ============================================================================
// Transactions
// ============================================================================
pub mod crypto;
pub mod transaction;

// ============================================================================
// State Management
// ============================================================================
pub mod cache;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod identity;

pub use account::{Account, AccountEvent};
pub use config::{RemoteConfig, ServerConfig};
pub use error::{RemoteError, Result};
pub use identity::Issue;
pub use orderbook::{OrderBook, OrderBookEvent};
pub use pathfind::{PathFind, PathFindEvent};
pub use remote::{OnlineState, Remote, RemoteEvent};
pub use request::{Request, RequestHandle};
pub use transaction::{FinalOutcome, Submission, SubmissionEvent, Transaction, TxState};
