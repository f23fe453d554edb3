//! Submission of a transaction and tracking it to a final result
//!
//! A submission runs as one task through bounded stages: local checks,
//! sequence allocation, signing, `submit`, then one `transaction_entry`
//! lookup per closed ledger until the transaction is found or declared
//! lost. Every stage either advances or ends the submission; nothing loops
//! without a bound other than the wait for ledger closes.

use crate::cache::SeqAdvance;
use crate::crypto::canonical_bytes;
use crate::error::{RemoteError, Result};
use crate::remote::{LedgerClosed, Remote, RemoteEvent};
use crate::request::Request;
use crate::transaction::types::{ResultBand, Transaction, TxState};
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The server's first answer to a `submit`.
#[derive(Debug, Clone)]
pub struct Proposed {
    pub tx_json: Value,
    pub result: String,
    pub result_code: i64,
    pub result_message: Option<String>,
    /// Informational: another server may still apply the transaction.
    pub rejected: bool,
}

#[derive(Debug, Clone)]
pub enum FinalOutcome {
    /// Found in a closed ledger. `result` is the authoritative code.
    Applied {
        result: String,
        metadata: Value,
        message: Value,
    },
    /// Not found within the lost threshold.
    Lost,
    /// Ended before reaching a ledger.
    Failed(RemoteError),
}

#[derive(Debug, Clone)]
pub enum SubmissionEvent {
    State(TxState),
    Proposed(Proposed),
    /// A closed ledger did not contain the transaction yet.
    Pending,
    Lost,
    /// Emitted at most once.
    Final(FinalOutcome),
    Error(RemoteError),
}

/// Observer of a running submission.
pub struct Submission {
    state: watch::Receiver<TxState>,
    events: mpsc::UnboundedReceiver<SubmissionEvent>,
    task: JoinHandle<FinalOutcome>,
}

impl Submission {
    pub fn state(&self) -> TxState {
        self.state.borrow().clone()
    }

    pub async fn next_event(&mut self) -> Option<SubmissionEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<SubmissionEvent> {
        self.events.try_recv().ok()
    }

    /// Waits for the submission to end.
    pub async fn wait(self) -> FinalOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => FinalOutcome::Failed(RemoteError::Unexpected(format!(
                "submission task ended abnormally: {e}"
            ))),
        }
    }
}

impl Transaction {
    /// Starts submitting. Must be called inside a Tokio runtime.
    pub fn submit(self) -> Submission {
        let (state_tx, state_rx) = watch::channel(TxState::Building);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pipeline = Pipeline {
            tx: self,
            state: state_tx,
            events: events_tx,
            sequence: None,
        };
        Submission {
            state: state_rx,
            events: events_rx,
            task: tokio::spawn(pipeline.run()),
        }
    }
}

struct Pipeline {
    tx: Transaction,
    state: watch::Sender<TxState>,
    events: mpsc::UnboundedSender<SubmissionEvent>,
    /// Sequence taken from the local cache, owed back on rejection.
    sequence: Option<u32>,
}

/// Where the finality loop reads ledger closes from.
struct Tracking {
    ledgers: broadcast::Receiver<RemoteEvent>,
    submit_index: Option<u32>,
    hash: String,
    missing: u32,
    lost: u32,
}

impl Pipeline {
    fn remote(&self) -> &Remote {
        &self.tx.remote
    }

    fn emit(&self, event: SubmissionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: TxState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next.clone();
            true
        });
        if changed {
            self.emit(SubmissionEvent::State(next));
        }
    }

    fn fail(&self, err: RemoteError) -> FinalOutcome {
        warn!("transaction submission failed: {}", err);
        if *self.state.borrow() != TxState::Building {
            self.set_state(TxState::RemoteError);
        }
        self.emit(SubmissionEvent::Error(err.clone()));
        FinalOutcome::Failed(err)
    }

    fn rewind_sequence(&self, account: &str) {
        if let Some(seq) = self.sequence {
            if self.remote().rewind_account_seq(account, seq) {
                debug!("rewound sequence {} for {}", seq, account);
            }
        }
    }

    async fn run(mut self) -> FinalOutcome {
        let account = match self.tx.validate_account() {
            Ok(account) => account.to_string(),
            Err(e) => return self.fail(e),
        };
        if self.tx.secret.is_none() {
            self.tx.secret = self.remote().secret_for(&account);
        }
        let trusted = self.remote().is_trusted();
        if let Err(e) = self.tx.validate_signing(self.remote().config(), trusted) {
            return self.fail(e);
        }

        // Listen before sending so no ledger close is missed.
        let ledgers = self.remote().events();
        let submit_index = self.remote().ledger_current_index();
        self.set_state(TxState::ClientSubmitted);

        if self.remote().config().local_sequence && !self.tx.tx_json.contains_key("Sequence") {
            match self.allocate_sequence(&account).await {
                Ok(seq) => {
                    self.sequence = Some(seq);
                    self.tx.tx_json.insert("Sequence".to_string(), seq.into());
                }
                Err(e) => return self.fail(e),
            }
        }

        let (request, local_hash) = match self.prepare_request() {
            Ok(prepared) => prepared,
            Err(e) => {
                self.rewind_sequence(&account);
                return self.fail(e);
            }
        };

        let response = match self.remote().request(request).wait().await {
            Ok(response) => response,
            Err(e) => return self.fail(e),
        };
        let Some(hash) = self.on_proposed(&account, &response, local_hash) else {
            return self.fail(RemoteError::Unexpected(
                "submit response carried no transaction hash".to_string(),
            ));
        };

        let config = self.remote().config();
        let tracking = Tracking {
            ledgers,
            submit_index,
            hash,
            missing: config.submit_missing_ledgers,
            lost: config.submit_lost_ledgers,
        };
        self.track(tracking).await
    }

    /// Takes the next cached sequence, fetching it at most twice: from the
    /// last closed ledger, then from the current one.
    async fn allocate_sequence(&self, account: &str) -> Result<u32> {
        if let Some(seq) = self.remote().account_seq(account, SeqAdvance::Advance)? {
            return Ok(seq);
        }

        let mut last_error = None;
        for current in [false, true] {
            match self.remote().account_seq_cache(account, current).wait().await {
                Ok(_) => {
                    if let Some(seq) = self.remote().account_seq(account, SeqAdvance::Advance)? {
                        return Ok(seq);
                    }
                }
                Err(e) => {
                    debug!("sequence fetch for {} failed: {}", account, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            RemoteError::Unexpected(format!("no sequence found for {account}"))
        }))
    }

    /// Builds the `submit` request, signing locally when configured.
    fn prepare_request(&mut self) -> Result<(Request, Option<String>)> {
        self.tx.complete()?;
        let request = self.remote().request_submit();
        let mut tx_json = Value::Object(self.tx.tx_json.clone());

        if self.tx.is_presigned() {
            let blob = hex::encode_upper(canonical_bytes(&tx_json));
            return Ok((request.tx_blob(&blob), None));
        }

        let secret = self.tx.secret.clone().unwrap_or_default();
        if self.remote().config().local_signing {
            let testnet = self.remote().ledger_state().testnet;
            let signed = self.remote().signer().sign(&secret, &mut tx_json, testnet)?;
            if let Value::Object(signed_json) = tx_json {
                self.tx.tx_json = signed_json;
            }
            return Ok((request.tx_blob(&signed.tx_blob), Some(signed.hash)));
        }

        let request = request
            .secret(&secret)
            .build_path(self.tx.build_path)
            .tx_json(tx_json);
        Ok((request, None))
    }

    /// Records the `submit` response. Returns the hash to track.
    fn on_proposed(
        &mut self,
        account: &str,
        response: &Value,
        local_hash: Option<String>,
    ) -> Option<String> {
        let result = response
            .get("engine_result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let band = response
            .get("engine_result_code")
            .and_then(Value::as_i64)
            .map(ResultBand::classify)
            .or_else(|| ResultBand::from_result_name(&result));
        let result_code = response
            .get("engine_result_code")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let rejected = band.is_some_and(ResultBand::is_rejected);

        if rejected || result.starts_with("tej") {
            self.rewind_sequence(account);
        }

        let tx_json = response
            .get("tx_json")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let hash = tx_json
            .get("hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(local_hash);

        info!("transaction proposed: {} ({})", result, result_code);
        self.set_state(TxState::ClientProposed);
        self.emit(SubmissionEvent::Proposed(Proposed {
            tx_json,
            result,
            result_code,
            result_message: response
                .get("engine_result_message")
                .and_then(Value::as_str)
                .map(str::to_string),
            rejected,
        }));
        hash
    }

    /// One lookup per closed ledger until found or lost.
    async fn track(&self, mut tracking: Tracking) -> FinalOutcome {
        loop {
            let closed = match tracking.ledgers.recv().await {
                Ok(RemoteEvent::LedgerClosed(closed)) => closed,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("transaction tracking skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return self.fail(RemoteError::Disconnected),
            };
            let remote = self.remote();
            let submit_index = *tracking.submit_index.get_or_insert(closed.ledger_index);

            let lookup = remote
                .request_transaction_entry(&tracking.hash)
                .ledger_hash(&closed.ledger_hash);
            match remote.request(lookup).wait().await {
                Ok(message) => return self.finish(message),
                Err(e) if e.remote_code() == Some("transactionNotFound") => {
                    if let Some(outcome) = self.not_found(&tracking, submit_index, &closed) {
                        return outcome;
                    }
                }
                Err(e) => debug!("transaction_entry in {} failed: {}", closed.ledger_index, e),
            }
        }
    }

    fn not_found(
        &self,
        tracking: &Tracking,
        submit_index: u32,
        closed: &LedgerClosed,
    ) -> Option<FinalOutcome> {
        let since = |threshold: u32| submit_index.saturating_add(threshold) < closed.ledger_index;

        if since(tracking.lost) {
            info!(
                "transaction {} lost after ledger {}",
                tracking.hash, closed.ledger_index
            );
            self.set_state(TxState::ClientLost);
            self.emit(SubmissionEvent::Lost);
            self.emit(SubmissionEvent::Final(FinalOutcome::Lost));
            return Some(FinalOutcome::Lost);
        }
        if since(tracking.missing) {
            self.set_state(TxState::ClientMissing);
        }
        self.emit(SubmissionEvent::Pending);
        None
    }

    fn finish(&self, message: Value) -> FinalOutcome {
        let metadata = message.get("metadata").cloned().unwrap_or(Value::Null);
        let result = metadata
            .get("TransactionResult")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        info!("transaction final: {}", result);
        self.set_state(TxState::Final(result.clone()));
        let outcome = FinalOutcome::Applied {
            result,
            metadata,
            message,
        };
        self.emit(SubmissionEvent::Final(outcome.clone()));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use std::time::Duration;

    fn closed(index: u32) -> LedgerClosed {
        LedgerClosed {
            ledger_index: index,
            ledger_hash: format!("H{index}"),
            ledger_time: None,
            raw: Value::Null,
        }
    }

    fn pipeline(remote: &Remote) -> (Pipeline, mpsc::UnboundedReceiver<SubmissionEvent>) {
        let (state, _) = watch::channel(TxState::ClientProposed);
        let (events, rx) = mpsc::unbounded_channel();
        let pipeline = Pipeline {
            tx: remote.transaction(),
            state,
            events,
            sequence: None,
        };
        (pipeline, rx)
    }

    fn tracking(remote: &Remote) -> Tracking {
        Tracking {
            ledgers: remote.events(),
            submit_index: Some(11),
            hash: "ABC".to_string(),
            missing: 1,
            lost: 2,
        }
    }

    #[test]
    fn test_not_found_thresholds() {
        let remote = Remote::new(RemoteConfig::default()).unwrap();
        let (pipeline, mut rx) = pipeline(&remote);
        let tracking = tracking(&remote);

        assert!(pipeline.not_found(&tracking, 11, &closed(12)).is_none());
        assert_eq!(*pipeline.state.borrow(), TxState::ClientProposed);
        assert!(matches!(rx.try_recv(), Ok(SubmissionEvent::Pending)));

        assert!(pipeline.not_found(&tracking, 11, &closed(13)).is_none());
        assert_eq!(*pipeline.state.borrow(), TxState::ClientMissing);

        let outcome = pipeline.not_found(&tracking, 11, &closed(14));
        assert!(matches!(outcome, Some(FinalOutcome::Lost)));
        assert_eq!(*pipeline.state.borrow(), TxState::ClientLost);
    }

    #[test]
    fn test_finish_reads_transaction_result() {
        let remote = Remote::new(RemoteConfig::default()).unwrap();
        let (pipeline, mut rx) = pipeline(&remote);
        let outcome = pipeline.finish(serde_json::json!({
            "metadata": { "TransactionResult": "tecUNFUNDED_PAYMENT" }
        }));
        match outcome {
            FinalOutcome::Applied { result, .. } => assert_eq!(result, "tecUNFUNDED_PAYMENT"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            *pipeline.state.borrow(),
            TxState::Final("tecUNFUNDED_PAYMENT".to_string())
        );
        assert!(matches!(rx.try_recv(), Ok(SubmissionEvent::State(_))));
        assert!(matches!(rx.try_recv(), Ok(SubmissionEvent::Final(_))));
    }

    #[tokio::test]
    async fn test_untrusted_secret_fails_before_io() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let config = RemoteConfig {
                local_signing: false,
                ..RemoteConfig::default()
            };
            let remote = Remote::new(config).unwrap();
            let submission = remote
                .transaction()
                .payment(
                    "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
                    "rPMh7Pi9ct699iZUTWaytJUoHcJ7cgyziK",
                    "1000",
                )
                .secret("masterpassphrase")
                .submit();
            match submission.wait().await {
                FinalOutcome::Failed(err) => assert_eq!(err.discriminator(), "tejServerUntrusted"),
                other => panic!("unexpected outcome {:?}", other),
            }
        })
        .await
        .expect("test_untrusted_secret_fails_before_io timed out");
    }

    #[tokio::test]
    async fn test_missing_secret_fails_locally() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let remote = Remote::new(RemoteConfig::default()).unwrap();
            let mut submission = remote
                .transaction()
                .account_set("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh")
                .submit();
            let event = submission.next_event().await;
            match event {
                Some(SubmissionEvent::Error(err)) => {
                    assert_eq!(err.discriminator(), "tejSecretUnknown")
                }
                other => panic!("unexpected event {:?}", other),
            }
            assert_eq!(submission.state(), TxState::Building);
        })
        .await
        .expect("test_missing_secret_fails_locally timed out");
    }

    #[tokio::test]
    async fn test_bad_account_fails_locally() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let remote = Remote::new(RemoteConfig::default()).unwrap();
            let outcome = remote
                .transaction()
                .payment("not-an-account", "rPMh7Pi9ct699iZUTWaytJUoHcJ7cgyziK", "1")
                .submit()
                .wait()
                .await;
            match outcome {
                FinalOutcome::Failed(err) => assert_eq!(err.discriminator(), "tejInvalidAccount"),
                other => panic!("unexpected outcome {:?}", other),
            }
        })
        .await
        .expect("test_bad_account_fails_locally timed out");
    }
}
