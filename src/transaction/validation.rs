/// Checks a transaction must pass before any network I/O
use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::identity::is_valid_address;
use crate::transaction::types::Transaction;
use serde_json::Value;

impl Transaction {
    /// True when the caller supplied a signature; the transaction then goes
    /// out as-is.
    pub fn is_presigned(&self) -> bool {
        self.tx_json.contains_key("TxnSignature")
    }

    /// Validates everything that can fail locally, in submission order.
    pub fn validate(&self, config: &RemoteConfig, trusted: bool) -> Result<()> {
        self.validate_account()?;
        self.validate_signing(config, trusted)
    }

    pub fn validate_account(&self) -> Result<&str> {
        match self.account() {
            Some(account) if is_valid_address(account) => Ok(account),
            Some(account) => Err(RemoteError::local(
                "tejInvalidAccount",
                format!("Account is malformed: {account}"),
            )),
            None => Err(RemoteError::local(
                "tejInvalidAccount",
                "Account is missing.",
            )),
        }
    }

    /// A secret must be known unless the transaction is pre-signed, and it is
    /// only ever sent to a trusted server.
    pub fn validate_signing(&self, config: &RemoteConfig, trusted: bool) -> Result<()> {
        if self.is_presigned() {
            return Ok(());
        }
        if self.secret.is_none() {
            return Err(RemoteError::local(
                "tejSecretUnknown",
                "Missing secret.",
            ));
        }
        if !config.local_signing && !trusted {
            return Err(RemoteError::local(
                "tejServerUntrusted",
                "Attempt to give a secret to an untrusted server.",
            ));
        }
        Ok(())
    }

    /// Fills `Fee` and `SigningPubKey` where this client is responsible for
    /// them.
    pub fn complete(&mut self) -> Result<()> {
        let config = self.remote.config().clone();

        if config.local_fee && !self.tx_json.contains_key("Fee") {
            let fee = self.remote.fee_tx(self.fee_units());
            self.tx_json.insert("Fee".to_string(), Value::String(fee));
        }

        if config.local_signing && !self.tx_json.contains_key("SigningPubKey") {
            if let (Some(secret), Some(account)) = (self.secret.as_deref(), self.account()) {
                let key = self.remote.signer().public_key_hex(secret, account)?;
                self.tx_json
                    .insert("SigningPubKey".to_string(), Value::String(key));
            }
        }
        Ok(())
    }
}
