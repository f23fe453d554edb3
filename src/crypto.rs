//! Transaction signing
//!
//! Key derivation, signing hashes, and the binary wire codec are opaque
//! primitives from the client's point of view. They sit behind the
//! [`Signer`] trait so a production codec can be swapped in.

use crate::error::{RemoteError, Result};
use once_cell::sync::Lazy;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Signing-hash prefix for the main network ("STX\0").
pub const HASH_SIGN: u32 = 0x5354_5800;
/// Signing-hash prefix for the test network ("stx\0").
pub const HASH_SIGN_TESTNET: u32 = 0x7374_7800;
/// Transaction-id prefix ("TXN\0").
const HASH_TX_ID: u32 = 0x5458_4E00;

/// A signed transaction, ready for a `submit` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_blob: String,
    pub hash: String,
}

pub trait Signer: Send + Sync {
    /// Hex-encoded public key that `secret` signs with for `account`.
    fn public_key_hex(&self, secret: &str, account: &str) -> Result<String>;

    /// Signs `tx_json`. The signature is written into `TxnSignature`.
    fn sign(&self, secret: &str, tx_json: &mut Value, testnet: bool) -> Result<SignedTransaction>;
}

/// secp256k1 signer over a canonical JSON serialization of the transaction.
#[derive(Debug, Clone, Default)]
pub struct Secp256k1Signer;

impl Secp256k1Signer {
    pub fn new() -> Self {
        Self
    }

    fn secret_key(secret: &str) -> Result<SecretKey> {
        if secret.is_empty() {
            return Err(RemoteError::Crypto("empty secret".to_string()));
        }
        let seed: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        SecretKey::from_slice(&seed)
            .map_err(|e| RemoteError::Crypto(format!("Invalid secret key bytes: {}", e)))
    }

    /// First half of SHA-512 over a 4-byte prefix and the payload.
    fn prefixed_hash(prefix: u32, payload: &[u8]) -> [u8; 32] {
        let mut hasher = Sha512::new();
        hasher.update(prefix.to_be_bytes());
        hasher.update(payload);
        let digest = hasher.finalize();
        let mut half = [0u8; 32];
        half.copy_from_slice(&digest[..32]);
        half
    }
}

/// `serde_json` keeps object keys sorted, so this is stable for equal values.
pub fn canonical_bytes(tx_json: &Value) -> Vec<u8> {
    tx_json.to_string().into_bytes()
}

impl Signer for Secp256k1Signer {
    fn public_key_hex(&self, secret: &str, _account: &str) -> Result<String> {
        let secret_key = Self::secret_key(secret)?;
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        Ok(hex::encode_upper(public_key.serialize()))
    }

    fn sign(&self, secret: &str, tx_json: &mut Value, testnet: bool) -> Result<SignedTransaction> {
        let secret_key = Self::secret_key(secret)?;
        let object = tx_json
            .as_object_mut()
            .ok_or_else(|| RemoteError::Crypto("tx_json is not an object".to_string()))?;
        object.remove("TxnSignature");

        let prefix = if testnet { HASH_SIGN_TESTNET } else { HASH_SIGN };
        let signing_hash = Self::prefixed_hash(prefix, &canonical_bytes(tx_json));
        let message = Message::from_digest_slice(&signing_hash)
            .map_err(|e| RemoteError::Crypto(format!("Failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &secret_key);

        tx_json["TxnSignature"] = Value::String(hex::encode_upper(signature.serialize_der()));

        let blob = canonical_bytes(tx_json);
        let hash = Self::prefixed_hash(HASH_TX_ID, &blob);
        Ok(SignedTransaction {
            tx_blob: hex::encode_upper(&blob),
            hash: hex::encode_upper(hash),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_key_is_deterministic() {
        let signer = Secp256k1Signer::new();
        let a = signer.public_key_hex("snoPBrXtMeMyMHUVTgbuqAfg1SUTb", "r").unwrap();
        let b = signer.public_key_hex("snoPBrXtMeMyMHUVTgbuqAfg1SUTb", "r").unwrap();
        assert_eq!(a, b);
        // compressed key
        assert_eq!(a.len(), 66);
    }

    #[test]
    fn test_sign_writes_signature_and_hash() {
        let signer = Secp256k1Signer::new();
        let mut tx = json!({ "TransactionType": "Payment", "Fee": "15", "Sequence": 3 });
        let signed = signer.sign("secret", &mut tx, false).unwrap();
        assert!(tx["TxnSignature"].is_string());
        assert_eq!(signed.hash.len(), 64);

        let decoded = hex::decode(&signed.tx_blob).unwrap();
        let round: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(round["Sequence"], 3);
    }

    #[test]
    fn test_testnet_prefix_changes_signature() {
        let signer = Secp256k1Signer::new();
        let mut main = json!({ "Sequence": 1 });
        let mut test = json!({ "Sequence": 1 });
        let a = signer.sign("secret", &mut main, false).unwrap();
        let b = signer.sign("secret", &mut test, true).unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        let signer = Secp256k1Signer::new();
        assert!(signer.public_key_hex("", "r").is_err());
    }
}
