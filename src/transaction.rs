//! Transaction module split into types, validation and submission

pub mod submission;
pub mod types;
pub mod validation;

pub use submission::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::remote::Remote;
    use serde_json::json;

    const ALICE: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
    const BOB: &str = "rPMh7Pi9ct699iZUTWaytJUoHcJ7cgyziK";

    fn remote() -> Remote {
        Remote::new(RemoteConfig::default()).unwrap()
    }

    #[test]
    fn test_result_bands() {
        assert_eq!(ResultBand::classify(-100), ResultBand::Retry);
        assert_eq!(ResultBand::classify(-1), ResultBand::Retry);
        assert_eq!(ResultBand::classify(-101), ResultBand::Failure);
        assert_eq!(ResultBand::classify(-250), ResultBand::Failure);
        assert_eq!(ResultBand::classify(-350), ResultBand::Malformed);
        assert_eq!(ResultBand::classify(-399), ResultBand::Malformed);
        assert_eq!(ResultBand::classify(-400), ResultBand::Local);
        assert_eq!(ResultBand::classify(0), ResultBand::Success);
        assert_eq!(ResultBand::classify(99), ResultBand::Success);
        assert_eq!(ResultBand::classify(100), ResultBand::Claimed);
        assert_eq!(ResultBand::classify(150), ResultBand::Claimed);

        assert!(!ResultBand::classify(-100).is_rejected());
        assert!(ResultBand::classify(-250).is_rejected());
        assert!(ResultBand::classify(-350).is_rejected());
        assert!(!ResultBand::classify(101).is_rejected());
    }

    #[test]
    fn test_result_band_from_name() {
        assert_eq!(ResultBand::from_result_name("terQUEUED"), Some(ResultBand::Retry));
        assert_eq!(ResultBand::from_result_name("tefPAST_SEQ"), Some(ResultBand::Failure));
        assert_eq!(ResultBand::from_result_name("tejSecretUnknown"), Some(ResultBand::Local));
        assert_eq!(ResultBand::from_result_name("xx"), None);
    }

    #[test]
    fn test_payment_builder() {
        let tx = remote()
            .transaction()
            .payment(ALICE, BOB, "1000")
            .destination_tag(7)
            .send_max(json!({ "currency": "USD", "issuer": BOB, "value": "1" }))
            .set_flags(&["PartialPayment", "NoRippleDirect"])
            .unwrap();

        let tx_json = tx.tx_json();
        assert_eq!(tx_json["TransactionType"], "Payment");
        assert_eq!(tx_json["Account"], ALICE);
        assert_eq!(tx_json["Destination"], BOB);
        assert_eq!(tx_json["DestinationTag"], 7);
        assert_eq!(tx_json["Flags"], 0x0003_0000);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let result = remote()
            .transaction()
            .offer_create(ALICE, "100", "200", None, None)
            .set_flags(&["PartialPayment"]);
        let err = result.err().unwrap();
        assert_eq!(err.discriminator(), "tejInvalidFlag");
    }

    #[test]
    fn test_offer_builders() {
        let tx = remote()
            .transaction()
            .offer_create(ALICE, "100", "200", Some(1_000), Some(4))
            .set_flags(&["Sell"])
            .unwrap();
        let tx_json = tx.tx_json();
        assert_eq!(tx_json["Expiration"], 1_000);
        assert_eq!(tx_json["OfferSequence"], 4);
        assert_eq!(tx_json["Flags"], 0x0008_0000);

        let cancel = remote().transaction().offer_cancel(ALICE, 4).tx_json();
        assert_eq!(cancel["TransactionType"], "OfferCancel");
        assert_eq!(cancel["OfferSequence"], 4);
    }

    #[test]
    fn test_trust_set_skips_zero_qualities() {
        let limit = json!({ "currency": "USD", "issuer": BOB, "value": "0" });
        let tx_json = remote()
            .transaction()
            .ripple_line_set(ALICE, Some(limit.clone()), Some(0), Some(5))
            .tx_json();
        assert_eq!(tx_json["TransactionType"], "TrustSet");
        assert_eq!(tx_json["LimitAmount"], limit);
        assert!(tx_json.get("QualityIn").is_none());
        assert_eq!(tx_json["QualityOut"], 5);
    }

    #[test]
    fn test_transfer_rate_minimum() {
        let err = remote()
            .transaction()
            .account_set(ALICE)
            .transfer_rate(999_999_999)
            .err()
            .unwrap();
        assert_eq!(err.discriminator(), "tejInvalidTransferRate");

        let tx = remote()
            .transaction()
            .account_set(ALICE)
            .transfer_rate(1_000_000_000)
            .unwrap();
        assert_eq!(tx.tx_json()["TransferRate"], 1_000_000_000u32);
    }

    #[test]
    fn test_path_add_keeps_step_keys() {
        let tx_json = remote()
            .transaction()
            .payment(ALICE, BOB, "1")
            .path_add(vec![json!({ "account": BOB, "type": 1, "currency": "USD" })])
            .tx_json();
        assert_eq!(tx_json["Paths"], json!([[{ "account": BOB, "currency": "USD" }]]));
    }

    #[test]
    fn test_registered_secret_is_picked_up() {
        let remote = remote();
        remote.set_secret(ALICE, "masterpassphrase");
        let tx = remote.transaction().account_set(ALICE);
        assert_eq!(tx.secret.as_deref(), Some("masterpassphrase"));
    }

    #[test]
    fn test_complete_fills_fee_and_key() {
        let remote = remote();
        let mut tx = remote
            .transaction()
            .account_set(ALICE)
            .secret("masterpassphrase");
        tx.complete().unwrap();
        let tx_json = tx.tx_json();
        // 10 units at the default cushion of 1.5
        assert_eq!(tx_json["Fee"], "15");
        assert_eq!(tx_json["SigningPubKey"].as_str().unwrap().len(), 66);
    }

    #[test]
    fn test_validation_order() {
        let config = RemoteConfig {
            local_signing: false,
            ..RemoteConfig::default()
        };
        let remote = remote();
        let tx = remote.transaction().payment("bogus", BOB, "1");
        assert_eq!(
            tx.validate(&config, false).unwrap_err().discriminator(),
            "tejInvalidAccount"
        );

        let tx = remote.transaction().payment(ALICE, BOB, "1");
        assert_eq!(
            tx.validate(&config, true).unwrap_err().discriminator(),
            "tejSecretUnknown"
        );

        let tx = tx.secret("masterpassphrase");
        assert_eq!(
            tx.validate(&config, false).unwrap_err().discriminator(),
            "tejServerUntrusted"
        );
        assert!(tx.validate(&config, true).is_ok());

        let presigned = remote
            .transaction()
            .payment(ALICE, BOB, "1")
            .set("TxnSignature", "3045");
        assert!(presigned.validate(&config, false).is_ok());
    }

    #[test]
    fn test_tx_state_names() {
        assert_eq!(TxState::ClientSubmitted.to_string(), "client_submitted");
        assert_eq!(TxState::RemoteError.to_string(), "remoteError");
        assert_eq!(TxState::Final("tesSUCCESS".into()).to_string(), "tesSUCCESS");
        assert!(TxState::ClientLost.is_terminal());
        assert!(!TxState::ClientMissing.is_terminal());
    }
}
