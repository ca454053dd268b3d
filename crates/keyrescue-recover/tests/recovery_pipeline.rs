//! End-to-end tests for the recovery pipeline.
//!
//! Drives `recover` against an in-memory oracle:
//!
//! 1. Base address found at m/0/0/0/1 (new scheme)
//! 2. One funded sub-address at chain 0, index 3
//! 3. One unspent of 100,000 sat swept to a P2WPKH destination
//! 4. The signed transaction verifies and reaches the oracle (or not, on a dry run)

use bitcoin::bip32::{DerivationPath, Xpub};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::{ecdsa, Amount, Network, OutPoint, Transaction};

use keyrescue_core::{KeyRole, SjclDecryptor};
use keyrescue_recover::builder::{input_sighash, multisig_script_sig, verify_input};
use keyrescue_recover::test_utils::{
    new_scheme_address, sub_address, test_destination, test_keys, test_keys_with_private_bitgo,
    test_session, test_txid, test_xpriv, MockOracle,
};
use keyrescue_recover::{
    recover, BroadcastStatus, RecoveryError, RecoveryOptions, RecoverySession,
};

const FUNDED_SATS: u64 = 100_000;

fn funded_oracle() -> MockOracle {
    let funded = sub_address(0, 3);
    MockOracle::new()
        .with_history(&new_scheme_address(1), 2)
        .with_funds(&funded, 1, Amount::from_sat(FUNDED_SATS))
        .with_unspent(&funded, OutPoint::new(test_txid(7), 1), Amount::from_sat(FUNDED_SATS))
}

fn options(dry_run: bool) -> RecoveryOptions {
    RecoveryOptions::new(&test_destination().to_string(), Network::Bitcoin, dry_run).unwrap()
}

fn decode(tx_hex: &str) -> Transaction {
    bitcoin::consensus::deserialize(&hex::decode(tx_hex).unwrap()).unwrap()
}

#[test]
fn test_end_to_end_sweep() {
    let mut session = test_session();
    let oracle = funded_oracle();

    let outcome = recover(&mut session, &oracle, &options(false)).unwrap();

    // 82 unsigned bytes + 232 per input = 314, one started kilobyte
    assert_eq!(outcome.fee, Amount::from_sat(10_000));
    assert_eq!(outcome.recovered, Amount::from_sat(FUNDED_SATS - 10_000));
    assert_eq!(outcome.input_count, 1);
    assert_eq!(outcome.status, BroadcastStatus::Sent(outcome.txid));
    assert_eq!(oracle.broadcasts(), vec![outcome.tx_hex.clone()]);

    let tx = decode(&outcome.tx_hex);
    assert_eq!(tx.compute_txid(), outcome.txid);
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].previous_output, OutPoint::new(test_txid(7), 1));
    assert_eq!(tx.output.len(), 1);
    assert_eq!(tx.output[0].script_pubkey, test_destination().script_pubkey());
    assert_eq!(tx.output[0].value, outcome.recovered);

    let owner = &session.unspents()[0].owner;
    assert_eq!((owner.chain, owner.index), (0, 3));
    verify_input(&Secp256k1::new(), &tx, 0, &owner.derived).unwrap();
}

#[test]
fn test_end_to_end_probe_order() {
    let mut session = test_session();
    let oracle = funded_oracle();

    recover(&mut session, &oracle, &options(true)).unwrap();

    let probes = oracle.probes();
    // Search: new-scheme indices 0 and 1
    assert_eq!(probes[0], new_scheme_address(0).to_string());
    assert_eq!(probes[1], new_scheme_address(1).to_string());
    // Chain 0: last activity at index 3, then 20 unused (4..=23); chain 1: 20 unused
    assert_eq!(probes.len(), 2 + 24 + 20);
    assert_eq!(probes[2 + 23], sub_address(0, 23).to_string());
    assert_eq!(probes[2 + 24], sub_address(1, 0).to_string());
    assert_eq!(oracle.unspent_queries(), vec![sub_address(0, 3).to_string()]);

    let wallet = session.wallet().unwrap();
    assert_eq!(wallet.address, new_scheme_address(1));
    assert_eq!(wallet.base_paths[0], "m/0/0".parse::<DerivationPath>().unwrap());
}

#[test]
fn test_dry_run_does_not_broadcast() {
    let mut session = test_session();
    let oracle = funded_oracle();

    let outcome = recover(&mut session, &oracle, &options(true)).unwrap();

    assert_eq!(outcome.status, BroadcastStatus::NotSent);
    assert!(oracle.broadcasts().is_empty());
    assert!(session.transaction().unwrap().complete);
    assert_eq!(decode(&outcome.tx_hex).compute_txid(), outcome.txid);
}

#[test]
fn test_sweeps_multiple_addresses_and_chains() {
    let receive = sub_address(0, 2);
    let change = sub_address(1, 5);
    let oracle = MockOracle::new()
        .with_history(&new_scheme_address(0), 1)
        .with_funds(&receive, 2, Amount::from_sat(30_000))
        .with_unspent(&receive, OutPoint::new(test_txid(1), 0), Amount::from_sat(10_000))
        .with_unspent(&receive, OutPoint::new(test_txid(2), 0), Amount::from_sat(20_000))
        .with_funds(&change, 1, Amount::from_sat(45_000))
        .with_unspent(&change, OutPoint::new(test_txid(3), 2), Amount::from_sat(45_000));
    let mut session = test_session();

    let outcome = recover(&mut session, &oracle, &options(true)).unwrap();

    assert_eq!(outcome.input_count, 3);
    assert_eq!(outcome.recovered + outcome.fee, Amount::from_sat(75_000));

    let tx = decode(&outcome.tx_hex);
    let secp = Secp256k1::new();
    for (index, unspent) in session.unspents().iter().enumerate() {
        verify_input(&secp, &tx, index, &unspent.owner.derived).unwrap();
    }
}

#[test]
fn test_wallet_not_found() {
    let mut session = test_session();
    let oracle = MockOracle::new();

    let result = recover(&mut session, &oracle, &options(false));
    assert!(matches!(result, Err(RecoveryError::WalletNotFound)));
    // 3 new-scheme probes, then 19 bitgo key indices x 3 address indices
    assert_eq!(oracle.probes().len(), 3 + 19 * 3);
    assert!(oracle.unspent_queries().is_empty());
}

#[test]
fn test_active_wallet_without_funds() {
    let mut session = test_session();
    let oracle = MockOracle::new().with_history(&new_scheme_address(0), 3);

    let result = recover(&mut session, &oracle, &options(false));
    assert!(matches!(result, Err(RecoveryError::NoFunds(_))));
    assert!(oracle.broadcasts().is_empty());
}

#[test]
fn test_fee_consumes_everything() {
    let funded = sub_address(0, 1);
    let oracle = MockOracle::new()
        .with_history(&new_scheme_address(0), 1)
        .with_funds(&funded, 1, Amount::from_sat(9_000))
        .with_unspent(&funded, OutPoint::new(test_txid(5), 0), Amount::from_sat(9_000));
    let mut session = test_session();

    let result = recover(&mut session, &oracle, &options(false));
    assert!(matches!(
        result,
        Err(RecoveryError::InsufficientFunds { fee, available })
            if fee == Amount::from_sat(10_000) && available == Amount::from_sat(9_000)
    ));
}

#[test]
fn test_broadcast_rejection() {
    let mut session = test_session();
    let oracle = funded_oracle().rejecting_broadcasts("bad-txns-inputs-missingorspent");

    let result = recover(&mut session, &oracle, &options(false));
    assert!(matches!(result, Err(RecoveryError::Broadcast(reason)) if reason.contains("missingorspent")));
    assert_eq!(oracle.broadcasts().len(), 1);
}

#[test]
fn test_oracle_failure_aborts_run() {
    let mut session = test_session();
    let oracle = funded_oracle().failing();

    let result = recover(&mut session, &oracle, &options(false));
    assert!(matches!(result, Err(RecoveryError::Network(_))));
    assert!(session.wallet().is_none());
    assert!(oracle.broadcasts().is_empty());
}

#[test]
fn test_single_signature_input_rejected() {
    let mut session = RecoverySession::new(test_keys_with_private_bitgo(), Network::Bitcoin);
    let outcome = recover(&mut session, &funded_oracle(), &options(true)).unwrap();
    let mut tx = decode(&outcome.tx_hex);

    let secp = Secp256k1::new();
    let owner = &session.unspents()[0].owner.derived;
    let redeem = owner.multisig.redeem_script();
    let message = Message::from_digest(input_sighash(&tx, 0, redeem).unwrap().to_byte_array());
    let user_key = owner.get(KeyRole::User).secret_key().unwrap();
    let user_sig = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&message, &user_key));

    tx.input[0].script_sig = multisig_script_sig(&[user_sig], redeem).unwrap();
    let result = verify_input(&secp, &tx, 0, owner);
    assert!(matches!(
        result,
        Err(RecoveryError::IncompleteTransaction { input: 0, .. })
    ));
}

#[test]
fn test_bitgo_signed_input_rejected() {
    let mut session = RecoverySession::new(test_keys_with_private_bitgo(), Network::Bitcoin);
    let outcome = recover(&mut session, &funded_oracle(), &options(true)).unwrap();
    let mut tx = decode(&outcome.tx_hex);

    let secp = Secp256k1::new();
    let owner = &session.unspents()[0].owner.derived;
    let redeem = owner.multisig.redeem_script();
    let message = Message::from_digest(input_sighash(&tx, 0, redeem).unwrap().to_byte_array());
    let sign = |role: KeyRole| {
        let key = owner.get(role).secret_key().unwrap();
        ecdsa::Signature::sighash_all(secp.sign_ecdsa(&message, &key))
    };

    // A valid 2-of-3 spend on chain, but recovery only accepts user + backup
    tx.input[0].script_sig =
        multisig_script_sig(&[sign(KeyRole::User), sign(KeyRole::Bitgo)], redeem).unwrap();
    let result = verify_input(&secp, &tx, 0, owner);
    assert!(matches!(
        result,
        Err(RecoveryError::Signature {
            input: 0,
            role: KeyRole::Backup,
            ..
        })
    ));
}

#[test]
fn test_session_from_plain_keycard() {
    let secp = Secp256k1::new();
    let bitgo = Xpub::from_priv(&secp, &test_xpriv(3));

    let session = RecoverySession::from_keycard(
        &test_xpriv(1).to_string(),
        &test_xpriv(2).to_string(),
        &bitgo.to_string(),
        "",
        &SjclDecryptor,
        Network::Bitcoin,
    )
    .unwrap();

    assert_eq!(session.keys(), &test_keys());
}

#[test]
fn test_session_rejects_public_user_key() {
    let secp = Secp256k1::new();
    let user = Xpub::from_priv(&secp, &test_xpriv(1));

    let result = RecoverySession::from_keycard(
        &user.to_string(),
        &test_xpriv(2).to_string(),
        &test_xpriv(3).to_string(),
        "",
        &SjclDecryptor,
        Network::Bitcoin,
    );
    assert!(matches!(result, Err(RecoveryError::InvalidKey(_))));
}
