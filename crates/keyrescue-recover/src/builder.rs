//! Sweep transaction builder and signer
//!
//! Every collected unspent becomes an input of a single transaction paying
//! one destination. Inputs are P2SH 2-of-3 multisig spends signed by the user
//! and backup keys; the BitGo key never signs.
//!
//! Signed scriptSig layout:
//!
//! ```text
//! OP_0 <sig> <sig> <redeemScript>
//! ```
//!
//! with signatures in the order their public keys appear in the redeem script.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, LegacySighash, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    ecdsa, opcodes, Address, Amount, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Witness,
};
use keyrescue_core::{DerivedTriple, KeyRole};

use crate::error::RecoveryError;
use crate::session::{PendingTransaction, RecoverySession};

/// Bytes a signed multisig input adds over an empty scriptSig: two DER
/// signatures, the redeem script and push opcodes
pub const SIGNED_INPUT_OVERHEAD: usize = 232;

/// Fee per started kilobyte of estimated size, in satoshis
pub const FEE_PER_KB_SAT: u64 = 10_000;

const KILOBYTE: usize = 1024;

/// Fee for a transaction of `unsigned_size` bytes with `input_count` inputs.
pub fn estimate_fee(unsigned_size: usize, input_count: usize) -> Amount {
    let approximate_size = unsigned_size + SIGNED_INPUT_OVERHEAD * input_count;
    let kilobytes = approximate_size.div_ceil(KILOBYTE) as u64;
    Amount::from_sat(kilobytes * FEE_PER_KB_SAT)
}

/// Build the unsigned sweep of every collected unspent to `destination`.
pub fn build_transaction<'s>(
    session: &'s mut RecoverySession,
    destination: &Address,
) -> Result<&'s PendingTransaction, RecoveryError> {
    if session.unspents.is_empty() {
        return Err(RecoveryError::NoFunds("no unspent outputs to spend".into()));
    }

    let input: Vec<TxIn> = session
        .unspents
        .iter()
        .map(|unspent| TxIn {
            previous_output: unspent.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        })
        .collect();

    let input_total = session
        .unspents
        .iter()
        .try_fold(Amount::ZERO, |acc, u| acc.checked_add(u.value))
        .ok_or_else(|| RecoveryError::NoFunds("unspent total overflows".into()))?;

    // Output value does not change the size, so size with a placeholder
    let mut tx = Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input,
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: destination.script_pubkey(),
        }],
    };

    let unsigned_size = tx.total_size();
    let fee = estimate_fee(unsigned_size, tx.input.len());
    if fee >= input_total {
        return Err(RecoveryError::InsufficientFunds {
            fee,
            available: input_total,
        });
    }
    tx.output[0].value = input_total - fee;

    log::info!(
        "Built transaction: {} inputs, {} unsigned bytes, fee {}",
        tx.input.len(),
        unsigned_size,
        fee
    );

    Ok(session.transaction.insert(PendingTransaction {
        tx,
        fee,
        input_total,
        complete: false,
    }))
}

/// Sign every input with the user and backup keys of its owning sub-address.
///
/// The transaction is marked complete only after every input verifies.
pub fn sign_transaction(session: &mut RecoverySession) -> Result<&PendingTransaction, RecoveryError> {
    let RecoverySession {
        secp,
        unspents,
        transaction,
        ..
    } = session;
    let pending = transaction
        .as_mut()
        .ok_or_else(|| RecoveryError::NoFunds("no transaction has been built".into()))?;

    if pending.tx.input.len() != unspents.len() {
        return Err(RecoveryError::IncompleteTransaction {
            input: pending.tx.input.len().min(unspents.len()),
            reason: "inputs do not match collected unspents".into(),
        });
    }

    let mut script_sigs = Vec::with_capacity(unspents.len());
    for (index, unspent) in unspents.iter().enumerate() {
        let owner = &unspent.owner.derived;
        let sighash = input_sighash(&pending.tx, index, owner.multisig.redeem_script())?;
        let message = Message::from_digest(sighash.to_byte_array());

        let mut signatures = Vec::with_capacity(KeyRole::SIGNERS.len());
        for role in KeyRole::SIGNERS {
            let signature_error = |reason: &str| RecoveryError::Signature {
                input: index,
                role,
                reason: reason.to_string(),
            };
            let key = owner.get(role);
            let secret = key
                .secret_key()
                .ok_or_else(|| signature_error("no private key"))?;
            let position = owner
                .multisig
                .position(&key.public_key(secp))
                .ok_or_else(|| signature_error("key is not in the redeem script"))?;

            let signature = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&message, &secret));
            signatures.push((position, signature));
        }
        signatures.sort_by_key(|(position, _)| *position);

        let ordered: Vec<ecdsa::Signature> = signatures.into_iter().map(|(_, sig)| sig).collect();
        let script_sig = multisig_script_sig(&ordered, owner.multisig.redeem_script())
            .map_err(|reason| RecoveryError::IncompleteTransaction { input: index, reason })?;
        script_sigs.push(script_sig);
    }

    for (input, script_sig) in pending.tx.input.iter_mut().zip(script_sigs) {
        input.script_sig = script_sig;
    }

    for (index, unspent) in unspents.iter().enumerate() {
        verify_input(secp, &pending.tx, index, &unspent.owner.derived)?;
    }
    pending.complete = true;

    log::info!("Signed {} inputs", pending.tx.input.len());
    Ok(pending)
}

/// Legacy SIGHASH_ALL digest of input `index` spending `redeem_script`
pub fn input_sighash(
    tx: &Transaction,
    index: usize,
    redeem_script: &Script,
) -> Result<LegacySighash, RecoveryError> {
    SighashCache::new(tx)
        .legacy_signature_hash(index, redeem_script, EcdsaSighashType::All.to_u32())
        .map_err(|e| RecoveryError::IncompleteTransaction {
            input: index,
            reason: e.to_string(),
        })
}

/// `OP_0 <sig>... <redeemScript>`
pub fn multisig_script_sig(
    signatures: &[ecdsa::Signature],
    redeem_script: &Script,
) -> Result<ScriptBuf, String> {
    let mut builder = Builder::new().push_opcode(opcodes::OP_0);
    for signature in signatures {
        let push = PushBytesBuf::try_from(signature.to_vec()).map_err(|e| e.to_string())?;
        builder = builder.push_slice(push);
    }
    let redeem = PushBytesBuf::try_from(redeem_script.to_bytes()).map_err(|e| e.to_string())?;
    Ok(builder.push_slice(redeem).into_script())
}

/// Check that input `index` carries valid user and backup signatures for the
/// redeem script of `owner`.
pub fn verify_input(
    secp: &Secp256k1<All>,
    tx: &Transaction,
    index: usize,
    owner: &DerivedTriple,
) -> Result<(), RecoveryError> {
    let incomplete = |reason: String| RecoveryError::IncompleteTransaction {
        input: index,
        reason,
    };

    let input = tx
        .input
        .get(index)
        .ok_or_else(|| incomplete("no such input".into()))?;

    let mut pushes = Vec::new();
    for instruction in input.script_sig.instructions() {
        match instruction.map_err(|e| incomplete(e.to_string()))? {
            Instruction::PushBytes(bytes) => pushes.push(bytes.as_bytes().to_vec()),
            Instruction::Op(op) => return Err(incomplete(format!("unexpected opcode {}", op))),
        }
    }

    let [dummy, first, second, redeem] = <[Vec<u8>; 4]>::try_from(pushes).map_err(|pushes| {
        incomplete(format!(
            "expected OP_0, 2 signatures and the redeem script, found {} pushes",
            pushes.len()
        ))
    })?;
    if !dummy.is_empty() {
        return Err(incomplete("first push must be OP_0".into()));
    }
    if redeem != owner.multisig.redeem_script().as_bytes() {
        return Err(incomplete("redeem script does not match the owning address".into()));
    }

    let sighash = input_sighash(tx, index, owner.multisig.redeem_script())?;
    let message = Message::from_digest(sighash.to_byte_array());

    // User and backup keys, in redeem-script order
    let mut signers: Vec<(usize, KeyRole, PublicKey)> = Vec::new();
    for role in KeyRole::SIGNERS {
        let pubkey = owner.get(role).public_key(secp);
        let position = owner.multisig.position(&pubkey).ok_or_else(|| RecoveryError::Signature {
            input: index,
            role,
            reason: "key is not in the redeem script".into(),
        })?;
        signers.push((position, role, pubkey));
    }
    signers.sort_by_key(|(position, _, _)| *position);

    for (bytes, (_, role, pubkey)) in [first, second].iter().zip(signers) {
        let signature_error = |reason: String| RecoveryError::Signature {
            input: index,
            role,
            reason,
        };
        let signature = ecdsa::Signature::from_slice(bytes).map_err(|e| signature_error(e.to_string()))?;
        if signature.sighash_type != EcdsaSighashType::All {
            return Err(signature_error(format!(
                "unexpected sighash type {}",
                signature.sighash_type
            )));
        }
        secp.verify_ecdsa(&message, &signature.signature, &pubkey)
            .map_err(|e| signature_error(e.to_string()))?;
    }

    Ok(())
}
