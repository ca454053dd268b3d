//! 2-of-3 multisig redeem scripts and their P2SH addresses
//!
//! ```text
//! OP_2 <user> <backup> <bitgo> OP_3 OP_CHECKMULTISIG
//! ```
//!
//! Keys are used in the order given, not sorted: wallets of this scheme were
//! created with the user, backup, bitgo ordering and sorting would produce
//! different addresses.

use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::Builder;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address, Network, Script, ScriptBuf, ScriptHash};

/// Signatures required to spend
pub const REQUIRED_SIGNATURES: usize = 2;

/// Keys in every redeem script
pub const TOTAL_KEYS: usize = 3;

/// A 2-of-3 multisig redeem script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigScript {
    pubkeys: [PublicKey; TOTAL_KEYS],
    redeem_script: ScriptBuf,
}

impl MultisigScript {
    pub fn new(pubkeys: [PublicKey; TOTAL_KEYS]) -> Self {
        let mut builder = Builder::new().push_int(REQUIRED_SIGNATURES as i64);
        for pubkey in &pubkeys {
            builder = builder.push_key(&bitcoin::PublicKey::new(*pubkey));
        }
        let redeem_script = builder
            .push_int(TOTAL_KEYS as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();

        Self {
            pubkeys,
            redeem_script,
        }
    }

    pub fn pubkeys(&self) -> &[PublicKey; TOTAL_KEYS] {
        &self.pubkeys
    }

    pub fn redeem_script(&self) -> &Script {
        &self.redeem_script
    }

    /// Position of `pubkey` in the script, which is also the order its
    /// signature must appear in a scriptSig
    pub fn position(&self, pubkey: &PublicKey) -> Option<usize> {
        self.pubkeys.iter().position(|pk| pk == pubkey)
    }

    /// HASH160 of the redeem script
    pub fn script_hash(&self) -> ScriptHash {
        self.redeem_script.script_hash()
    }

    /// `OP_HASH160 <hash> OP_EQUAL`
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2sh(&self.script_hash())
    }

    pub fn address(&self, network: Network) -> Address {
        Address::p2sh_from_hash(self.script_hash(), network)
    }
}
