//! Recovery error taxonomy
//!
//! Every stage returns these and every error aborts the run.

use bitcoin::Amount;
use keyrescue_core::{KeyError, KeyRole};
use thiserror::Error;

use crate::oracle::OracleError;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("No active wallet address found under the new or legacy path schemes")]
    WalletNotFound,

    #[error("No funds to recover: {0}")]
    NoFunds(String),

    #[error("Insufficient funds: fee {fee} consumes all of {available}")]
    InsufficientFunds { fee: Amount, available: Amount },

    #[error("Signature for input {input} with the {role} key failed: {reason}")]
    Signature {
        input: usize,
        role: KeyRole,
        reason: String,
    },

    #[error("Input {input} is not fully signed: {reason}")]
    IncompleteTransaction { input: usize, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] OracleError),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("Derivation failed: {0}")]
    Derivation(String),

    #[error("Invalid destination address: {0}")]
    InvalidDestination(String),
}

impl RecoveryError {
    /// Map a derivation-time key error. Resolution errors stay `InvalidKey`.
    pub(crate) fn derivation(err: KeyError) -> Self {
        RecoveryError::Derivation(err.to_string())
    }
}
