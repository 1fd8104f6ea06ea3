//! Error taxonomy for the relay pipeline
//!
//! Plumbing (stores, startup) uses `eyre`; the errors below are the ones the
//! watcher and dispatcher branch on.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::Chain;

/// Provider hiccup; the affected range is retried on the next cycle
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{chain} RPC call {call} failed: {message}")]
    Call {
        chain: Chain,
        call: &'static str,
        message: String,
    },

    #[error("{chain} RPC call {call} timed out after {timeout:?}")]
    Timeout {
        chain: Chain,
        call: &'static str,
        timeout: Duration,
    },
}

/// A log that could not be turned into a `BridgeEvent`
#[derive(Debug, Error)]
#[error("Malformed {chain} log (tx {tx_hash}, log index {log_index}): {reason}")]
pub struct DecodeError {
    pub chain: Chain,
    pub tx_hash: String,
    pub log_index: String,
    pub reason: String,
}

/// How the dispatcher reacts to a failed destination call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionErrorKind {
    /// Timeout, underpriced gas, stale account nonce: retry on a later cycle
    Retryable,
    /// Underfunded relayer or a permanent rejection: halt the pipeline
    Fatal,
    /// The destination contract already consumed the bridge nonce
    AlreadyProcessed,
}

impl fmt::Display for SubmissionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionErrorKind::Retryable => write!(f, "retryable"),
            SubmissionErrorKind::Fatal => write!(f, "fatal"),
            SubmissionErrorKind::AlreadyProcessed => write!(f, "already-processed"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} submission error: {message}")]
pub struct SubmissionError {
    pub kind: SubmissionErrorKind,
    pub message: String,
    /// Hash of the broadcast transaction, if it got that far
    pub tx_hash: Option<String>,
}

impl SubmissionError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: SubmissionErrorKind::Retryable,
            message: message.into(),
            tx_hash: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: SubmissionErrorKind::Fatal,
            message: message.into(),
            tx_hash: None,
        }
    }

    /// Classify a raw provider/contract error message
    pub fn classify(message: impl Into<String>, tx_hash: Option<String>) -> Self {
        let message = message.into();
        Self {
            kind: crate::writers::retry::classify_error(&message).submission_kind(),
            message,
            tx_hash,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == SubmissionErrorKind::Retryable
    }
}
