//! Retry classification for destination-chain submissions
//!
//! Retries are not performed in-line: a retryable failure leaves the ledger
//! row `failed` and the watcher re-dispatches it on a later cycle, up to
//! `RetryPolicy::max_attempts`.

use crate::error::SubmissionErrorKind;

/// Bounded retry policy for relay attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts (including the first) before an event is parked as failed
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure - should retry (RPC timeout, network issues)
    Transient,
    /// Transaction underpriced - retry, the fillers re-price
    Underpriced,
    /// Account nonce out of sync with our cache - retry after resync
    AccountNonce,
    /// The bridge contract already consumed this bridge-level nonce
    AlreadyProcessed,
    /// Permanent failure - do not retry (underfunded, unauthorized, contract error)
    Permanent,
    /// Unknown error - may retry
    Unknown,
}

impl ErrorClass {
    pub fn submission_kind(&self) -> SubmissionErrorKind {
        match self {
            ErrorClass::AlreadyProcessed => SubmissionErrorKind::AlreadyProcessed,
            ErrorClass::Permanent => SubmissionErrorKind::Fatal,
            ErrorClass::Transient
            | ErrorClass::Underpriced
            | ErrorClass::AccountNonce
            | ErrorClass::Unknown => SubmissionErrorKind::Retryable,
        }
    }
}

/// Classify an error for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Replay protection on the destination contract
    if error_lower.contains("already processed")
        || error_lower.contains("nonce already used")
        || error_lower.contains("nonce already consumed")
        || error_lower.contains("already relayed")
    {
        return ErrorClass::AlreadyProcessed;
    }

    // Transient errors
    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    // Gas price errors
    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
    {
        return ErrorClass::Underpriced;
    }

    // Relayer account nonce errors
    if error_lower.contains("nonce too low")
        || error_lower.contains("nonce too high")
        || error_lower.contains("already known")
    {
        return ErrorClass::AccountNonce;
    }

    // Permanent errors
    if error_lower.contains("insufficient funds")
        || error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("unauthorized")
        || error_lower.contains("caller is not")
        || error_lower.contains("invalid parameters")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}
