use thiserror::Error;

/// Why the authorization gate refused a transfer.
///
/// Variants are listed in the order the gate evaluates them; the first
/// failing check is the one reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no session key found")]
    NoCredential,

    #[error("session key is {status}")]
    NotActive { status: String },

    #[error("session key has expired")]
    Expired,

    #[error("address {address} not in whitelist")]
    NotWhitelisted { address: String },

    #[error("spending limit exceeded: {attempted} > {limit}")]
    LimitExceeded { attempted: u64, limit: u64 },
}

/// Failure reported by the external transfer capability.
///
/// The message is carried verbatim into the failed outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer signer not configured")]
    SignerUnavailable,

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("confirmation failed: {0}")]
    Confirmation(String),
}

/// Request-level failures of the exposed operations.
#[derive(Debug, Error)]
pub enum PayrollError {
    #[error("no payroll data found")]
    NoPayrollData,

    #[error("a payroll run is already in progress")]
    RunInProgress,

    #[error("no session key found")]
    CredentialNotFound,

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("invalid session key rules: {0}")]
    InvalidRules(String),

    #[error("spend not committed: {0}")]
    SpendNotCommitted(String),

    #[error("storage error: {0}")]
    Store(String),
}

/// Decimal amount parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,

    #[error("invalid amount: {0}")]
    Invalid(String),

    #[error("amount {value} has more than {decimals} decimal places")]
    TooPrecise { value: String, decimals: u8 },

    #[error("amount {0} overflows")]
    Overflow(String),
}
