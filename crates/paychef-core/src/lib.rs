//! paychef-core: session-key authorization and sequential batch payouts.
//!
//! The crate is chain-agnostic. Addresses are opaque strings and the actual
//! token movement is delegated to a [`executor::TransferCapability`].

pub mod amount;
pub mod constants;
pub mod credential;
pub mod error;
pub mod executor;
pub mod gate;
pub mod history;
pub mod notify;
pub mod run;
pub mod store;

pub use constants::*;
pub use credential::{CredentialStatus, CredentialStatusView, DelegatedCredential, IssuedCredential};
pub use error::{PayrollError, Rejection, TransferError};
pub use executor::{NotificationSink, PayeeSource, PayrollExecutor, TransferCapability};
pub use history::RunHistory;
pub use run::{PaidPayout, FailedPayout, PayoutIntent, PayoutOutcome, RunRecord};
pub use store::CredentialStore;
