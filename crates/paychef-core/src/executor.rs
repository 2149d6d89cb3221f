//! Sequential batch payout executor.
//!
//! One run walks the payee list in order. For every payee:
//!   1. authorize against the live session key rules,
//!   2. on acceptance submit the transfer and wait for confirmation,
//!   3. on confirmation commit the spend before moving to the next payee.
//!
//! Authorization of payee i+1 depends on the committed spend of payee i, so
//! nothing inside a run is parallel. A second run cannot start while one is
//! in flight.
//!
//! If a confirmed transfer cannot be committed, the rest of the run is failed
//! without calling the transfer capability.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::{PayrollError, TransferError};
use crate::history::RunHistory;
use crate::run::{PayoutIntent, PayoutOutcome, RunAccumulator, RunRecord};
use crate::store::CredentialStore;

// ============================================================================
// External capabilities
// ============================================================================

/// Moves tokens. Must return only after the transfer is confirmed.
#[async_trait]
pub trait TransferCapability: Send + Sync {
    /// Returns the transfer reference (e.g. transaction signature).
    async fn submit(&self, destination: &str, amount: u64) -> Result<String, TransferError>;
}

/// Supplies the ordered payee list for a run.
#[async_trait]
pub trait PayeeSource: Send + Sync {
    /// `None` when no payroll is available.
    async fn payees(&self) -> Option<Vec<PayoutIntent>>;
}

/// Delivers a formatted run summary somewhere a human will read it.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, message: &str) -> Result<(), String>;
}

// ============================================================================
// Time helpers
// ============================================================================

pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// PayrollExecutor
// ============================================================================

pub struct PayrollExecutor {
    credentials: CredentialStore,
    history:     RunHistory,
    transfer:    Arc<dyn TransferCapability>,
    /// Held for the whole duration of a run.
    run_lock:    tokio::sync::Mutex<()>,
    /// Last issued run id (unix millis); ids are strictly increasing.
    last_run_id: Mutex<u64>,
}

impl PayrollExecutor {
    pub fn new(
        credentials: CredentialStore,
        history: RunHistory,
        transfer: Arc<dyn TransferCapability>,
    ) -> Self {
        let last = history.latest_id().and_then(|id| id.parse().ok()).unwrap_or(0);
        Self {
            credentials,
            history,
            transfer,
            run_lock: tokio::sync::Mutex::new(()),
            last_run_id: Mutex::new(last),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Pull the current payee list from `source` and execute it.
    pub async fn execute_from(&self, source: &dyn PayeeSource) -> Result<RunRecord, PayrollError> {
        let payees = source.payees().await.ok_or(PayrollError::NoPayrollData)?;
        self.execute(payees).await
    }

    /// Execute one run over `payees`, in order.
    ///
    /// Fails only when there is nothing to pay or another run is in flight.
    /// Every per-payee problem ends up in the returned record instead.
    pub async fn execute(&self, payees: Vec<PayoutIntent>) -> Result<RunRecord, PayrollError> {
        if payees.is_empty() {
            return Err(PayrollError::NoPayrollData);
        }
        let _running = self.run_lock.try_lock().map_err(|_| PayrollError::RunInProgress)?;

        let run_id = self.next_run_id();
        tracing::info!(run_id = %run_id, payees = payees.len(), "Starting payroll run");

        let mut acc = RunAccumulator::new(run_id, unix_secs(), payees.len());
        let mut halted: Option<String> = None;
        for intent in &payees {
            let outcome = match halted {
                Some(ref reason) => PayoutOutcome::failed(intent, format!("run halted: {reason}")),
                None => {
                    let (outcome, commit_err) = self.process(intent).await;
                    if let Some(e) = commit_err {
                        halted = Some(e.to_string());
                    }
                    outcome
                }
            };
            acc = acc.record(intent, outcome);
        }
        let record = acc.finish();

        // Stays listed in memory even when the write fails.
        if let Err(e) = self.history.append(record.clone()) {
            tracing::error!(run_id = %record.run_id, "Failed to persist run record: {e}");
        }

        tracing::info!(
            run_id      = %record.run_id,
            paid        = record.paid_count(),
            failed      = record.failed_count(),
            transferred = record.total_transferred,
            "Payroll complete: {}/{} paid",
            record.paid_count(),
            record.total_payees,
        );
        Ok(record)
    }

    /// Authorize, transfer and commit one payee. The error is set when funds
    /// moved but the spend could not be committed.
    async fn process(&self, intent: &PayoutIntent) -> (PayoutOutcome, Option<PayrollError>) {
        let authorized_by = match self.credentials.authorize(&intent.address, intent.amount, unix_secs()) {
            Ok(address) => address,
            Err(rejection) => {
                tracing::warn!(payee = %intent.name, "Payment rejected: {rejection}");
                return (PayoutOutcome::failed(intent, rejection.to_string()), None);
            }
        };

        match self.transfer.submit(&intent.address, intent.amount).await {
            Ok(transfer_ref) => {
                // Funds have moved; the outcome is a success whatever happens
                // to the bookkeeping below.
                let commit_err = match self.credentials.commit_spend(&authorized_by, intent.amount) {
                    Ok(total) => {
                        tracing::debug!(total_spent = total, "Spend committed");
                        None
                    }
                    Err(e) => {
                        tracing::error!(
                            payee = %intent.name,
                            tx    = %transfer_ref,
                            "Transfer confirmed but spend not committed, halting run: {e}",
                        );
                        Some(e)
                    }
                };
                tracing::info!(
                    payee  = %intent.name,
                    amount = intent.amount,
                    tx     = %transfer_ref,
                    "Paid",
                );
                (PayoutOutcome::paid(intent, transfer_ref), commit_err)
            }
            Err(e) => {
                tracing::warn!(payee = %intent.name, "Transfer failed: {e}");
                (PayoutOutcome::failed(intent, e.to_string()), None)
            }
        }
    }

    fn next_run_id(&self) -> String {
        let mut last = self.last_run_id.lock().unwrap_or_else(|e| e.into_inner());
        let id = unix_millis().max(last.saturating_add(1));
        *last = id;
        id.to_string()
    }
}
