//! Payout intents, per-payee outcomes and the immutable run record.

use serde::{Deserialize, Serialize};

/// One payee in a run. Exists only for the duration of that run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutIntent {
    pub name:    String,
    pub address: String,
    /// Base units.
    pub amount:  u64,
}

impl PayoutIntent {
    pub fn new(name: impl Into<String>, address: impl Into<String>, amount: u64) -> Self {
        Self { name: name.into(), address: address.into(), amount }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidPayout {
    pub name:         String,
    pub address:      String,
    pub amount:       u64,
    pub transfer_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayout {
    pub name:    String,
    pub address: String,
    pub amount:  u64,
    pub reason:  String,
}

/// Result of processing a single payee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    Paid(PaidPayout),
    Failed(FailedPayout),
}

impl PayoutOutcome {
    pub fn paid(intent: &PayoutIntent, transfer_ref: String) -> Self {
        PayoutOutcome::Paid(PaidPayout {
            name:    intent.name.clone(),
            address: intent.address.clone(),
            amount:  intent.amount,
            transfer_ref,
        })
    }

    pub fn failed(intent: &PayoutIntent, reason: impl Into<String>) -> Self {
        PayoutOutcome::Failed(FailedPayout {
            name:    intent.name.clone(),
            address: intent.address.clone(),
            amount:  intent.amount,
            reason:  reason.into(),
        })
    }
}

/// Immutable summary of one executor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id:            String,
    /// Unix seconds at run start.
    pub timestamp:         u64,
    pub total_payees:      usize,
    pub successful:        Vec<PaidPayout>,
    pub failed:            Vec<FailedPayout>,
    pub total_requested:   u64,
    pub total_transferred: u64,
}

impl RunRecord {
    pub fn paid_count(&self) -> usize {
        self.successful.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Fold state threaded through the payee list.
#[derive(Debug)]
pub struct RunAccumulator {
    run_id:            String,
    timestamp:         u64,
    total_payees:      usize,
    successful:        Vec<PaidPayout>,
    failed:            Vec<FailedPayout>,
    total_requested:   u64,
    total_transferred: u64,
}

impl RunAccumulator {
    pub fn new(run_id: String, timestamp: u64, total_payees: usize) -> Self {
        Self {
            run_id,
            timestamp,
            total_payees,
            successful: Vec::with_capacity(total_payees),
            failed: Vec::new(),
            total_requested: 0,
            total_transferred: 0,
        }
    }

    /// Record the outcome of `intent`. Requested totals count every payee,
    /// transferred totals only confirmed payouts.
    pub fn record(mut self, intent: &PayoutIntent, outcome: PayoutOutcome) -> Self {
        self.total_requested = self.total_requested.saturating_add(intent.amount);
        match outcome {
            PayoutOutcome::Paid(p) => {
                self.total_transferred = self.total_transferred.saturating_add(p.amount);
                self.successful.push(p);
            }
            PayoutOutcome::Failed(f) => self.failed.push(f),
        }
        self
    }

    pub fn finish(self) -> RunRecord {
        RunRecord {
            run_id:            self.run_id,
            timestamp:         self.timestamp,
            total_payees:      self.total_payees,
            successful:        self.successful,
            failed:            self.failed,
            total_requested:   self.total_requested,
            total_transferred: self.total_transferred,
        }
    }
}
