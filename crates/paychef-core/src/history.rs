//! Bounded, append-only run history (most recent first).

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::constants::MAX_HISTORY_RUNS;
use crate::error::PayrollError;
use crate::run::RunRecord;

/// Durable storage for run records.
pub trait HistoryBackend: Send + Sync {
    /// Up to `limit` records, most recent first.
    fn load_recent(&self, limit: usize) -> Result<Vec<RunRecord>, PayrollError>;
    /// Store `record` and drop anything beyond the newest `keep`.
    fn append(&self, record: &RunRecord, keep: usize) -> Result<(), PayrollError>;
}

#[derive(Clone, Default)]
pub struct RunHistory {
    runs:    Arc<RwLock<VecDeque<RunRecord>>>,
    /// None = in-memory only.
    backend: Option<Arc<dyn HistoryBackend>>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn HistoryBackend>) -> Result<Self, PayrollError> {
        let runs: VecDeque<RunRecord> = backend.load_recent(MAX_HISTORY_RUNS)?.into();
        tracing::info!("Loaded {} payroll runs from history", runs.len());
        Ok(Self {
            runs:    Arc::new(RwLock::new(runs)),
            backend: Some(backend),
        })
    }

    /// Insert `record` at the front, evicting the oldest beyond the cap.
    ///
    /// The record always becomes visible. A backend failure is returned
    /// afterwards; the run then survives only until restart.
    pub fn append(&self, record: RunRecord) -> Result<(), PayrollError> {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        let persisted = match self.backend {
            Some(ref backend) => backend.append(&record, MAX_HISTORY_RUNS),
            None => Ok(()),
        };
        runs.push_front(record);
        runs.truncate(MAX_HISTORY_RUNS);
        persisted
    }

    /// All retained runs, most recent first.
    pub fn all(&self) -> Vec<RunRecord> {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }

    pub fn get(&self, run_id: &str) -> Result<RunRecord, PayrollError> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned()
            .ok_or_else(|| PayrollError::RunNotFound(run_id.to_string()))
    }

    /// Id of the most recent run, if any.
    pub fn latest_id(&self) -> Option<String> {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).front().map(|r| r.run_id.clone())
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
