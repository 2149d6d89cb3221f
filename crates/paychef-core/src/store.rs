//! Delegated credential store.
//!
//! Holds the one session key the agent may spend with. Reads are served
//! from memory and every mutation is written through to the optional durable
//! backend.
//!
//! A new key is persisted before it is published. Spends and revocations only
//! tighten what the key may do, so they are applied in memory even when the
//! write fails; the write error is still returned to the caller.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::credential::{CredentialStatus, CredentialStatusView, DelegatedCredential, IssuedCredential};
use crate::error::{PayrollError, Rejection};
use crate::gate;

/// Durable get/set of the single credential record.
pub trait CredentialBackend: Send + Sync {
    fn load(&self) -> Result<Option<DelegatedCredential>, PayrollError>;
    fn save(&self, credential: &DelegatedCredential) -> Result<(), PayrollError>;
}

/// Cheaply cloneable handle; all clones share the same state.
#[derive(Clone, Default)]
pub struct CredentialStore {
    inner:   Arc<Mutex<Option<DelegatedCredential>>>,
    /// None = in-memory only.
    backend: Option<Arc<dyn CredentialBackend>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `backend`, loading the persisted credential.
    pub fn with_backend(backend: Arc<dyn CredentialBackend>) -> Result<Self, PayrollError> {
        let current = backend.load()?;
        if let Some(ref cred) = current {
            tracing::info!(
                address = %cred.address,
                status  = %cred.status,
                spent   = cred.total_spent,
                limit   = cred.spending_limit,
                "Loaded session key",
            );
        }
        Ok(Self {
            inner:   Arc::new(Mutex::new(current)),
            backend: Some(backend),
        })
    }

    /// Issue a new session key, replacing any prior one.
    ///
    /// The returned secret is the only time it leaves the store.
    pub fn create(
        &self,
        whitelist: Vec<String>,
        spending_limit: u64,
        now: u64,
    ) -> Result<IssuedCredential, PayrollError> {
        let cred = DelegatedCredential::issue(whitelist, spending_limit, now)?;
        let mut guard = self.lock();
        if let Some(prev) = guard.as_ref() {
            tracing::info!(previous = %prev.address, "Replacing existing session key");
        }
        self.persist(&cred)?;
        let issued = cred.issued();
        tracing::info!(
            address   = %cred.address,
            whitelist = cred.whitelist.len(),
            limit     = cred.spending_limit,
            expires   = cred.expires_at,
            "Session key created",
        );
        *guard = Some(cred);
        Ok(issued)
    }

    /// Snapshot of the current credential, if any.
    pub fn current(&self) -> Option<DelegatedCredential> {
        self.lock().clone()
    }

    pub fn status(&self, now: u64) -> CredentialStatusView {
        match self.lock().as_ref() {
            Some(cred) => cred.status_view(now),
            None => CredentialStatusView::missing(),
        }
    }

    /// Mark the current credential revoked. Revoking twice is a no-op.
    pub fn revoke(&self, now: u64) -> Result<(), PayrollError> {
        let mut guard = self.lock();
        let Some(cred) = guard.as_ref() else {
            return Err(PayrollError::CredentialNotFound);
        };
        if cred.status == CredentialStatus::Revoked {
            return Ok(());
        }
        let mut updated = cred.clone();
        updated.status = CredentialStatus::Revoked;
        updated.revoked_at = Some(now);
        let persisted = self.persist(&updated);
        tracing::info!(address = %updated.address, "Session key revoked");
        *guard = Some(updated);
        persisted
    }

    /// Run the authorization gate against the latest committed state.
    ///
    /// On success returns the address of the credential that authorized the
    /// transfer; pass it back to [`commit_spend`](Self::commit_spend).
    pub fn authorize(&self, destination: &str, amount: u64, now: u64) -> Result<String, Rejection> {
        let guard = self.lock();
        gate::authorize(guard.as_ref(), destination, amount, now)?;
        Ok(guard.as_ref().map(|c| c.address.clone()).unwrap_or_default())
    }

    /// Add `amount` to the cumulative spend of the credential `address`.
    ///
    /// Re-checks the limit under the same lock so `total_spent` can never
    /// exceed `spending_limit`, and refuses if the credential was replaced
    /// since authorization. Returns the new total.
    ///
    /// A backend failure is returned as [`PayrollError::Store`] after the
    /// spend has already been applied in memory: the transfer happened, so
    /// later authorizations must see it.
    pub fn commit_spend(&self, address: &str, amount: u64) -> Result<u64, PayrollError> {
        let mut guard = self.lock();
        let cred = guard.as_ref().ok_or(PayrollError::CredentialNotFound)?;
        if cred.address != address {
            return Err(PayrollError::SpendNotCommitted(format!(
                "session key changed from {address} to {}",
                cred.address
            )));
        }
        let new_total = cred
            .total_spent
            .checked_add(amount)
            .filter(|t| *t <= cred.spending_limit)
            .ok_or_else(|| {
                PayrollError::SpendNotCommitted(format!(
                    "{} + {amount} exceeds limit {}",
                    cred.total_spent, cred.spending_limit
                ))
            })?;

        let mut updated = cred.clone();
        updated.total_spent = new_total;
        let persisted = self.persist(&updated);
        *guard = Some(updated);
        persisted.map(|()| new_total)
    }

    fn persist(&self, cred: &DelegatedCredential) -> Result<(), PayrollError> {
        match self.backend {
            Some(ref backend) => backend.save(cred),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<DelegatedCredential>> {
        // A poisoned lock still holds a consistent value: mutations replace
        // the whole record in one assignment.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlakyBackend {
        saved: Mutex<Option<DelegatedCredential>>,
        fail:  AtomicBool,
    }

    impl CredentialBackend for FlakyBackend {
        fn load(&self) -> Result<Option<DelegatedCredential>, PayrollError> {
            Ok(self.saved.lock().unwrap().clone())
        }

        fn save(&self, credential: &DelegatedCredential) -> Result<(), PayrollError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PayrollError::Store("disk full".into()));
            }
            *self.saved.lock().unwrap() = Some(credential.clone());
            Ok(())
        }
    }

    fn wl() -> Vec<String> {
        vec!["alice".into(), "bob".into()]
    }

    #[test]
    fn status_missing_without_credential() {
        let store = CredentialStore::new();
        assert_eq!(store.status(0), CredentialStatusView::missing());
        assert!(matches!(store.revoke(0), Err(PayrollError::CredentialNotFound)));
    }

    #[test]
    fn create_replaces_previous_key() {
        let store = CredentialStore::new();
        let first = store.create(wl(), 100, 0).unwrap();
        let second = store.create(vec!["carol".into()], 50, 10).unwrap();
        assert_ne!(first.address, second.address);

        let current = store.current().unwrap();
        assert_eq!(current.address, second.address);
        assert_eq!(current.spending_limit, 50);
        assert!(!current.whitelist.contains("alice"));
    }

    #[test]
    fn revoke_blocks_authorization_before_expiry() {
        let store = CredentialStore::new();
        store.create(wl(), 100, 0).unwrap();
        store.authorize("alice", 10, 1).unwrap();

        store.revoke(5).unwrap();
        assert!(matches!(
            store.authorize("alice", 10, 6),
            Err(Rejection::NotActive { .. })
        ));
        assert_eq!(store.current().unwrap().revoked_at, Some(5));

        // second revoke keeps the original timestamp
        store.revoke(9).unwrap();
        assert_eq!(store.current().unwrap().revoked_at, Some(5));
    }

    #[test]
    fn expired_key_keeps_active_status_in_view() {
        let store = CredentialStore::new();
        store.create(wl(), 100, 0).unwrap();
        let expiry = store.current().unwrap().expires_at;
        match store.status(expiry + 1) {
            CredentialStatusView::Present { status, is_expired, .. } => {
                assert_eq!(status, CredentialStatus::Active);
                assert!(is_expired);
            }
            other => panic!("unexpected view {other:?}"),
        }
        assert_eq!(store.authorize("alice", 1, expiry + 1), Err(Rejection::Expired));
    }

    #[test]
    fn commit_spend_accumulates_and_guards_limit() {
        let store = CredentialStore::new();
        let issued = store.create(wl(), 100, 0).unwrap();
        assert_eq!(store.commit_spend(&issued.address, 40).unwrap(), 40);
        assert_eq!(store.commit_spend(&issued.address, 60).unwrap(), 100);
        assert!(matches!(
            store.commit_spend(&issued.address, 1),
            Err(PayrollError::SpendNotCommitted(_))
        ));
        assert_eq!(store.current().unwrap().total_spent, 100);
    }

    #[test]
    fn commit_spend_refuses_replaced_key() {
        let store = CredentialStore::new();
        let old = store.create(wl(), 100, 0).unwrap();
        store.create(wl(), 100, 0).unwrap();
        assert!(matches!(
            store.commit_spend(&old.address, 10),
            Err(PayrollError::SpendNotCommitted(_))
        ));
        assert_eq!(store.current().unwrap().total_spent, 0);
    }

    #[test]
    fn backend_round_trip_survives_reopen() {
        let backend = Arc::new(FlakyBackend::default());
        let store = CredentialStore::with_backend(backend.clone()).unwrap();
        let issued = store.create(wl(), 100, 0).unwrap();
        store.commit_spend(&issued.address, 30).unwrap();

        let reopened = CredentialStore::with_backend(backend).unwrap();
        let cred = reopened.current().unwrap();
        assert_eq!(cred.address, issued.address);
        assert_eq!(cred.total_spent, 30);
    }

    #[test]
    fn failed_write_still_tightens_memory() {
        let backend = Arc::new(FlakyBackend::default());
        let store = CredentialStore::with_backend(backend.clone()).unwrap();
        let issued = store.create(wl(), 100, 0).unwrap();

        backend.fail.store(true, Ordering::SeqCst);
        assert!(matches!(store.commit_spend(&issued.address, 30), Err(PayrollError::Store(_))));
        assert_eq!(store.current().unwrap().total_spent, 30);
        assert_eq!(store.authorize("alice", 71, 1), Err(Rejection::LimitExceeded { attempted: 101, limit: 100 }));

        assert!(store.revoke(1).is_err());
        assert_eq!(store.current().unwrap().status, CredentialStatus::Revoked);

        // the backend still holds the last good write
        assert_eq!(backend.saved.lock().unwrap().as_ref().unwrap().total_spent, 0);
    }

    #[test]
    fn failed_create_publishes_nothing() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail.store(true, Ordering::SeqCst);
        let store = CredentialStore::with_backend(backend).unwrap();
        assert!(store.create(wl(), 100, 0).is_err());
        assert!(store.current().is_none());
    }

    #[test]
    fn status_is_idempotent() {
        let store = CredentialStore::new();
        store.create(wl(), 100, 0).unwrap();
        assert_eq!(store.status(50), store.status(50));
    }
}
