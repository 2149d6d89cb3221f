//! Authorization gate: decides whether a single transfer may proceed.

use crate::credential::{CredentialStatus, DelegatedCredential};
use crate::error::Rejection;

/// Check a proposed transfer against the session key rules.
///
/// Order: existence, explicit status, time expiry, whitelist, cumulative
/// limit. A revoked key reports `NotActive` even after it has also expired.
/// Never mutates the credential; committing spend is the caller's job once
/// the transfer has been confirmed.
pub fn authorize(
    credential: Option<&DelegatedCredential>,
    destination: &str,
    amount: u64,
    now: u64,
) -> Result<(), Rejection> {
    let cred = credential.ok_or(Rejection::NoCredential)?;

    if cred.status != CredentialStatus::Active {
        return Err(Rejection::NotActive { status: cred.status.to_string() });
    }

    if cred.is_expired(now) {
        return Err(Rejection::Expired);
    }

    if !cred.whitelist.contains(destination) {
        return Err(Rejection::NotWhitelisted { address: destination.to_string() });
    }

    match cred.total_spent.checked_add(amount) {
        Some(attempted) if attempted <= cred.spending_limit => Ok(()),
        Some(attempted) => Err(Rejection::LimitExceeded { attempted, limit: cred.spending_limit }),
        None => Err(Rejection::LimitExceeded { attempted: u64::MAX, limit: cred.spending_limit }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(limit: u64, spent: u64) -> DelegatedCredential {
        let mut cred = DelegatedCredential::issue(["alice", "bob"], limit, 1_000).unwrap();
        cred.total_spent = spent;
        cred
    }

    #[test]
    fn missing_credential_rejected() {
        assert_eq!(authorize(None, "alice", 1, 0), Err(Rejection::NoCredential));
    }

    #[test]
    fn whitelisted_within_limit_accepted() {
        let cred = credential(100, 60);
        assert_eq!(authorize(Some(&cred), "alice", 40, 2_000), Ok(()));
    }

    #[test]
    fn non_whitelisted_rejected_regardless_of_budget() {
        let cred = credential(u64::MAX, 0);
        for amount in [0, 1, 1_000_000] {
            assert_eq!(
                authorize(Some(&cred), "mallory", amount, 2_000),
                Err(Rejection::NotWhitelisted { address: "mallory".into() })
            );
        }
    }

    #[test]
    fn limit_exceeded_reports_attempt_and_limit() {
        let cred = credential(100, 90);
        assert_eq!(
            authorize(Some(&cred), "alice", 15, 2_000),
            Err(Rejection::LimitExceeded { attempted: 105, limit: 100 })
        );
        assert_eq!(cred.total_spent, 90);
    }

    #[test]
    fn overflowing_sum_is_limit_exceeded() {
        let cred = credential(100, 90);
        assert!(matches!(
            authorize(Some(&cred), "alice", u64::MAX, 2_000),
            Err(Rejection::LimitExceeded { .. })
        ));
    }

    #[test]
    fn revoked_reports_not_active_before_expiry() {
        let mut cred = credential(100, 0);
        cred.status = CredentialStatus::Revoked;
        assert_eq!(
            authorize(Some(&cred), "alice", 1, 2_000),
            Err(Rejection::NotActive { status: "revoked".into() })
        );
    }

    #[test]
    fn revoked_and_expired_reports_not_active() {
        let mut cred = credential(100, 0);
        cred.status = CredentialStatus::Revoked;
        let after_expiry = cred.expires_at + 1;
        assert!(matches!(
            authorize(Some(&cred), "alice", 1, after_expiry),
            Err(Rejection::NotActive { .. })
        ));
    }

    #[test]
    fn expired_active_key_reports_expired() {
        let cred = credential(100, 0);
        assert_eq!(authorize(Some(&cred), "alice", 1, cred.expires_at), Err(Rejection::Expired));
    }

    #[test]
    fn expiry_checked_before_whitelist() {
        let cred = credential(100, 0);
        assert_eq!(
            authorize(Some(&cred), "mallory", 1_000, cred.expires_at + 10),
            Err(Rejection::Expired)
        );
    }

    #[test]
    fn exact_limit_is_allowed() {
        let cred = credential(100, 60);
        assert_eq!(authorize(Some(&cred), "bob", 40, 2_000), Ok(()));
    }
}
