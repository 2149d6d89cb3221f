//! Delegated session credential and its rule set.

use std::collections::BTreeSet;
use std::fmt;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::constants::SESSION_KEY_LIFETIME_SECS;
use crate::error::PayrollError;

/// Stored lifecycle state. Expiry is derived from `expires_at`, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    Revoked,
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialStatus::Active => f.write_str("active"),
            CredentialStatus::Revoked => f.write_str("revoked"),
        }
    }
}

/// The single session key the agent may spend with, plus its rules.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedCredential {
    /// Base58 Ed25519 public key.
    pub address: String,
    /// Base58 64-byte keypair (secret || public).
    pub secret: String,
    pub whitelist: BTreeSet<String>,
    pub spending_limit: u64,
    pub total_spent: u64,
    pub created_at: u64,
    pub expires_at: u64,
    pub status: CredentialStatus,
    #[serde(default)]
    pub revoked_at: Option<u64>,
}

// The secret never appears in logs.
impl fmt::Debug for DelegatedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedCredential")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .field("whitelist", &self.whitelist)
            .field("spending_limit", &self.spending_limit)
            .field("total_spent", &self.total_spent)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("status", &self.status)
            .field("revoked_at", &self.revoked_at)
            .finish()
    }
}

/// Returned exactly once, when a credential is created.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    pub address: String,
    pub secret: String,
    pub expires_at: u64,
}

/// Read-only view for status queries. Carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CredentialStatusView {
    Present {
        exists: bool,
        address: String,
        status: CredentialStatus,
        is_expired: bool,
        created_at: u64,
        expires_at: u64,
        spending_limit: u64,
        total_spent: u64,
        remaining: u64,
        whitelist_count: usize,
    },
    Missing {
        exists: bool,
    },
}

impl DelegatedCredential {
    /// Generate a fresh Ed25519 session key bound to `whitelist` and
    /// `spending_limit`, valid for [`SESSION_KEY_LIFETIME_SECS`] from `now`.
    pub fn issue<I, S>(whitelist: I, spending_limit: u64, now: u64) -> Result<Self, PayrollError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let whitelist: BTreeSet<String> = whitelist
            .into_iter()
            .map(Into::into)
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if whitelist.is_empty() {
            return Err(PayrollError::InvalidRules("whitelist is empty".into()));
        }
        if spending_limit == 0 {
            return Err(PayrollError::InvalidRules("spending limit must be positive".into()));
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        let mut keypair = [0u8; 64];
        keypair[..32].copy_from_slice(&signing_key.to_bytes());
        keypair[32..].copy_from_slice(&verifying_key.to_bytes());

        Ok(Self {
            address: bs58::encode(verifying_key.to_bytes()).into_string(),
            secret: bs58::encode(keypair).into_string(),
            whitelist,
            spending_limit,
            total_spent: 0,
            created_at: now,
            expires_at: now.saturating_add(SESSION_KEY_LIFETIME_SECS),
            status: CredentialStatus::Active,
            revoked_at: None,
        })
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn remaining(&self) -> u64 {
        self.spending_limit.saturating_sub(self.total_spent)
    }

    pub fn issued(&self) -> IssuedCredential {
        IssuedCredential {
            address: self.address.clone(),
            secret: self.secret.clone(),
            expires_at: self.expires_at,
        }
    }

    pub fn status_view(&self, now: u64) -> CredentialStatusView {
        CredentialStatusView::Present {
            exists: true,
            address: self.address.clone(),
            status: self.status,
            is_expired: self.is_expired(now),
            created_at: self.created_at,
            expires_at: self.expires_at,
            spending_limit: self.spending_limit,
            total_spent: self.total_spent,
            remaining: self.remaining(),
            whitelist_count: self.whitelist.len(),
        }
    }
}

impl CredentialStatusView {
    pub fn missing() -> Self {
        CredentialStatusView::Missing { exists: false }
    }
}
