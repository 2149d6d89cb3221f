//! USDC transfer capability for the payroll executor.
//!
//! Each payout is one transaction holding two instructions:
//!   1. create the recipient's associated token account (idempotent)
//!   2. SPL `TransferChecked` from the session key's ATA
//!
//! Gas path:
//!   Kora present  -> fee_payer = Kora, owner = session key (partial sign), Kora broadcasts
//!   Kora absent   -> fee_payer = owner = session key, direct RPC submission (requires SOL)
//!
//! Either way `submit` only returns once the signature is confirmed.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use solana_rpc_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{AccountMeta, Instruction},
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_program,
    transaction::Transaction,
};

use paychef_core::{CredentialStore, TransferCapability, TransferError, USDC_DECIMALS};

use crate::kora::KoraClient;

// ============================================================================
// Programs
// ============================================================================

pub const SPL_TOKEN_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// SPL Token `TransferChecked` instruction tag.
const IX_TRANSFER_CHECKED: u8 = 12;
/// Associated Token Account `CreateIdempotent` instruction tag.
const IX_CREATE_IDEMPOTENT: u8 = 1;

/// How long to wait for a submitted transfer to confirm.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);
const CONFIRM_POLL: Duration = Duration::from_millis(500);

/// Derive the Associated Token Address for (wallet, mint).
///
/// ATA derivation: find_program_address(
///   &[wallet, token_program, mint],
///   &associated_token_program
/// )
pub fn get_ata(wallet: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[wallet.as_ref(), SPL_TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .0
}

// ============================================================================
// Instruction builders
// ============================================================================

/// Create `wallet`'s ATA for `mint` if it does not already exist.
///
/// Accounts: [payer (s,w), ata (w), wallet, mint, system_program, token_program]
pub fn build_create_ata_idempotent_ix(payer: &Pubkey, wallet: &Pubkey, mint: &Pubkey) -> Instruction {
    let ata = get_ata(wallet, mint);
    Instruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts:   vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*wallet, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(system_program::ID, false),
            AccountMeta::new_readonly(SPL_TOKEN_PROGRAM_ID, false),
        ],
        data:       vec![IX_CREATE_IDEMPOTENT],
    }
}

/// SPL Token `TransferChecked`.
///
/// Accounts: [source (w), mint, destination (w), owner (s)]
/// Data:     [12, amount u64 LE, decimals u8]
pub fn build_transfer_checked_ix(
    source: &Pubkey,
    mint: &Pubkey,
    destination: &Pubkey,
    owner: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Instruction {
    let mut data = Vec::with_capacity(10);
    data.push(IX_TRANSFER_CHECKED);
    data.extend_from_slice(&amount.to_le_bytes());
    data.push(decimals);

    Instruction {
        program_id: SPL_TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*source, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(*owner, true),
        ],
        data,
    }
}

/// Both instructions for paying `amount` of `mint` from `owner` to `recipient`.
pub fn build_payout_ixs(
    fee_payer: &Pubkey,
    owner: &Pubkey,
    recipient: &Pubkey,
    mint: &Pubkey,
    amount: u64,
) -> Vec<Instruction> {
    vec![
        build_create_ata_idempotent_ix(fee_payer, recipient, mint),
        build_transfer_checked_ix(
            &get_ata(owner, mint),
            mint,
            &get_ata(recipient, mint),
            owner,
            amount,
            USDC_DECIMALS,
        ),
    ]
}

// ============================================================================
// SolanaTransfer
// ============================================================================

pub struct SolanaTransfer {
    rpc:         RpcClient,
    kora:        Option<KoraClient>,
    signer:      Keypair,
    mint:        Pubkey,
    /// Transfers are refused unless `signer` is the stored session key.
    credentials: CredentialStore,
}

impl SolanaTransfer {
    pub fn new(
        rpc_url: &str,
        kora: Option<KoraClient>,
        signer: Keypair,
        mint: Pubkey,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed()),
            kora,
            signer,
            mint,
            credentials,
        }
    }

    /// Session key address this capability signs with.
    pub fn signer_address(&self) -> String {
        self.signer.pubkey().to_string()
    }

    /// USDC balance of the session key's token account, as a decimal string.
    pub async fn balance(&self) -> anyhow::Result<String> {
        let ata = get_ata(&self.signer.pubkey(), &self.mint);
        match self.rpc.get_token_account_balance(&ata).await {
            Ok(amount) => Ok(amount.ui_amount_string),
            // No ATA yet means nothing was ever funded.
            Err(e) if e.to_string().contains("could not find account") => Ok("0".into()),
            Err(e) => Err(anyhow::anyhow!("token balance query failed: {e}")),
        }
    }

    async fn send(&self, recipient: &Pubkey, amount: u64) -> Result<Signature, TransferError> {
        let owner = self.signer.pubkey();
        let recent_blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| TransferError::Submission(format!("blockhash: {e}")))?;

        let sig = if let Some(ref kora) = self.kora {
            // ── Kora path ────────────────────────────────────────────────────
            let fee_payer = kora
                .get_fee_payer()
                .await
                .map_err(|e| TransferError::Submission(e.to_string()))?;
            let ixs = build_payout_ixs(&fee_payer, &owner, recipient, &self.mint, amount);
            let message = Message::new_with_blockhash(&ixs, Some(&fee_payer), &recent_blockhash);
            let mut tx = Transaction {
                signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
                message,
            };
            tx.try_partial_sign(&[&self.signer], recent_blockhash)
                .map_err(|e| TransferError::Submission(format!("sign: {e}")))?;
            kora.sign_and_send(&tx)
                .await
                .map_err(|e| TransferError::Submission(e.to_string()))?
        } else {
            // ── Direct path ──────────────────────────────────────────────────
            let ixs = build_payout_ixs(&owner, &owner, recipient, &self.mint, amount);
            let tx = Transaction::new_signed_with_payer(
                &ixs,
                Some(&owner),
                &[&self.signer],
                recent_blockhash,
            );
            self.rpc
                .send_transaction(&tx)
                .await
                .map_err(|e| TransferError::Submission(e.to_string()))?
        };

        self.confirm(&sig).await?;
        Ok(sig)
    }

    async fn confirm(&self, sig: &Signature) -> Result<(), TransferError> {
        let deadline = tokio::time::Instant::now() + CONFIRM_TIMEOUT;
        loop {
            match self.rpc.get_signature_status(sig).await {
                Ok(Some(Ok(()))) => return Ok(()),
                Ok(Some(Err(e))) => return Err(TransferError::Confirmation(format!("{sig}: {e}"))),
                Ok(None) => {}
                Err(e) => tracing::debug!(%sig, "Signature status query failed: {e}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(TransferError::Confirmation(format!(
                    "{sig} not confirmed within {}s",
                    CONFIRM_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(CONFIRM_POLL).await;
        }
    }
}

#[async_trait]
impl TransferCapability for SolanaTransfer {
    async fn submit(&self, destination: &str, amount: u64) -> Result<String, TransferError> {
        check_signer(&self.signer_address(), self.credentials.current().map(|c| c.address))?;
        let recipient = Pubkey::from_str(destination)
            .map_err(|e| TransferError::Submission(format!("invalid destination {destination}: {e}")))?;
        let sig = self.send(&recipient, amount).await?;
        tracing::info!(
            tx     = %sig,
            to     = %destination,
            amount,
            gasless = self.kora.is_some(),
            "USDC transfer confirmed",
        );
        Ok(sig.to_string())
    }
}

/// The configured signer must be the session key the gate just authorized;
/// after a key rotation the old secret keeps signing until restart.
fn check_signer(signer: &str, session_key: Option<String>) -> Result<(), TransferError> {
    match session_key {
        Some(ref key) if key == signer => Ok(()),
        Some(key) => Err(TransferError::Submission(format!(
            "configured signer {signer} is not the current session key {key}; restart with its secret"
        ))),
        None => Err(TransferError::SignerUnavailable),
    }
}

/// Stand-in used when no session secret was configured.
pub struct UnconfiguredTransfer;

#[async_trait]
impl TransferCapability for UnconfiguredTransfer {
    async fn submit(&self, _destination: &str, _amount: u64) -> Result<String, TransferError> {
        Err(TransferError::SignerUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ata_is_deterministic_and_per_wallet() {
        let mint = Pubkey::new_unique();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        assert_eq!(get_ata(&a, &mint), get_ata(&a, &mint));
        assert_ne!(get_ata(&a, &mint), get_ata(&b, &mint));
    }

    #[test]
    fn transfer_checked_layout() {
        let (src, mint, dst, owner) =
            (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let ix = build_transfer_checked_ix(&src, &mint, &dst, &owner, 40_500_000, 6);

        assert_eq!(ix.program_id, SPL_TOKEN_PROGRAM_ID);
        assert_eq!(ix.data[0], 12);
        assert_eq!(u64::from_le_bytes(ix.data[1..9].try_into().unwrap()), 40_500_000);
        assert_eq!(ix.data[9], 6);
        assert_eq!(ix.data.len(), 10);

        let keys: Vec<_> = ix.accounts.iter().map(|m| m.pubkey).collect();
        assert_eq!(keys, [src, mint, dst, owner]);
        assert!(ix.accounts[3].is_signer);
        assert!(ix.accounts[0].is_writable && ix.accounts[2].is_writable);
        assert!(!ix.accounts[1].is_writable);
    }

    #[test]
    fn create_ata_layout() {
        let (payer, wallet, mint) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let ix = build_create_ata_idempotent_ix(&payer, &wallet, &mint);

        assert_eq!(ix.program_id, ASSOCIATED_TOKEN_PROGRAM_ID);
        assert_eq!(ix.data, vec![1]);
        assert_eq!(ix.accounts.len(), 6);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[1].pubkey, get_ata(&wallet, &mint));
        assert_eq!(ix.accounts[4].pubkey, system_program::ID);
    }

    #[test]
    fn kora_pays_fees_but_session_key_authorizes() {
        let (kora, owner, recipient, mint) =
            (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        let ixs = build_payout_ixs(&kora, &owner, &recipient, &mint, 1);
        let message = Message::new(&ixs, Some(&kora));

        assert_eq!(message.account_keys[0], kora);
        assert_eq!(message.header.num_required_signatures, 2);
        assert!(message.account_keys[..2].contains(&owner));
    }

    #[test]
    fn signer_must_match_session_key() {
        assert!(check_signer("abc", Some("abc".into())).is_ok());
        assert!(matches!(
            check_signer("abc", Some("xyz".into())),
            Err(TransferError::Submission(m)) if m.contains("xyz")
        ));
        assert_eq!(check_signer("abc", None), Err(TransferError::SignerUnavailable));
    }

    #[tokio::test]
    async fn unconfigured_transfer_refuses() {
        let err = UnconfiguredTransfer.submit("anything", 1).await.unwrap_err();
        assert_eq!(err, TransferError::SignerUnavailable);
    }
}
