use clap::Parser;
use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use std::{net::SocketAddr, path::PathBuf, str::FromStr};

/// Devnet USDC mint (Circle faucet).
const DEVNET_USDC_MINT: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

#[derive(Parser, Debug)]
#[command(name = "paychef-agent", about = "Unattended USDC payroll agent driven by a session key")]
pub struct Config {
    /// HTTP API listen address.
    #[arg(long, env = "PAYCHEF_API_ADDR", default_value = "127.0.0.1:3001")]
    pub api_addr: SocketAddr,

    /// Bearer token required on mutating routes (create/revoke session key,
    /// run payroll, edit schedule).
    /// If absent, those routes are unauthenticated.
    #[arg(long, env = "PAYCHEF_API_SECRET", hide_env_values = true)]
    pub api_secret: Option<String>,

    /// Solana RPC endpoint for blockhashes, submission and confirmation.
    #[arg(long, env = "PAYCHEF_RPC_URL", default_value = "https://api.devnet.solana.com")]
    pub rpc_url: String,

    /// Kora paymaster URL for gasless transfers.
    /// Set to "none" to have the session key pay gas in SOL itself.
    #[arg(long, env = "PAYCHEF_KORA_URL", default_value = "none")]
    pub kora_url: String,

    /// USDC SPL token mint address (base58).
    #[arg(long, env = "PAYCHEF_USDC_MINT", default_value = DEVNET_USDC_MINT)]
    pub usdc_mint: String,

    /// Session key secret as printed by POST /session/create
    /// (base58, 64-byte keypair).
    /// Without it the agent starts but every transfer fails until the
    /// operator installs the key and restarts.
    #[arg(long, env = "PAYCHEF_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// SQLite database for the session key, run history and schedule.
    /// If absent, everything is in-memory and lost on restart.
    #[arg(long, env = "PAYCHEF_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// JSON payroll file: { "employees": [{ "name", "wallet_address", "usdc_amount" }] }.
    #[arg(long, env = "PAYCHEF_PAYROLL_PATH", default_value = "payroll.json")]
    pub payroll_path: PathBuf,

    /// Telegram bot token for run notifications.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat that receives run notifications.
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Block explorer base URL used for transaction links in notifications.
    #[arg(long, env = "PAYCHEF_EXPLORER_URL", default_value = "https://solscan.io")]
    pub explorer_url: String,
}

impl Config {
    /// Kora URL, or None when disabled.
    pub fn kora_url(&self) -> Option<&str> {
        let url = self.kora_url.trim();
        if url.is_empty() || url.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(url)
        }
    }

    pub fn rpc_url(&self) -> anyhow::Result<&str> {
        let url = self.rpc_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("invalid rpc_url '{url}': expected http(s) URL");
        }
        Ok(url)
    }

    pub fn usdc_mint_pubkey(&self) -> anyhow::Result<Pubkey> {
        Pubkey::from_str(self.usdc_mint.trim())
            .map_err(|e| anyhow::anyhow!("invalid usdc_mint: {e}"))
    }

    /// Parse the session key secret, if provided.
    ///
    /// Accepts the base58 64-byte keypair (secret || public) that
    /// `POST /session/create` returns, which is also the Solana CLI format.
    pub fn session_keypair(&self) -> anyhow::Result<Option<Keypair>> {
        match &self.session_secret {
            None => Ok(None),
            Some(s) => parse_keypair(s).map(Some),
        }
    }
}

pub fn parse_keypair(s: &str) -> anyhow::Result<Keypair> {
    let bytes = bs58::decode(s.trim())
        .into_vec()
        .map_err(|e| anyhow::anyhow!("invalid session_secret base58: {e}"))?;
    if bytes.len() != 64 {
        anyhow::bail!("session_secret must be a 64-byte keypair (got {} bytes)", bytes.len());
    }
    Keypair::try_from(bytes.as_slice())
        .map_err(|e| anyhow::anyhow!("invalid session_secret keypair: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Signer;

    fn base() -> Config {
        Config::parse_from(["paychef-agent"])
    }

    #[test]
    fn defaults_parse() {
        let cfg = base();
        assert_eq!(cfg.api_addr.port(), 3001);
        assert_eq!(cfg.kora_url(), None);
        assert!(cfg.rpc_url().is_ok());
        assert!(cfg.usdc_mint_pubkey().is_ok());
        assert!(cfg.session_keypair().unwrap().is_none());
    }

    #[test]
    fn kora_enabled_when_url_given() {
        let cfg = Config::parse_from(["paychef-agent", "--kora-url", "https://kora.example"]);
        assert_eq!(cfg.kora_url(), Some("https://kora.example"));
    }

    #[test]
    fn bad_rpc_and_mint_are_errors() {
        let cfg = Config::parse_from([
            "paychef-agent",
            "--rpc-url",
            "api.devnet.solana.com",
            "--usdc-mint",
            "not-a-key",
        ]);
        assert!(cfg.rpc_url().is_err());
        assert!(cfg.usdc_mint_pubkey().is_err());
    }

    #[test]
    fn session_secret_round_trips_issued_key() {
        let cred = paychef_core::DelegatedCredential::issue(["x"], 1, 0).unwrap();
        let kp = parse_keypair(&cred.secret).unwrap();
        assert_eq!(kp.pubkey().to_string(), cred.address);
    }

    #[test]
    fn malformed_session_secret_rejected() {
        assert!(parse_keypair("0OIl").is_err());
        assert!(parse_keypair(&bs58::encode([1u8; 32]).into_string()).is_err());
    }
}
