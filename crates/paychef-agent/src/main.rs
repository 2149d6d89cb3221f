mod api;
mod config;
mod db;
mod kora;
mod payroll;
mod schedule;
mod telegram;
mod transfer;

use std::sync::Arc;

use clap::Parser;
use paychef_core::{CredentialStore, PayrollExecutor, RunHistory, TransferCapability};

use api::AppState;
use config::Config;
use db::Db;
use kora::KoraClient;
use payroll::FilePayeeSource;
use telegram::TelegramSink;
use transfer::{SolanaTransfer, UnconfiguredTransfer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("paychef_agent=info,paychef_core=info")),
        )
        .init();

    let config = Config::parse();

    if config.api_secret.is_none() {
        tracing::warn!(
            "No --api-secret set. Session key and payroll routes are unauthenticated. \
             Set PAYCHEF_API_SECRET in production."
        );
    }

    let db = Arc::new(match config.db_path {
        Some(ref path) => {
            let db = Db::open(path)?;
            tracing::info!("Using database {}", path.display());
            db
        }
        None => {
            tracing::warn!(
                "No --db-path set. Session key, run history and schedule are in-memory \
                 only and will be lost on restart. Set PAYCHEF_DB_PATH in production."
            );
            Db::open_in_memory()?
        }
    });

    let credentials = CredentialStore::with_backend(db.clone())?;
    let history = RunHistory::with_backend(db.clone())?;

    // ── Transfer capability ──────────────────────────────────────────────────
    let rpc_url = config.rpc_url()?;
    let mint = config.usdc_mint_pubkey()?;
    let wallet = match config.session_keypair()? {
        Some(signer) => {
            let kora = config.kora_url().map(|url| {
                tracing::info!("Kora paymaster enabled: {url} (gasless transfers)");
                KoraClient::new(url)
            });
            if kora.is_none() {
                tracing::info!("Kora disabled; the session key pays its own gas in SOL");
            }
            let wallet = SolanaTransfer::new(rpc_url, kora, signer, mint, credentials.clone());
            match credentials.current() {
                Some(ref cred) if cred.address != wallet.signer_address() => tracing::warn!(
                    signer      = %wallet.signer_address(),
                    session_key = %cred.address,
                    "Configured signer is not the stored session key; transfers will be refused",
                ),
                None => tracing::warn!("Signer configured but no session key stored yet"),
                _ => tracing::info!(signer = %wallet.signer_address(), "Transfer signer ready"),
            }
            Some(Arc::new(wallet))
        }
        None => {
            tracing::warn!(
                "No --session-secret set. Every transfer will fail until the agent is \
                 restarted with PAYCHEF_SESSION_SECRET."
            );
            None
        }
    };
    let transfer: Arc<dyn TransferCapability> = match wallet {
        Some(ref w) => w.clone() as Arc<dyn TransferCapability>,
        None => Arc::new(UnconfiguredTransfer),
    };

    let executor = PayrollExecutor::new(credentials, history, transfer);
    let notifier = Arc::new(TelegramSink::new(config.telegram_bot_token, config.telegram_chat_id));
    let payroll = FilePayeeSource::new(config.payroll_path);
    tracing::info!("Payroll file: {}", payroll.path().display());

    let state = AppState::new(
        executor,
        payroll,
        notifier,
        db,
        wallet,
        config.api_secret,
        Some(config.explorer_url),
    );

    schedule::spawn(state.clone());
    api::serve(state, config.api_addr).await
}
