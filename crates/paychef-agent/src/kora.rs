//! Kora paymaster client.
//!
//! Kora is a Solana paymaster node. Transfers are built with Kora's pubkey as
//! the fee payer and partially signed by the session key; Kora adds the fee
//! payer signature and broadcasts. The session key never needs SOL.
//!
//! JSON-RPC endpoint: POST <kora_url>
//! Methods used:
//!   getPayerSigner         - returns Kora's fee payer pubkey
//!   signAndSendTransaction - validates, signs as fee payer, broadcasts

use base64::Engine as _;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::Transaction};
use std::str::FromStr;

// ============================================================================
// JSON-RPC primitives
// ============================================================================

#[derive(Serialize)]
struct JsonRpcRequest<P: Serialize> {
    jsonrpc: &'static str,
    id:      u64,
    method:  &'static str,
    params:  P,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error:  Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code:    i64,
    message: String,
}

// ============================================================================
// Method-specific types
// ============================================================================

#[derive(Deserialize)]
struct GetPayerSignerResult {
    signer_address: String,
}

#[derive(Serialize)]
struct SignAndSendParams<'a> {
    transaction: &'a str,
    sig_verify:  bool,
}

#[derive(Deserialize)]
struct SignAndSendResult {
    /// Some Kora versions return the signature directly.
    #[serde(default)]
    signature:          Option<String>,
    /// Base64-encoded fully signed transaction.
    #[serde(default)]
    signed_transaction: Option<String>,
}

// ============================================================================
// KoraClient
// ============================================================================

pub struct KoraClient {
    url:  String,
    http: reqwest::Client,
}

impl KoraClient {
    pub fn new(url: &str) -> Self {
        Self {
            url:  url.to_owned(),
            http: reqwest::Client::new(),
        }
    }

    async fn call<P: Serialize, T: DeserializeOwned>(
        &self,
        id: u64,
        method: &'static str,
        params: P,
    ) -> anyhow::Result<T> {
        let req = JsonRpcRequest { jsonrpc: "2.0", id, method, params };

        let resp: JsonRpcResponse<T> = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Kora HTTP error: {e}"))?
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Kora response parse error: {e}"))?;

        resp.result.ok_or_else(|| {
            let msg = resp
                .error
                .map(|e| format!("code={} msg={}", e.code, e.message))
                .unwrap_or_else(|| "no result and no error".into());
            anyhow::anyhow!("Kora {method} failed: {msg}")
        })
    }

    /// Kora's fee payer pubkey. Every transfer must name it as payer.
    pub async fn get_fee_payer(&self) -> anyhow::Result<Pubkey> {
        let result: GetPayerSignerResult = self.call(1, "getPayerSigner", ()).await?;
        Pubkey::from_str(&result.signer_address)
            .map_err(|e| anyhow::anyhow!("Kora returned invalid pubkey: {e}"))
    }

    /// Submit a partially signed transaction for co-signing and broadcast.
    ///
    /// Returns the transaction signature so the caller can wait for
    /// confirmation; Kora itself does not confirm.
    pub async fn sign_and_send(&self, tx: &Transaction) -> anyhow::Result<Signature> {
        let tx_bytes = bincode::serialize(tx)
            .map_err(|e| anyhow::anyhow!("transaction serialize: {e}"))?;
        let tx_b64 = base64::engine::general_purpose::STANDARD.encode(&tx_bytes);

        let result: SignAndSendResult = self
            .call(
                2,
                "signAndSendTransaction",
                SignAndSendParams { transaction: &tx_b64, sig_verify: false },
            )
            .await?;
        signature_from_result(&result)
    }
}

fn signature_from_result(result: &SignAndSendResult) -> anyhow::Result<Signature> {
    if let Some(ref sig) = result.signature {
        return Signature::from_str(sig)
            .map_err(|e| anyhow::anyhow!("Kora returned invalid signature: {e}"));
    }
    let signed = result
        .signed_transaction
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Kora returned neither signature nor signed_transaction"))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(signed)
        .map_err(|e| anyhow::anyhow!("Kora signed_transaction base64: {e}"))?;
    let tx: Transaction = bincode::deserialize(&bytes)
        .map_err(|e| anyhow::anyhow!("Kora signed_transaction decode: {e}"))?;
    // Fee payer signs first; that signature identifies the transaction.
    tx.signatures
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("Kora signed_transaction has no signatures"))
}
