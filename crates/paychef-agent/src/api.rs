//! HTTP API for operating the payroll agent.
//!
//! Routes:
//!   GET    /health
//!   POST   /session/create       (auth) issue a new session key
//!   GET    /session/status
//!   GET    /session/balance
//!   POST   /session/revoke       (auth)
//!   GET    /payroll/current
//!   POST   /payroll/run          (auth) run now, notify, return the record
//!   GET    /history
//!   GET    /history/{run_id}
//!   GET    /schedule
//!   POST   /schedule             (auth)
//!   DELETE /schedule             (auth)
//!
//! "(auth)" routes require `Authorization: Bearer <api_secret>` when an API
//! secret is configured.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;

use paychef_core::{
    amount::format_units, executor::unix_secs, notify::notify_run, NotificationSink,
    PayrollError, PayrollExecutor, RunRecord, USDC_DECIMALS,
};

use crate::{
    db::Db,
    payroll::{DecimalAmount, FilePayeeSource},
    schedule::ScheduleConfig,
    transfer::SolanaTransfer,
};

type ApiResponse = (StatusCode, Json<Value>);

// ============================================================================
// Shared state
// ============================================================================

struct AppInner {
    executor:     PayrollExecutor,
    payroll:      FilePayeeSource,
    notifier:     Arc<dyn NotificationSink>,
    db:           Arc<Db>,
    /// None when no session secret was configured.
    wallet:       Option<Arc<SolanaTransfer>>,
    /// Optional bearer token guarding mutating routes.
    api_secret:   Option<String>,
    explorer_url: Option<String>,
}

/// Cheaply cloneable shared state passed to all axum handlers and the
/// scheduler.
#[derive(Clone)]
pub struct AppState(Arc<AppInner>);

impl AppState {
    pub fn new(
        executor: PayrollExecutor,
        payroll: FilePayeeSource,
        notifier: Arc<dyn NotificationSink>,
        db: Arc<Db>,
        wallet: Option<Arc<SolanaTransfer>>,
        api_secret: Option<String>,
        explorer_url: Option<String>,
    ) -> Self {
        Self(Arc::new(AppInner {
            executor,
            payroll,
            notifier,
            db,
            wallet,
            api_secret,
            explorer_url,
        }))
    }

    pub fn db(&self) -> &Db {
        &self.0.db
    }

    pub fn executor(&self) -> &PayrollExecutor {
        &self.0.executor
    }

    /// Execute the current payroll and send the summary notification.
    pub async fn run_payroll(&self) -> Result<RunRecord, PayrollError> {
        let record = self.0.executor.execute_from(&self.0.payroll).await?;
        notify_run(self.0.notifier.as_ref(), &record, self.0.explorer_url.as_deref()).await;
        Ok(record)
    }

    fn check_auth(&self, headers: &HeaderMap) -> Result<(), ApiResponse> {
        let Some(ref secret) = self.0.api_secret else {
            return Ok(());
        };
        let expected = format!("Bearer {secret}");
        let provided = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if ct_eq(provided, &expected) {
            Ok(())
        } else {
            Err((StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))))
        }
    }
}

// ============================================================================
// Server
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health",            get(health))
        .route("/session/create",    post(create_session))
        .route("/session/status",    get(session_status))
        .route("/session/balance",   get(session_balance))
        .route("/session/revoke",    post(revoke_session))
        .route("/payroll/current",   get(current_payroll))
        .route("/payroll/run",       post(run_payroll))
        .route("/history",           get(list_history))
        .route("/history/{run_id}",  get(get_run))
        .route("/schedule",          get(get_schedule).post(set_schedule).delete(disable_schedule))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("API listener bind failed on {addr}: {e}"))?;

    tracing::info!("API listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("API server error: {e}"))
}

fn error_response(e: &PayrollError) -> ApiResponse {
    let status = match e {
        PayrollError::NoPayrollData | PayrollError::InvalidRules(_) => StatusCode::BAD_REQUEST,
        PayrollError::CredentialNotFound | PayrollError::RunNotFound(_) => StatusCode::NOT_FOUND,
        PayrollError::RunInProgress => StatusCode::CONFLICT,
        PayrollError::SpendNotCommitted(_) | PayrollError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "success": false, "error": e.to_string() })))
}

fn bad_request(msg: impl Into<String>) -> ApiResponse {
    (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "error": msg.into() })))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> ApiResponse {
    let session = state.executor().credentials().current();
    (
        StatusCode::OK,
        Json(json!({
            "status":      "ok",
            "timestamp":   unix_secs(),
            "session_key": session.map(|c| c.address),
            "signer":      state.0.wallet.as_ref().map(|w| w.signer_address()),
            "running":     state.executor().is_running(),
            "last_run":    state.executor().history().latest_id(),
        })),
    )
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    /// Defaults to every address in the current payroll.
    whitelist:      Option<Vec<String>>,
    /// Decimal USDC. Defaults to the current payroll total.
    spending_limit: Option<DecimalAmount>,
}

async fn create_session(
    State(state): State<AppState>,
    headers:      HeaderMap,
    body:         Bytes,
) -> ApiResponse {
    if let Err(resp) = state.check_auth(&headers) {
        return resp;
    }

    let req: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => return bad_request(format!("invalid request body: {e}")),
        }
    };

    // Fill gaps from the payroll file.
    let payroll = if req.whitelist.is_none() || req.spending_limit.is_none() {
        match state.0.payroll.load().await {
            Ok(Some(p)) if !p.employees.is_empty() => Some(p),
            Ok(_) => return error_response(&PayrollError::NoPayrollData),
            Err(e) => return bad_request(e.to_string()),
        }
    } else {
        None
    };

    let whitelist = match (req.whitelist, &payroll) {
        (Some(w), _) => w,
        (None, Some(p)) => p.addresses(),
        (None, None) => return error_response(&PayrollError::NoPayrollData),
    };
    if let Some(bad) = whitelist.iter().find(|a| Pubkey::from_str(a.trim()).is_err()) {
        return error_response(&PayrollError::InvalidRules(format!("invalid address: {bad}")));
    }

    let spending_limit = match (req.spending_limit, &payroll) {
        (Some(limit), _) => match limit.to_units() {
            Ok(v) => v,
            Err(e) => return error_response(&PayrollError::InvalidRules(e.to_string())),
        },
        (None, Some(p)) => p.total,
        (None, None) => return error_response(&PayrollError::NoPayrollData),
    };

    let credentials = state.executor().credentials();
    match credentials.create(whitelist, spending_limit, unix_secs()) {
        Ok(issued) => {
            // As stored: trimmed and deduplicated.
            let bound: Vec<String> = credentials
                .current()
                .filter(|c| c.address == issued.address)
                .map(|c| c.whitelist.into_iter().collect())
                .unwrap_or_default();
            tracing::warn!(
                address = %issued.address,
                "Session key secret returned to caller; it is not shown again",
            );
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "Session key created",
                    "session_key": {
                        "address":             issued.address,
                        "expires_at":          issued.expires_at,
                        "whitelist_count":     bound.len(),
                        "whitelist":           bound,
                        "spending_limit":      spending_limit,
                        "spending_limit_usdc": format_units(spending_limit, USDC_DECIMALS),
                    },
                    "secret": issued.secret,
                    "instructions": format!(
                        "Fund {} with USDC, then restart the agent with PAYCHEF_SESSION_SECRET set to the secret above.",
                        issued.address
                    ),
                })),
            )
        }
        Err(e) => error_response(&e),
    }
}

async fn session_status(State(state): State<AppState>) -> ApiResponse {
    let view = state.executor().credentials().status(unix_secs());
    (StatusCode::OK, Json(serde_json::to_value(view).unwrap_or_default()))
}

async fn session_balance(State(state): State<AppState>) -> ApiResponse {
    let Some(ref wallet) = state.0.wallet else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": "transfer signer not configured" })),
        );
    };
    match wallet.balance().await {
        Ok(balance) => (
            StatusCode::OK,
            Json(json!({ "success": true, "address": wallet.signer_address(), "usdc": balance })),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

async fn revoke_session(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    if let Err(resp) = state.check_auth(&headers) {
        return resp;
    }
    match state.executor().credentials().revoke(unix_secs()) {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true, "message": "Session key revoked" }))),
        Err(e) => error_response(&e),
    }
}

async fn current_payroll(State(state): State<AppState>) -> ApiResponse {
    match state.0.payroll.load().await {
        Ok(Some(payroll)) => (
            StatusCode::OK,
            Json(json!({ "success": true, "payroll": payroll })),
        ),
        Ok(None) => error_response(&PayrollError::NoPayrollData),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn run_payroll(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    if let Err(resp) = state.check_auth(&headers) {
        return resp;
    }
    match state.run_payroll().await {
        Ok(record) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("Payroll executed: {}/{} paid", record.paid_count(), record.total_payees),
                "results": record,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

async fn list_history(State(state): State<AppState>) -> ApiResponse {
    let history = state.executor().history().all();
    (
        StatusCode::OK,
        Json(json!({ "success": true, "count": history.len(), "history": history })),
    )
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> ApiResponse {
    match state.executor().history().get(&run_id) {
        Ok(record) => (StatusCode::OK, Json(json!({ "success": true, "run": record }))),
        Err(e) => error_response(&e),
    }
}

async fn get_schedule(State(state): State<AppState>) -> ApiResponse {
    match state.db().load_schedule() {
        Ok(schedule) => {
            let cron = schedule.as_ref().map(ScheduleConfig::cron_expression);
            (
                StatusCode::OK,
                Json(json!({ "success": true, "schedule": schedule, "cron_expression": cron })),
            )
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct SetScheduleRequest {
    day_of_month: u32,
    hour:         u32,
    #[serde(default)]
    minute:       u32,
}

async fn set_schedule(
    State(state): State<AppState>,
    headers:      HeaderMap,
    body:         Bytes,
) -> ApiResponse {
    if let Err(resp) = state.check_auth(&headers) {
        return resp;
    }
    let req: SetScheduleRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("invalid request body: {e}")),
    };
    let schedule = match ScheduleConfig::new(req.day_of_month, req.hour, req.minute, unix_secs()) {
        Ok(s) => s,
        Err(e) => return bad_request(e.to_string()),
    };
    if let Err(e) = state.db().save_schedule(&schedule) {
        return error_response(&e);
    }
    tracing::info!(
        cron = %schedule.cron_expression(),
        "Scheduler configured: day {} at {:02}:{:02} UTC",
        schedule.day_of_month, schedule.hour, schedule.minute,
    );
    (
        StatusCode::OK,
        Json(json!({
            "success":         true,
            "schedule":        schedule,
            "cron_expression": schedule.cron_expression(),
        })),
    )
}

async fn disable_schedule(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    if let Err(resp) = state.check_auth(&headers) {
        return resp;
    }
    let mut schedule = match state.db().load_schedule() {
        Ok(Some(s)) => s,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "success": false, "error": "no schedule configured" })),
            )
        }
        Err(e) => return error_response(&e),
    };
    schedule.enabled = false;
    if let Err(e) = state.db().save_schedule(&schedule) {
        return error_response(&e);
    }
    tracing::info!("Scheduler disabled");
    (StatusCode::OK, Json(json!({ "success": true, "schedule": schedule })))
}

/// Constant-time string comparison for bearer tokens.
fn ct_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let len = a.len().max(b.len());
    let mut diff = a.len() ^ b.len();
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= (x ^ y) as usize;
    }
    diff == 0
}
