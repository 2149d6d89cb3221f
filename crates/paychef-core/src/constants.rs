// ============================================================================
// Payroll agent constants
// ============================================================================

// --- Session key ------------------------------------------------------------

/// Default lifetime of a freshly issued session key (30 days).
pub const SESSION_KEY_LIFETIME_SECS: u64 = 30 * 86_400;

// --- History ----------------------------------------------------------------

/// Number of run records retained by the history ledger. Oldest are evicted
/// first, by insertion order.
pub const MAX_HISTORY_RUNS: usize = 100;

// --- Token ------------------------------------------------------------------
// Amounts are carried in base units everywhere.
// 1 USDC = 1_000_000 micro-USDC.

/// Decimal places of the payout token (USDC on Solana).
pub const USDC_DECIMALS: u8 = 6;

/// Ticker shown in human-facing summaries.
pub const TOKEN_SYMBOL: &str = "USDC";
