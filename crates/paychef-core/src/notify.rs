//! Human-readable run summaries.

use std::fmt::Write as _;

use crate::amount::format_units;
use crate::constants::{TOKEN_SYMBOL, USDC_DECIMALS};
use crate::executor::NotificationSink;
use crate::run::RunRecord;

/// Render `record` as a Markdown summary.
///
/// When `explorer_url` is set each transfer reference becomes a link to
/// `<explorer_url>/tx/<ref>`. Pure and deterministic.
pub fn format_run_summary(record: &RunRecord, explorer_url: Option<&str>) -> String {
    let mut msg = String::new();
    let _ = writeln!(msg, "*Payroll Complete*");
    let _ = writeln!(msg);
    let _ = writeln!(msg, "Paid: {}/{}", record.paid_count(), record.total_payees);
    let _ = writeln!(
        msg,
        "Total: {} {TOKEN_SYMBOL}",
        format_units(record.total_transferred, USDC_DECIMALS)
    );
    if !record.failed.is_empty() {
        let _ = writeln!(msg, "Failed: {}", record.failed_count());
    }

    if !record.successful.is_empty() {
        let _ = writeln!(msg);
        let _ = writeln!(msg, "*Successful Transactions:*");
        for (idx, p) in record.successful.iter().enumerate() {
            let _ = writeln!(
                msg,
                "{}. {}: {} {TOKEN_SYMBOL}",
                idx + 1,
                escape_markdown(&p.name),
                format_units(p.amount, USDC_DECIMALS)
            );
            match explorer_url {
                Some(base) => {
                    let base = base.trim_end_matches('/');
                    let _ = writeln!(msg, "   [View Tx]({base}/tx/{})", p.transfer_ref);
                }
                None => {
                    let _ = writeln!(msg, "   Tx: {}", p.transfer_ref);
                }
            }
        }
    }

    if !record.failed.is_empty() {
        let _ = writeln!(msg);
        let _ = writeln!(msg, "*Failed Transactions:*");
        for (idx, f) in record.failed.iter().enumerate() {
            let _ = writeln!(
                msg,
                "{}. {}: {}",
                idx + 1,
                escape_markdown(&f.name),
                escape_markdown(&f.reason)
            );
        }
    }

    msg
}

/// Backslash-escape the characters legacy Markdown treats as entity markers.
fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Format `record` and hand it to `sink`. Delivery failures are logged and
/// swallowed; a run never fails because nobody was told about it.
pub async fn notify_run(sink: &dyn NotificationSink, record: &RunRecord, explorer_url: Option<&str>) {
    let message = format_run_summary(record, explorer_url);
    if let Err(e) = sink.deliver(&message).await {
        tracing::warn!(run_id = %record.run_id, "Run notification not delivered: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{FailedPayout, PaidPayout};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn sample() -> RunRecord {
        RunRecord {
            run_id:            "1700000000000".into(),
            timestamp:         1_700_000_000,
            total_payees:      3,
            successful:        vec![
                PaidPayout {
                    name:         "Alice".into(),
                    address:      "alice".into(),
                    amount:       40_000_000,
                    transfer_ref: "5xSig".into(),
                },
                PaidPayout {
                    name:         "Bob".into(),
                    address:      "bob".into(),
                    amount:       40_500_000,
                    transfer_ref: "6ySig".into(),
                },
            ],
            failed:            vec![FailedPayout {
                name:    "Carol".into(),
                address: "carol".into(),
                amount:  40_000_000,
                reason:  "spending limit exceeded: 120500000 > 100000000".into(),
            }],
            total_requested:   120_500_000,
            total_transferred: 80_500_000,
        }
    }

    #[test]
    fn summary_with_explorer_links() {
        let text = format_run_summary(&sample(), Some("https://explorer.solana.com/"));
        let expected = "\
*Payroll Complete*

Paid: 2/3
Total: 80.50 USDC
Failed: 1

*Successful Transactions:*
1. Alice: 40.00 USDC
   [View Tx](https://explorer.solana.com/tx/5xSig)
2. Bob: 40.50 USDC
   [View Tx](https://explorer.solana.com/tx/6ySig)

*Failed Transactions:*
1. Carol: spending limit exceeded: 120500000 > 100000000
";
        assert_eq!(text, expected);
    }

    #[test]
    fn summary_without_failures_or_explorer() {
        let mut record = sample();
        record.failed.clear();
        record.total_payees = 2;
        let text = format_run_summary(&record, None);
        assert!(text.contains("Paid: 2/2"));
        assert!(text.contains("   Tx: 5xSig"));
        assert!(!text.contains("Failed"));
    }

    #[test]
    fn summary_is_deterministic() {
        let r = sample();
        assert_eq!(format_run_summary(&r, None), format_run_summary(&r, None));
    }

    #[test]
    fn payee_text_is_escaped() {
        let mut record = sample();
        record.successful[0].name = "jo_doe *lead*".into();
        record.failed[0].name = "[ops]".into();
        record.failed[0].reason = "address `x` not in whitelist".into();

        let text = format_run_summary(&record, None);
        assert!(text.contains("1. jo\\_doe \\*lead\\*: 40.00 USDC"));
        assert!(text.contains("1. \\[ops]: address \\`x\\` not in whitelist"));
        // the summary's own formatting is untouched
        assert!(text.starts_with("*Payroll Complete*"));
    }

    struct BrokenSink(Mutex<u32>);

    #[async_trait]
    impl NotificationSink for BrokenSink {
        async fn deliver(&self, _message: &str) -> Result<(), String> {
            *self.0.lock().unwrap() += 1;
            Err("chat not found".into())
        }
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let sink = BrokenSink(Mutex::new(0));
        notify_run(&sink, &sample(), None).await;
        assert_eq!(*sink.0.lock().unwrap(), 1);
    }
}
