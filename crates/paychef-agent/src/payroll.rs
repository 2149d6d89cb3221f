//! Payroll file loader.
//!
//! The payroll lives in a JSON file the operator edits by hand:
//!
//! ```text
//! { "employees": [
//!     { "name": "Alice", "wallet_address": "<base58>", "usdc_amount": "40.00" }
//! ] }
//! ```
//!
//! `usdc_amount` may be a JSON string or number. The file is re-read on
//! every run so edits take effect without a restart.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use paychef_core::{
    amount::{format_units, parse_units},
    PayeeSource, PayoutIntent, USDC_DECIMALS,
};

/// Decimal USDC amount as written by a human: `"12.5"` or `12.5`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DecimalAmount {
    Text(String),
    Number(serde_json::Number),
}

impl DecimalAmount {
    /// Convert to USDC base units.
    pub fn to_units(&self) -> Result<u64, paychef_core::error::AmountError> {
        match self {
            DecimalAmount::Text(s) => parse_units(s, USDC_DECIMALS),
            DecimalAmount::Number(n) => parse_units(&n.to_string(), USDC_DECIMALS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PayrollFile {
    employees: Vec<EmployeeRow>,
}

#[derive(Debug, Deserialize)]
struct EmployeeRow {
    name:           String,
    wallet_address: String,
    usdc_amount:    DecimalAmount,
}

/// Parsed payroll, in file order.
#[derive(Debug, Clone, Serialize)]
pub struct Payroll {
    pub employees:      Vec<PayoutIntent>,
    /// Sum of all amounts, base units.
    pub total:          u64,
    /// `total` rendered as a decimal string.
    pub total_usdc:     String,
    pub employee_count: usize,
}

impl Payroll {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let file: PayrollFile = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("malformed payroll JSON: {e}"))?;

        let mut employees = Vec::with_capacity(file.employees.len());
        let mut total: u64 = 0;
        for (idx, row) in file.employees.into_iter().enumerate() {
            let name = row.name.trim();
            let address = row.wallet_address.trim();
            if name.is_empty() || address.is_empty() {
                anyhow::bail!("row {}: name and wallet_address are required", idx + 1);
            }
            let amount = row
                .usdc_amount
                .to_units()
                .map_err(|e| anyhow::anyhow!("row {} ({name}): {e}", idx + 1))?;
            if amount == 0 {
                anyhow::bail!("row {} ({name}): amount must be positive", idx + 1);
            }
            total = total
                .checked_add(amount)
                .ok_or_else(|| anyhow::anyhow!("payroll total overflows"))?;
            employees.push(PayoutIntent::new(name, address, amount));
        }

        Ok(Self {
            employee_count: employees.len(),
            total_usdc: format_units(total, USDC_DECIMALS),
            employees,
            total,
        })
    }

    /// Distinct destination addresses, for deriving a session key whitelist.
    pub fn addresses(&self) -> Vec<String> {
        let mut out: Vec<String> = self.employees.iter().map(|e| e.address.clone()).collect();
        out.sort();
        out.dedup();
        out
    }
}

/// [`PayeeSource`] backed by a JSON file on disk.
pub struct FilePayeeSource {
    path: PathBuf,
}

impl FilePayeeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the file. `Ok(None)` when it does not exist.
    pub async fn load(&self) -> anyhow::Result<Option<Payroll>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => anyhow::bail!("cannot read {}: {e}", self.path.display()),
        };
        Payroll::from_json(&raw).map(Some)
    }
}

#[async_trait]
impl PayeeSource for FilePayeeSource {
    async fn payees(&self) -> Option<Vec<PayoutIntent>> {
        match self.load().await {
            Ok(Some(payroll)) if !payroll.employees.is_empty() => Some(payroll.employees),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Payroll file unusable: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "employees": [
            { "name": "Alice", "wallet_address": "AliceAddr", "usdc_amount": "40.00" },
            { "name": " Bob ", "wallet_address": "BobAddr",   "usdc_amount": 12.5 },
            { "name": "Carol", "wallet_address": "AliceAddr", "usdc_amount": 1 }
        ]
    }"#;

    #[test]
    fn parses_strings_and_numbers() {
        let payroll = Payroll::from_json(SAMPLE).unwrap();
        assert_eq!(payroll.employee_count, 3);
        assert_eq!(payroll.employees[0].amount, 40_000_000);
        assert_eq!(payroll.employees[1].name, "Bob");
        assert_eq!(payroll.employees[1].amount, 12_500_000);
        assert_eq!(payroll.employees[2].amount, 1_000_000);
        assert_eq!(payroll.total, 53_500_000);
        assert_eq!(payroll.total_usdc, "53.50");
        assert_eq!(payroll.addresses(), ["AliceAddr", "BobAddr"]);
    }

    #[test]
    fn rejects_bad_rows() {
        let zero = r#"{"employees":[{"name":"A","wallet_address":"x","usdc_amount":"0"}]}"#;
        assert!(Payroll::from_json(zero).is_err());

        let precise = r#"{"employees":[{"name":"A","wallet_address":"x","usdc_amount":"1.0000001"}]}"#;
        assert!(Payroll::from_json(precise).is_err());

        let missing = r#"{"employees":[{"name":"","wallet_address":"x","usdc_amount":"1"}]}"#;
        assert!(Payroll::from_json(missing).is_err());

        assert!(Payroll::from_json("not json").is_err());
    }

    #[tokio::test]
    async fn source_yields_none_for_missing_empty_or_broken_files() {
        let dir = std::env::temp_dir().join(format!("paychef-payroll-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let missing = FilePayeeSource::new(dir.join("absent.json"));
        assert!(missing.payees().await.is_none());

        let empty_path = dir.join("empty.json");
        tokio::fs::write(&empty_path, r#"{"employees":[]}"#).await.unwrap();
        assert!(FilePayeeSource::new(&empty_path).payees().await.is_none());

        let broken_path = dir.join("broken.json");
        tokio::fs::write(&broken_path, "{").await.unwrap();
        assert!(FilePayeeSource::new(&broken_path).payees().await.is_none());

        let good_path = dir.join("good.json");
        tokio::fs::write(&good_path, SAMPLE).await.unwrap();
        let payees = FilePayeeSource::new(&good_path).payees().await.unwrap();
        assert_eq!(payees.len(), 3);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
