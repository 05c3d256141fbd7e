use crate::comparator::Comparison;
use crate::error::Result;
use crate::ledger::ClientLedger;
use crate::registry::{GlobalMetrics, LedgerRegistry};
use crate::schema::ClientCategory;
use crate::utils::{PeriodKey, PeriodType};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use log::info;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ClientSummary {
    pub name: String,
    pub category: ClientCategory,
    pub credit_limit: Decimal,
    pub balance: Decimal,
    pub available_credit: Decimal,
    pub pending_sync: usize,
    pub remote_id: Option<String>,
}

impl ClientSummary {
    pub fn from_ledger(ledger: &ClientLedger, as_of: NaiveDate) -> Self {
        let balance = ledger.balance_as_of(as_of);
        Self {
            name: ledger.client_name().to_string(),
            category: ledger.client_category(),
            credit_limit: ledger.credit_limit(),
            balance,
            available_credit: ledger.credit_limit() - balance,
            pending_sync: ledger.pending_sync().count(),
            remote_id: ledger.remote_id().map(str::to_string),
        }
    }
}

/// Snapshot of the debtors state handed to users as a JSON download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ComparativeExport {
    pub exported_at: DateTime<Utc>,
    pub as_of: NaiveDate,
    /// The compared period when a comparison is attached, otherwise the
    /// month containing `as_of`.
    pub period_key: PeriodKey,
    pub clients: Vec<ClientSummary>,
    pub metrics: GlobalMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

impl ComparativeExport {
    /// Builds the export for the month containing `as_of`.
    pub fn build(
        registry: &LedgerRegistry,
        as_of: NaiveDate,
        comparison: Option<Comparison>,
    ) -> Result<Self> {
        let period_key = comparison
            .as_ref()
            .map(|c| c.current_period)
            .unwrap_or_else(|| PeriodKey::containing(PeriodType::Month, as_of));

        Ok(Self {
            exported_at: Utc::now(),
            as_of,
            period_key,
            clients: registry
                .clients()
                .map(|ledger| ClientSummary::from_ledger(ledger, as_of))
                .collect(),
            metrics: registry.global_metrics(as_of.year(), as_of.month())?,
            comparison,
        })
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json_pretty()?)?;
        info!(
            "Exported {} clients to {}",
            self.clients.len(),
            path.display()
        );
        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ComparativeExport)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
