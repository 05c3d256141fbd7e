use crate::error::{DebtorsError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_ALLOWED_CATEGORIES: [&str; 10] = [
    "SERVICIOS",
    "CONSULTAS",
    "MEDICAMENTOS",
    "ALIMENTACION",
    "ACCESORIOS",
    "PELUQUERIA",
    "HOSPITALIZACION",
    "CIRUGIA",
    "LABORATORIO",
    "OTROS",
];

/// Top-level settings for the debtors module. Every field has a default, so
/// a partial JSON document is enough to override individual thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebtorsConfig {
    /// Base URL of the REST backend, e.g. `https://clinic.example/api`.
    pub backend_base_url: Option<String>,
    /// Credit limit given to clients created without an explicit one.
    pub default_credit_limit: Decimal,
    /// Fraction of the credit limit above which a balance raises an alert.
    pub credit_alert_ratio: Decimal,
    /// Absolute balance above which an alert is raised regardless of limit.
    pub high_balance_threshold: Decimal,
    /// Consumption/payments ratio above which spending is flagged.
    pub high_spend_ratio: Decimal,
    /// Numeric cells above this value mark a spreadsheet row as a summary.
    pub summary_row_threshold: Decimal,
    /// Whitelist of consumption categories.
    pub allowed_categories: Vec<String>,
}

impl Default for DebtorsConfig {
    fn default() -> Self {
        Self {
            backend_base_url: None,
            default_credit_limit: Decimal::from(1000),
            credit_alert_ratio: Decimal::new(8, 1),
            high_balance_threshold: Decimal::from(3000),
            high_spend_ratio: Decimal::new(15, 1),
            summary_row_threshold: Decimal::from(1_000_000),
            allowed_categories: DEFAULT_ALLOWED_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl DebtorsConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DebtorsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_credit_limit < Decimal::ZERO {
            return Err(DebtorsError::InvalidConfig(format!(
                "default_credit_limit {} must not be negative",
                self.default_credit_limit
            )));
        }

        if self.credit_alert_ratio <= Decimal::ZERO || self.credit_alert_ratio > Decimal::ONE {
            return Err(DebtorsError::InvalidConfig(format!(
                "credit_alert_ratio {} must be in (0, 1]",
                self.credit_alert_ratio
            )));
        }

        if self.high_spend_ratio <= Decimal::ZERO {
            return Err(DebtorsError::InvalidConfig(format!(
                "high_spend_ratio {} must be positive",
                self.high_spend_ratio
            )));
        }

        if self.summary_row_threshold <= Decimal::ZERO {
            return Err(DebtorsError::InvalidConfig(format!(
                "summary_row_threshold {} must be positive",
                self.summary_row_threshold
            )));
        }

        if self.allowed_categories.is_empty() {
            return Err(DebtorsError::InvalidConfig(
                "allowed_categories must not be empty".to_string(),
            ));
        }

        if let Some(url) = &self.backend_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(DebtorsError::InvalidConfig(format!(
                    "backend_base_url '{}' must be an http(s) URL",
                    url
                )));
            }
        }

        Ok(())
    }

    /// The subset of settings every ledger consults, shared between ledgers.
    pub fn ledger_policy(&self) -> Arc<LedgerPolicy> {
        Arc::new(LedgerPolicy {
            allowed_categories: self
                .allowed_categories
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
            credit_alert_ratio: self.credit_alert_ratio,
            high_balance_threshold: self.high_balance_threshold,
            high_spend_ratio: self.high_spend_ratio,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerPolicy {
    pub allowed_categories: Vec<String>,
    pub credit_alert_ratio: Decimal,
    pub high_balance_threshold: Decimal,
    pub high_spend_ratio: Decimal,
}

impl LedgerPolicy {
    pub fn is_allowed_category(&self, category: &str) -> bool {
        let wanted = category.trim().to_uppercase();
        self.allowed_categories.iter().any(|c| *c == wanted)
    }
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        let config = DebtorsConfig::default();
        Self {
            allowed_categories: config.allowed_categories,
            credit_alert_ratio: config.credit_alert_ratio,
            high_balance_threshold: config.high_balance_threshold,
            high_spend_ratio: config.high_spend_ratio,
        }
    }
}
