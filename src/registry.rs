use crate::config::{DebtorsConfig, LedgerPolicy};
use crate::error::{DebtorsError, Result};
use crate::ledger::{ClientDashboard, ClientLedger};
use crate::schema::ClientCategory;
use log::info;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CategoryTotals {
    /// Sum of the month's closing balances.
    pub debt: Decimal,
    pub consumption: Decimal,
    pub payments: Decimal,
}

impl CategoryTotals {
    fn absorb(&mut self, other: &CategoryTotals) {
        self.debt += other.debt;
        self.consumption += other.consumption;
        self.payments += other.payments;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: ClientCategory,
    pub total_clients: usize,
    pub per_client_detail: Vec<ClientDashboard>,
    pub aggregated_category_breakdown: BTreeMap<String, Decimal>,
    pub totals: CategoryTotals,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CategoryMetricsRow {
    pub category: ClientCategory,
    pub total_clients: usize,
    pub totals: CategoryTotals,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct GlobalMetrics {
    pub year: i32,
    pub month: u32,
    pub total_clients: usize,
    pub totals: CategoryTotals,
    pub by_category: Vec<CategoryMetricsRow>,
}

/// Client ledgers partitioned by category.
///
/// Client names are unique within a category only: the same name may exist
/// in two categories at once, and `find_client` then returns the first match
/// in category order.
#[derive(Debug, Clone)]
pub struct LedgerRegistry {
    categories: BTreeMap<ClientCategory, BTreeMap<String, ClientLedger>>,
    default_credit_limit: Decimal,
    policy: Arc<LedgerPolicy>,
}

impl Default for LedgerRegistry {
    fn default() -> Self {
        Self::new(&DebtorsConfig::default())
    }
}

impl LedgerRegistry {
    pub fn new(config: &DebtorsConfig) -> Self {
        Self {
            categories: ClientCategory::ALL
                .iter()
                .map(|c| (*c, BTreeMap::new()))
                .collect(),
            default_credit_limit: config.default_credit_limit,
            policy: config.ledger_policy(),
        }
    }

    pub fn policy(&self) -> Arc<LedgerPolicy> {
        Arc::clone(&self.policy)
    }

    /// Creates an empty ledger. `credit_limit` falls back to the configured
    /// default.
    pub fn add_client(
        &mut self,
        name: &str,
        category: ClientCategory,
        credit_limit: Option<Decimal>,
    ) -> Result<String> {
        let ledger = ClientLedger::new(
            name.trim(),
            category,
            credit_limit.unwrap_or(self.default_credit_limit),
        )
        .with_policy(self.policy());
        self.insert_ledger(ledger)?;
        Ok(format!("Client {} added to {}", name.trim(), category))
    }

    /// Inserts an already built ledger, e.g. one rehydrated from the backend.
    pub fn insert_ledger(&mut self, ledger: ClientLedger) -> Result<()> {
        let category = ledger.client_category();
        let members = self.categories.entry(category).or_default();
        if members.contains_key(ledger.client_name()) {
            return Err(DebtorsError::DuplicateClient {
                name: ledger.client_name().to_string(),
                category: category.to_string(),
            });
        }
        info!("Registering client {} in {}", ledger.client_name(), category);
        members.insert(ledger.client_name().to_string(), ledger);
        Ok(())
    }

    pub fn find_client(&self, name: &str) -> Option<(&ClientLedger, ClientCategory)> {
        let name = name.trim();
        self.categories
            .iter()
            .find_map(|(category, members)| members.get(name).map(|ledger| (ledger, *category)))
    }

    pub fn find_client_mut(&mut self, name: &str) -> Option<(&mut ClientLedger, ClientCategory)> {
        let name = name.trim();
        self.categories
            .iter_mut()
            .find_map(|(category, members)| members.get_mut(name).map(|ledger| (ledger, *category)))
    }

    pub fn get(&self, name: &str, category: ClientCategory) -> Option<&ClientLedger> {
        self.categories.get(&category)?.get(name.trim())
    }

    pub fn get_mut(&mut self, name: &str, category: ClientCategory) -> Option<&mut ClientLedger> {
        self.categories.get_mut(&category)?.get_mut(name.trim())
    }

    pub fn remove_client(&mut self, name: &str, category: ClientCategory) -> Result<ClientLedger> {
        self.categories
            .get_mut(&category)
            .and_then(|members| members.remove(name.trim()))
            .ok_or_else(|| DebtorsError::ClientNotFound(name.trim().to_string()))
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientLedger> {
        self.categories.values().flat_map(|members| members.values())
    }

    pub fn clients_mut(&mut self) -> impl Iterator<Item = &mut ClientLedger> {
        self.categories
            .values_mut()
            .flat_map(|members| members.values_mut())
    }

    pub fn client_count(&self) -> usize {
        self.categories.values().map(BTreeMap::len).sum()
    }

    pub fn clear(&mut self) {
        for members in self.categories.values_mut() {
            members.clear();
        }
    }

    /// One report per non-empty category, folding every member's dashboard.
    pub fn reports_by_category(
        &self,
        year: i32,
        month: u32,
    ) -> Result<BTreeMap<ClientCategory, CategoryReport>> {
        let mut reports = BTreeMap::new();

        for (category, members) in &self.categories {
            if members.is_empty() {
                continue;
            }

            let mut report = CategoryReport {
                category: *category,
                total_clients: members.len(),
                per_client_detail: Vec::with_capacity(members.len()),
                aggregated_category_breakdown: BTreeMap::new(),
                totals: CategoryTotals::default(),
            };

            for ledger in members.values() {
                let dashboard = ledger.dashboard(year, month)?;

                for (spend_category, amount) in &dashboard.category_breakdown {
                    *report
                        .aggregated_category_breakdown
                        .entry(spend_category.clone())
                        .or_insert(Decimal::ZERO) += *amount;
                }

                report.totals.absorb(&CategoryTotals {
                    debt: dashboard.statement.closing_balance,
                    consumption: dashboard.statement.total_consumption,
                    payments: dashboard.statement.total_payments,
                });
                report.per_client_detail.push(dashboard);
            }

            reports.insert(*category, report);
        }

        Ok(reports)
    }

    pub fn global_metrics(&self, year: i32, month: u32) -> Result<GlobalMetrics> {
        let reports = self.reports_by_category(year, month)?;
        let mut metrics = GlobalMetrics {
            year,
            month,
            ..GlobalMetrics::default()
        };

        for (category, report) in reports {
            metrics.total_clients += report.total_clients;
            metrics.totals.absorb(&report.totals);
            metrics.by_category.push(CategoryMetricsRow {
                category,
                total_clients: report.total_clients,
                totals: report.totals,
            });
        }

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ConsumptionEntry;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_uniqueness_is_scoped_per_category() {
        let mut registry = LedgerRegistry::default();
        registry.add_client("X", ClientCategory::Reception, None).unwrap();

        let duplicate = registry.add_client("X", ClientCategory::Reception, None);
        assert!(matches!(duplicate, Err(DebtorsError::DuplicateClient { .. })));
        assert!(duplicate.unwrap_err().to_string().contains("already exists"));

        assert!(registry.add_client("X", ClientCategory::Administration, None).is_ok());
        assert_eq!(registry.client_count(), 2);
    }

    #[test]
    fn test_find_client_scans_all_categories() {
        let mut registry = LedgerRegistry::default();
        registry
            .add_client("Luis", ClientCategory::Collaborator, Some(dec!(250)))
            .unwrap();

        let (ledger, category) = registry.find_client(" Luis ").unwrap();
        assert_eq!(category, ClientCategory::Collaborator);
        assert_eq!(ledger.credit_limit(), dec!(250));
        assert!(registry.find_client("Nadie").is_none());

        let (ledger, _) = registry.find_client_mut("Luis").unwrap();
        ledger.set_payment_goal(dec!(50));
        assert_eq!(registry.get("Luis", ClientCategory::Collaborator).unwrap().monthly_payment_goal(), Some(dec!(50)));
    }

    #[test]
    fn test_default_credit_limit_comes_from_config() {
        let config = DebtorsConfig {
            default_credit_limit: dec!(750),
            ..DebtorsConfig::default()
        };
        let mut registry = LedgerRegistry::new(&config);
        registry.add_client("Eva", ClientCategory::Reception, None).unwrap();
        assert_eq!(registry.find_client("Eva").unwrap().0.credit_limit(), dec!(750));
    }

    #[test]
    fn test_reports_and_global_metrics() {
        let mut registry = LedgerRegistry::default();
        registry.add_client("Ana", ClientCategory::Reception, Some(dec!(1000))).unwrap();
        registry.add_client("Beto", ClientCategory::Reception, Some(dec!(1000))).unwrap();
        registry.add_client("Carla", ClientCategory::Administration, Some(dec!(1000))).unwrap();

        let ana = registry.get_mut("Ana", ClientCategory::Reception).unwrap();
        ana.register_consumption(ConsumptionEntry::new(dec!(100), "Consulta", "SERVICIOS").on(date(2024, 3, 1)))
            .unwrap();
        ana.register_payment(dec!(40), Some(date(2024, 3, 9))).unwrap();

        let beto = registry.get_mut("Beto", ClientCategory::Reception).unwrap();
        beto.register_consumption(ConsumptionEntry::new(dec!(60), "Pienso", "ALIMENTACION").on(date(2024, 3, 4)))
            .unwrap();
        beto.register_consumption(ConsumptionEntry::new(dec!(15), "Revisión", "SERVICIOS").on(date(2024, 3, 5)))
            .unwrap();

        let carla = registry.get_mut("Carla", ClientCategory::Administration).unwrap();
        carla
            .register_consumption(ConsumptionEntry::new(dec!(500), "Cirugía", "CIRUGIA").on(date(2024, 2, 1)))
            .unwrap();

        let reports = registry.reports_by_category(2024, 3).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(!reports.contains_key(&ClientCategory::Collaborator));

        let reception = &reports[&ClientCategory::Reception];
        assert_eq!(reception.total_clients, 2);
        assert_eq!(reception.per_client_detail.len(), 2);
        assert_eq!(reception.aggregated_category_breakdown.get("SERVICIOS"), Some(&dec!(115)));
        assert_eq!(reception.totals.consumption, dec!(175));
        assert_eq!(reception.totals.payments, dec!(40));
        assert_eq!(reception.totals.debt, dec!(135));

        let administration = &reports[&ClientCategory::Administration];
        assert_eq!(administration.totals.debt, dec!(500));
        assert_eq!(administration.totals.consumption, Decimal::ZERO);

        let metrics = registry.global_metrics(2024, 3).unwrap();
        assert_eq!(metrics.total_clients, 3);
        assert_eq!(metrics.totals.debt, dec!(635));
        assert_eq!(metrics.by_category.len(), 2);
    }

    #[test]
    fn test_remove_client() {
        let mut registry = LedgerRegistry::default();
        registry.add_client("Ana", ClientCategory::Reception, None).unwrap();
        assert!(registry.remove_client("Ana", ClientCategory::Administration).is_err());
        let removed = registry.remove_client("Ana", ClientCategory::Reception).unwrap();
        assert_eq!(removed.client_name(), "Ana");
        assert_eq!(registry.client_count(), 0);
    }
}
