use crate::backend::DebtorsBackend;
use crate::comparator::{ClientMatcher, Comparison, PeriodComparator};
use crate::config::DebtorsConfig;
use crate::error::{DebtorsError, Result};
use crate::export::ComparativeExport;
use crate::ingestion::{IngestedBatch, KnownClient, SpreadsheetBatch};
use crate::ledger::{ClientLedger, ConsumptionEntry};
use crate::registry::{GlobalMetrics, LedgerRegistry};
use crate::schema::{ClientCategory, ClientPayload, RemoteMetrics};
use crate::utils::{PeriodKey, PeriodType};
use chrono::NaiveDate;
use futures::future::join_all;
use log::{info, warn};
use rust_decimal::Decimal;
use std::io::Read;
use std::path::Path;

/// Local-first front for the debtors module.
///
/// Every mutation lands in the [`LedgerRegistry`] first and is then pushed
/// to the backend. When the push fails the local change stands, the error
/// is logged, and the returned message says the change is pending sync.
pub struct DebtorsService<B> {
    backend: B,
    config: DebtorsConfig,
    registry: LedgerRegistry,
    batch: IngestedBatch,
}

fn degraded(message: String, error: &DebtorsError) -> String {
    format!("{} (saved locally, pending sync: {})", message, error)
}

fn payload_for(ledger: &ClientLedger) -> ClientPayload {
    ClientPayload {
        name: ledger.client_name().to_string(),
        category: ledger.client_category(),
        credit_limit: ledger.credit_limit(),
    }
}

/// Drains the ledger's outbox in order. On the first failure the unsent
/// movements go back to the front of the outbox.
async fn push_pending<B: DebtorsBackend>(backend: &B, ledger: &mut ClientLedger) -> Result<usize> {
    let Some(id) = ledger.remote_id().map(str::to_string) else {
        return Ok(0);
    };

    let mut pending = ledger.take_pending_sync().into_iter();
    let mut pushed = 0;
    while let Some(movement) = pending.next() {
        if let Err(e) = backend.append_movement(&id, &movement).await {
            let mut unsent = vec![movement];
            unsent.extend(pending);
            ledger.requeue_sync(unsent);
            return Err(e);
        }
        pushed += 1;
    }
    Ok(pushed)
}

impl<B: DebtorsBackend> DebtorsService<B> {
    pub fn new(backend: B, config: DebtorsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: LedgerRegistry::new(&config),
            batch: IngestedBatch::new(&config),
            backend,
            config,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &DebtorsConfig {
        &self.config
    }

    pub fn registry(&self) -> &LedgerRegistry {
        &self.registry
    }

    pub fn batch(&self) -> &IngestedBatch {
        &self.batch
    }

    /// Replaces the local registry with the backend's clients and their
    /// movement histories. Pending changes are pushed first; if any remain
    /// unsent the registry is left as it was and `PendingSync` is returned.
    /// On any other failure the registry is also left untouched.
    pub async fn hydrate(&mut self) -> Result<usize> {
        self.sync_pending().await;
        let unsynced = self.pending_sync_count()
            + self
                .registry
                .clients()
                .filter(|ledger| ledger.remote_id().is_none())
                .count();
        if unsynced > 0 {
            warn!("Hydration skipped: {} local changes not yet synced", unsynced);
            return Err(DebtorsError::PendingSync(unsynced));
        }

        let clients = self.backend.list_clients().await?;
        let histories = join_all(
            clients
                .iter()
                .map(|client| self.backend.list_movements(&client.id)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        let policy = self.registry.policy();
        self.registry.clear();
        for (client, movements) in clients.iter().zip(histories) {
            let ledger = ClientLedger::from_remote(client, movements, policy.clone());
            if let Err(e) = self.registry.insert_ledger(ledger) {
                warn!("Skipping remote client {}: {}", client.id, e);
            }
        }

        info!("Hydrated {} clients from backend", self.registry.client_count());
        Ok(self.registry.client_count())
    }

    pub async fn add_client(
        &mut self,
        name: &str,
        category: ClientCategory,
        credit_limit: Option<Decimal>,
    ) -> Result<String> {
        let message = self.registry.add_client(name, category, credit_limit)?;
        let ledger = self
            .registry
            .get_mut(name, category)
            .ok_or_else(|| DebtorsError::ClientNotFound(name.trim().to_string()))?;

        match self.backend.create_client(&payload_for(ledger)).await {
            Ok(remote) => {
                ledger.set_remote_id(remote.id);
                Ok(message)
            }
            Err(e) => {
                warn!("Could not persist client {}: {}", ledger.client_name(), e);
                Ok(degraded(message, &e))
            }
        }
    }

    pub async fn update_credit_limit(
        &mut self,
        name: &str,
        category: ClientCategory,
        credit_limit: Decimal,
    ) -> Result<String> {
        if credit_limit < Decimal::ZERO {
            return Err(DebtorsError::InvalidAmount(credit_limit));
        }
        let ledger = self
            .registry
            .get_mut(name, category)
            .ok_or_else(|| DebtorsError::ClientNotFound(name.trim().to_string()))?;
        ledger.set_credit_limit(credit_limit);
        let message = format!(
            "Credit limit of {} set to {}",
            ledger.client_name(),
            credit_limit
        );

        let Some(id) = ledger.remote_id().map(str::to_string) else {
            return Ok(message);
        };
        match self.backend.update_client(&id, &payload_for(ledger)).await {
            Ok(_) => Ok(message),
            Err(e) => {
                warn!("Could not update client {}: {}", id, e);
                Ok(degraded(message, &e))
            }
        }
    }

    pub async fn delete_client(&mut self, name: &str, category: ClientCategory) -> Result<String> {
        let ledger = self.registry.remove_client(name, category)?;
        let message = format!("Client {} removed from {}", ledger.client_name(), category);

        let Some(id) = ledger.remote_id() else {
            return Ok(message);
        };
        match self.backend.delete_client(id).await {
            Ok(()) => Ok(message),
            Err(e) => {
                warn!("Could not delete remote client {}: {}", id, e);
                Ok(degraded(message, &e))
            }
        }
    }

    pub fn set_payment_goal(
        &mut self,
        name: &str,
        category: ClientCategory,
        amount: Decimal,
    ) -> Result<()> {
        let ledger = self
            .registry
            .get_mut(name, category)
            .ok_or_else(|| DebtorsError::ClientNotFound(name.trim().to_string()))?;
        ledger.set_payment_goal(amount);
        Ok(())
    }

    /// Validation errors leave the ledger untouched. Sync failures only
    /// degrade the returned message.
    pub async fn register_consumption(
        &mut self,
        name: &str,
        category: ClientCategory,
        entry: ConsumptionEntry,
    ) -> Result<String> {
        let ledger = self
            .registry
            .get_mut(name, category)
            .ok_or_else(|| DebtorsError::ClientNotFound(name.trim().to_string()))?;
        let message = ledger.register_consumption(entry)?;

        match push_pending(&self.backend, ledger).await {
            Ok(_) => Ok(message),
            Err(e) => {
                warn!("Consumption for {} kept locally: {}", ledger.client_name(), e);
                Ok(degraded(message, &e))
            }
        }
    }

    pub async fn register_payment(
        &mut self,
        name: &str,
        category: ClientCategory,
        amount: Decimal,
        date: Option<NaiveDate>,
    ) -> Result<String> {
        let ledger = self
            .registry
            .get_mut(name, category)
            .ok_or_else(|| DebtorsError::ClientNotFound(name.trim().to_string()))?;
        let message = ledger.register_payment(amount, date)?;

        match push_pending(&self.backend, ledger).await {
            Ok(_) => Ok(message),
            Err(e) => {
                warn!("Payment for {} kept locally: {}", ledger.client_name(), e);
                Ok(degraded(message, &e))
            }
        }
    }

    /// Retries everything still pending. Clients that were never persisted
    /// are created first and their whole history is queued. Returns the
    /// number of movements pushed.
    pub async fn sync_pending(&mut self) -> usize {
        let mut pushed = 0;
        for ledger in self.registry.clients_mut() {
            if ledger.remote_id().is_none() {
                match self.backend.create_client(&payload_for(ledger)).await {
                    Ok(remote) => {
                        ledger.set_remote_id(remote.id);
                        ledger.requeue_sync(ledger.movements().to_vec());
                    }
                    Err(e) => {
                        warn!("Client {} still not persisted: {}", ledger.client_name(), e);
                        continue;
                    }
                }
            }

            match push_pending(&self.backend, ledger).await {
                Ok(count) => pushed += count,
                Err(e) => warn!("Sync for {} interrupted: {}", ledger.client_name(), e),
            }
        }
        pushed
    }

    pub fn pending_sync_count(&self) -> usize {
        self.registry
            .clients()
            .map(|ledger| ledger.pending_sync().count())
            .sum()
    }

    pub async fn compare(&self, period_type: PeriodType, reference: NaiveDate) -> Result<Comparison> {
        PeriodComparator::new(&self.backend)
            .compare(period_type, reference)
            .await
    }

    pub async fn compare_with<M: ClientMatcher>(
        &self,
        period: PeriodKey,
        matcher: M,
    ) -> Result<Comparison> {
        PeriodComparator::new(&self.backend)
            .with_matcher(matcher)
            .compare_period(period)
            .await
    }

    pub fn ingest_csv<R: Read>(&mut self, file_name: &str, reader: R) -> Result<usize> {
        self.batch.ingest_csv(file_name, reader)
    }

    pub fn reconcile_labels(&mut self, known_clients: &[KnownClient]) -> usize {
        self.batch.reconcile_labels(known_clients)
    }

    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    /// Sends the accumulated rows and clears the batch once the backend
    /// accepts them.
    pub async fn submit_batch(&mut self, period: PeriodKey) -> Result<usize> {
        if self.batch.is_empty() {
            return Err(DebtorsError::Ingestion {
                file: self.batch.files().join(", "),
                details: "no rows to submit".to_string(),
            });
        }

        let submission: SpreadsheetBatch = self.batch.to_submission(period);
        self.backend.submit_spreadsheet_batch(&submission).await?;
        info!(
            "Submitted {} rows from {} files for {}",
            submission.rows.len(),
            submission.files.len(),
            period
        );
        self.batch.clear();
        Ok(submission.rows.len())
    }

    pub async fn remote_metrics(&self) -> Result<RemoteMetrics> {
        self.backend.metrics().await
    }

    pub fn local_metrics(&self, year: i32, month: u32) -> Result<GlobalMetrics> {
        self.registry.global_metrics(year, month)
    }

    pub fn export(&self, as_of: NaiveDate, comparison: Option<Comparison>) -> Result<ComparativeExport> {
        ComparativeExport::build(&self.registry, as_of, comparison)
    }

    pub fn export_to(
        &self,
        path: impl AsRef<Path>,
        as_of: NaiveDate,
        comparison: Option<Comparison>,
    ) -> Result<ComparativeExport> {
        let export = self.export(as_of, comparison)?;
        export.write_to(path)?;
        Ok(export)
    }
}
