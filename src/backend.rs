use crate::error::Result;
use crate::ingestion::SpreadsheetBatch;
use crate::schema::{
    ClientPayload, DebtSnapshotRow, Movement, PrecomputedComparisonRow, RemoteClient, RemoteMetrics,
};
use chrono::NaiveDate;

/// The REST collaborator behind the debtors module.
///
/// Everything here is a suspension point. Callers in this crate treat a
/// failure as non-fatal wherever local state already holds the truth.
#[allow(async_fn_in_trait)]
pub trait DebtorsBackend {
    /// `GET /debtors/clientes`
    async fn list_clients(&self) -> Result<Vec<RemoteClient>>;

    /// `POST /debtors/clientes`
    async fn create_client(&self, client: &ClientPayload) -> Result<RemoteClient>;

    /// `PUT /debtors/clientes/{id}`
    async fn update_client(&self, id: &str, client: &ClientPayload) -> Result<RemoteClient>;

    /// `DELETE /debtors/clientes/{id}`
    async fn delete_client(&self, id: &str) -> Result<()>;

    /// `POST /debtors/clientes/{id}/movimientos`
    async fn append_movement(&self, id: &str, movement: &Movement) -> Result<()>;

    /// `GET /debtors/clientes/{id}/movimientos`
    async fn list_movements(&self, id: &str) -> Result<Vec<Movement>>;

    /// `GET /debtors/deudas/por-periodo?periodo=YYYY-MM-DD&tipo=dia`
    async fn debts_for_day(&self, day: NaiveDate) -> Result<Vec<DebtSnapshotRow>>;

    /// `GET /debtors/registros-excel/comparativa?fechaActual=&fechaAnterior=`
    async fn precomputed_comparison(
        &self,
        current: NaiveDate,
        prior: NaiveDate,
    ) -> Result<Vec<PrecomputedComparisonRow>>;

    /// `POST /debtors/deudas/procesar-excel-comparativa`
    async fn submit_spreadsheet_batch(&self, batch: &SpreadsheetBatch) -> Result<()>;

    /// `GET /debtors/metricas`
    async fn metrics(&self) -> Result<RemoteMetrics>;
}
