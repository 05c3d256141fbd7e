use crate::backend::DebtorsBackend;
use crate::error::{DebtorsError, Result};
use crate::ingestion::SpreadsheetBatch;
use crate::schema::{
    ClientPayload, DebtSnapshotRow, Movement, PrecomputedComparisonRow, RemoteClient, RemoteMetrics,
};
use crate::utils::PeriodType;
use chrono::NaiveDate;
use log::debug;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// [`DebtorsBackend`] over the clinic's REST API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/debtors/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn day_query(day: NaiveDate) -> [(&'static str, String); 2] {
        [
            ("periodo", day.format(DATE_FORMAT).to_string()),
            ("tipo", PeriodType::Day.as_query_value().to_string()),
        ]
    }

    fn comparison_query(current: NaiveDate, prior: NaiveDate) -> [(&'static str, String); 2] {
        [
            ("fechaActual", current.format(DATE_FORMAT).to_string()),
            ("fechaAnterior", prior.format(DATE_FORMAT).to_string()),
        ]
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DebtorsError::Backend {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let response = Self::check(response).await?;
        Ok(response.json::<T>().await?)
    }
}

impl DebtorsBackend for HttpBackend {
    async fn list_clients(&self) -> Result<Vec<RemoteClient>> {
        let response = self.client.get(self.url("clientes")).send().await?;
        Self::decode(response).await
    }

    async fn create_client(&self, client: &ClientPayload) -> Result<RemoteClient> {
        debug!("Creating remote client {}", client.name);
        let response = self
            .client
            .post(self.url("clientes"))
            .json(client)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn update_client(&self, id: &str, client: &ClientPayload) -> Result<RemoteClient> {
        let response = self
            .client
            .put(self.url(&format!("clientes/{}", id)))
            .json(client)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn delete_client(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("clientes/{}", id)))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn append_movement(&self, id: &str, movement: &Movement) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("clientes/{}/movimientos", id)))
            .json(movement)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_movements(&self, id: &str) -> Result<Vec<Movement>> {
        let response = self
            .client
            .get(self.url(&format!("clientes/{}/movimientos", id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn debts_for_day(&self, day: NaiveDate) -> Result<Vec<DebtSnapshotRow>> {
        let response = self
            .client
            .get(self.url("deudas/por-periodo"))
            .query(&Self::day_query(day))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn precomputed_comparison(
        &self,
        current: NaiveDate,
        prior: NaiveDate,
    ) -> Result<Vec<PrecomputedComparisonRow>> {
        let response = self
            .client
            .get(self.url("registros-excel/comparativa"))
            .query(&Self::comparison_query(current, prior))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn submit_spreadsheet_batch(&self, batch: &SpreadsheetBatch) -> Result<()> {
        debug!(
            "Submitting {} spreadsheet rows for {}",
            batch.rows.len(),
            batch.period
        );
        let response = self
            .client
            .post(self.url("deudas/procesar-excel-comparativa"))
            .json(batch)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn metrics(&self) -> Result<RemoteMetrics> {
        let response = self.client.get(self.url("metricas")).send().await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let backend = HttpBackend::new("http://localhost:3000/api/");
        assert_eq!(backend.base_url(), "http://localhost:3000/api");
        assert_eq!(
            backend.url("/clientes/7/movimientos"),
            "http://localhost:3000/api/debtors/clientes/7/movimientos"
        );
    }

    #[test]
    fn test_query_parameters() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 9).unwrap();
        let query = HttpBackend::day_query(day);
        assert_eq!(query[0], ("periodo", "2024-02-09".to_string()));
        assert_eq!(query[1], ("tipo", "dia".to_string()));

        let prior = NaiveDate::from_ymd_opt(2024, 2, 8).unwrap();
        let query = HttpBackend::comparison_query(day, prior);
        assert_eq!(query[0].0, "fechaActual");
        assert_eq!(query[1].1, "2024-02-08");
    }
}
