use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category recorded on payment movements, which carry no spending category.
pub const PAYMENT_CATEGORY: &str = "ABONO";

/// Sub-account key used when a consumption is not tied to a pet.
pub const UNSPECIFIED_SUB_ACCOUNT: &str = "unspecified";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MovementKind {
    /// Increases the client's debt.
    #[serde(rename = "CONSUMO")]
    Consumption,
    /// Decreases the client's debt.
    #[serde(rename = "ABONO")]
    Payment,
}

/// One ledger line. The sign of `amount` is fixed at construction:
/// consumptions are non-negative, payments non-positive, so summing
/// amounts yields the balance delta directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movement {
    #[serde(rename = "fecha")]
    pub date: NaiveDate,
    #[serde(rename = "tipo")]
    pub kind: MovementKind,
    #[serde(rename = "descripcion", default)]
    pub description: String,
    #[serde(rename = "categoria", default)]
    pub category: String,
    #[serde(rename = "mascota", default, skip_serializing_if = "Option::is_none")]
    pub sub_account: Option<String>,
    #[serde(rename = "monto")]
    pub amount: Decimal,
}

impl Movement {
    pub fn consumption(
        date: NaiveDate,
        amount: Decimal,
        description: impl Into<String>,
        category: impl Into<String>,
        sub_account: Option<String>,
    ) -> Self {
        Self {
            date,
            kind: MovementKind::Consumption,
            description: description.into(),
            category: category.into(),
            sub_account,
            amount: amount.abs(),
        }
    }

    pub fn payment(date: NaiveDate, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            date,
            kind: MovementKind::Payment,
            description: description.into(),
            category: PAYMENT_CATEGORY.to_string(),
            sub_account: None,
            amount: -amount.abs(),
        }
    }

    /// Unsigned size of the movement, as used by statement sub-totals.
    pub fn magnitude(&self) -> Decimal {
        self.amount.abs()
    }

    /// Re-applies the sign convention of `kind` to `amount`. Backends are not
    /// trusted to send payments already negated.
    pub fn normalized(mut self) -> Self {
        self.amount = match self.kind {
            MovementKind::Consumption => self.amount.abs(),
            MovementKind::Payment => -self.amount.abs(),
        };
        self
    }

    pub fn is_consumption(&self) -> bool {
        self.kind == MovementKind::Consumption
    }

    pub fn is_payment(&self) -> bool {
        self.kind == MovementKind::Payment
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
pub enum ClientCategory {
    #[serde(rename = "recepcion")]
    Reception,
    #[serde(rename = "administracion")]
    Administration,
    #[serde(rename = "colaborador")]
    Collaborator,
}

impl ClientCategory {
    pub const ALL: [ClientCategory; 3] = [
        ClientCategory::Reception,
        ClientCategory::Administration,
        ClientCategory::Collaborator,
    ];
}

impl fmt::Display for ClientCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientCategory::Reception => "Reception",
            ClientCategory::Administration => "Administration",
            ClientCategory::Collaborator => "Collaborator",
        };
        f.write_str(name)
    }
}

/// A client as persisted by the backend (`GET /debtors/clientes`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteClient {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "categoria")]
    pub category: ClientCategory,
    #[serde(rename = "limiteCredito")]
    pub credit_limit: Decimal,
    #[serde(rename = "saldoInicial", default)]
    pub opening_balance: Decimal,
    #[serde(rename = "metaPagoMensual", default)]
    pub monthly_payment_goal: Option<Decimal>,
}

/// Body of `POST /debtors/clientes` and `PUT /debtors/clientes/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientPayload {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "categoria")]
    pub category: ClientCategory,
    #[serde(rename = "limiteCredito")]
    pub credit_limit: Decimal,
}

/// One client's debt within a single day snapshot
/// (`GET /debtors/deudas/por-periodo`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebtSnapshotRow {
    #[serde(rename = "clienteId", default)]
    pub client_id: Option<String>,
    #[serde(rename = "clienteNombre")]
    pub client_name: String,
    #[serde(rename = "deuda")]
    pub debt: Decimal,
    #[serde(rename = "registros", default)]
    pub record_count: u32,
    #[serde(rename = "estado", default)]
    pub state: Option<String>,
}

/// One row of the backend's precomputed two-date comparison
/// (`GET /debtors/registros-excel/comparativa`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrecomputedComparisonRow {
    #[serde(rename = "clienteId", default)]
    pub client_id: Option<String>,
    #[serde(rename = "clienteNombre")]
    pub client_name: String,
    #[serde(rename = "deudaActual", default)]
    pub current_debt: Decimal,
    #[serde(rename = "deudaAnterior", default)]
    pub prior_debt: Option<Decimal>,
    #[serde(rename = "estado", default)]
    pub state: Option<String>,
}

/// Aggregate metrics served by `GET /debtors/metricas`. Only the headline
/// figures are typed; anything else the backend adds is kept verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteMetrics {
    #[serde(rename = "totalClientes", default)]
    pub total_clients: u32,
    #[serde(rename = "deudaTotal", default)]
    pub total_debt: Decimal,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
