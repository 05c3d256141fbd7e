//! # Clinic Debtors
//!
//! Accounts-receivable core for a veterinary clinic back office: client
//! credit ledgers, a category-partitioned registry, period-over-period debt
//! comparison against a REST backend, and ingestion of uploaded debt
//! spreadsheets.
//!
//! ## Core Concepts
//!
//! - **Ledger**: An append-only movement history per client. Consumptions are
//!   positive, payments negative, and every balance is recomputed from
//!   history on demand.
//! - **Credit guard**: A consumption is rejected if it would push the
//!   current balance above the client's credit limit.
//! - **Snapshots**: The backend stores debt per client per day. Weeks and
//!   months are compared by fetching each day and folding the results.
//! - **Local-first**: Mutations apply locally first and are pushed to the
//!   backend through a per-ledger outbox.
//!
//! ## Example
//!
//! ```rust,ignore
//! use clinic_debtors::*;
//! use rust_decimal_macros::dec;
//!
//! let mut registry = LedgerRegistry::default();
//! registry.add_client("Juan Pérez", ClientCategory::Reception, Some(dec!(1000)))?;
//!
//! let (ledger, _) = registry.find_client_mut("Juan Pérez").unwrap();
//! ledger.register_consumption(ConsumptionEntry::new(dec!(300), "Consulta", "SERVICIOS"))?;
//! ledger.register_payment(dec!(100), None)?;
//! assert_eq!(ledger.current_balance(), dec!(200));
//!
//! let backend = HttpBackend::new("http://localhost:3000/api");
//! let comparison = PeriodComparator::new(&backend)
//!     .compare(PeriodType::Month, utils::today())
//!     .await?;
//! println!("{} clients compared", comparison.rows.len());
//! ```

pub mod backend;
pub mod comparator;
pub mod config;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod ledger;
pub mod registry;
pub mod schema;
pub mod service;
pub mod utils;

#[cfg(feature = "http")]
pub mod http;

pub use backend::DebtorsBackend;
pub use comparator::{
    classify, compare_snapshots, diff_snapshots, fold_snapshots, ClientMatcher, ComparativeRow,
    Comparison, ComparisonSummary, DebtState, ExactKeyMatcher, LenientMatcher, PeriodComparator,
};
pub use config::{DebtorsConfig, LedgerPolicy};
pub use error::{DebtorsError, Result};
pub use export::{ClientSummary, ComparativeExport};
pub use ingestion::*;
pub use ledger::*;
pub use registry::*;
pub use schema::*;
pub use service::DebtorsService;
pub use utils::{expand_period_to_days, PeriodKey, PeriodType};

#[cfg(feature = "http")]
pub use http::HttpBackend;
