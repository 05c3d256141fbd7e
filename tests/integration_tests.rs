use anyhow::Result;
use chrono::NaiveDate;
use clinic_debtors::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn snapshot(id: &str, name: &str, debt: Decimal) -> DebtSnapshotRow {
    DebtSnapshotRow {
        client_id: Some(id.to_string()),
        client_name: name.to_string(),
        debt,
        record_count: 1,
        state: None,
    }
}

#[derive(Default)]
struct MockState {
    offline: bool,
    reject_movements: bool,
    next_id: u32,
    clients: Vec<RemoteClient>,
    movements: BTreeMap<String, Vec<Movement>>,
    days: BTreeMap<NaiveDate, Vec<DebtSnapshotRow>>,
    failing_days: BTreeSet<NaiveDate>,
    precomputed: Vec<PrecomputedComparisonRow>,
    day_requests: usize,
    batches: Vec<SpreadsheetBatch>,
}

#[derive(Default)]
struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    fn online(&self) -> clinic_debtors::Result<std::sync::MutexGuard<'_, MockState>> {
        let state = self.state.lock().unwrap();
        if state.offline {
            return Err(DebtorsError::BackendUnavailable("mock offline".to_string()));
        }
        Ok(state)
    }
}

impl DebtorsBackend for MockBackend {
    async fn list_clients(&self) -> clinic_debtors::Result<Vec<RemoteClient>> {
        Ok(self.online()?.clients.clone())
    }

    async fn create_client(&self, client: &ClientPayload) -> clinic_debtors::Result<RemoteClient> {
        let mut state = self.online()?;
        state.next_id += 1;
        let remote = RemoteClient {
            id: format!("c{}", state.next_id),
            name: client.name.clone(),
            category: client.category,
            credit_limit: client.credit_limit,
            opening_balance: Decimal::ZERO,
            monthly_payment_goal: None,
        };
        state.clients.push(remote.clone());
        Ok(remote)
    }

    async fn update_client(
        &self,
        id: &str,
        client: &ClientPayload,
    ) -> clinic_debtors::Result<RemoteClient> {
        let mut state = self.online()?;
        let remote = state
            .clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| DebtorsError::ClientNotFound(id.to_string()))?;
        remote.credit_limit = client.credit_limit;
        Ok(remote.clone())
    }

    async fn delete_client(&self, id: &str) -> clinic_debtors::Result<()> {
        let mut state = self.online()?;
        state.clients.retain(|c| c.id != id);
        state.movements.remove(id);
        Ok(())
    }

    async fn append_movement(&self, id: &str, movement: &Movement) -> clinic_debtors::Result<()> {
        let mut state = self.online()?;
        if state.reject_movements {
            return Err(DebtorsError::Backend {
                status: 503,
                body: "movements locked".to_string(),
            });
        }
        state
            .movements
            .entry(id.to_string())
            .or_default()
            .push(movement.clone());
        Ok(())
    }

    async fn list_movements(&self, id: &str) -> clinic_debtors::Result<Vec<Movement>> {
        Ok(self.online()?.movements.get(id).cloned().unwrap_or_default())
    }

    async fn debts_for_day(&self, day: NaiveDate) -> clinic_debtors::Result<Vec<DebtSnapshotRow>> {
        let mut state = self.online()?;
        state.day_requests += 1;
        if state.failing_days.contains(&day) {
            return Err(DebtorsError::Backend {
                status: 500,
                body: "snapshot unavailable".to_string(),
            });
        }
        Ok(state.days.get(&day).cloned().unwrap_or_default())
    }

    async fn precomputed_comparison(
        &self,
        _current: NaiveDate,
        _prior: NaiveDate,
    ) -> clinic_debtors::Result<Vec<PrecomputedComparisonRow>> {
        Ok(self.online()?.precomputed.clone())
    }

    async fn submit_spreadsheet_batch(&self, batch: &SpreadsheetBatch) -> clinic_debtors::Result<()> {
        self.online()?.batches.push(batch.clone());
        Ok(())
    }

    async fn metrics(&self) -> clinic_debtors::Result<RemoteMetrics> {
        let state = self.online()?;
        Ok(RemoteMetrics {
            total_clients: state.clients.len() as u32,
            total_debt: state
                .movements
                .values()
                .flatten()
                .map(|m| m.amount)
                .sum(),
            extra: BTreeMap::new(),
        })
    }
}

fn service() -> DebtorsService<MockBackend> {
    DebtorsService::new(MockBackend::default(), DebtorsConfig::default()).unwrap()
}

#[test]
fn test_end_to_end_ledger_scenario() -> Result<()> {
    let mut registry = LedgerRegistry::default();
    registry.add_client("Ana", ClientCategory::Reception, Some(dec!(1000)))?;

    let (ana, category) = registry.find_client_mut("Ana").unwrap();
    assert_eq!(category, ClientCategory::Reception);
    ana.register_consumption(ConsumptionEntry::new(dec!(300), "Consulta", "SERVICIOS"))?;
    ana.register_payment(dec!(100), None)?;
    assert_eq!(ana.current_balance(), dec!(200));

    let rejected = ana.register_consumption(ConsumptionEntry::new(dec!(850), "Cirugía", "CIRUGIA"));
    assert!(matches!(rejected, Err(DebtorsError::CreditLimitExceeded { .. })));
    assert_eq!(ana.movements().len(), 2);
    assert_eq!(ana.current_balance(), dec!(200));
    Ok(())
}

#[tokio::test]
async fn test_service_pushes_movements_to_backend() -> Result<()> {
    let mut service = service();
    let message = service
        .add_client("Ana", ClientCategory::Reception, Some(dec!(1000)))
        .await?;
    assert!(!message.contains("pending sync"));

    service
        .register_consumption(
            "Ana",
            ClientCategory::Reception,
            ConsumptionEntry::new(dec!(300), "Consulta", "SERVICIOS"),
        )
        .await?;
    service
        .register_payment("Ana", ClientCategory::Reception, dec!(100), None)
        .await?;

    let (ledger, _) = service.registry().find_client("Ana").unwrap();
    assert_eq!(ledger.current_balance(), dec!(200));
    assert_eq!(ledger.remote_id(), Some("c1"));
    assert_eq!(service.pending_sync_count(), 0);

    let stored = service.backend().with_state(|s| s.movements["c1"].clone());
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].amount, dec!(-100));

    let remote = service.remote_metrics().await?;
    assert_eq!(remote.total_clients, 1);
    assert_eq!(remote.total_debt, dec!(200));
    Ok(())
}

#[tokio::test]
async fn test_backend_outage_degrades_but_keeps_local_state() -> Result<()> {
    let mut service = service();
    service
        .add_client("Beto", ClientCategory::Administration, Some(dec!(500)))
        .await?;

    service.backend().set_offline(true);
    let message = service
        .register_payment("Beto", ClientCategory::Administration, dec!(40), None)
        .await?;
    assert!(message.contains("pending sync"));
    let message = service
        .register_consumption(
            "Beto",
            ClientCategory::Administration,
            ConsumptionEntry::new(dec!(90), "Pienso", "ALIMENTACION"),
        )
        .await?;
    assert!(message.contains("pending sync"));
    assert_eq!(service.pending_sync_count(), 2);

    let offline_client = service
        .add_client("Carla", ClientCategory::Collaborator, None)
        .await?;
    assert!(offline_client.contains("pending sync"));
    service
        .register_consumption(
            "Carla",
            ClientCategory::Collaborator,
            ConsumptionEntry::new(dec!(25), "Baño", "PELUQUERIA"),
        )
        .await?;

    assert_eq!(service.sync_pending().await, 0);
    assert_eq!(service.pending_sync_count(), 2);

    service.backend().set_offline(false);
    assert_eq!(service.sync_pending().await, 3);
    assert_eq!(service.pending_sync_count(), 0);

    let (beto_movements, carla_movements) = service.backend().with_state(|s| {
        (s.movements["c1"].clone(), s.movements["c2"].clone())
    });
    assert_eq!(beto_movements.len(), 2);
    assert!(beto_movements[0].is_payment());
    assert_eq!(carla_movements.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_validation_errors_propagate() -> Result<()> {
    let mut service = service();
    service.add_client("Ana", ClientCategory::Reception, None).await?;

    let duplicate = service.add_client("Ana", ClientCategory::Reception, None).await;
    assert!(matches!(duplicate, Err(DebtorsError::DuplicateClient { .. })));

    let category = service
        .register_consumption(
            "Ana",
            ClientCategory::Reception,
            ConsumptionEntry::new(dec!(10), "Juguete", "JUGUETES"),
        )
        .await;
    assert!(matches!(category, Err(DebtorsError::CategoryNotAllowed(_))));

    let missing = service
        .register_payment("Nadie", ClientCategory::Reception, dec!(10), None)
        .await;
    assert!(matches!(missing, Err(DebtorsError::ClientNotFound(_))));
    assert_eq!(service.backend().with_state(|s| s.movements.len()), 0);
    Ok(())
}

#[tokio::test]
async fn test_hydrate_rebuilds_registry() -> Result<()> {
    let backend = MockBackend::default();
    backend.with_state(|s| {
        s.clients.push(RemoteClient {
            id: "7".to_string(),
            name: "Dani".to_string(),
            category: ClientCategory::Reception,
            credit_limit: dec!(800),
            opening_balance: dec!(50),
            monthly_payment_goal: Some(dec!(100)),
        });
        s.movements.insert(
            "7".to_string(),
            vec![
                Movement::consumption(date(2024, 1, 5), dec!(200), "Consulta", "SERVICIOS", None),
                Movement::payment(date(2024, 1, 20), dec!(120), "Pago"),
            ],
        );
    });

    let mut service = DebtorsService::new(backend, DebtorsConfig::default())?;
    service.add_client("Local", ClientCategory::Reception, None).await?;
    assert_eq!(service.hydrate().await?, 2);

    let (dani, _) = service.registry().find_client("Dani").unwrap();
    assert_eq!(dani.balance_as_of(date(2024, 1, 31)), dec!(130));
    assert_eq!(dani.monthly_payment_goal(), Some(dec!(100)));
    assert_eq!(dani.pending_sync().count(), 0);
    assert!(service.registry().find_client("Local").is_some());

    service.backend().set_offline(true);
    assert!(service.hydrate().await.is_err());
    assert_eq!(service.registry().client_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_hydrate_pushes_offline_changes_first() -> Result<()> {
    let mut service = service();
    service
        .add_client("Ana", ClientCategory::Reception, Some(dec!(1000)))
        .await?;

    service.backend().set_offline(true);
    service
        .register_consumption(
            "Ana",
            ClientCategory::Reception,
            ConsumptionEntry::new(dec!(300), "Consulta", "SERVICIOS"),
        )
        .await?;
    assert_eq!(service.pending_sync_count(), 1);

    service.backend().set_offline(false);
    assert_eq!(service.hydrate().await?, 1);
    let (ana, _) = service.registry().find_client("Ana").unwrap();
    assert_eq!(ana.current_balance(), dec!(300));
    assert_eq!(service.pending_sync_count(), 0);
    assert_eq!(service.backend().with_state(|s| s.movements["c1"].len()), 1);
    Ok(())
}

#[tokio::test]
async fn test_hydrate_refuses_to_drop_unsynced_changes() -> Result<()> {
    let mut service = service();
    service
        .add_client("Ana", ClientCategory::Reception, Some(dec!(1000)))
        .await?;

    service.backend().with_state(|s| s.reject_movements = true);
    service
        .register_consumption(
            "Ana",
            ClientCategory::Reception,
            ConsumptionEntry::new(dec!(300), "Consulta", "SERVICIOS"),
        )
        .await?;

    let result = service.hydrate().await;
    assert!(matches!(result, Err(DebtorsError::PendingSync(1))));
    let (ana, _) = service.registry().find_client("Ana").unwrap();
    assert_eq!(ana.current_balance(), dec!(300));
    assert_eq!(ana.pending_sync().count(), 1);

    service.backend().set_offline(true);
    service
        .add_client("Beto", ClientCategory::Administration, None)
        .await?;
    service.backend().set_offline(false);
    service.backend().with_state(|s| s.reject_movements = false);
    assert_eq!(service.hydrate().await?, 2);
    assert!(service.registry().find_client("Beto").unwrap().0.remote_id().is_some());
    Ok(())
}

#[tokio::test]
async fn test_service_calls_target_the_given_category() -> Result<()> {
    let mut service = service();
    service
        .add_client("Xavi", ClientCategory::Reception, Some(dec!(100)))
        .await?;
    service
        .add_client("Xavi", ClientCategory::Administration, Some(dec!(100)))
        .await?;

    service
        .register_consumption(
            "Xavi",
            ClientCategory::Administration,
            ConsumptionEntry::new(dec!(20), "Pienso", "ALIMENTACION"),
        )
        .await?;
    service
        .register_payment("Xavi", ClientCategory::Administration, dec!(5), None)
        .await?;
    service.set_payment_goal("Xavi", ClientCategory::Administration, dec!(50))?;

    let registry = service.registry();
    let admin = registry.get("Xavi", ClientCategory::Administration).unwrap();
    let reception = registry.get("Xavi", ClientCategory::Reception).unwrap();
    assert_eq!(admin.movements().len(), 2);
    assert_eq!(admin.current_balance(), dec!(15));
    assert_eq!(admin.monthly_payment_goal(), Some(dec!(50)));
    assert!(reception.movements().is_empty());
    assert_eq!(reception.monthly_payment_goal(), None);
    Ok(())
}

#[tokio::test]
async fn test_month_comparison_survives_failed_days() -> Result<()> {
    let backend = MockBackend::default();
    backend.with_state(|s| {
        s.days.insert(date(2024, 2, 10), vec![snapshot("1", "Ana López", dec!(100))]);
        s.days.insert(date(2024, 2, 11), vec![snapshot("2", "Beto", dec!(30))]);
        s.days.insert(
            date(2024, 3, 1),
            vec![snapshot("1", "Ana López", dec!(40)), snapshot("3", "Eva", dec!(25))],
        );
        s.days.insert(date(2024, 3, 2), vec![snapshot("1", "Ana López", dec!(20))]);
        s.failing_days.insert(date(2024, 3, 3));
        s.days.insert(date(2024, 3, 3), vec![snapshot("1", "Ana López", dec!(500))]);
    });

    let comparison = PeriodComparator::new(&backend)
        .compare(PeriodType::Month, date(2024, 3, 18))
        .await?;

    assert_eq!(comparison.current_period.to_string(), "2024-03");
    assert_eq!(comparison.prior_period.to_string(), "2024-02");
    assert_eq!(backend.with_state(|s| s.day_requests), 31 + 29);

    let by_key: BTreeMap<_, _> = comparison
        .rows
        .iter()
        .map(|row| (row.client_key.as_str(), row))
        .collect();
    assert_eq!(by_key["1"].current_debt, dec!(60));
    assert_eq!(by_key["1"].state, DebtState::Decreased);
    assert_eq!(by_key["1"].percent_variance, dec!(-40));
    assert_eq!(by_key["2"].state, DebtState::Settled);
    assert_eq!(by_key["2"].current_debt, Decimal::ZERO);
    assert_eq!(by_key["3"].state, DebtState::New);
    assert!(!by_key["3"].has_historical_records);

    assert_eq!(comparison.summary.total_current_debt, dec!(85));
    assert_eq!(comparison.summary.total_prior_debt, dec!(130));
    Ok(())
}

#[tokio::test]
async fn test_week_comparison_uses_iso_weeks() -> Result<()> {
    let backend = MockBackend::default();
    backend.with_state(|s| {
        s.days.insert(date(2024, 1, 1), vec![snapshot("1", "Ana", dec!(10))]);
        s.days.insert(date(2023, 12, 31), vec![snapshot("1", "Ana", dec!(10))]);
        s.days.insert(date(2023, 12, 25), vec![snapshot("1", "Ana", dec!(5))]);
    });

    let comparison = PeriodComparator::new(&backend)
        .compare(PeriodType::Week, date(2024, 1, 3))
        .await?;
    assert_eq!(comparison.current_period.to_string(), "2024-W01");
    assert_eq!(comparison.prior_period.to_string(), "2023-W52");
    assert_eq!(comparison.rows.len(), 1);
    assert_eq!(comparison.rows[0].current_debt, dec!(10));
    assert_eq!(comparison.rows[0].prior_debt, dec!(15));
    Ok(())
}

#[tokio::test]
async fn test_empty_current_period_is_an_error() {
    let backend = MockBackend::default();
    backend.with_state(|s| {
        s.days.insert(date(2024, 4, 30), vec![snapshot("1", "Ana", dec!(10))]);
        s.failing_days.insert(date(2024, 5, 2));
    });

    let result = PeriodComparator::new(&backend)
        .compare(PeriodType::Month, date(2024, 5, 9))
        .await;
    assert!(matches!(result, Err(DebtorsError::EmptyPeriod(ref key)) if key == "2024-05"));
}

#[tokio::test]
async fn test_day_comparison_prefers_precomputed_rows() -> Result<()> {
    let backend = MockBackend::default();
    backend.with_state(|s| {
        s.precomputed = vec![
            PrecomputedComparisonRow {
                client_id: Some("1".to_string()),
                client_name: "Ana".to_string(),
                current_debt: dec!(0),
                prior_debt: Some(dec!(75)),
                state: None,
            },
            PrecomputedComparisonRow {
                client_id: Some("2".to_string()),
                client_name: "Beto".to_string(),
                current_debt: dec!(12),
                prior_debt: Some(dec!(20)),
                state: Some("SALDADO".to_string()),
            },
        ];
    });

    let comparison = PeriodComparator::new(&backend)
        .compare(PeriodType::Day, date(2024, 6, 4))
        .await?;
    assert_eq!(backend.with_state(|s| s.day_requests), 0);
    assert_eq!(comparison.prior_period.to_string(), "2024-06-03");
    assert!(comparison.rows.iter().all(|r| r.state == DebtState::Settled));
    assert_eq!(comparison.summary.settled, 2);

    backend.with_state(|s| {
        s.precomputed.clear();
        s.days.insert(date(2024, 6, 4), vec![snapshot("1", "Ana", dec!(5))]);
    });
    let comparison = PeriodComparator::new(&backend)
        .compare(PeriodType::Day, date(2024, 6, 4))
        .await?;
    assert_eq!(backend.with_state(|s| s.day_requests), 2);
    assert_eq!(comparison.rows[0].state, DebtState::New);
    Ok(())
}

#[tokio::test]
async fn test_strict_matcher_through_service() -> Result<()> {
    let backend = MockBackend::default();
    backend.with_state(|s| {
        s.days.insert(
            date(2024, 7, 2),
            vec![DebtSnapshotRow {
                client_id: None,
                client_name: "Juan Pérez García".to_string(),
                debt: dec!(40),
                record_count: 1,
                state: None,
            }],
        );
        s.days.insert(
            date(2024, 7, 1),
            vec![DebtSnapshotRow {
                client_id: None,
                client_name: "juan pérez".to_string(),
                debt: dec!(60),
                record_count: 1,
                state: None,
            }],
        );
    });
    let service = DebtorsService::new(backend, DebtorsConfig::default())?;
    let period = PeriodKey::parse("2024-07-02")?;

    let lenient = service.compare_with(period, LenientMatcher).await?;
    assert_eq!(lenient.rows.len(), 1);
    assert_eq!(lenient.rows[0].state, DebtState::Decreased);

    let strict = service.compare_with(period, ExactKeyMatcher).await?;
    assert_eq!(strict.rows.len(), 2);
    assert_eq!(strict.summary.new_clients, 1);
    assert_eq!(strict.summary.settled, 1);
    Ok(())
}

#[tokio::test]
async fn test_ingest_and_submit_spreadsheets() -> Result<()> {
    let mut service = service();
    let january = "Fecha Albarán;Cliente;Total;Cobrado;Paciente\n\
                   05/01/2024;Ana López;120,50;20,50;Luna\n\
                   06/01/2024;Beto;80;80;Toby\n\
                   ;Total;200,50;100,50;\n";
    let february = "Cliente,Total,Deuda,Etiqueta\nCarla,45,45,\n";

    assert_eq!(service.ingest_csv("enero.csv", january.as_bytes())?, 2);
    assert_eq!(service.ingest_csv("febrero.csv", february.as_bytes())?, 1);
    assert!(service.ingest_csv("roto.csv", "a,b\n1,2\n".as_bytes()).is_err());
    assert_eq!(service.batch().rows().len(), 3);
    assert_eq!(service.batch().total_debt(), dec!(145));

    let relabelled = service.reconcile_labels(&[KnownClient {
        name: "carla".to_string(),
        label: Some("Colaborador".to_string()),
    }]);
    assert_eq!(relabelled, 1);

    let period = PeriodKey::parse("2024-01")?;
    assert_eq!(service.submit_batch(period).await?, 3);
    assert!(service.batch().is_empty());

    let submitted = service.backend().with_state(|s| s.batches.clone());
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].period_type, PeriodType::Month);
    assert_eq!(submitted[0].files, vec!["enero.csv", "febrero.csv"]);
    assert_eq!(submitted[0].rows[0].invoice_date, Some(date(2024, 1, 5)));

    let json = serde_json::to_value(&submitted[0])?;
    assert_eq!(json["periodo"], "2024-01");
    assert_eq!(json["registros"][0]["clienteNombre"], "Ana López");

    assert!(service.submit_batch(period).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_failed_submission_keeps_batch() -> Result<()> {
    let mut service = service();
    service.ingest_csv("marzo.csv", "Cliente,Total\nAna,10\n".as_bytes())?;
    service.backend().set_offline(true);
    assert!(service.submit_batch(PeriodKey::parse("2024-03")?).await.is_err());
    assert_eq!(service.batch().rows().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_export_with_comparison() -> Result<()> {
    let mut service = service();
    service
        .add_client("Ana", ClientCategory::Reception, Some(dec!(400)))
        .await?;
    service
        .register_consumption(
            "Ana",
            ClientCategory::Reception,
            ConsumptionEntry::new(dec!(150), "Vacuna", "SERVICIOS").on(date(2024, 8, 3)),
        )
        .await?;
    service.backend().with_state(|s| {
        s.days.insert(date(2024, 8, 3), vec![snapshot("c1", "Ana", dec!(150))]);
    });

    let comparison = service.compare(PeriodType::Month, date(2024, 8, 3)).await?;
    let path = std::env::temp_dir().join("clinic_debtors_export_test.json");
    let export = service.export_to(&path, date(2024, 8, 31), Some(comparison))?;

    let written = std::fs::read_to_string(&path)?;
    let restored: ComparativeExport = serde_json::from_str(&written)?;
    assert_eq!(restored, export);
    assert_eq!(restored.metrics.totals.debt, dec!(150));
    assert_eq!(restored.clients[0].remote_id.as_deref(), Some("c1"));
    assert_eq!(
        restored.comparison.as_ref().map(|c| c.summary.new_clients),
        Some(1)
    );

    std::fs::remove_file(&path)?;
    Ok(())
}

#[tokio::test]
async fn test_update_and_delete_clients() -> Result<()> {
    let mut service = service();
    service.add_client("Ana", ClientCategory::Reception, None).await?;
    service
        .update_credit_limit("Ana", ClientCategory::Reception, dec!(2500))
        .await?;
    assert_eq!(
        service.backend().with_state(|s| s.clients[0].credit_limit),
        dec!(2500)
    );

    let message = service.delete_client("Ana", ClientCategory::Reception).await?;
    assert!(message.contains("removed"));
    assert_eq!(service.registry().client_count(), 0);
    assert!(service.backend().with_state(|s| s.clients.is_empty()));
    Ok(())
}
