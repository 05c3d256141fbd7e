use crate::backend::DebtorsBackend;
use crate::error::{DebtorsError, Result};
use crate::schema::{DebtSnapshotRow, PrecomputedComparisonRow};
use crate::utils::{expand_period_to_days, round_percent, PeriodKey, PeriodType};
use chrono::NaiveDate;
use futures::future::join_all;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebtState {
    New,
    Settled,
    Increased,
    Decreased,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ComparativeRow {
    pub client_key: String,
    pub client_name: String,
    pub current_debt: Decimal,
    pub prior_debt: Decimal,
    pub variance: Decimal,
    pub percent_variance: Decimal,
    pub has_historical_records: bool,
    pub state: DebtState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ComparisonSummary {
    pub total_current_debt: Decimal,
    pub total_prior_debt: Decimal,
    pub total_variance: Decimal,
    pub new_clients: usize,
    pub settled: usize,
    pub increased: usize,
    pub decreased: usize,
    pub stable: usize,
}

impl ComparisonSummary {
    pub fn from_rows(rows: &[ComparativeRow]) -> Self {
        let mut summary = Self::default();
        for row in rows {
            summary.total_current_debt += row.current_debt;
            summary.total_prior_debt += row.prior_debt;
            match row.state {
                DebtState::New => summary.new_clients += 1,
                DebtState::Settled => summary.settled += 1,
                DebtState::Increased => summary.increased += 1,
                DebtState::Decreased => summary.decreased += 1,
                DebtState::Stable => summary.stable += 1,
            }
        }
        summary.total_variance = summary.total_current_debt - summary.total_prior_debt;
        summary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Comparison {
    pub period_type: PeriodType,
    pub current_period: PeriodKey,
    pub prior_period: PeriodKey,
    pub rows: Vec<ComparativeRow>,
    pub summary: ComparisonSummary,
}

/// Decides whether two client names refer to the same client across
/// snapshots.
pub trait ClientMatcher {
    fn matches(&self, current: &str, prior: &str) -> bool;
}

/// Case-insensitive match that also accepts substring containment in
/// either direction, absorbing naming drift between uploads.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientMatcher;

impl ClientMatcher for LenientMatcher {
    fn matches(&self, current: &str, prior: &str) -> bool {
        let current = current.trim().to_lowercase();
        let prior = prior.trim().to_lowercase();
        if current.is_empty() || prior.is_empty() {
            return false;
        }
        current == prior || current.contains(&prior) || prior.contains(&current)
    }
}

/// Equality after trimming, case folding and whitespace collapsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactKeyMatcher;

impl ClientMatcher for ExactKeyMatcher {
    fn matches(&self, current: &str, prior: &str) -> bool {
        let normalize = |s: &str| {
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        };
        let current = normalize(current);
        !current.is_empty() && current == normalize(prior)
    }
}

impl<F> ClientMatcher for F
where
    F: Fn(&str, &str) -> bool,
{
    fn matches(&self, current: &str, prior: &str) -> bool {
        self(current, prior)
    }
}

/// One client's debt aggregated over every day of a period.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientDebt {
    pub client_id: Option<String>,
    pub client_name: String,
    pub debt: Decimal,
    pub record_count: u32,
    /// State reported by the backend, kept only when every reporting day
    /// agrees.
    pub reported_state: Option<String>,
}

fn client_key(client_id: Option<&str>, client_name: &str) -> String {
    match client_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => client_name.trim().to_string(),
    }
}

/// Folds day snapshots into one aggregate per client key. The result does
/// not depend on the order of `days` or of rows within a day.
pub fn fold_snapshots<I>(days: I) -> BTreeMap<String, ClientDebt>
where
    I: IntoIterator<Item = Vec<DebtSnapshotRow>>,
{
    let mut aggregate: BTreeMap<String, ClientDebt> = BTreeMap::new();
    let mut conflicting_states: BTreeSet<String> = BTreeSet::new();

    for row in days.into_iter().flatten() {
        let key = client_key(row.client_id.as_deref(), &row.client_name);
        let state = row.state.map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty());

        match aggregate.get_mut(&key) {
            Some(entry) => {
                entry.debt += row.debt;
                entry.record_count += row.record_count;
                if row.client_name.trim() < entry.client_name.as_str() {
                    entry.client_name = row.client_name.trim().to_string();
                }
                if let Some(state) = state {
                    match &entry.reported_state {
                        Some(existing) if *existing != state => {
                            conflicting_states.insert(key.clone());
                        }
                        Some(_) => {}
                        None => entry.reported_state = Some(state),
                    }
                }
            }
            None => {
                aggregate.insert(
                    key.clone(),
                    ClientDebt {
                        client_id: row.client_id.filter(|id| !id.trim().is_empty()),
                        client_name: row.client_name.trim().to_string(),
                        debt: row.debt,
                        record_count: row.record_count,
                        reported_state: state,
                    },
                );
            }
        }
    }

    for key in conflicting_states {
        if let Some(entry) = aggregate.get_mut(&key) {
            entry.reported_state = None;
        }
    }

    aggregate
}

fn is_settled_marker(state: &str) -> bool {
    matches!(
        state.trim().to_uppercase().as_str(),
        "SETTLED" | "SALDADO" | "LIQUIDADO" | "PAGADO"
    )
}

/// Classification shared by the day-expansion and precomputed paths.
/// An explicit settled marker from the backend wins over the derived state.
pub fn classify(prior_debt: Option<Decimal>, current_debt: Decimal, reported_state: Option<&str>) -> DebtState {
    let Some(prior_debt) = prior_debt else {
        return DebtState::New;
    };

    if reported_state.is_some_and(is_settled_marker) {
        return DebtState::Settled;
    }

    if prior_debt > Decimal::ZERO && current_debt.is_zero() {
        return DebtState::Settled;
    }

    let variance = current_debt - prior_debt;
    if variance > Decimal::ZERO {
        DebtState::Increased
    } else if variance < Decimal::ZERO {
        DebtState::Decreased
    } else {
        DebtState::Stable
    }
}

pub fn percent_variance(current_debt: Decimal, prior_debt: Decimal) -> Decimal {
    let variance = current_debt - prior_debt;
    if prior_debt > Decimal::ZERO {
        round_percent(variance / prior_debt * Decimal::ONE_HUNDRED)
    } else if variance > Decimal::ZERO {
        Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}

fn build_row(
    client_key: String,
    client_name: String,
    current_debt: Decimal,
    prior_debt: Option<Decimal>,
    reported_state: Option<&str>,
) -> ComparativeRow {
    let state = classify(prior_debt, current_debt, reported_state);
    let prior = prior_debt.unwrap_or(Decimal::ZERO);
    ComparativeRow {
        client_key,
        client_name,
        current_debt,
        prior_debt: prior,
        variance: current_debt - prior,
        percent_variance: percent_variance(current_debt, prior),
        has_historical_records: prior_debt.is_some(),
        state,
    }
}

/// Diffs two aggregated snapshots.
///
/// Current clients are joined to prior ones by key first, then through
/// `matcher` on display names; each prior client is consumed at most once.
/// Among several accepted names, a case-insensitive equal name wins, then
/// the one closest in length.
/// Prior clients left unmatched that still carried debt are reported as
/// settled with zero current debt.
pub fn diff_snapshots<M: ClientMatcher + ?Sized>(
    current: &BTreeMap<String, ClientDebt>,
    prior: &BTreeMap<String, ClientDebt>,
    matcher: &M,
) -> Vec<ComparativeRow> {
    let mut consumed: BTreeSet<&str> = BTreeSet::new();
    let mut rows = Vec::with_capacity(current.len());

    for (key, client) in current {
        let matched = match prior.get_key_value(key.as_str()) {
            Some((prior_key, prior_client)) if !consumed.contains(prior_key.as_str()) => {
                Some((prior_key, prior_client))
            }
            _ => {
                let wanted = client.client_name.trim().to_lowercase();
                prior
                    .iter()
                    .filter(|(prior_key, prior_client)| {
                        !consumed.contains(prior_key.as_str())
                            && !current.contains_key(prior_key.as_str())
                            && matcher.matches(&client.client_name, &prior_client.client_name)
                    })
                    .min_by_key(|(_, prior_client)| {
                        let name = prior_client.client_name.trim().to_lowercase();
                        (name != wanted, name.len().abs_diff(wanted.len()))
                    })
            }
        };

        let prior_debt = match matched {
            Some((prior_key, prior_client)) => {
                consumed.insert(prior_key.as_str());
                Some(prior_client.debt)
            }
            None => None,
        };

        rows.push(build_row(
            key.clone(),
            client.client_name.clone(),
            client.debt,
            prior_debt,
            client.reported_state.as_deref(),
        ));
    }

    for (key, client) in prior {
        if consumed.contains(key.as_str()) || client.debt <= Decimal::ZERO {
            continue;
        }
        rows.push(build_row(
            key.clone(),
            client.client_name.clone(),
            Decimal::ZERO,
            Some(client.debt),
            None,
        ));
    }

    rows
}

/// Convenience over [`fold_snapshots`] + [`diff_snapshots`] for two single
/// snapshots.
pub fn compare_snapshots<M: ClientMatcher + ?Sized>(
    current: &[DebtSnapshotRow],
    prior: &[DebtSnapshotRow],
    matcher: &M,
) -> Vec<ComparativeRow> {
    let current = fold_snapshots(std::iter::once(current.to_vec()));
    let prior = fold_snapshots(std::iter::once(prior.to_vec()));
    diff_snapshots(&current, &prior, matcher)
}

fn rows_from_precomputed(rows: Vec<PrecomputedComparisonRow>) -> Vec<ComparativeRow> {
    rows.into_iter()
        .map(|row| {
            build_row(
                client_key(row.client_id.as_deref(), &row.client_name),
                row.client_name.trim().to_string(),
                row.current_debt,
                row.prior_debt,
                row.state.as_deref(),
            )
        })
        .collect()
}

/// Compares the debt of one period against the immediately preceding one.
///
/// The backend only stores day snapshots, so weeks and months are expanded
/// to their days, fetched concurrently and folded per client before
/// diffing. A failed day counts as an empty day; the comparison only fails
/// when the whole current period comes back empty.
pub struct PeriodComparator<'a, B, M = LenientMatcher> {
    backend: &'a B,
    matcher: M,
}

impl<'a, B: DebtorsBackend> PeriodComparator<'a, B, LenientMatcher> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            matcher: LenientMatcher,
        }
    }
}

impl<'a, B: DebtorsBackend, M: ClientMatcher> PeriodComparator<'a, B, M> {
    pub fn with_matcher<N: ClientMatcher>(self, matcher: N) -> PeriodComparator<'a, B, N> {
        PeriodComparator {
            backend: self.backend,
            matcher,
        }
    }

    pub async fn compare(&self, period_type: PeriodType, reference: NaiveDate) -> Result<Comparison> {
        self.compare_period(PeriodKey::containing(period_type, reference))
            .await
    }

    pub async fn compare_period(&self, current: PeriodKey) -> Result<Comparison> {
        let prior = current.previous()?;
        info!("Comparing debts for {} against {}", current, prior);

        let rows = match current.period_type() {
            PeriodType::Day => match self.precomputed_rows(&current, &prior).await {
                Some(rows) => rows,
                None => self.expanded_rows(&current, &prior).await?,
            },
            PeriodType::Week | PeriodType::Month => self.expanded_rows(&current, &prior).await?,
        };

        let summary = ComparisonSummary::from_rows(&rows);
        Ok(Comparison {
            period_type: current.period_type(),
            current_period: current,
            prior_period: prior,
            rows,
            summary,
        })
    }

    async fn precomputed_rows(&self, current: &PeriodKey, prior: &PeriodKey) -> Option<Vec<ComparativeRow>> {
        match self
            .backend
            .precomputed_comparison(current.start(), prior.start())
            .await
        {
            Ok(rows) if !rows.is_empty() => {
                debug!("Using precomputed comparison with {} rows", rows.len());
                Some(rows_from_precomputed(rows))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(
                    "Precomputed comparison for {} unavailable, fetching days instead: {}",
                    current, e
                );
                None
            }
        }
    }

    async fn expanded_rows(&self, current: &PeriodKey, prior: &PeriodKey) -> Result<Vec<ComparativeRow>> {
        let (current_days, prior_days) =
            futures::join!(self.fetch_days(current), self.fetch_days(prior));
        let current_days = current_days?;
        let prior_days = prior_days?;

        if current_days.iter().all(Vec::is_empty) {
            return Err(DebtorsError::EmptyPeriod(current.to_string()));
        }

        let current_debts = fold_snapshots(current_days);
        let prior_debts = fold_snapshots(prior_days);
        debug!(
            "Folded {} current and {} prior clients",
            current_debts.len(),
            prior_debts.len()
        );

        Ok(diff_snapshots(&current_debts, &prior_debts, &self.matcher))
    }

    async fn fetch_days(&self, key: &PeriodKey) -> Result<Vec<Vec<DebtSnapshotRow>>> {
        let days = expand_period_to_days(key)?;
        let fetches = days.into_iter().map(|day| async move {
            match self.backend.debts_for_day(day).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Debt snapshot for {} failed, treating as empty: {}", day, e);
                    Vec::new()
                }
            }
        });
        Ok(join_all(fetches).await)
    }
}
