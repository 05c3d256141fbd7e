use crate::config::LedgerPolicy;
use crate::error::{DebtorsError, Result};
use crate::schema::{ClientCategory, Movement, RemoteClient, UNSPECIFIED_SUB_ACCOUNT};
use crate::utils::{first_day_of_month, is_in_month, round_percent, today};
use chrono::{Days, NaiveDate};
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// A consumption to be appended to a ledger. Defaults to today's date and no
/// sub-account.
#[derive(Debug, Clone)]
pub struct ConsumptionEntry {
    pub amount: Decimal,
    pub description: String,
    pub category: String,
    pub sub_account: Option<String>,
    pub date: Option<NaiveDate>,
}

impl ConsumptionEntry {
    pub fn new(amount: Decimal, description: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            amount,
            description: description.into(),
            category: category.into(),
            sub_account: None,
            date: None,
        }
    }

    /// Ties the consumption to a sub-account, typically a pet.
    pub fn for_sub_account(mut self, sub_account: impl Into<String>) -> Self {
        self.sub_account = Some(sub_account.into());
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatementState {
    Improved,
    Worsened,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRecord {
    pub year: i32,
    pub month: u32,
    pub opening_balance: Decimal,
    /// Movements dated within the month, oldest first.
    pub movements: Vec<Movement>,
    pub total_consumption: Decimal,
    /// Sum of payment magnitudes (positive).
    pub total_payments: Decimal,
    pub closing_balance: Decimal,
    pub state: StatementState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoalProgress {
    pub goal: Decimal,
    pub paid: Decimal,
    /// Capped at 100.
    pub progress_percent: Decimal,
    pub met_goal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDashboard {
    pub client_name: String,
    pub category: ClientCategory,
    pub credit_limit: Decimal,
    pub current_balance: Decimal,
    pub available_credit: Decimal,
    pub statement: StatementRecord,
    pub category_breakdown: BTreeMap<String, Decimal>,
    pub sub_account_breakdown: BTreeMap<String, Decimal>,
    pub alerts: Vec<String>,
    pub goal_progress: Option<GoalProgress>,
    pub recommendations: Vec<String>,
}

/// Authoritative local ledger for one client.
///
/// Movements are append-only. Balances are never cached: every query folds
/// the movement log, so any balance can be replayed from `opening_balance`
/// and the movements dated on or before the target day.
///
/// Once the ledger has a `remote_id`, every append is also queued in an
/// outbox that the caller drains towards the backend. A failed push never
/// rolls back the local append.
#[derive(Debug, Clone)]
pub struct ClientLedger {
    client_name: String,
    client_category: ClientCategory,
    credit_limit: Decimal,
    opening_balance: Decimal,
    movements: Vec<Movement>,
    monthly_payment_goal: Option<Decimal>,
    remote_id: Option<String>,
    pending_sync: VecDeque<Movement>,
    policy: Arc<LedgerPolicy>,
}

impl ClientLedger {
    pub fn new(
        client_name: impl Into<String>,
        client_category: ClientCategory,
        credit_limit: Decimal,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            client_category,
            credit_limit,
            opening_balance: Decimal::ZERO,
            movements: Vec::new(),
            monthly_payment_goal: None,
            remote_id: None,
            pending_sync: VecDeque::new(),
            policy: Arc::new(LedgerPolicy::default()),
        }
    }

    pub fn with_policy(mut self, policy: Arc<LedgerPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_opening_balance(mut self, opening_balance: Decimal) -> Self {
        self.opening_balance = opening_balance;
        self
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Rebuilds a ledger from its persisted client record and movement
    /// history. Nothing is queued for sync: the backend already has it.
    pub fn from_remote(
        client: &RemoteClient,
        movements: Vec<Movement>,
        policy: Arc<LedgerPolicy>,
    ) -> Self {
        let mut ledger = Self::new(client.name.clone(), client.category, client.credit_limit)
            .with_policy(policy)
            .with_opening_balance(client.opening_balance)
            .with_remote_id(client.id.clone());
        ledger.monthly_payment_goal = client.monthly_payment_goal;
        ledger.movements = movements.into_iter().map(Movement::normalized).collect();
        ledger
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn client_category(&self) -> ClientCategory {
        self.client_category
    }

    pub fn credit_limit(&self) -> Decimal {
        self.credit_limit
    }

    pub fn set_credit_limit(&mut self, credit_limit: Decimal) {
        self.credit_limit = credit_limit;
    }

    pub fn opening_balance(&self) -> Decimal {
        self.opening_balance
    }

    /// Movements in append order.
    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    /// Records the backend identifier once the client has been persisted.
    /// Movements appended before this point stay local-only.
    pub fn set_remote_id(&mut self, remote_id: impl Into<String>) {
        self.remote_id = Some(remote_id.into());
    }

    pub fn monthly_payment_goal(&self) -> Option<Decimal> {
        self.monthly_payment_goal
    }

    pub fn register_consumption(&mut self, entry: ConsumptionEntry) -> Result<String> {
        if entry.amount < Decimal::ZERO {
            return Err(DebtorsError::InvalidAmount(entry.amount));
        }

        if !self.policy.is_allowed_category(&entry.category) {
            return Err(DebtorsError::CategoryNotAllowed(entry.category));
        }

        let balance = self.current_balance();
        if balance + entry.amount > self.credit_limit {
            return Err(DebtorsError::CreditLimitExceeded {
                client: self.client_name.clone(),
                balance,
                amount: entry.amount,
                limit: self.credit_limit,
            });
        }

        let movement = Movement::consumption(
            entry.date.unwrap_or_else(today),
            entry.amount,
            entry.description,
            entry.category.trim().to_uppercase(),
            entry.sub_account,
        );
        let message = format!(
            "Consumption of {} registered for {}",
            movement.magnitude(),
            self.client_name
        );
        self.append(movement);
        Ok(message)
    }

    /// Payments have no upper bound and always succeed locally.
    pub fn register_payment(&mut self, amount: Decimal, date: Option<NaiveDate>) -> Result<String> {
        let movement = Movement::payment(date.unwrap_or_else(today), amount, "Payment");
        let message = format!(
            "Payment of {} registered for {}",
            movement.magnitude(),
            self.client_name
        );
        self.append(movement);
        Ok(message)
    }

    fn append(&mut self, movement: Movement) {
        debug!(
            "Appending {:?} of {} to ledger of {}",
            movement.kind, movement.amount, self.client_name
        );
        if self.remote_id.is_some() {
            self.pending_sync.push_back(movement.clone());
        }
        self.movements.push(movement);
    }

    /// Movements appended since the last drain that the backend has not
    /// acknowledged yet.
    pub fn pending_sync(&self) -> impl Iterator<Item = &Movement> {
        self.pending_sync.iter()
    }

    pub fn take_pending_sync(&mut self) -> Vec<Movement> {
        self.pending_sync.drain(..).collect()
    }

    /// Puts movements whose push failed back at the front of the outbox,
    /// preserving their original order.
    pub fn requeue_sync(&mut self, movements: Vec<Movement>) {
        for movement in movements.into_iter().rev() {
            self.pending_sync.push_front(movement);
        }
    }

    /// `opening_balance` plus the signed sum of every movement dated on or
    /// before `date`. Append order is irrelevant.
    pub fn balance_as_of(&self, date: NaiveDate) -> Decimal {
        self.movements
            .iter()
            .filter(|m| m.date <= date)
            .fold(self.opening_balance, |acc, m| acc + m.amount)
    }

    pub fn current_balance(&self) -> Decimal {
        self.balance_as_of(today())
    }

    fn movements_in_month(&self, year: i32, month: u32) -> impl Iterator<Item = &Movement> {
        self.movements
            .iter()
            .filter(move |m| is_in_month(m.date, year, month))
    }

    pub fn monthly_statement(&self, year: i32, month: u32) -> Result<StatementRecord> {
        let month_start = first_day_of_month(year, month)?;
        let opening_balance = match month_start.checked_sub_days(Days::new(1)) {
            Some(day_before) => self.balance_as_of(day_before),
            None => self.opening_balance,
        };

        let mut movements: Vec<Movement> = self.movements_in_month(year, month).cloned().collect();
        movements.sort_by_key(|m| m.date);

        let total_consumption: Decimal = movements
            .iter()
            .filter(|m| m.is_consumption())
            .map(Movement::magnitude)
            .sum();
        let total_payments: Decimal = movements
            .iter()
            .filter(|m| m.is_payment())
            .map(Movement::magnitude)
            .sum();

        let closing_balance = opening_balance + total_consumption - total_payments;
        let state = if total_payments - total_consumption > Decimal::ZERO {
            StatementState::Improved
        } else {
            StatementState::Worsened
        };

        Ok(StatementRecord {
            year,
            month,
            opening_balance,
            movements,
            total_consumption,
            total_payments,
            closing_balance,
            state,
        })
    }

    pub fn category_breakdown(&self, year: i32, month: u32) -> Result<BTreeMap<String, Decimal>> {
        first_day_of_month(year, month)?;
        let mut breakdown = BTreeMap::new();
        for movement in self.movements_in_month(year, month).filter(|m| m.is_consumption()) {
            *breakdown
                .entry(movement.category.clone())
                .or_insert(Decimal::ZERO) += movement.magnitude();
        }
        Ok(breakdown)
    }

    pub fn sub_account_breakdown(&self, year: i32, month: u32) -> Result<BTreeMap<String, Decimal>> {
        first_day_of_month(year, month)?;
        let mut breakdown = BTreeMap::new();
        for movement in self.movements_in_month(year, month).filter(|m| m.is_consumption()) {
            let key = movement
                .sub_account
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(UNSPECIFIED_SUB_ACCOUNT)
                .to_string();
            *breakdown.entry(key).or_insert(Decimal::ZERO) += movement.magnitude();
        }
        Ok(breakdown)
    }

    /// Advisory checks on the current balance. Never blocks anything.
    pub fn alerts(&self) -> Vec<String> {
        let balance = self.current_balance();
        let mut alerts = Vec::new();

        if balance > self.credit_limit * self.policy.credit_alert_ratio {
            alerts.push(format!(
                "Balance {} is above {}% of the credit limit {}",
                balance,
                (self.policy.credit_alert_ratio * Decimal::ONE_HUNDRED).normalize(),
                self.credit_limit
            ));
        }

        if balance > self.policy.high_balance_threshold {
            alerts.push(format!(
                "High balance: {} exceeds {}",
                balance, self.policy.high_balance_threshold
            ));
        }

        alerts
    }

    pub fn set_payment_goal(&mut self, amount: Decimal) {
        self.monthly_payment_goal = Some(amount.abs());
    }

    /// `None` when no goal has been set.
    pub fn payment_goal_progress(&self, year: i32, month: u32) -> Result<Option<GoalProgress>> {
        first_day_of_month(year, month)?;
        let Some(goal) = self.monthly_payment_goal else {
            return Ok(None);
        };

        let paid: Decimal = self
            .movements_in_month(year, month)
            .filter(|m| m.is_payment())
            .map(Movement::magnitude)
            .sum();

        let progress_percent = if goal > Decimal::ZERO {
            round_percent((paid / goal * Decimal::ONE_HUNDRED).min(Decimal::ONE_HUNDRED))
        } else {
            Decimal::ONE_HUNDRED
        };

        Ok(Some(GoalProgress {
            goal,
            paid,
            progress_percent,
            met_goal: paid >= goal,
        }))
    }

    fn recommendations(
        &self,
        statement: &StatementRecord,
        goal: Option<&GoalProgress>,
        balance: Decimal,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();

        if statement.total_consumption > Decimal::ZERO
            && statement.total_consumption > statement.total_payments * self.policy.high_spend_ratio
        {
            recommendations.push(format!(
                "High spend: consumption {} is more than {}x payments {}",
                statement.total_consumption,
                self.policy.high_spend_ratio.normalize(),
                statement.total_payments
            ));
        }

        if statement.total_payments.is_zero() && statement.closing_balance > Decimal::ZERO {
            recommendations.push("No payments this month: schedule a payment".to_string());
        }

        if let Some(goal) = goal.filter(|g| !g.met_goal) {
            recommendations.push(format!(
                "Payment goal not met: {} of {} paid",
                goal.paid, goal.goal
            ));
        }

        if balance > self.credit_limit * self.policy.credit_alert_ratio {
            recommendations.push("Balance close to the credit limit: agree a payment plan".to_string());
        }

        if statement.state == StatementState::Improved {
            recommendations.push("Balance improved this month: keep the current payment pace".to_string());
        }

        recommendations
    }

    pub fn dashboard(&self, year: i32, month: u32) -> Result<ClientDashboard> {
        let statement = self.monthly_statement(year, month)?;
        let goal_progress = self.payment_goal_progress(year, month)?;
        let current_balance = self.current_balance();
        let recommendations =
            self.recommendations(&statement, goal_progress.as_ref(), current_balance);

        Ok(ClientDashboard {
            client_name: self.client_name.clone(),
            category: self.client_category,
            credit_limit: self.credit_limit,
            current_balance,
            available_credit: (self.credit_limit - current_balance).max(Decimal::ZERO),
            category_breakdown: self.category_breakdown(year, month)?,
            sub_account_breakdown: self.sub_account_breakdown(year, month)?,
            alerts: self.alerts(),
            goal_progress,
            recommendations,
            statement,
        })
    }
}
