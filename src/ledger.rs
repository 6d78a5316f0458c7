// 💰 Ledger - A player's gold, income, loans and investments
//
// Balance never goes negative: every operation validates first and only then
// mutates, so a rejected call leaves the ledger exactly as it was.
//
// Transactions are append-only and chronological. Loans and investments are
// only removed on full repayment / collection; the rest keep their order.

use crate::clock::{days_between, Clock};
use crate::error::GameError;
use crate::money::{format_gold, percent_of, round_gold, Gold};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// 10% income tax (original game constant)
pub fn default_tax_rate() -> Decimal {
    Decimal::new(10, 2)
}

/// 2% annual inflation (original game constant)
pub fn default_inflation_rate() -> Decimal {
    Decimal::new(2, 2)
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Earn,
    Spend,
    Loan,
    LoanRepayment,
    Investment,
    InvestmentReturn,
    Income,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Earn => "earn",
            TransactionKind::Spend => "spend",
            TransactionKind::Loan => "loan",
            TransactionKind::LoanRepayment => "loan repayment",
            TransactionKind::Investment => "investment",
            TransactionKind::InvestmentReturn => "investment return",
            TransactionKind::Income => "income",
        }
    }

    /// Does this kind add gold to the balance?
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TransactionKind::Earn
                | TransactionKind::Loan
                | TransactionKind::InvestmentReturn
                | TransactionKind::Income
        )
    }
}

/// One entry of the chronological log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: TransactionKind,
    pub amount: Gold,
    /// Source (earnings) or reason (spending)
    pub memo: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    fn new(kind: TransactionKind, amount: Gold, memo: Option<&str>, timestamp: DateTime<Utc>) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            amount,
            memo: memo.map(str::to_string),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub amount: Gold,
    pub reason: String,
    pub date: DateTime<Utc>,
}

// ============================================================================
// INCOME SOURCES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    /// Days covered by one payout
    pub fn period_days(&self) -> u32 {
        match self {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
            Frequency::Monthly => 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeSource {
    pub amount: Gold,
    pub frequency: Frequency,
}

impl IncomeSource {
    /// Gross payout over `days`, pro rata (unrounded); `None` on overflow
    pub fn payout_for(&self, days: u32) -> Option<Gold> {
        self.amount
            .checked_mul(Decimal::from(days))?
            .checked_div(Decimal::from(self.frequency.period_days()))
    }
}

// ============================================================================
// LOANS & INVESTMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub principal_remaining: Gold,
    pub interest_rate_pct: Decimal,
    pub term_days: u32,
    pub date_taken: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub amount: Gold,
    pub expected_return_pct: Decimal,
    pub risk_level: RiskLevel,
    pub date_invested: DateTime<Utc>,
}

impl Investment {
    /// Principal plus expected return; deterministic regardless of risk
    ///
    /// `None` when the return does not fit in a `Gold`.
    pub fn payout(&self) -> Option<Gold> {
        let gain = percent_of(self.amount, self.expected_return_pct)?;
        self.amount.checked_add(gain).map(round_gold)
    }
}

/// Loan projection at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanSummary {
    pub principal_remaining: Gold,
    pub interest_rate_pct: Decimal,
    pub term_days: u32,
    /// Negative once the term has run out
    pub remaining_days: i64,
}

/// Investment projection at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestmentSummary {
    pub amount: Gold,
    pub expected_return_pct: Decimal,
    pub risk_level: RiskLevel,
    pub days_invested: i64,
    /// `None` if the payout would overflow
    pub projected_payout: Option<Gold>,
}

// ============================================================================
// RECEIPTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanReceipt {
    pub index: usize,
    pub amount: Gold,
    pub interest_rate_pct: Decimal,
    pub term_days: u32,
    pub balance: Gold,
}

impl fmt::Display for LoanReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Took a loan of {} gold at {}% interest for {} days.",
            format_gold(self.amount),
            self.interest_rate_pct.normalize(),
            self.term_days
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Repayment {
    /// Loan still open with this much principal left
    Partial { paid: Gold, remaining: Gold },
    /// Loan removed from the book
    Full { paid: Gold, balance: Gold },
}

impl Repayment {
    pub fn is_full(&self) -> bool {
        matches!(self, Repayment::Full { .. })
    }
}

impl fmt::Display for Repayment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repayment::Partial { paid, remaining } => write!(
                f,
                "Repaid {} gold towards loan. Remaining loan amount: {}",
                format_gold(*paid),
                format_gold(*remaining)
            ),
            Repayment::Full { balance, .. } => {
                write!(f, "Loan fully repaid. Remaining gold: {}", format_gold(*balance))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestmentReceipt {
    pub index: usize,
    pub amount: Gold,
    pub expected_return_pct: Decimal,
    pub risk_level: RiskLevel,
    pub balance: Gold,
}

impl fmt::Display for InvestmentReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invested {} gold with expected return of {}% (Risk level: {})",
            format_gold(self.amount),
            self.expected_return_pct.normalize(),
            self.risk_level.as_str()
        )
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// Per-player economy state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    balance: Gold,
    income_sources: BTreeMap<String, IncomeSource>,
    transactions: Vec<Transaction>,
    expenses: Vec<Expense>,
    loans: Vec<Loan>,
    investments: Vec<Investment>,
    tax_rate: Decimal,
    inflation_rate: Decimal,
}

impl Ledger {
    /// Ledger with the default 10% tax and 2% inflation
    pub fn new(initial: Gold) -> Self {
        Ledger::with_rates(initial, default_tax_rate(), default_inflation_rate())
    }

    /// Ledger with configured rates (fractions, e.g. 0.10)
    ///
    /// A negative `initial` is clamped to zero.
    pub fn with_rates(initial: Gold, tax_rate: Decimal, inflation_rate: Decimal) -> Self {
        Ledger {
            balance: round_gold(initial.max(Decimal::ZERO)),
            income_sources: BTreeMap::new(),
            transactions: Vec::new(),
            expenses: Vec::new(),
            loans: Vec::new(),
            investments: Vec::new(),
            tax_rate,
            inflation_rate,
        }
    }

    fn after_tax(&self, gross: Gold) -> Option<Gold> {
        gross.checked_mul(Decimal::ONE.checked_sub(self.tax_rate)?)
    }

    /// Balance after crediting `amount`, or `InvalidAmount` if it would overflow
    fn credited(&self, amount: Gold) -> Result<Gold, GameError> {
        self.balance.checked_add(amount).ok_or_else(|| {
            warn!(amount = %amount, balance = %self.balance, "credit overflows balance");
            GameError::InvalidAmount
        })
    }

    fn ensure_affordable(&self, amount: Gold) -> Result<(), GameError> {
        if amount > self.balance {
            warn!(needed = %amount, available = %self.balance, "insufficient gold");
            return Err(GameError::InsufficientFunds {
                needed: amount,
                available: self.balance,
            });
        }
        Ok(())
    }

    fn record(&mut self, kind: TransactionKind, amount: Gold, memo: Option<&str>, now: DateTime<Utc>) {
        debug!(kind = kind.as_str(), amount = %amount, balance = %self.balance, "ledger transaction");
        self.transactions.push(Transaction::new(kind, amount, memo, now));
    }

    // ========================================================================
    // EARNING & SPENDING
    // ========================================================================

    /// Credit `amount` less tax; returns the new balance
    pub fn earn_gold(&mut self, amount: Gold, source: &str, clock: &dyn Clock) -> Result<Gold, GameError> {
        let taxed = self.after_tax(round_gold(amount)).map(round_gold);
        let Some(taxed) = taxed.filter(|taxed| *taxed > Decimal::ZERO) else {
            warn!(amount = %amount, source, "rejected earning");
            return Err(GameError::InvalidAmount);
        };
        let balance = self.credited(taxed)?;
        let now = clock.now();

        self.balance = balance;
        self.record(TransactionKind::Earn, taxed, Some(source), now);

        Ok(self.balance)
    }

    /// Debit `amount`; returns the new balance
    pub fn spend_gold(&mut self, amount: Gold, reason: &str, clock: &dyn Clock) -> Result<Gold, GameError> {
        self.spend_at(amount, reason, clock.now())
    }

    /// `spend_gold` at an already-read time, for operations that pin `now` once
    pub(crate) fn spend_at(&mut self, amount: Gold, reason: &str, now: DateTime<Utc>) -> Result<Gold, GameError> {
        let amount = round_gold(amount);
        if amount <= Decimal::ZERO {
            warn!(amount = %amount, reason, "rejected spending");
            return Err(GameError::InvalidAmount);
        }
        self.ensure_affordable(amount)?;

        self.balance -= amount;
        self.expenses.push(Expense {
            amount,
            reason: reason.to_string(),
            date: now,
        });
        self.record(TransactionKind::Spend, amount, Some(reason), now);

        Ok(self.balance)
    }

    // ========================================================================
    // INCOME SOURCES
    // ========================================================================

    /// Insert or replace a recurring income source
    pub fn add_income_source(&mut self, name: &str, amount: Gold, frequency: Frequency) -> Result<(), GameError> {
        if amount <= Decimal::ZERO {
            return Err(GameError::InvalidAmount);
        }
        debug!(name, amount = %amount, frequency = frequency.as_str(), "income source added");
        self.income_sources
            .insert(name.to_string(), IncomeSource { amount, frequency });
        Ok(())
    }

    pub fn remove_income_source(&mut self, name: &str) -> Result<IncomeSource, GameError> {
        self.income_sources
            .remove(name)
            .ok_or_else(|| GameError::NotFound(format!("Income source {}", name)))
    }

    /// Projected after-tax income over `days` (pure, unrounded)
    ///
    /// Weekly sources pay `days / 7` of their amount, monthly `days / 30`.
    /// Fails with `InvalidAmount` if the total does not fit in a `Gold`.
    pub fn calculate_total_income(&self, days: u32) -> Result<Gold, GameError> {
        self.income_sources
            .values()
            .try_fold(Decimal::ZERO, |total, source| {
                source.payout_for(days).and_then(|payout| total.checked_add(payout))
            })
            .and_then(|gross| self.after_tax(gross))
            .ok_or(GameError::InvalidAmount)
    }

    /// Credit `days` worth of every income source; returns the net amount
    pub fn pay_income(&mut self, days: u32, clock: &dyn Clock) -> Result<Gold, GameError> {
        let net = round_gold(self.calculate_total_income(days)?);
        if net <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let balance = self.credited(net)?;
        let now = clock.now();
        let memo = format!("{} day(s) of income", days);

        self.balance = balance;
        self.record(TransactionKind::Income, net, Some(&memo), now);
        Ok(net)
    }

    // ========================================================================
    // LOANS
    // ========================================================================

    pub fn take_loan(
        &mut self,
        amount: Gold,
        interest_rate_pct: Decimal,
        term_days: u32,
        clock: &dyn Clock,
    ) -> Result<LoanReceipt, GameError> {
        let amount = round_gold(amount);
        if amount <= Decimal::ZERO || interest_rate_pct < Decimal::ZERO || term_days == 0 {
            warn!(amount = %amount, rate = %interest_rate_pct, term_days, "rejected loan");
            return Err(GameError::InvalidAmount);
        }
        let balance = self.credited(amount)?;
        let now = clock.now();

        self.loans.push(Loan {
            principal_remaining: amount,
            interest_rate_pct,
            term_days,
            date_taken: now,
        });
        self.balance = balance;
        self.record(TransactionKind::Loan, amount, None, now);

        Ok(LoanReceipt {
            index: self.loans.len() - 1,
            amount,
            interest_rate_pct,
            term_days,
            balance: self.balance,
        })
    }

    /// Pay `amount` toward loan `index`; the loan is dropped once principal ≤ 0
    ///
    /// The whole amount is debited even if it exceeds the remaining principal.
    pub fn repay_loan(&mut self, index: usize, amount: Gold, clock: &dyn Clock) -> Result<Repayment, GameError> {
        if index >= self.loans.len() {
            return Err(GameError::InvalidIndex {
                index,
                len: self.loans.len(),
            });
        }
        let amount = round_gold(amount);
        if amount <= Decimal::ZERO || amount > self.balance {
            warn!(index, amount = %amount, balance = %self.balance, "rejected loan repayment");
            return Err(GameError::InvalidAmount);
        }
        let now = clock.now();

        self.balance -= amount;
        self.loans[index].principal_remaining -= amount;
        let remaining = self.loans[index].principal_remaining;
        self.record(TransactionKind::LoanRepayment, amount, None, now);

        if remaining <= Decimal::ZERO {
            self.loans.remove(index);
            return Ok(Repayment::Full {
                paid: amount,
                balance: self.balance,
            });
        }

        Ok(Repayment::Partial {
            paid: amount,
            remaining,
        })
    }

    // ========================================================================
    // INVESTMENTS
    // ========================================================================

    pub fn invest(
        &mut self,
        amount: Gold,
        expected_return_pct: Decimal,
        risk_level: RiskLevel,
        clock: &dyn Clock,
    ) -> Result<InvestmentReceipt, GameError> {
        let amount = round_gold(amount);
        if amount <= Decimal::ZERO || expected_return_pct < Decimal::ZERO {
            warn!(amount = %amount, expected_return_pct = %expected_return_pct, "rejected investment");
            return Err(GameError::InvalidAmount);
        }
        self.ensure_affordable(amount)?;
        let now = clock.now();
        let investment = Investment {
            amount,
            expected_return_pct,
            risk_level,
            date_invested: now,
        };
        if investment.payout().is_none() {
            warn!(amount = %amount, expected_return_pct = %expected_return_pct, "investment return overflows");
            return Err(GameError::InvalidAmount);
        }

        self.balance -= amount;
        self.investments.push(investment);
        self.record(TransactionKind::Investment, amount, None, now);

        Ok(InvestmentReceipt {
            index: self.investments.len() - 1,
            amount,
            expected_return_pct,
            risk_level,
            balance: self.balance,
        })
    }

    /// Cash out investment `index`; returns the amount credited
    pub fn collect_investment_returns(&mut self, index: usize, clock: &dyn Clock) -> Result<Gold, GameError> {
        if index >= self.investments.len() {
            return Err(GameError::InvalidIndex {
                index,
                len: self.investments.len(),
            });
        }
        let returns = self.investments[index]
            .payout()
            .ok_or(GameError::InvalidAmount)?;
        let balance = self.credited(returns)?;
        let now = clock.now();

        self.investments.remove(index);
        self.balance = balance;
        self.record(TransactionKind::InvestmentReturn, returns, None, now);

        Ok(returns)
    }

    // ========================================================================
    // TIME-BASED ADJUSTMENTS
    // ========================================================================

    /// Deflate the balance by `(1 + inflation)^years`; returns the new balance
    pub fn apply_inflation(&mut self, years: u32) -> Gold {
        if years == 0 {
            return self.balance;
        }
        let Some(step) = Decimal::ONE.checked_add(self.inflation_rate) else {
            self.balance = Decimal::ZERO;
            return self.balance;
        };
        let mut value = self.balance;
        // Year by year; stop once nothing is left to deflate
        for _ in 0..years {
            match value.checked_div(step) {
                Some(next) if next != value && !round_gold(next).is_zero() => value = next,
                Some(next) => {
                    value = next;
                    break;
                }
                None => break,
            }
        }
        self.balance = round_gold(value);
        debug!(years, balance = %self.balance, "inflation applied");
        self.balance
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn balance(&self) -> Gold {
        self.balance
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn inflation_rate(&self) -> Decimal {
        self.inflation_rate
    }

    /// Full chronological log
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    pub fn income_sources(&self) -> &BTreeMap<String, IncomeSource> {
        &self.income_sources
    }

    pub fn loans(&self) -> &[Loan] {
        &self.loans
    }

    pub fn investments(&self) -> &[Investment] {
        &self.investments
    }

    pub fn loan_summary(&self, clock: &dyn Clock) -> Vec<LoanSummary> {
        let now = clock.now();
        self.loans
            .iter()
            .map(|loan| LoanSummary {
                principal_remaining: loan.principal_remaining,
                interest_rate_pct: loan.interest_rate_pct,
                term_days: loan.term_days,
                remaining_days: i64::from(loan.term_days) - days_between(loan.date_taken, now),
            })
            .collect()
    }

    pub fn investment_summary(&self, clock: &dyn Clock) -> Vec<InvestmentSummary> {
        let now = clock.now();
        self.investments
            .iter()
            .map(|inv| InvestmentSummary {
                amount: inv.amount,
                expected_return_pct: inv.expected_return_pct,
                risk_level: inv.risk_level,
                days_invested: days_between(inv.date_invested, now),
                projected_payout: inv.payout(),
            })
            .collect()
    }

    /// Balance plus invested principal minus outstanding loans (saturating)
    pub fn net_worth(&self) -> Gold {
        let invested = self
            .investments
            .iter()
            .fold(self.balance, |acc, inv| acc.saturating_add(inv.amount));
        self.loans
            .iter()
            .fold(invested, |acc, loan| acc.saturating_sub(loan.principal_remaining))
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}

// ============================================================================
// TESTS
// ============================================================================
