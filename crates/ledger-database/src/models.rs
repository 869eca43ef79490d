//! Database model types.

use crate::validation;
use crate::ValidationError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded play session.
///
/// A session is either open (only start-side fields set) or completed (end
/// time, final investment, return amount and profit all set). [`Session::complete`]
/// is the only way to move from one to the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Backend-assigned id; `None` until first persisted.
    #[serde(default)]
    pub id: Option<i64>,
    pub user_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveDateTime,
    #[serde(default)]
    pub end_time: Option<NaiveDateTime>,
    pub store_name: String,
    pub machine_name: String,
    pub initial_investment: i64,
    #[serde(default)]
    pub final_investment: Option<i64>,
    #[serde(default)]
    pub return_amount: Option<i64>,
    #[serde(default)]
    pub profit: Option<i64>,
    #[serde(default)]
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Build an open session. Not validated until it is stored or completed.
    pub fn new(
        user_id: impl Into<String>,
        date: NaiveDate,
        start_time: NaiveDateTime,
        store_name: impl Into<String>,
        machine_name: impl Into<String>,
        initial_investment: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            user_id: user_id.into(),
            date,
            start_time,
            end_time: None,
            store_name: store_name.into(),
            machine_name: machine_name.into(),
            initial_investment,
            final_investment: None,
            return_amount: None,
            profit: None,
            is_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check every field invariant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_session(self)
    }

    /// `return_amount - final_investment` for a completed session.
    pub fn calculate_profit(&self) -> Option<i64> {
        if !self.is_completed {
            return None;
        }
        match (self.return_amount, self.final_investment) {
            (Some(ret), Some(fin)) => Some(ret - fin),
            _ => None,
        }
    }

    /// Complete the session in one step.
    ///
    /// The end-side fields are checked on a copy first; on error `self` is
    /// left exactly as it was.
    pub fn complete(
        &mut self,
        end_time: NaiveDateTime,
        final_investment: i64,
        return_amount: i64,
    ) -> Result<(), ValidationError> {
        let mut candidate = self.clone();
        candidate.end_time = Some(end_time);
        candidate.final_investment = Some(final_investment);
        candidate.return_amount = Some(return_amount);
        candidate.is_completed = true;
        candidate.validate()?;

        candidate.profit = candidate.calculate_profit();
        candidate.updated_at = Utc::now();
        *self = candidate;
        Ok(())
    }
}

/// Optional arguments to `RecordStore::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Inclusive `(from, to)` date range.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListOptions {
    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            date_range: Some((from, to)),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Per-user totals for one calendar month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    pub total_sessions: i64,
    pub completed_sessions: i64,
    pub total_investment: i64,
    pub total_return: i64,
    pub total_profit: i64,
    pub winning_sessions: i64,
    /// Winning share of completed sessions, in percent.
    pub win_rate: f64,
    pub average_investment: f64,
    pub average_profit: f64,
}

/// Counts of rows breaking the completion or profit invariants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub total_records: i64,
    /// Completed rows missing a final investment or return amount.
    pub incomplete_completed: i64,
    /// Completed rows whose profit is not `return_amount - final_investment`.
    pub profit_mismatch: i64,
    /// Rows whose final investment is below the initial investment.
    pub invalid_investment: i64,
}

impl IntegrityReport {
    pub fn has_issues(&self) -> bool {
        self.incomplete_completed + self.profit_mismatch + self.invalid_investment > 0
    }
}

/// Diagnostic snapshot of a storage target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub schema_version: i32,
    pub backend: String,
    pub tables: Vec<String>,
    pub indexes: Vec<String>,
    pub total_sessions: i64,
    pub completed_sessions: i64,
}
