//! Synchronous backend API boundary.
//!
//! The probe only reads through this boundary: transaction histories, job
//! state, and the backend's business calendar. Request builders and
//! mutating calls live with the step code that drives the backend.

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::relations::Transaction;

/// Result type for backend calls.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by the backend API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Connection to backend failed: {0}")]
    Connection(String),

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: i64 },
}

/// Scheduler jobs the suite triggers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Job {
    LoanCob,
    AddAccrualTransactions,
    AddPeriodicAccrualEntries,
    AccrualActivityPosting,
    RecalculateInterest,
    LoanDelinquencyClassification,
    /// Any job addressed by its display name.
    Other(String),
}

impl Job {
    /// Display name the scheduler knows the job by.
    pub fn name(&self) -> &str {
        match self {
            Self::LoanCob => "Loan COB",
            Self::AddAccrualTransactions => "Add Accrual Transactions",
            Self::AddPeriodicAccrualEntries => "Add Periodic Accrual Transactions",
            Self::AccrualActivityPosting => "Accrual Activity Posting",
            Self::RecalculateInterest => "Recalculate Interest For Loans",
            Self::LoanDelinquencyClassification => "Loan Delinquency Classification",
            Self::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Close-of-business progress as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CobStatus {
    /// Last business date the COB run completed for.
    pub cob_business_date: Option<NaiveDate>,
    /// Date the COB run last processed loans up to.
    pub cob_processed_date: Option<NaiveDate>,
    pub catch_up_running: bool,
}

/// Read-only view of the backend's synchronous API.
///
/// Implementations wrap the real HTTP client; tests use in-memory fakes.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Transaction history of a loan, in backend return order.
    async fn loan_transactions(&self, loan_id: i64) -> Result<Vec<Transaction>>;

    /// Trigger a scheduler job. Returns once the backend accepted it.
    async fn execute_job(&self, job: &Job) -> Result<()>;

    async fn job_running(&self, job: &Job) -> Result<bool>;

    /// Current business date.
    async fn business_date(&self) -> Result<NaiveDate>;

    async fn cob_status(&self) -> Result<CobStatus>;
}
