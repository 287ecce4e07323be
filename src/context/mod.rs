//! Per-scenario state shared between steps.
//!
//! Owns the capture store handle, the idempotency bookkeeping, and a typed
//! slot map for responses one step hands to the next.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::idempotency::IdempotencyCorrelator;
use crate::store::EventStore;

/// Result type for context lookups.
pub type Result<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("Scenario context has no {0}")]
    Missing(String),

    #[error("Scenario context slot {key} does not hold a {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Named slots steps store responses under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKey {
    ClientCreateResponse,
    LoanCreateResponse,
    LoanDisbursementResponse,
    LoanRepaymentResponse,
    LoanRepaymentIdempotentResponse,
    LoanAdjustmentResponse,
    LoanUndoResponse,
    LoanChargeOffResponse,
    LoanChargeOffUndoResponse,
    Custom(String),
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(name) => f.write_str(name),
            other => write!(f, "{other:?}"),
        }
    }
}

/// State owned by one running scenario.
pub struct ScenarioContext {
    store: Arc<EventStore>,
    idempotency: IdempotencyCorrelator,
    values: HashMap<ContextKey, Box<dyn Any + Send + Sync>>,
}

impl ScenarioContext {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            idempotency: IdempotencyCorrelator::new(),
            values: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn idempotency(&self) -> &IdempotencyCorrelator {
        &self.idempotency
    }

    pub fn idempotency_mut(&mut self) -> &mut IdempotencyCorrelator {
        &mut self.idempotency
    }

    /// Clear captured events, tokens and slots.
    pub async fn begin_scenario(&mut self) {
        self.store.reset().await;
        self.idempotency.reset();
        self.values.clear();
        info!("Scenario context reset");
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: ContextKey, value: T) {
        self.values.insert(key, Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &ContextKey) -> Result<&T> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| ContextError::Missing(key.to_string()))?;
        value
            .downcast_ref::<T>()
            .ok_or_else(|| ContextError::WrongType {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }
}
