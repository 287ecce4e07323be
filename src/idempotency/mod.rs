//! Idempotency tokens threaded through repeated mutating calls.
//!
//! A token is issued for the first call, remembered for the scenario, and
//! recalled for the deliberate retry. Both calls must resolve to the same
//! resource id.

use std::collections::HashMap;

use tracing::{info, warn};
use uuid::Uuid;

use crate::context::ContextError;
use crate::verify::{Result, VerifyError};

/// Token plus the resource id its first call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyContext {
    pub token: String,
    pub first_response_resource_id: Option<i64>,
}

/// Scenario-scoped idempotency bookkeeping.
#[derive(Debug, Default)]
pub struct IdempotencyCorrelator {
    current: Option<String>,
    contexts: HashMap<String, IdempotencyContext>,
}

impl IdempotencyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh token, unique in practice.
    pub fn new_token() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generate a token and remember it as the current one.
    pub fn issue(&mut self) -> String {
        let token = Self::new_token();
        self.remember_token(token.clone());
        token
    }

    pub fn remember_token(&mut self, token: impl Into<String>) {
        let token = token.into();
        self.contexts
            .entry(token.clone())
            .or_insert_with(|| IdempotencyContext {
                token: token.clone(),
                first_response_resource_id: None,
            });
        self.current = Some(token);
    }

    /// The token remembered most recently in this scenario.
    pub fn recall_token(&self) -> std::result::Result<String, ContextError> {
        self.current
            .clone()
            .ok_or_else(|| ContextError::Missing("idempotency token".to_string()))
    }

    /// Record the resource id returned by the first call made with `token`.
    ///
    /// Later calls with the same token go through [`Self::verify_replay`].
    pub fn record_first(&mut self, token: &str, resource_id: i64) {
        let context = self
            .contexts
            .entry(token.to_string())
            .or_insert_with(|| IdempotencyContext {
                token: token.to_string(),
                first_response_resource_id: None,
            });
        if context.first_response_resource_id.is_none() {
            context.first_response_resource_id = Some(resource_id);
            info!(token, resource_id, "First idempotent call recorded");
        }
    }

    /// A retried call with `token` must yield the first call's resource id.
    pub fn verify_replay(&self, token: &str, resource_id: i64) -> Result<()> {
        let first = self
            .contexts
            .get(token)
            .and_then(|c| c.first_response_resource_id)
            .ok_or_else(|| ContextError::Missing(format!("first response for token {token}")))?;

        if first != resource_id {
            warn!(token, first, second = resource_id, "Idempotent replay produced a new resource");
            return Err(VerifyError::DuplicateEffect {
                token: token.to_string(),
                first,
                second: resource_id,
            });
        }
        info!(token, resource_id, "Idempotent replay matched first call");
        Ok(())
    }

    pub fn context(&self, token: &str) -> Option<&IdempotencyContext> {
        self.contexts.get(token)
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.contexts.clear();
    }
}
