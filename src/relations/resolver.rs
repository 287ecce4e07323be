use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use super::{get_nth_transaction_type, resolve_replay_chain, Transaction, TransactionId, TransactionType};
use crate::client::BackendClient;
use crate::event::{AggregateId, EventType};
use crate::verify::{EventAssertion, Result};

/// Transaction lookups against the live backend.
#[derive(Clone)]
pub struct TransactionResolver {
    client: Arc<dyn BackendClient>,
    events: EventAssertion,
}

impl TransactionResolver {
    pub fn new(client: Arc<dyn BackendClient>, events: EventAssertion) -> Self {
        Self { client, events }
    }

    /// Fetch the loan's history and pick the `n`-th match.
    #[tracing::instrument(name = "relations.find_nth", skip(self), fields(transaction_type = %transaction_type))]
    pub async fn find_nth_transaction(
        &self,
        n: usize,
        transaction_type: &TransactionType,
        date: NaiveDate,
        loan_id: i64,
    ) -> Result<Transaction> {
        let transactions = self.client.loan_transactions(loan_id).await?;
        let found = get_nth_transaction_type(n, transaction_type, date, &transactions)?;
        info!(transaction_id = found.id, "Transaction located");
        Ok(found.clone())
    }

    /// Re-fetch the history and resolve the replacement of `transaction_id`.
    pub async fn replacement_for(&self, loan_id: i64, transaction_id: TransactionId) -> Result<TransactionId> {
        let transactions = self.client.loan_transactions(loan_id).await?;
        let source = super::find_transaction_by_id(transaction_id, &transactions)?;
        resolve_replay_chain(source, &transactions)
    }

    /// Exactly one `event_type` captured for `key`.
    pub async fn assert_no_duplicate_event(&self, event_type: EventType, key: AggregateId) -> Result<()> {
        self.events.assert_single_event(event_type, key).await
    }
}
