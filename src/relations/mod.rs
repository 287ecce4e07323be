//! Transaction histories and their reversal/replay edges.
//!
//! This module contains:
//! - `Transaction` and `TransactionRelation`: the backend's transaction
//!   records with their directed relation edges
//! - Lookup helpers over a fetched history (`get_nth_transaction_type`,
//!   `find_transaction_by_id`)
//! - Edge walks (`replacement_of`, `resolve_replay_chain`, `original_of`)
//! - `TransactionResolver`: fetch-then-filter against the backend, plus the
//!   one-event-per-transaction check

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::verify::{Result, VerifyError};

mod resolver;

pub use resolver::TransactionResolver;

pub type TransactionId = i64;

/// Upper bound on REPLAYED hops followed from one transaction.
pub const MAX_RELATION_DEPTH: usize = 8;

/// Date format used in scenario tables, e.g. `10 January 2024`.
pub const DATE_FORMAT: &str = "%d %B %Y";

/// Parse a scenario date such as `10 January 2024`.
pub fn parse_date(text: &str) -> std::result::Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
}

/// Kind of a directed edge between two transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    /// Reversed and replaced by a new transaction.
    Replayed,
    Reversed,
    Chargeback,
    ChargeAdjustment,
    Related,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Replayed => "REPLAYED",
            Self::Reversed => "REVERSED",
            Self::Chargeback => "CHARGEBACK",
            Self::ChargeAdjustment => "CHARGE_ADJUSTMENT",
            Self::Related => "RELATED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRelation {
    pub relation_type: RelationType,
    pub from_transaction_id: TransactionId,
    pub to_transaction_id: TransactionId,
}

/// Transaction type as the backend names it (`Repayment`, `Accrual`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionType(Cow<'static, str>);

impl TransactionType {
    pub const DISBURSEMENT: Self = Self::known("Disbursement");
    pub const REPAYMENT: Self = Self::known("Repayment");
    pub const ACCRUAL: Self = Self::known("Accrual");
    pub const ACCRUAL_ACTIVITY: Self = Self::known("Accrual Activity");
    pub const CHARGE_OFF: Self = Self::known("Charge-off");
    pub const GOODWILL_CREDIT: Self = Self::known("Goodwill Credit");
    pub const MERCHANT_ISSUED_REFUND: Self = Self::known("Merchant Issued Refund");
    pub const PAYOUT_REFUND: Self = Self::known("Payout Refund");
    pub const CHARGEBACK: Self = Self::known("Chargeback");
    pub const CAPITALIZED_INCOME: Self = Self::known("Capitalized Income");
    pub const CAPITALIZED_INCOME_AMORTIZATION: Self = Self::known("Capitalized Income Amortization");
    pub const BUY_DOWN_FEE: Self = Self::known("Buy Down Fee");
    pub const BUY_DOWN_FEE_AMORTIZATION: Self = Self::known("Buy Down Fee Amortization");
    pub const INTEREST_REFUND: Self = Self::known("Interest Refund");

    const fn known(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-returned transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    #[serde(default)]
    pub manually_reversed: bool,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub transaction_relations: Vec<TransactionRelation>,
}

impl Transaction {
    /// Outgoing edges of `relation_type`.
    pub fn outgoing(
        &self,
        relation_type: RelationType,
    ) -> impl Iterator<Item = &TransactionRelation> + '_ {
        self.transaction_relations
            .iter()
            .filter(move |r| r.relation_type == relation_type && r.from_transaction_id == self.id)
    }
}

/// The `n`-th (1-based) transaction of `transaction_type` dated `date`, in
/// backend return order.
pub fn get_nth_transaction_type<'a>(
    n: usize,
    transaction_type: &TransactionType,
    date: NaiveDate,
    transactions: &'a [Transaction],
) -> Result<&'a Transaction> {
    let matching: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.transaction_type == *transaction_type && t.date == date)
        .collect();

    let found = matching.len();
    n.checked_sub(1)
        .and_then(|index| matching.get(index).copied())
        .ok_or_else(|| VerifyError::TransactionNotFound {
            criteria: format!(
                "#{n} {transaction_type} on {}",
                date.format(DATE_FORMAT)
            ),
            found,
        })
}

pub fn find_transaction_by_id(id: TransactionId, transactions: &[Transaction]) -> Result<&Transaction> {
    transactions
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| VerifyError::TransactionNotFound {
            criteria: format!("id {id}"),
            found: transactions.len(),
        })
}

/// Target of the single outgoing REPLAYED edge of `transaction`.
///
/// Distinguishes a reversed-but-not-replayed transaction from one that was
/// never reversed.
pub fn replacement_of(transaction: &Transaction) -> Result<TransactionId> {
    let mut edges = transaction.outgoing(RelationType::Replayed);
    match (edges.next(), edges.next()) {
        (Some(edge), None) => Ok(edge.to_transaction_id),
        (None, _) => Err(VerifyError::RelationshipMissing {
            transaction_id: transaction.id,
            relation: RelationType::Replayed.to_string(),
            reversed: transaction.manually_reversed,
        }),
        (Some(_), Some(_)) => Err(VerifyError::AmbiguousRelation {
            transaction_id: transaction.id,
            relation: RelationType::Replayed.to_string(),
            count: transaction.outgoing(RelationType::Replayed).count(),
        }),
    }
}

/// Replacement of a reverse-replayed `transaction`.
///
/// Returns the target of the single outgoing REPLAYED edge. The target must
/// be present in `transactions` and dated on or after the source. Any further
/// REPLAYED hops from the target are walked only to reject a cycle or a chain
/// longer than [`MAX_RELATION_DEPTH`].
pub fn resolve_replay_chain(transaction: &Transaction, transactions: &[Transaction]) -> Result<TransactionId> {
    let replacement_id = replacement_of(transaction)?;
    let replacement = transactions
        .iter()
        .find(|t| t.id == replacement_id)
        .ok_or(VerifyError::ReplacementNotFound {
            transaction_id: transaction.id,
            replacement_id,
        })?;
    if replacement.date < transaction.date {
        return Err(VerifyError::ReplacementPredatesSource {
            transaction_id: transaction.id,
            replacement_id,
            source_date: transaction.date,
            replacement_date: replacement.date,
        });
    }

    check_chain_bounded(transaction, replacement, transactions)?;
    debug!(from = transaction.id, to = replacement_id, "Replay chain resolved");
    Ok(replacement_id)
}

fn check_chain_bounded(source: &Transaction, first: &Transaction, transactions: &[Transaction]) -> Result<()> {
    let too_long = |depth| VerifyError::RelationChainTooLong {
        transaction_id: source.id,
        depth,
    };
    let mut visited = HashSet::from([source.id, first.id]);
    let mut current = first;
    let mut hops = 1;

    while let Some(edge) = current.outgoing(RelationType::Replayed).next() {
        if hops == MAX_RELATION_DEPTH {
            return Err(too_long(MAX_RELATION_DEPTH));
        }
        if !visited.insert(edge.to_transaction_id) {
            return Err(too_long(hops));
        }
        let Some(next) = transactions.iter().find(|t| t.id == edge.to_transaction_id) else {
            return Ok(());
        };
        current = next;
        hops += 1;
    }
    Ok(())
}

/// The transaction whose REPLAYED edge targets `transaction`, if any.
pub fn original_of<'a>(transaction: &Transaction, transactions: &'a [Transaction]) -> Option<&'a Transaction> {
    transactions.iter().find(|candidate| {
        candidate
            .outgoing(RelationType::Replayed)
            .any(|edge| edge.to_transaction_id == transaction.id)
    })
}
