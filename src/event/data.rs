//! Typed payload schemas.
//!
//! Field names follow the backend's camelCase wire format. Monetary values
//! are `Decimal` so comparisons are exact; dates use `yyyy-MM-dd`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{AggregateId, EventSchema};

/// Status or enum-like value as rendered by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodeValueV1 {
    pub id: Option<i64>,
    pub code: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CurrencyV1 {
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientDataV1 {
    pub id: AggregateId,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub active: Option<bool>,
    pub status: Option<CodeValueV1>,
}

impl EventSchema for ClientDataV1 {
    const SCHEMA: &'static str = "ClientDataV1";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoanSummaryV1 {
    pub currency: Option<CurrencyV1>,
    pub principal_disbursed: Option<Decimal>,
    pub principal_outstanding: Option<Decimal>,
    pub interest_outstanding: Option<Decimal>,
    pub fee_charges_outstanding: Option<Decimal>,
    pub penalty_charges_outstanding: Option<Decimal>,
    pub total_outstanding: Option<Decimal>,
    pub total_overdue: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoanTimelineV1 {
    pub approved_on_date: Option<NaiveDate>,
    pub actual_disbursement_date: Option<NaiveDate>,
}

/// Loan account state carried by loan lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoanAccountDataV1 {
    pub id: AggregateId,
    pub external_id: Option<String>,
    pub client_id: Option<AggregateId>,
    pub status: Option<CodeValueV1>,
    pub principal: Option<Decimal>,
    pub approved_principal: Option<Decimal>,
    pub summary: Option<LoanSummaryV1>,
    pub timeline: Option<LoanTimelineV1>,
    pub external_owner_id: Option<String>,
    pub settlement_date: Option<NaiveDate>,
}

impl EventSchema for LoanAccountDataV1 {
    const SCHEMA: &'static str = "LoanAccountDataV1";
}

/// Single loan transaction as carried by transaction events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoanTransactionDataV1 {
    pub id: AggregateId,
    pub loan_id: Option<AggregateId>,
    pub external_id: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: Option<CodeValueV1>,
    pub date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub principal_portion: Option<Decimal>,
    pub interest_portion: Option<Decimal>,
    pub fee_charges_portion: Option<Decimal>,
    pub penalty_charges_portion: Option<Decimal>,
    pub manually_reversed: Option<bool>,
    pub external_owner_id: Option<String>,
}

impl EventSchema for LoanTransactionDataV1 {
    const SCHEMA: &'static str = "LoanTransactionDataV1";
}

/// Reversal of a transaction, with the replacement when it was replayed.
///
/// `new_transaction_detail` is `None` for a plain reversal (undo).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoanTransactionAdjustmentDataV1 {
    pub transaction_to_adjust: LoanTransactionDataV1,
    pub new_transaction_detail: Option<LoanTransactionDataV1>,
}

impl EventSchema for LoanTransactionAdjustmentDataV1 {
    const SCHEMA: &'static str = "LoanTransactionAdjustmentDataV1";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoanOwnershipTransferDataV1 {
    pub loan_id: AggregateId,
    pub asset_owner_external_id: Option<String>,
    pub previous_owner_external_id: Option<String>,
    pub transfer_external_id: Option<String>,
    #[serde(rename = "type")]
    pub transfer_type: Option<String>,
    pub transfer_status: Option<String>,
    pub transfer_status_reason: Option<String>,
    pub settlement_date: Option<NaiveDate>,
    pub total_outstanding_balance_amount: Option<Decimal>,
    pub outstanding_principal_portion: Option<Decimal>,
    pub outstanding_interest_portion: Option<Decimal>,
    pub outstanding_fee_portion: Option<Decimal>,
    pub outstanding_penalty_portion: Option<Decimal>,
    pub over_payment_portion: Option<Decimal>,
}

impl EventSchema for LoanOwnershipTransferDataV1 {
    const SCHEMA: &'static str = "LoanOwnershipTransferDataV1";
}
