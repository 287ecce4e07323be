//! Domain events published by the backend.
//!
//! This module contains:
//! - `EventType`: the tag identifying an event's business meaning
//! - `DomainEvent`: one captured event, immutable once recorded
//! - `EventEnvelope`: the serialized wire form delivered by the bus
//! - `EventSchema`: binds a payload type to its schema name
//! - Typed payload schemas in [`data`]

pub mod data;

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::time::Instant;

/// Aggregate identifier an event is correlated to (loan id, transaction id, ...).
pub type AggregateId = i64;

macro_rules! event_types {
    ($($(#[$doc:meta])* $variant:ident => $tag:literal),+ $(,)?) => {
        /// Business event tag.
        ///
        /// Tags not known to this crate are kept as `Other` so they can still
        /// be captured and asserted on.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventType {
            $($(#[$doc])* $variant,)+
            /// Any tag without a dedicated variant.
            Other(String),
        }

        impl EventType {
            /// Wire tag of this event type.
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $tag,)+
                    Self::Other(tag) => tag.as_str(),
                }
            }

            /// Parse a wire tag. Never fails; unknown tags map to `Other`.
            pub fn from_tag(tag: &str) -> Self {
                match tag {
                    $($tag => Self::$variant,)+
                    other => Self::Other(other.to_string()),
                }
            }
        }
    };
}

event_types! {
    ClientCreated => "ClientCreateBusinessEvent",
    ClientActivated => "ClientActivateBusinessEvent",
    LoanCreated => "LoanCreatedBusinessEvent",
    LoanApproved => "LoanApprovedBusinessEvent",
    LoanRejected => "LoanRejectedBusinessEvent",
    LoanUndoApproval => "LoanUndoApprovalBusinessEvent",
    LoanDisbursal => "LoanDisbursalBusinessEvent",
    LoanStatusChanged => "LoanStatusChangedBusinessEvent",
    LoanBalanceChanged => "LoanBalanceChangedBusinessEvent",
    LoanDelinquencyRangeChange => "LoanDelinquencyRangeChangeBusinessEvent",
    LoanDelinquencyPauseChanged => "LoanAccountDelinquencyPauseChangedBusinessEvent",
    LoanAccountSnapshot => "LoanAccountSnapshotBusinessEvent",
    LoanOwnershipTransfer => "LoanOwnershipTransferBusinessEvent",
    LoanScheduleVariationsAdded => "LoanScheduleVariationsAddedBusinessEvent",
    LoanScheduleVariationsDeleted => "LoanScheduleVariationsDeletedBusinessEvent",
    LoanDisbursalTransaction => "LoanDisbursalTransactionBusinessEvent",
    LoanTransactionMakeRepaymentPost => "LoanTransactionMakeRepaymentPostBusinessEvent",
    LoanTransactionGoodwillCreditPost => "LoanTransactionGoodwillCreditPostBusinessEvent",
    LoanTransactionPayoutRefundPost => "LoanTransactionPayoutRefundPostBusinessEvent",
    LoanTransactionMerchantIssuedRefundPost => "LoanTransactionMerchantIssuedRefundPostBusinessEvent",
    LoanRefundPost => "LoanRefundPostBusinessEvent",
    LoanTransactionInterestPaymentWaiverPost => "LoanTransactionInterestPaymentWaiverPostBusinessEvent",
    LoanTransactionInterestRefundPost => "LoanTransactionInterestRefundPostBusinessEvent",
    /// A transaction was reversed, and possibly replayed with new values.
    LoanAdjustTransaction => "LoanAdjustTransactionBusinessEvent",
    LoanChargeOff => "LoanChargeOffBusinessEvent",
    LoanChargeOffUndo => "LoanUndoChargeOffBusinessEvent",
    LoanAccrualTransactionCreated => "LoanAccrualTransactionCreatedBusinessEvent",
    LoanUndoContractTermination => "LoanUndoContractTerminationBusinessEvent",
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

/// Binds a payload type to the schema name carried in `dataschema`.
///
/// An empty `SCHEMA` accepts any payload; `serde_json::Value` uses it for
/// raw access.
pub trait EventSchema: DeserializeOwned {
    /// Schema name, e.g. `LoanTransactionDataV1`.
    const SCHEMA: &'static str;
}

impl EventSchema for serde_json::Value {
    const SCHEMA: &'static str = "";
}

/// One captured business event.
///
/// `sequence` and `received_at` are assigned by the store on capture.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub event_type: EventType,
    pub correlation_key: AggregateId,
    pub data_schema: String,
    pub payload: serde_json::Value,
    pub business_date: Option<NaiveDate>,
    pub idempotency_key: Option<String>,
    pub sequence: u64,
    pub received_at: Instant,
}

impl DomainEvent {
    pub fn new(
        event_type: EventType,
        correlation_key: AggregateId,
        data_schema: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            correlation_key,
            data_schema: data_schema.into(),
            payload,
            business_date: None,
            idempotency_key: None,
            sequence: 0,
            received_at: Instant::now(),
        }
    }

    pub fn with_business_date(mut self, date: NaiveDate) -> Self {
        self.business_date = Some(date);
        self
    }

    /// Whether this event's schema is acceptable for `D`.
    pub fn matches_schema<D: EventSchema>(&self) -> bool {
        D::SCHEMA.is_empty() || self.data_schema == D::SCHEMA
    }

    /// Decode the payload into its typed schema.
    pub fn payload_as<D: EventSchema>(&self) -> Result<D, serde_json::Error> {
        D::deserialize(&self.payload)
    }
}

/// Serialized event as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub business_date: Option<NaiveDate>,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(rename = "dataschema")]
    pub data_schema: String,
    pub aggregate_root_id: AggregateId,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn into_domain_event(self) -> DomainEvent {
        DomainEvent {
            event_type: self.event_type,
            correlation_key: self.aggregate_root_id,
            data_schema: self.data_schema,
            payload: self.data,
            business_date: self.business_date,
            idempotency_key: self.idempotency_key,
            sequence: 0,
            received_at: Instant::now(),
        }
    }
}
