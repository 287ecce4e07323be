//! Simulated banking backend for interface tests.
//!
//! Answers synchronous calls from an in-memory ledger and publishes the
//! matching business events onto a channel bus after a delay, so every
//! assertion has to wait for asynchronous delivery.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use ledger_probe::bus::{BusMessage, ChannelEventBus, EventBus, EventFilter};
use ledger_probe::client::{ApiError, BackendClient, CobStatus, Job, Result as ApiResult};
use ledger_probe::config::ProbeConfig;
use ledger_probe::context::ScenarioContext;
use ledger_probe::event::data::{
    CodeValueV1, LoanAccountDataV1, LoanTransactionAdjustmentDataV1, LoanTransactionDataV1,
};
use ledger_probe::event::{AggregateId, EventEnvelope, EventType};
use ledger_probe::jobs::JobRunner;
use ledger_probe::relations::{
    RelationType, Transaction, TransactionId, TransactionRelation, TransactionResolver,
    TransactionType,
};
use ledger_probe::store::{EventCapture, EventStore};
use ledger_probe::utils::bootstrap::init_tracing;
use ledger_probe::verify::EventAssertion;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

/// Polls a job reports running after it was executed.
const JOB_RUNNING_POLLS: u32 = 2;

struct Loan {
    principal: Decimal,
    transactions: Vec<Transaction>,
}

struct Ledger {
    next_id: i64,
    next_event_id: i64,
    business_date: NaiveDate,
    cob_processed_date: Option<NaiveDate>,
    loans: HashMap<i64, Loan>,
    tokens: HashMap<String, TransactionId>,
    running: HashMap<Job, u32>,
}

impl Ledger {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn loan_mut(&mut self, loan_id: i64) -> ApiResult<&mut Loan> {
        self.loans.get_mut(&loan_id).ok_or(ApiError::NotFound {
            resource: "Loan",
            id: loan_id,
        })
    }

    fn envelope<T: Serialize>(
        &mut self,
        event_type: EventType,
        key: AggregateId,
        schema: &str,
        data: &T,
    ) -> ApiResult<EventEnvelope> {
        self.next_event_id += 1;
        let data = serde_json::to_value(data).map_err(|e| ApiError::Status {
            status: 500,
            message: e.to_string(),
        })?;
        Ok(EventEnvelope {
            id: self.next_event_id,
            event_type,
            category: "Loan".to_string(),
            created_at: Some(Utc::now()),
            business_date: Some(self.business_date),
            tenant_id: "default".to_string(),
            idempotency_key: Some(Uuid::new_v4().to_string()),
            data_schema: schema.to_string(),
            aggregate_root_id: key,
            data,
        })
    }
}

fn transaction_data(loan_id: i64, transaction: &Transaction) -> LoanTransactionDataV1 {
    LoanTransactionDataV1 {
        id: transaction.id,
        loan_id: Some(loan_id),
        external_id: transaction.external_id.clone(),
        transaction_type: Some(CodeValueV1 {
            id: None,
            code: None,
            value: Some(transaction.transaction_type.as_str().to_string()),
        }),
        date: Some(transaction.date),
        amount: Some(transaction.amount),
        principal_portion: Some(transaction.amount),
        manually_reversed: Some(transaction.manually_reversed),
        ..Default::default()
    }
}

fn balance_data(loan_id: i64, loan: &Loan) -> LoanAccountDataV1 {
    let repaid: Decimal = loan
        .transactions
        .iter()
        .filter(|t| !t.manually_reversed && t.transaction_type == TransactionType::REPAYMENT)
        .map(|t| t.amount)
        .sum();
    LoanAccountDataV1 {
        id: loan_id,
        principal: Some(loan.principal - repaid),
        approved_principal: Some(loan.principal),
        ..Default::default()
    }
}

/// In-memory backend publishing events over a channel bus.
///
/// Events leave through a single outbox task, so they reach the bus in the
/// order the backend produced them.
pub struct SimulatedBackend {
    outbox: mpsc::UnboundedSender<(Instant, Vec<EventEnvelope>)>,
    publish_delay: Duration,
    ledger: RwLock<Ledger>,
}

impl SimulatedBackend {
    pub fn new(bus: Arc<ChannelEventBus>, publish_delay: Duration, business_date: NaiveDate) -> Self {
        let (outbox, mut pending) = mpsc::unbounded_channel::<(Instant, Vec<EventEnvelope>)>();
        tokio::spawn(async move {
            while let Some((deliver_at, envelopes)) = pending.recv().await {
                tokio::time::sleep_until(deliver_at).await;
                for envelope in envelopes {
                    let message = BusMessage::from_envelope(&envelope).expect("envelope encodes");
                    bus.publish(Arc::new(message)).await.expect("channel publish");
                }
            }
        });

        Self {
            outbox,
            publish_delay,
            ledger: RwLock::new(Ledger {
                next_id: 0,
                next_event_id: 0,
                business_date,
                cob_processed_date: business_date.checked_sub_days(Days::new(2)),
                loans: HashMap::new(),
                tokens: HashMap::new(),
                running: HashMap::new(),
            }),
        }
    }

    /// Queue `envelopes` for publication after the configured delay.
    fn emit(&self, envelopes: Vec<EventEnvelope>) {
        let deliver_at = Instant::now() + self.publish_delay;
        if self.outbox.send((deliver_at, envelopes)).is_err() {
            panic!("Outbox task stopped");
        }
    }

    pub async fn create_loan(&self, principal: Decimal) -> ApiResult<i64> {
        let mut ledger = self.ledger.write().await;
        let loan_id = ledger.allocate_id();
        let data = LoanAccountDataV1 {
            id: loan_id,
            principal: Some(principal),
            approved_principal: Some(principal),
            ..Default::default()
        };
        let created = ledger.envelope(EventType::LoanCreated, loan_id, "LoanAccountDataV1", &data)?;
        ledger.loans.insert(
            loan_id,
            Loan {
                principal,
                transactions: Vec::new(),
            },
        );
        drop(ledger);

        self.emit(vec![created]);
        Ok(loan_id)
    }

    /// Post a repayment. A known idempotency token returns the transaction
    /// its first call created and publishes nothing.
    pub async fn make_repayment(
        &self,
        loan_id: i64,
        date: NaiveDate,
        amount: Decimal,
        idempotency_key: Option<&str>,
    ) -> ApiResult<TransactionId> {
        let mut ledger = self.ledger.write().await;
        if let Some(existing) = idempotency_key.and_then(|key| ledger.tokens.get(key)) {
            return Ok(*existing);
        }

        let id = ledger.allocate_id();
        let transaction = Transaction {
            id,
            date,
            transaction_type: TransactionType::REPAYMENT,
            amount,
            manually_reversed: false,
            external_id: Some(format!("repayment-{id}")),
            transaction_relations: Vec::new(),
        };
        let data = transaction_data(loan_id, &transaction);
        ledger.loan_mut(loan_id)?.transactions.push(transaction);
        if let Some(key) = idempotency_key {
            ledger.tokens.insert(key.to_string(), id);
        }

        let posted = ledger.envelope(
            EventType::LoanTransactionMakeRepaymentPost,
            id,
            "LoanTransactionDataV1",
            &data,
        )?;
        let balance = balance_data(loan_id, ledger.loan_mut(loan_id)?);
        let changed = ledger.envelope(EventType::LoanBalanceChanged, loan_id, "LoanAccountDataV1", &balance)?;
        drop(ledger);

        self.emit(vec![posted, changed]);
        Ok(id)
    }

    /// Reverse `transaction_id` and replay it with `new_amount`.
    pub async fn adjust_transaction(
        &self,
        loan_id: i64,
        transaction_id: TransactionId,
        new_amount: Decimal,
    ) -> ApiResult<TransactionId> {
        let mut ledger = self.ledger.write().await;
        let replacement_id = ledger.allocate_id();
        let loan = ledger.loan_mut(loan_id)?;
        let original = loan
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
            .ok_or(ApiError::NotFound {
                resource: "Transaction",
                id: transaction_id,
            })?;

        original.manually_reversed = true;
        original.transaction_relations.push(TransactionRelation {
            relation_type: RelationType::Replayed,
            from_transaction_id: transaction_id,
            to_transaction_id: replacement_id,
        });
        let replacement = Transaction {
            id: replacement_id,
            date: original.date,
            transaction_type: original.transaction_type.clone(),
            amount: new_amount,
            manually_reversed: false,
            external_id: Some(format!("repayment-{replacement_id}")),
            transaction_relations: Vec::new(),
        };
        let data = LoanTransactionAdjustmentDataV1 {
            transaction_to_adjust: transaction_data(loan_id, original),
            new_transaction_detail: Some(transaction_data(loan_id, &replacement)),
        };
        loan.transactions.push(replacement);
        let balance = balance_data(loan_id, loan);

        let adjusted = ledger.envelope(
            EventType::LoanAdjustTransaction,
            transaction_id,
            "LoanTransactionAdjustmentDataV1",
            &data,
        )?;
        let changed = ledger.envelope(EventType::LoanBalanceChanged, loan_id, "LoanAccountDataV1", &balance)?;
        drop(ledger);

        self.emit(vec![adjusted, changed]);
        Ok(replacement_id)
    }

    /// Reverse `transaction_id` without a replacement.
    pub async fn undo_transaction(&self, loan_id: i64, transaction_id: TransactionId) -> ApiResult<()> {
        let mut ledger = self.ledger.write().await;
        let loan = ledger.loan_mut(loan_id)?;
        let original = loan
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
            .ok_or(ApiError::NotFound {
                resource: "Transaction",
                id: transaction_id,
            })?;
        original.manually_reversed = true;
        let data = LoanTransactionAdjustmentDataV1 {
            transaction_to_adjust: transaction_data(loan_id, original),
            new_transaction_detail: None,
        };

        let adjusted = ledger.envelope(
            EventType::LoanAdjustTransaction,
            transaction_id,
            "LoanTransactionAdjustmentDataV1",
            &data,
        )?;
        drop(ledger);

        self.emit(vec![adjusted]);
        Ok(())
    }

    pub async fn charge_off(&self, loan_id: i64, date: NaiveDate) -> ApiResult<TransactionId> {
        let mut ledger = self.ledger.write().await;
        let id = ledger.allocate_id();
        let loan = ledger.loan_mut(loan_id)?;
        let outstanding = balance_data(loan_id, loan).principal.unwrap_or_default();
        let transaction = Transaction {
            id,
            date,
            transaction_type: TransactionType::CHARGE_OFF,
            amount: outstanding,
            manually_reversed: false,
            external_id: None,
            transaction_relations: Vec::new(),
        };
        let data = transaction_data(loan_id, &transaction);
        loan.transactions.push(transaction);

        let charged_off = ledger.envelope(EventType::LoanChargeOff, id, "LoanTransactionDataV1", &data)?;
        drop(ledger);

        self.emit(vec![charged_off]);
        Ok(id)
    }

    /// Reverse the latest active charge-off and return its id.
    pub async fn undo_charge_off(&self, loan_id: i64) -> ApiResult<TransactionId> {
        let mut ledger = self.ledger.write().await;
        let loan = ledger.loan_mut(loan_id)?;
        let charge_off = loan
            .transactions
            .iter_mut()
            .rev()
            .find(|t| t.transaction_type == TransactionType::CHARGE_OFF && !t.manually_reversed)
            .ok_or(ApiError::Status {
                status: 403,
                message: format!("Loan {loan_id} is not charged off"),
            })?;
        charge_off.manually_reversed = true;
        let id = charge_off.id;
        let data = transaction_data(loan_id, charge_off);

        let undone = ledger.envelope(EventType::LoanChargeOffUndo, id, "LoanTransactionDataV1", &data)?;
        drop(ledger);

        self.emit(vec![undone]);
        Ok(id)
    }
}

#[async_trait]
impl BackendClient for SimulatedBackend {
    async fn loan_transactions(&self, loan_id: i64) -> ApiResult<Vec<Transaction>> {
        let mut ledger = self.ledger.write().await;
        Ok(ledger.loan_mut(loan_id)?.transactions.clone())
    }

    async fn execute_job(&self, job: &Job) -> ApiResult<()> {
        self.ledger
            .write()
            .await
            .running
            .insert(job.clone(), JOB_RUNNING_POLLS);
        Ok(())
    }

    async fn job_running(&self, job: &Job) -> ApiResult<bool> {
        let mut ledger = self.ledger.write().await;
        let remaining = ledger.running.get(job).copied().unwrap_or(0);
        if remaining > 0 {
            ledger.running.insert(job.clone(), remaining - 1);
            return Ok(true);
        }
        if ledger.running.remove(job).is_some() && *job == Job::LoanCob {
            let business_date = ledger.business_date;
            ledger.cob_processed_date = business_date.checked_sub_days(Days::new(1));
        }
        Ok(false)
    }

    async fn business_date(&self) -> ApiResult<NaiveDate> {
        Ok(self.ledger.read().await.business_date)
    }

    async fn cob_status(&self) -> ApiResult<CobStatus> {
        let ledger = self.ledger.read().await;
        Ok(CobStatus {
            cob_business_date: ledger.cob_processed_date,
            cob_processed_date: ledger.cob_processed_date,
            catch_up_running: ledger.running.contains_key(&Job::LoanCob),
        })
    }
}

/// Shortened timings so failing scenarios finish quickly.
pub fn test_config() -> ProbeConfig {
    let mut config = ProbeConfig::default();
    config.events.timeout_ms = 3_000;
    config.events.poll_interval_ms = 50;
    config.events.not_raised_window_ms = 500;
    config.events.transaction_commit_delay_ms = 50;
    config.events.listener_startup_timeout_ms = 2_000;
    config.job_polling.timeout_ms = 5_000;
    config.job_polling.interval_ms = 100;
    config.job_polling.delay_ms = 50;
    config
}

/// Everything one scenario needs: the backend, the capture pipeline and
/// the verification components wired to the same store.
pub struct Harness {
    pub backend: Arc<SimulatedBackend>,
    pub context: ScenarioContext,
    pub events: EventAssertion,
    pub resolver: TransactionResolver,
    pub jobs: JobRunner,
}

impl Harness {
    pub async fn start(business_date: NaiveDate) -> Self {
        init_tracing();
        let config = test_config();
        config.validate().expect("valid test config");

        let store = Arc::new(EventStore::new());
        let capture = EventCapture::new(store.clone());
        let bus = Arc::new(ChannelEventBus::new());
        let subscriber = bus.create_subscriber(EventFilter::All).await.expect("subscriber");
        capture.attach(subscriber.as_ref()).await.expect("attach capture");
        capture
            .wait_until_running(config.events.listener_startup_timeout())
            .await
            .expect("listener running");

        let backend = Arc::new(SimulatedBackend::new(
            bus,
            Duration::from_millis(150),
            business_date,
        ));
        let events = EventAssertion::new(store.clone(), config.events.assertion_settings());
        let resolver = TransactionResolver::new(backend.clone(), events.clone());
        let jobs = JobRunner::new(backend.clone(), config.job_polling.poll_settings());

        let mut context = ScenarioContext::new(store);
        context.begin_scenario().await;

        Self {
            backend,
            context,
            events,
            resolver,
            jobs,
        }
    }
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
