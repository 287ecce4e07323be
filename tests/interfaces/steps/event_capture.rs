//! Event capture and assertion step definitions.

use cucumber::{given, then, when, World};
use ledger_probe::client::Job;
use ledger_probe::event::data::LoanAccountDataV1;
use ledger_probe::event::EventType;
use ledger_probe::verify::VerifyError;
use rust_decimal::Decimal;

use super::{business_date, create_loan, date, loan_id};
use crate::backend::Harness;

/// Test context for event capture scenarios.
#[derive(Debug, Default, World)]
pub struct EventCaptureWorld {
    harness: Option<Harness>,
    last_error: Option<VerifyError>,
}

impl EventCaptureWorld {
    fn harness(&mut self) -> &mut Harness {
        self.harness.as_mut().expect("Ledger not started")
    }
}

fn job_named(name: &str) -> Job {
    [
        Job::LoanCob,
        Job::AddAccrualTransactions,
        Job::AddPeriodicAccrualEntries,
        Job::AccrualActivityPosting,
        Job::RecalculateInterest,
        Job::LoanDelinquencyClassification,
    ]
    .into_iter()
    .find(|job| job.name() == name)
    .unwrap_or_else(|| Job::Other(name.to_string()))
}

// --- Background ---

#[given("a running ledger with event capture")]
async fn given_running_ledger(world: &mut EventCaptureWorld) {
    world.harness = Some(Harness::start(business_date()).await);
}

// --- Given / When ---

#[given(expr = "a loan with principal {float}")]
#[when(expr = "a loan with principal {float} is created")]
async fn when_loan_created(world: &mut EventCaptureWorld, principal: Decimal) {
    create_loan(world.harness(), principal).await;
}

#[when(expr = "a repayment of {float} is made on {string}")]
async fn when_repayment_made(world: &mut EventCaptureWorld, amount: Decimal, on: String) {
    let harness = world.harness();
    let loan_id = loan_id(harness);
    harness
        .backend
        .make_repayment(loan_id, date(&on), amount, None)
        .await
        .expect("Repayment failed");
}

#[given(expr = "the {string} event is raised for the loan")]
#[then(expr = "a(n) {string} event is raised for the loan")]
async fn then_event_raised(world: &mut EventCaptureWorld, tag: String) {
    let harness = world.harness();
    let loan_id = loan_id(harness);
    harness
        .events
        .assert_event_raised(EventType::from_tag(&tag), loan_id)
        .await
        .expect("Event not raised");
}

#[when("the scenario context is reset")]
async fn when_context_reset(world: &mut EventCaptureWorld) {
    world.harness().context.begin_scenario().await;
}

#[when(expr = "the {string} job is executed and finishes")]
async fn when_job_executed(world: &mut EventCaptureWorld, name: String) {
    world
        .harness()
        .jobs
        .execute_and_wait(&job_named(&name))
        .await
        .expect("Job did not finish");
}

// --- Then ---

#[then(expr = "the loan created event shows principal {float}")]
async fn then_created_principal(world: &mut EventCaptureWorld, principal: Decimal) {
    let harness = world.harness();
    let loan_id = loan_id(harness);
    let builder = harness
        .events
        .assert_event::<LoanAccountDataV1>(EventType::LoanCreated, loan_id)
        .await
        .expect("Loan created event missing");
    builder
        .extracting_field("id", |d| d.id)
        .is_equal_to(loan_id)
        .and_then(|b| b.extracting_decimal("principal", |d| d.principal).is_equal_to(principal))
        .expect("Loan created event mismatch");
}

#[then(expr = "the latest balance change for the loan shows principal {float}")]
async fn then_latest_balance(world: &mut EventCaptureWorld, principal: Decimal) {
    let harness = world.harness();
    let loan_id = loan_id(harness);
    harness
        .events
        .assert_event::<LoanAccountDataV1>(EventType::LoanBalanceChanged, loan_id)
        .await
        .expect("Balance change event missing")
        .extracting_decimal("principal", |d| d.principal)
        .is_equal_to(principal)
        .expect("Latest balance mismatch");
}

#[then(expr = "{int} balance change events were captured for the loan in order")]
async fn then_balance_events_in_order(world: &mut EventCaptureWorld, count: usize) {
    let harness = world.harness();
    let loan_id = loan_id(harness);
    let all = harness
        .events
        .assert_events::<LoanAccountDataV1>(EventType::LoanBalanceChanged, loan_id)
        .await
        .expect("Balance change events missing");

    assert_eq!(all.len(), count);
    let principals: Vec<Decimal> = all
        .iter()
        .filter_map(|b| b.data().and_then(|d| d.principal))
        .collect();
    assert!(
        principals.windows(2).all(|w| w[0] > w[1]),
        "Balances not in capture order: {principals:?}"
    );
}

#[when(expr = "a(n) {string} event is asserted for the loan")]
async fn when_event_asserted(world: &mut EventCaptureWorld, tag: String) {
    let harness = world.harness();
    let loan_id = loan_id(harness);
    let result = harness
        .events
        .assert_event_raised(EventType::from_tag(&tag), loan_id)
        .await;
    world.last_error = result.err();
}

#[then(expr = "the assertion fails naming {string} as observed")]
async fn then_assertion_failed(world: &mut EventCaptureWorld, observed_tag: String) {
    let err = world.last_error.take().expect("Expected the assertion to fail");
    match &err {
        VerifyError::EventNotFound { observed, .. } => {
            assert!(
                observed.contains(&EventType::from_tag(&observed_tag)),
                "Observed types {observed:?} missing {observed_tag}"
            );
        }
        other => panic!("Expected EventNotFound, got: {other}"),
    }
    assert!(err.to_string().contains(&observed_tag));
}

#[then(expr = "no {string} event is raised for the loan")]
async fn then_event_not_raised(world: &mut EventCaptureWorld, tag: String) {
    let harness = world.harness();
    let loan_id = loan_id(harness);
    harness
        .events
        .assert_event_not_raised_for(EventType::from_tag(&tag), loan_id)
        .await
        .expect("Event was raised");
}

#[then("no events are captured")]
async fn then_store_empty(world: &mut EventCaptureWorld) {
    let harness = world.harness();
    assert!(harness.context.store().is_empty().await);
    assert!(harness.context.get::<i64>(&ledger_probe::context::ContextKey::LoanCreateResponse).is_err());
}

#[then("the COB catch-up has converged")]
async fn then_catch_up_converged(world: &mut EventCaptureWorld) {
    world
        .harness()
        .jobs
        .await_catch_up()
        .await
        .expect("COB catch-up did not converge");
}
