//! Event assertion engine.
//!
//! Polls the capture store for `(EventType, AggregateId)` and binds the
//! latest matching capture to a typed builder for field checks.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{Result, VerifyError};
use crate::event::{AggregateId, DomainEvent, EventSchema, EventType};
use crate::poll::{self, PollError, PollSettings, Probe};
use crate::store::EventStore;

/// Timing and switches for event assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssertionSettings {
    /// When false every assertion is a logged no-op success.
    pub verification_enabled: bool,
    /// Wait used for positive assertions.
    pub poll: PollSettings,
    /// Window used for negative and duplicate checks.
    pub not_raised_window: Duration,
    /// Pause before polling starts, covering the backend's commit latency.
    pub commit_delay: Duration,
}

impl Default for AssertionSettings {
    fn default() -> Self {
        Self {
            verification_enabled: true,
            poll: PollSettings::default(),
            not_raised_window: Duration::from_secs(2),
            commit_delay: Duration::from_millis(100),
        }
    }
}

/// Asserts on events captured in an [`EventStore`].
#[derive(Debug, Clone)]
pub struct EventAssertion {
    store: Arc<EventStore>,
    settings: AssertionSettings,
}

impl EventAssertion {
    pub fn new(store: Arc<EventStore>, settings: AssertionSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn settings(&self) -> &AssertionSettings {
        &self.settings
    }

    /// Wait for `event_type` on `key` and bind the latest capture.
    ///
    /// Repeated captures for the same pair resolve to the most recent one;
    /// use [`EventAssertion::assert_events`] to inspect all of them.
    #[tracing::instrument(name = "verify.assert_event", skip(self), fields(event_type = %event_type))]
    pub async fn assert_event<D: EventSchema>(
        &self,
        event_type: EventType,
        key: AggregateId,
    ) -> Result<EventAssertionBuilder<D>> {
        if !self.enabled() {
            return Ok(EventAssertionBuilder::unbound(event_type, key));
        }

        let mut captured = self.await_captures(&event_type, key).await?;
        let Some(latest) = captured.pop() else {
            return Err(VerifyError::EventNotFound {
                event_type,
                key,
                waited: self.settings.poll.timeout,
                observed: Vec::new(),
            });
        };
        let builder = EventAssertionBuilder::bind(latest)?;
        info!(key, "Event raised");
        Ok(builder)
    }

    /// Wait for `event_type` on `key` and bind every capture, in capture order.
    #[tracing::instrument(name = "verify.assert_events", skip(self), fields(event_type = %event_type))]
    pub async fn assert_events<D: EventSchema>(
        &self,
        event_type: EventType,
        key: AggregateId,
    ) -> Result<Vec<EventAssertionBuilder<D>>> {
        if !self.enabled() {
            return Ok(Vec::new());
        }

        let captured = self.await_captures(&event_type, key).await?;
        info!(key, count = captured.len(), "Events raised");
        captured.into_iter().map(EventAssertionBuilder::bind).collect()
    }

    /// Presence-only check.
    #[tracing::instrument(name = "verify.assert_event_raised", skip(self), fields(event_type = %event_type))]
    pub async fn assert_event_raised(&self, event_type: EventType, key: AggregateId) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        self.await_captures(&event_type, key).await?;
        info!(key, "Event raised");
        Ok(())
    }

    /// Exactly one capture of `event_type` on `key`.
    ///
    /// Waits for the first capture, then holds for the not-raised window so a
    /// duplicate publication has time to arrive before counting.
    #[tracing::instrument(name = "verify.assert_single_event", skip(self), fields(event_type = %event_type))]
    pub async fn assert_single_event(&self, event_type: EventType, key: AggregateId) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        self.await_captures(&event_type, key).await?;
        sleep(self.settings.not_raised_window).await;

        let count = self.store.query(&event_type, key).await.len();
        if count != 1 {
            warn!(key, count, "Duplicate event publication");
            return Err(VerifyError::DuplicateEvent {
                event_type,
                key,
                count,
            });
        }
        debug!(key, "Single event confirmed");
        Ok(())
    }

    /// Fail if any capture of `event_type` satisfies `predicate` within the
    /// not-raised window.
    ///
    /// Best effort: absence is only checked for the length of the window.
    #[tracing::instrument(name = "verify.assert_event_not_raised", skip(self, predicate), fields(event_type = %event_type))]
    pub async fn assert_event_not_raised<F>(&self, event_type: EventType, predicate: F) -> Result<()>
    where
        F: Fn(&DomainEvent) -> bool,
    {
        if !self.enabled() {
            return Ok(());
        }

        let settings = PollSettings::new(
            self.settings.not_raised_window,
            self.settings.poll.interval,
            Duration::ZERO,
        );
        let store = &self.store;
        let predicate = &predicate;
        let wanted = &event_type;
        let alias = format!("absence of {event_type}");
        let found = poll::await_value(&alias, &settings, || async move {
            let hit = store
                .all()
                .await
                .into_iter()
                .find(|e| e.event_type == *wanted && predicate(e));
            Ok::<_, PollError>(match hit {
                Some(event) => Probe::Ready(event),
                None => Probe::pending(),
            })
        })
        .await;

        match found {
            Ok(event) => {
                warn!(key = event.correlation_key, "Unexpected event raised");
                Err(VerifyError::UnexpectedEvent {
                    event_type,
                    key: Some(event.correlation_key),
                    detail: format!("capture #{} with payload {}", event.sequence, event.payload),
                })
            }
            Err(PollError::Timeout { waited, .. }) => {
                debug!(waited = ?waited, "Event not raised");
                Ok(())
            }
        }
    }

    /// Fail if `event_type` is raised for `key` within the not-raised window.
    pub async fn assert_event_not_raised_for(&self, event_type: EventType, key: AggregateId) -> Result<()> {
        self.assert_event_not_raised(event_type, |e| e.correlation_key == key)
            .await
    }

    fn enabled(&self) -> bool {
        if !self.settings.verification_enabled {
            debug!("Event verification disabled, skipping assertion");
        }
        self.settings.verification_enabled
    }

    /// Poll until at least one capture for the pair exists.
    ///
    /// Only captures received before the deadline count, so a late capture
    /// can never satisfy an assertion that already timed out.
    async fn await_captures(&self, event_type: &EventType, key: AggregateId) -> Result<Vec<DomainEvent>> {
        if !self.settings.commit_delay.is_zero() {
            sleep(self.settings.commit_delay).await;
        }

        let cutoff = Instant::now() + self.settings.poll.timeout;
        let store = &self.store;
        let alias = format!("{event_type} for key {key}");
        let waited = poll::await_value(&alias, &self.settings.poll, || async move {
            let captured: Vec<DomainEvent> = store
                .query(event_type, key)
                .await
                .into_iter()
                .filter(|e| e.received_at <= cutoff)
                .collect();
            Ok::<_, PollError>(if captured.is_empty() {
                Probe::pending()
            } else {
                Probe::Ready(captured)
            })
        })
        .await;

        match waited {
            Ok(captured) => Ok(captured),
            Err(PollError::Timeout { waited, .. }) => {
                let observed = self.observed_for(key).await;
                warn!(key, waited = ?waited, observed = ?observed, "Event not raised in time");
                Err(VerifyError::EventNotFound {
                    event_type: event_type.clone(),
                    key,
                    waited,
                    observed,
                })
            }
        }
    }

    async fn observed_for(&self, key: AggregateId) -> Vec<EventType> {
        let mut observed: Vec<EventType> = self
            .store
            .all()
            .await
            .into_iter()
            .filter(|e| e.correlation_key == key)
            .map(|e| e.event_type)
            .collect();
        observed.sort();
        observed.dedup();
        observed
    }
}

/// Typed view of one captured event, for chained field checks.
///
/// Unbound when verification is disabled; every check then passes.
#[derive(Debug, Clone)]
pub struct EventAssertionBuilder<D> {
    event_type: EventType,
    key: AggregateId,
    bound: Option<(DomainEvent, D)>,
}

impl<D: EventSchema> EventAssertionBuilder<D> {
    fn bind(event: DomainEvent) -> Result<Self> {
        if !event.matches_schema::<D>() {
            return Err(VerifyError::SchemaMismatch {
                event_type: event.event_type,
                key: event.correlation_key,
                expected: D::SCHEMA,
                actual: event.data_schema,
            });
        }
        let data = event
            .payload_as::<D>()
            .map_err(|source| VerifyError::PayloadDecode {
                event_type: event.event_type.clone(),
                key: event.correlation_key,
                source,
            })?;
        Ok(Self {
            event_type: event.event_type.clone(),
            key: event.correlation_key,
            bound: Some((event, data)),
        })
    }
}

impl<D> EventAssertionBuilder<D> {
    fn unbound(event_type: EventType, key: AggregateId) -> Self {
        Self {
            event_type,
            key,
            bound: None,
        }
    }

    /// The bound capture; `None` when verification is disabled.
    pub fn event(&self) -> Option<&DomainEvent> {
        self.bound.as_ref().map(|(event, _)| event)
    }

    /// The decoded payload; `None` when verification is disabled.
    pub fn data(&self) -> Option<&D> {
        self.bound.as_ref().map(|(_, data)| data)
    }

    pub fn extracting_field<V, F>(&self, field: &str, selector: F) -> FieldAssertion<'_, D, V>
    where
        F: FnOnce(&D) -> V,
    {
        FieldAssertion {
            builder: self,
            field: field.to_string(),
            actual: self.data().map(selector),
        }
    }

    /// Field check labelled by its position in the payload rather than a name.
    pub fn extracting_data<V, F>(&self, selector: F) -> FieldAssertion<'_, D, V>
    where
        F: FnOnce(&D) -> V,
    {
        self.extracting_field("data", selector)
    }

    /// Monetary field check with exact, scale-insensitive decimal equality.
    pub fn extracting_decimal<F>(&self, field: &str, selector: F) -> DecimalAssertion<'_, D>
    where
        F: FnOnce(&D) -> Option<Decimal>,
    {
        DecimalAssertion {
            builder: self,
            field: field.to_string(),
            actual: self.data().map(selector),
        }
    }

    fn mismatch(&self, field: &str, expected: String, actual: String) -> VerifyError {
        warn!(
            event_type = %self.event_type,
            key = self.key,
            field,
            expected = %expected,
            actual = %actual,
            "Event field mismatch"
        );
        VerifyError::AssertionMismatch {
            event_type: self.event_type.clone(),
            key: self.key,
            field: field.to_string(),
            expected,
            actual,
        }
    }
}

/// One extracted field awaiting a comparison.
///
/// `actual` is `None` when the builder is unbound.
pub struct FieldAssertion<'a, D, V> {
    builder: &'a EventAssertionBuilder<D>,
    field: String,
    actual: Option<V>,
}

impl<'a, D, V: Debug> FieldAssertion<'a, D, V> {
    pub fn is_equal_to(self, expected: V) -> Result<&'a EventAssertionBuilder<D>>
    where
        V: PartialEq,
    {
        self.check(format!("{expected:?}"), |actual| *actual == expected)
    }

    /// Custom predicate; `description` names the expectation in failures.
    pub fn satisfies<P>(self, description: &str, predicate: P) -> Result<&'a EventAssertionBuilder<D>>
    where
        P: FnOnce(&V) -> bool,
    {
        self.check(description.to_string(), predicate)
    }

    fn check<P>(self, expected: String, predicate: P) -> Result<&'a EventAssertionBuilder<D>>
    where
        P: FnOnce(&V) -> bool,
    {
        if let Some(actual) = &self.actual {
            if !predicate(actual) {
                return Err(self.builder.mismatch(&self.field, expected, format!("{actual:?}")));
            }
        }
        Ok(self.builder)
    }
}

impl<'a, D, T: Debug> FieldAssertion<'a, D, Option<T>> {
    pub fn is_none(self) -> Result<&'a EventAssertionBuilder<D>> {
        self.check("None".to_string(), Option::is_none)
    }

    pub fn is_some(self) -> Result<&'a EventAssertionBuilder<D>> {
        self.check("Some(_)".to_string(), Option::is_some)
    }
}

impl<'a, D> FieldAssertion<'a, D, String> {
    pub fn contains(self, needle: &str) -> Result<&'a EventAssertionBuilder<D>> {
        self.check(format!("text containing {needle:?}"), |actual| {
            actual.contains(needle)
        })
    }
}

impl<'a, D> FieldAssertion<'a, D, Option<String>> {
    pub fn contains(self, needle: &str) -> Result<&'a EventAssertionBuilder<D>> {
        self.check(format!("text containing {needle:?}"), |actual| {
            actual.as_deref().is_some_and(|text| text.contains(needle))
        })
    }
}

impl<'a, D, U: PartialEq + Debug> FieldAssertion<'a, D, Vec<U>> {
    pub fn contains(self, item: &U) -> Result<&'a EventAssertionBuilder<D>> {
        self.check(format!("list containing {item:?}"), |actual| {
            actual.contains(item)
        })
    }
}

/// Extracted monetary field.
pub struct DecimalAssertion<'a, D> {
    builder: &'a EventAssertionBuilder<D>,
    field: String,
    actual: Option<Option<Decimal>>,
}

impl<'a, D> DecimalAssertion<'a, D> {
    /// Exact value equality; `30` equals `30.00`.
    pub fn is_equal_to(self, expected: impl Into<Option<Decimal>>) -> Result<&'a EventAssertionBuilder<D>> {
        let expected = expected.into();
        match self.actual {
            Some(actual) if actual != expected => Err(self.builder.mismatch(
                &self.field,
                render_decimal(expected),
                render_decimal(actual),
            )),
            _ => Ok(self.builder),
        }
    }

    pub fn is_none(self) -> Result<&'a EventAssertionBuilder<D>> {
        self.is_equal_to(None)
    }
}

fn render_decimal(value: Option<Decimal>) -> String {
    match value {
        Some(value) => value.normalize().to_string(),
        None => "null".to_string(),
    }
}
