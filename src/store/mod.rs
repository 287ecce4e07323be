//! Scenario-scoped capture store for domain events.
//!
//! This module contains:
//! - `EventStore`: in-memory index from `(EventType, AggregateId)` to the
//!   events captured for that pair, in capture order
//! - `EventCapture`: the bus consumer that feeds the store

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::event::{AggregateId, DomainEvent, EventType};

mod capture;

pub use capture::EventCapture;

/// In-memory event capture store.
///
/// Written by the bus consumer task, read by assertions. Append-only
/// between calls to [`EventStore::reset`].
#[derive(Debug, Default)]
pub struct EventStore {
    events: RwLock<HashMap<(EventType, AggregateId), Vec<DomainEvent>>>,
    next_sequence: AtomicU64,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every captured event.
    pub async fn reset(&self) {
        let mut events = self.events.write().await;
        let dropped: usize = events.values().map(Vec::len).sum();
        events.clear();
        info!(dropped, "Event store reset");
    }

    /// Record a captured event.
    ///
    /// Assigns `sequence` and `received_at` under the write lock so capture
    /// order and sequence order agree even with concurrent writers.
    pub async fn record(&self, mut event: DomainEvent) -> u64 {
        let mut events = self.events.write().await;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        event.sequence = sequence;
        event.received_at = Instant::now();

        debug!(
            event_type = %event.event_type,
            key = event.correlation_key,
            sequence,
            "Event captured"
        );

        events
            .entry((event.event_type.clone(), event.correlation_key))
            .or_default()
            .push(event);
        sequence
    }

    /// Events captured for `(event_type, key)`, in capture order.
    ///
    /// Empty when nothing has been captured yet.
    pub async fn query(&self, event_type: &EventType, key: AggregateId) -> Vec<DomainEvent> {
        let events = self.events.read().await;
        events
            .get(&(event_type.clone(), key))
            .cloned()
            .unwrap_or_default()
    }

    /// Every captured event, in capture order.
    pub async fn all(&self) -> Vec<DomainEvent> {
        let events = self.events.read().await;
        let mut all: Vec<DomainEvent> = events.values().flatten().cloned().collect();
        all.sort_by_key(|e| e.sequence);
        all
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
