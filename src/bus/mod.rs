//! Event bus carrying the backend's serialized business events.
//!
//! This module contains:
//! - `EventBus` trait: delivery of serialized events to subscribers
//! - `EventHandler` trait: for processing delivered messages
//! - `BusMessage`: one serialized event tagged with its event type
//! - `EventFilter`: which event types a subscriber receives
//! - Implementations: in-process channel

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::event::{EventEnvelope, EventType};

pub mod channel;

pub use channel::ChannelEventBus;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to decode event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Handler '{name}' failed: {message}")]
    HandlerFailed { name: String, message: String },
}

/// One serialized event on the bus.
///
/// `event_type` is read from the envelope's `type` tag at publish time so
/// subscribers can filter without decoding the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub event_type: EventType,
    pub body: Vec<u8>,
}

impl BusMessage {
    pub fn new(event_type: EventType, body: Vec<u8>) -> Self {
        Self { event_type, body }
    }

    /// Serialize an envelope, tagging the message with its event type.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self> {
        Ok(Self::new(envelope.event_type.clone(), envelope.encode()?))
    }
}

/// Event types a subscriber receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventFilter {
    #[default]
    All,
    Only(HashSet<EventType>),
}

impl EventFilter {
    pub fn only(types: impl IntoIterator<Item = EventType>) -> Self {
        Self::Only(types.into_iter().collect())
    }

    pub fn matches(&self, event_type: &EventType) -> bool {
        match self {
            Self::All => true,
            Self::Only(types) => types.contains(event_type),
        }
    }
}

/// Handler for processing messages from the bus.
pub trait EventHandler: Send + Sync {
    /// Process one delivered message.
    fn handle(&self, message: Arc<BusMessage>) -> BoxFuture<'static, Result<()>>;

    /// Called from the consumer task once it is receiving.
    fn on_consuming(&self) {}
}

/// Interface for delivering the backend's events to listeners.
///
/// Implementations:
/// - `ChannelEventBus`: in-process broadcast channel
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to all subscribers whose filter matches.
    ///
    /// The message is wrapped in Arc so every consumer shares the same
    /// immutable bytes.
    async fn publish(&self, message: Arc<BusMessage>) -> Result<()>;

    /// Register a handler. Handlers must be registered before
    /// `start_consuming` to be told when consumption begins.
    async fn subscribe(&self, handler: Box<dyn EventHandler>) -> Result<()>;

    /// Start delivering messages to registered handlers.
    ///
    /// Calling it more than once is a no-op.
    async fn start_consuming(&self) -> Result<()>;

    /// Create a subscriber sharing this bus's transport.
    async fn create_subscriber(&self, filter: EventFilter) -> Result<Arc<dyn EventBus>>;
}
