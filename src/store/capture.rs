//! Bus consumer feeding the event store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use super::EventStore;
use crate::bus::{BusError, BusMessage, EventBus, EventHandler};
use crate::event::EventEnvelope;
use crate::poll::{self, PollSettings};

/// Decodes delivered envelopes and records them into an [`EventStore`].
///
/// Cheap to clone; clones share the store and the running flag.
#[derive(Clone)]
pub struct EventCapture {
    store: Arc<EventStore>,
    running: Arc<AtomicBool>,
}

impl EventCapture {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Subscribe to `bus` and start consuming.
    ///
    /// Returns once consumption is requested. The running flag is set later,
    /// from the bus's consumer task; use [`EventCapture::wait_until_running`]
    /// before triggering events.
    pub async fn attach(&self, bus: &dyn EventBus) -> crate::bus::Result<()> {
        bus.subscribe(Box::new(self.clone())).await?;
        bus.start_consuming().await?;
        info!("Event capture attached to bus");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for the listener to come up before the first scenario runs.
    pub async fn wait_until_running(&self, timeout: Duration) -> poll::Result<()> {
        let settings = PollSettings::new(timeout, Duration::from_millis(100), Duration::ZERO);
        let running = self.running.clone();
        poll::await_until("event listener startup", &settings, || {
            let up = running.load(Ordering::SeqCst);
            async move { up }
        })
        .await
    }
}

impl EventHandler for EventCapture {
    fn handle(&self, message: Arc<BusMessage>) -> BoxFuture<'static, Result<(), BusError>> {
        let store = self.store.clone();
        Box::pin(async move {
            let envelope = match EventEnvelope::decode(&message.body) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(event_type = %message.event_type, error = %e, "Dropping undecodable event");
                    return Err(BusError::Decode(e));
                }
            };
            store.record(envelope.into_domain_event()).await;
            Ok(())
        })
    }

    fn on_consuming(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("Event listener running");
    }
}
