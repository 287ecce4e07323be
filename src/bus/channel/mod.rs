//! In-process event bus over a tokio broadcast channel.
//!
//! Stands in for the backend's external broker in local runs and tests.
//! Every subscriber sees messages in publish order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use super::{BusMessage, EventBus, EventFilter, EventHandler, Result};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

type Handlers = Arc<RwLock<Vec<Box<dyn EventHandler>>>>;

/// In-memory event bus using a tokio broadcast channel.
///
/// The bus returned by [`ChannelEventBus::new`] receives every event type;
/// [`EventBus::create_subscriber`] narrows a view of the same channel.
pub struct ChannelEventBus {
    sender: broadcast::Sender<Arc<BusMessage>>,
    filter: EventFilter,
    handlers: Handlers,
    consuming: Arc<RwLock<bool>>,
}

impl Default for ChannelEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        info!("Channel event bus initialized");
        Self::with_sender(sender, EventFilter::All)
    }

    fn with_sender(sender: broadcast::Sender<Arc<BusMessage>>, filter: EventFilter) -> Self {
        Self {
            sender,
            filter,
            handlers: Arc::new(RwLock::new(Vec::new())),
            consuming: Arc::new(RwLock::new(false)),
        }
    }

    async fn start_consuming_impl(&self) -> Result<()> {
        {
            let mut consuming = self.consuming.write().await;
            if *consuming {
                return Ok(());
            }
            *consuming = true;
        }

        // Subscribe before spawning so nothing published after this call is missed.
        let mut receiver = self.sender.subscribe();
        let handlers = self.handlers.clone();
        let filter = self.filter.clone();

        tokio::spawn(async move {
            for handler in handlers.read().await.iter() {
                handler.on_consuming();
            }

            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if !filter.matches(&message.event_type) {
                            continue;
                        }
                        debug!(
                            event_type = %message.event_type,
                            bytes = message.body.len(),
                            "Received event via channel"
                        );
                        deliver(&handlers, &message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(skipped = n, "Channel consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });

        info!(filter = ?self.filter, "Channel consumer started");
        Ok(())
    }
}

/// Hand `message` to every handler in registration order.
///
/// A failing handler is logged and does not stop delivery to the rest.
/// Returns the number of handlers that failed.
async fn deliver(handlers: &Handlers, message: &Arc<BusMessage>) -> usize {
    let mut failed = 0;
    for handler in handlers.read().await.iter() {
        if let Err(e) = handler.handle(Arc::clone(message)).await {
            error!(event_type = %message.event_type, error = %e, "Handler failed");
            failed += 1;
        }
    }
    failed
}

#[async_trait]
impl EventBus for ChannelEventBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(event_type = %message.event_type))]
    async fn publish(&self, message: Arc<BusMessage>) -> Result<()> {
        match self.sender.send(message) {
            Ok(receiver_count) => {
                debug!(receivers = receiver_count, "Published event to channel");
            }
            Err(_) => {
                debug!("Published event (no receivers)");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, handler: Box<dyn EventHandler>) -> Result<()> {
        let count = {
            let mut handlers = self.handlers.write().await;
            handlers.push(handler);
            handlers.len()
        };

        info!(handler_count = count, "Handler subscribed to channel bus");

        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        self.start_consuming_impl().await
    }

    async fn create_subscriber(&self, filter: EventFilter) -> Result<Arc<dyn EventBus>> {
        Ok(Arc::new(Self::with_sender(self.sender.clone(), filter)))
    }
}
