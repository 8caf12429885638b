// ── Hub abstraction ──
//
// Lifecycle management for one Home Assistant connection: connect and
// authenticate, seed the entity store, keep it live from the event
// stream, and fan events out to any number of consumers. The hub does
// NOT reconnect; it surfaces a lost connection through its status and
// leaves the retry decision to whoever owns it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hass_api::{ConnectOptions, HassClient, HassConfig, HassEvent, SessionConfig};

use crate::error::CoreError;
use crate::model::EntityId;
use crate::store::EntityStore;

/// Hub connection status observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubStatus {
    Disconnected,
    Connecting,
    Connected,
    /// The session dropped out from under us. The hub stays in this
    /// state until `connect` or `disconnect` is called again.
    Lost,
}

/// Configuration for a [`Hub`].
#[derive(Clone)]
pub struct HubConfig {
    /// Session settings handed to the underlying client.
    pub session: SessionConfig,

    /// Restrict the server-side subscription to one event type
    /// (`None` subscribes to everything).
    pub event_type: Option<String>,

    /// Capacity of the broadcast fan-out channel. Slow consumers that
    /// fall further behind than this observe a lag error, not a stall.
    pub event_channel_size: usize,
}

impl HubConfig {
    pub fn new(session: SessionConfig) -> Self {
        Self {
            session,
            event_type: None,
            event_channel_size: 256,
        }
    }
}

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc`. Wraps a [`HassClient`] with a live
/// [`EntityStore`] and an event broadcast channel.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    client: HassClient,
    store: Arc<EntityStore>,
    status_tx: watch::Sender<HubStatus>,
    event_tx: broadcast::Sender<Arc<HassEvent>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Create a hub from configuration. Does not connect — call
    /// [`connect`](Self::connect).
    pub fn new(config: HubConfig) -> Self {
        let client = HassClient::new(config.session.clone());
        let (status_tx, _) = watch::channel(HubStatus::Disconnected);
        let (event_tx, _) = broadcast::channel(config.event_channel_size);

        Self {
            inner: Arc::new(HubInner {
                config,
                client,
                store: Arc::new(EntityStore::new()),
                status_tx,
                event_tx,
                task: Mutex::new(None),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect, authenticate, seed the store, and start the event task.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.set_status(HubStatus::Connecting);
        match self.try_connect().await {
            Ok(()) => {
                self.set_status(HubStatus::Connected);
                info!("hub connected");
                Ok(())
            }
            Err(e) => {
                self.set_status(HubStatus::Disconnected);
                Err(e)
            }
        }
    }

    async fn try_connect(&self) -> Result<(), CoreError> {
        let inner = &self.inner;

        let authed = inner
            .client
            .connect(ConnectOptions {
                get_states_on_connect: true,
                subscribe_events: false,
            })
            .await?;
        if !authed {
            return Err(CoreError::AuthFailed);
        }

        // Subscribe with the configured filter rather than through the
        // connect options, which always subscribe to everything.
        if let Err(e) = inner
            .client
            .subscribe_events(inner.config.event_type.clone())
            .await
        {
            let _ = inner.client.close().await;
            return Err(e.into());
        }

        inner.store.seed(inner.client.states_snapshot());
        debug!(entities = inner.store.len(), "entity store seeded");

        *inner.task.lock().await = Some(tokio::spawn(event_task(self.clone())));
        Ok(())
    }

    /// Close the session and stop the event task.
    pub async fn disconnect(&self) {
        // Leave `Connected` before closing so the event task's loss
        // detection no-ops on a deliberate disconnect.
        self.set_status(HubStatus::Disconnected);
        let _ = self.inner.client.close().await;
        if let Some(task) = self.inner.task.lock().await.take() {
            let _ = task.await;
        }
        debug!("hub disconnected");
    }

    /// Subscribe to status changes.
    pub fn status(&self) -> watch::Receiver<HubStatus> {
        self.inner.status_tx.subscribe()
    }

    // ── Data access ──────────────────────────────────────────────────

    /// The live entity store.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.inner.store
    }

    /// Latest known state of one entity.
    pub fn entity(&self, id: &EntityId) -> Option<Arc<hass_api::HassState>> {
        self.inner.store.get(id)
    }

    /// Subscribe to the event broadcast stream.
    pub fn events(&self) -> broadcast::Receiver<Arc<HassEvent>> {
        self.inner.event_tx.subscribe()
    }

    // ── Commands (delegated to the session) ──────────────────────────

    pub async fn call_service(
        &self,
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: Option<Value>,
    ) -> Result<bool, CoreError> {
        Ok(self
            .inner
            .client
            .call_service(domain, service, service_data)
            .await?)
    }

    pub async fn get_config(&self) -> Result<HassConfig, CoreError> {
        Ok(self.inner.client.get_config().await?)
    }

    pub async fn ping(&self, timeout: Duration) -> Result<bool, CoreError> {
        Ok(self.inner.client.ping(timeout).await?)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn set_status(&self, status: HubStatus) {
        self.inner.status_tx.send_replace(status);
    }
}

/// Drain the session's event stream: fold state changes into the store,
/// then fan the event out to subscribers.
async fn event_task(hub: Hub) {
    loop {
        match hub.inner.client.read_event().await {
            Ok(event) => {
                let event = Arc::new(event);
                hub.inner.store.apply_event(&event);
                // A send error just means nobody is listening right now.
                let _ = hub.inner.event_tx.send(event);
            }
            Err(e) if e.is_disconnect() => break,
            Err(e) => {
                warn!(error = %e, "event stream error");
                break;
            }
        }
    }

    // Surface the loss unless a deliberate disconnect already moved the
    // status along.
    hub.inner.status_tx.send_if_modified(|status| {
        if *status == HubStatus::Connected {
            *status = HubStatus::Lost;
            true
        } else {
            false
        }
    });
    debug!("event task exiting");
}
