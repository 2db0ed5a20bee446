//! Subscription/poll coordinator.
//!
//! One task owns all mutable state and processes, in order:
//! - host events (activation, preference changes, metadata import, shutdown)
//! - broker notifications
//! - completions of the network work it spawned
//!
//! Each configuration cycle has a generation number. Completions from an
//! older generation are discarded; a subscription that an older generation
//! managed to create is deleted on arrival so that no subscription outlives
//! its cycle.

use crate::fetcher::{fetch_snapshot, EmitPolicy, FetchOutcome};
use crate::subscription::{
    expiry_from, spawn_create, spawn_delete, spawn_renew, spawn_renewal_timer,
    ActiveSubscription, RENEWAL_INTERVAL,
};
use crate::wiring::{Endpoint, Wiring};
use chrono::{DateTime, Utc};
use ngsi_source_adapter_ngsi::{
    ClientError, Connector, ContextBroker, EntityQuery, Notification, SubscriptionRequest,
};
use ngsi_source_core::{flatten_batch, AttrsFormat, MetadataExport, MetadataImport, SourceConfig};
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No configuration cycle is running
    Unconfigured,
    /// Waiting for the broker to create the subscription
    Subscribing,
    /// Subscribed (or snapshot-only) and serving updates
    Active,
    /// Tearing the previous cycle down before subscribing again
    Reconfiguring,
    /// Tearing down for good
    TearingDown,
}

/// Signals coming from the host runtime.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// The host finished loading the operator
    Activate,
    /// Preferences were replaced
    PreferencesChanged(SourceConfig),
    /// Metadata received on the metadata input; `None` clears downstream consumers
    MetadataImport(Option<MetadataImport>),
    /// Endpoint connectivity changed
    WiringStatusChanged,
    /// The host is unloading the operator
    Shutdown,
}

/// Snapshot of the coordinator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Lifecycle state
    pub state: State,
    /// Current configuration cycle
    pub generation: u64,
    /// Live subscription id
    pub subscription_id: Option<String>,
    /// Whether a snapshot fetch is running
    pub fetch_active: bool,
}

/// Tunables of the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Interval between subscription renewals
    pub renewal_interval: Duration,
    /// Capacity of the command queue
    pub command_capacity: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            renewal_interval: RENEWAL_INTERVAL,
            command_capacity: 100,
        }
    }
}

enum Command {
    Host(HostEvent),
    Notification(Notification),
    Status(oneshot::Sender<Status>),
}

/// Completions reported by spawned work.
pub(crate) enum Internal {
    SubscriptionCreated {
        generation: u64,
        broker: Arc<dyn ContextBroker>,
        attrs_format: AttrsFormat,
        expires: DateTime<Utc>,
        result: Result<String, ClientError>,
    },
    SubscriptionRenewed {
        generation: u64,
        subscription_id: String,
        expires: DateTime<Utc>,
    },
    RenewTick {
        generation: u64,
    },
    Entities {
        generation: u64,
        attrs_format: AttrsFormat,
        entities: Vec<Value>,
    },
    FetchFinished {
        generation: u64,
        outcome: FetchOutcome,
    },
}

/// Handle used by the host to talk to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    /// Deliver a host event.
    ///
    /// # Errors
    ///
    /// Returns error if the coordinator has stopped.
    pub async fn send(&self, event: HostEvent) -> Result<(), CoordinatorStopped> {
        self.tx
            .send(Command::Host(event))
            .await
            .map_err(|_| CoordinatorStopped)
    }

    /// Deliver a broker notification.
    ///
    /// # Errors
    ///
    /// Returns error if the coordinator has stopped.
    pub async fn notify(&self, notification: Notification) -> Result<(), CoordinatorStopped> {
        self.tx
            .send(Command::Notification(notification))
            .await
            .map_err(|_| CoordinatorStopped)
    }

    /// Ask for the current status.
    ///
    /// # Errors
    ///
    /// Returns error if the coordinator has stopped.
    pub async fn status(&self) -> Result<Status, CoordinatorStopped> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Status(tx))
            .await
            .map_err(|_| CoordinatorStopped)?;
        rx.await.map_err(|_| CoordinatorStopped)
    }
}

/// The coordinator is no longer running.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("coordinator stopped")]
pub struct CoordinatorStopped;

struct FetchHandle {
    generation: u64,
    cancel: CancellationToken,
}

/// Owner of the subscription and snapshot state.
pub struct Coordinator<W: Wiring> {
    connector: Arc<dyn Connector>,
    wiring: Arc<W>,
    settings: CoordinatorSettings,
    config: SourceConfig,
    state: State,
    generation: u64,
    broker: Option<Arc<dyn ContextBroker>>,
    subscription: Option<ActiveSubscription>,
    fetch: Option<FetchHandle>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: Option<mpsc::UnboundedReceiver<Internal>>,
    commands: Option<mpsc::Receiver<Command>>,
}

impl<W: Wiring> Coordinator<W> {
    /// Create a coordinator and the handle used to drive it.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        wiring: Arc<W>,
        config: SourceConfig,
        settings: CoordinatorSettings,
    ) -> (Self, CoordinatorHandle) {
        let (command_tx, command_rx) = mpsc::channel(settings.command_capacity.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let coordinator = Self {
            connector,
            wiring,
            settings,
            config,
            state: State::Unconfigured,
            generation: 0,
            broker: None,
            subscription: None,
            fetch: None,
            internal_tx,
            internal_rx: Some(internal_rx),
            commands: Some(command_rx),
        };

        (coordinator, CoordinatorHandle { tx: command_tx })
    }

    /// Process events until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        let (Some(mut commands), Some(mut internal_rx)) =
            (self.commands.take(), self.internal_rx.take())
        else {
            return;
        };

        tracing::info!("Coordinator running");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Host(event)) => {
                        if self.handle_host(event).is_break() {
                            break;
                        }
                    }
                    Some(Command::Notification(notification)) => {
                        self.handle_notification(notification);
                    }
                    Some(Command::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    None => break,
                },
                Some(internal) = internal_rx.recv() => self.handle_internal(internal),
            }
        }

        if let Some(delete) = self.shutdown() {
            let _ = delete.await;
        }

        tracing::info!("Coordinator stopped");
    }

    fn status(&self) -> Status {
        Status {
            state: self.state,
            generation: self.generation,
            subscription_id: self.subscription.as_ref().map(|s| s.id.clone()),
            fetch_active: self.fetch.is_some(),
        }
    }

    fn handle_host(&mut self, event: HostEvent) -> ControlFlow<()> {
        match event {
            HostEvent::Activate => {
                if !self.wiring.is_connected(Endpoint::NgsiMetadataInput) {
                    self.subscribe();
                    self.send_metadata();
                }
            }
            HostEvent::PreferencesChanged(config) => {
                self.config = config;
                self.reconfigure();
            }
            HostEvent::MetadataImport(Some(import)) => {
                import.apply_to(&mut self.config);
                self.reconfigure();
            }
            HostEvent::MetadataImport(None) => {
                for endpoint in [Endpoint::EntityOutput, Endpoint::NormalizedOutput] {
                    if self.wiring.is_connected(endpoint) {
                        self.wiring.push_event(endpoint, Value::Null);
                    }
                }
            }
            HostEvent::WiringStatusChanged => {
                if self.broker.is_none() {
                    self.subscribe();
                }
            }
            HostEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn handle_notification(&mut self, notification: Notification) {
        match &self.subscription {
            Some(subscription) if subscription.id == notification.subscription_id => {
                let attrs_format = subscription.attrs_format;
                self.emit(attrs_format, notification.data);
            }
            _ => {
                tracing::debug!(
                    subscription_id = %notification.subscription_id,
                    "Dropping notification for an unknown subscription"
                );
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::SubscriptionCreated {
                generation,
                broker,
                attrs_format,
                expires,
                result,
            } => self.on_subscription_created(generation, broker, attrs_format, expires, result),
            Internal::SubscriptionRenewed {
                generation,
                subscription_id,
                expires,
            } => {
                if generation != self.generation {
                    return;
                }
                if let Some(subscription) = self
                    .subscription
                    .as_mut()
                    .filter(|s| s.id == subscription_id)
                {
                    subscription.expires = expires;
                }
            }
            Internal::RenewTick { generation } => self.on_renew_tick(generation),
            Internal::Entities {
                generation,
                attrs_format,
                entities,
            } => {
                let current = self
                    .fetch
                    .as_ref()
                    .is_some_and(|f| f.generation == generation && !f.cancel.is_cancelled());
                if current {
                    self.emit(attrs_format, entities);
                } else {
                    tracing::debug!(generation, "Discarding entities of a cancelled fetch");
                }
            }
            Internal::FetchFinished {
                generation,
                outcome,
            } => {
                if self.fetch.as_ref().is_some_and(|f| f.generation == generation) {
                    self.fetch = None;
                }
                match outcome {
                    FetchOutcome::Completed { pages, entities } => {
                        tracing::info!(generation, pages, entities, "Initial values retrieved");
                    }
                    FetchOutcome::Cancelled { pages } => {
                        tracing::debug!(generation, pages, "Initial query cancelled");
                    }
                    FetchOutcome::Failed { pages, error } => {
                        tracing::warn!(generation, pages, error = %error, "Initial query stopped");
                    }
                }
            }
        }
    }

    /// Start a configuration cycle with the current configuration.
    fn subscribe(&mut self) {
        let _ = self.cancel_cycle("replaced by a new cycle");
        self.generation += 1;
        self.broker = None;

        let entity_connected = self.wiring.is_connected(Endpoint::EntityOutput);
        let normalized_connected = self.wiring.is_connected(Endpoint::NormalizedOutput);
        if !entity_connected && !normalized_connected {
            tracing::debug!("No entity output connected, not subscribing");
            self.state = State::Unconfigured;
            return;
        }

        if let Err(e) = self.config.validate() {
            tracing::error!(error = %e, "Invalid configuration");
            self.state = State::Unconfigured;
            return;
        }

        let broker = match self.connector.connect(&self.config) {
            Ok(broker) => broker,
            Err(e) => {
                tracing::error!(error = %e, "Error creating the context broker connection");
                self.state = State::Unconfigured;
                return;
            }
        };
        self.broker = Some(broker.clone());

        let attrs_format = AttrsFormat::negotiate(normalized_connected);

        if self.config.update_attributes().is_empty() {
            tracing::info!(generation = self.generation, "No update attributes, snapshot only");
            self.start_fetch(broker, attrs_format);
            self.state = State::Active;
            return;
        }

        let request =
            SubscriptionRequest::from_config(&self.config, attrs_format, expiry_from(Utc::now()));

        tracing::info!(
            generation = self.generation,
            entities = request.entities.len(),
            attrs_format = attrs_format.as_str(),
            "Creating subscription"
        );

        self.state = State::Subscribing;
        spawn_create(broker, request, self.generation, self.internal_tx.clone());
    }

    fn on_subscription_created(
        &mut self,
        generation: u64,
        broker: Arc<dyn ContextBroker>,
        attrs_format: AttrsFormat,
        expires: DateTime<Utc>,
        result: Result<String, ClientError>,
    ) {
        if generation != self.generation {
            if let Ok(id) = result {
                tracing::info!(
                    subscription_id = %id,
                    generation,
                    "Subscription created by a previous configuration, removing it"
                );
                spawn_delete(broker, id, "stale configuration");
            }
            return;
        }

        match result {
            Ok(id) => {
                tracing::info!(subscription_id = %id, %expires, "Subscription created successfully");

                let renewal = CancellationToken::new();
                spawn_renewal_timer(
                    self.settings.renewal_interval,
                    generation,
                    renewal.clone(),
                    self.internal_tx.clone(),
                );
                self.subscription = Some(ActiveSubscription::new(id, attrs_format, expires, renewal));
                self.start_fetch(broker, attrs_format);
                self.state = State::Active;
            }
            Err(e) => {
                if e.is_connectivity() {
                    tracing::error!(error = %e, "Error connecting with the context broker");
                } else {
                    tracing::error!(
                        error = %e,
                        "Error creating subscription in the context broker server"
                    );
                }
                self.state = State::Unconfigured;
            }
        }
    }

    fn on_renew_tick(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }

        let (Some(subscription), Some(broker)) = (&self.subscription, &self.broker) else {
            tracing::debug!(generation, "Renewal tick without a subscription");
            return;
        };

        spawn_renew(
            broker.clone(),
            subscription.id.clone(),
            generation,
            self.internal_tx.clone(),
        );
    }

    fn start_fetch(&mut self, broker: Arc<dyn ContextBroker>, attrs_format: AttrsFormat) {
        self.cancel_fetch();

        let cancel = CancellationToken::new();
        let generation = self.generation;
        let query = EntityQuery::from_config(&self.config, attrs_format);
        let policy = EmitPolicy::from_buffering(self.config.buffering);
        let tx = self.internal_tx.clone();
        let token = cancel.clone();

        tokio::spawn(async move {
            let outcome = fetch_snapshot(broker.as_ref(), &query, policy, &token, |entities| {
                let _ = tx.send(Internal::Entities {
                    generation,
                    attrs_format,
                    entities,
                });
            })
            .await;
            let _ = tx.send(Internal::FetchFinished {
                generation,
                outcome,
            });
        });

        self.fetch = Some(FetchHandle { generation, cancel });
    }

    fn cancel_fetch(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.cancel.cancel();
        }
    }

    /// Cancel the current cycle. Returns the pending deletion of its subscription, if any.
    fn cancel_cycle(&mut self, reason: &'static str) -> Option<JoinHandle<()>> {
        self.cancel_fetch();

        let subscription = self.subscription.take()?;
        subscription.stop_renewal();

        let broker = self.broker.clone()?;
        Some(spawn_delete(broker, subscription.id, reason))
    }

    fn reconfigure(&mut self) {
        tracing::info!(generation = self.generation, "Reconfiguring");

        self.send_metadata();
        self.state = State::Reconfiguring;
        let _ = self.cancel_cycle("reconfiguration");
        self.subscribe();
    }

    fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        self.state = State::TearingDown;
        let delete = self.cancel_cycle("shutdown");
        self.generation += 1;
        self.broker = None;
        self.state = State::Unconfigured;
        delete
    }

    fn send_metadata(&self) {
        if !self.wiring.is_connected(Endpoint::NgsiMetadata) {
            return;
        }

        match MetadataExport::from_config(&self.config).to_value() {
            Ok(metadata) => self.wiring.push_event(Endpoint::NgsiMetadata, metadata),
            Err(e) => tracing::warn!(error = %e, "Failed to build metadata export"),
        }
    }

    /// Route a batch to the connected outputs.
    fn emit(&self, attrs_format: AttrsFormat, entities: Vec<Value>) {
        let entity_connected = self.wiring.is_connected(Endpoint::EntityOutput);
        let normalized_connected = self.wiring.is_connected(Endpoint::NormalizedOutput);

        match attrs_format {
            AttrsFormat::KeyValues => {
                if entity_connected {
                    self.wiring
                        .push_event(Endpoint::EntityOutput, Value::Array(entities));
                }
            }
            AttrsFormat::Normalized => {
                if entity_connected {
                    self.wiring
                        .push_event(Endpoint::EntityOutput, Value::Array(flatten_batch(&entities)));
                }
                if normalized_connected {
                    self.wiring
                        .push_event(Endpoint::NormalizedOutput, Value::Array(entities));
                }
            }
        }
    }
}
