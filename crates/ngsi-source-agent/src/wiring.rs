//! Host wiring seam: endpoint connectivity and event publication.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Wiring endpoints known to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Key-value entity batches
    EntityOutput,
    /// Normalized entity batches
    NormalizedOutput,
    /// Metadata export
    NgsiMetadata,
    /// Metadata import (input)
    NgsiMetadataInput,
}

impl Endpoint {
    /// All endpoints, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::EntityOutput,
        Self::NormalizedOutput,
        Self::NgsiMetadata,
        Self::NgsiMetadataInput,
    ];

    /// Endpoint name as used by the host.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::EntityOutput => "entityOutput",
            Self::NormalizedOutput => "normalizedOutput",
            Self::NgsiMetadata => "ngsimetadata",
            Self::NgsiMetadataInput => "ngsimetadataInput",
        }
    }

    /// Look an endpoint up by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|endpoint| endpoint.name() == name.trim())
    }

    fn index(self) -> usize {
        match self {
            Self::EntityOutput => 0,
            Self::NormalizedOutput => 1,
            Self::NgsiMetadata => 2,
            Self::NgsiMetadataInput => 3,
        }
    }
}

/// Host wiring as seen by the coordinator.
pub trait Wiring: Send + Sync + 'static {
    /// Whether anything is connected to the endpoint.
    fn is_connected(&self, endpoint: Endpoint) -> bool;

    /// Publish an event on an output endpoint.
    fn push_event(&self, endpoint: Endpoint, payload: Value);
}

/// An event published on an output endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputEvent {
    /// Target endpoint
    pub endpoint: Endpoint,
    /// Event payload
    pub payload: Value,
}

/// Wiring backed by an unbounded channel.
///
/// Connectivity flags can be flipped at runtime; the host then sends
/// `HostEvent::WiringStatusChanged` to the coordinator.
#[derive(Debug)]
pub struct ChannelWiring {
    connected: [AtomicBool; 4],
    tx: mpsc::UnboundedSender<OutputEvent>,
}

impl ChannelWiring {
    /// Create the wiring and the receiver of published events.
    #[must_use]
    pub fn new(connected: &[Endpoint]) -> (Self, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let wiring = Self {
            connected: Default::default(),
            tx,
        };
        for endpoint in connected {
            wiring.set_connected(*endpoint, true);
        }
        (wiring, rx)
    }

    /// Change the connectivity of an endpoint.
    pub fn set_connected(&self, endpoint: Endpoint, connected: bool) {
        self.connected[endpoint.index()].store(connected, Ordering::SeqCst);
    }
}

impl Wiring for ChannelWiring {
    fn is_connected(&self, endpoint: Endpoint) -> bool {
        self.connected[endpoint.index()].load(Ordering::SeqCst)
    }

    fn push_event(&self, endpoint: Endpoint, payload: Value) {
        if self.tx.send(OutputEvent { endpoint, payload }).is_err() {
            tracing::warn!(endpoint = endpoint.name(), "Output receiver dropped, event lost");
        }
    }
}
