//! # NGSI Source Agent
//!
//! Keeps a context broker subscription alive for the configured entities and
//! republishes the initial snapshot plus every notification on the host wiring.
//!
//! ## Architecture
//!
//! A single coordinator task owns all state and handles, one at a time:
//! 1. **Host events**: activation, preference changes, metadata import, shutdown
//! 2. **Subscription lifecycle**: create, renew every two hours, delete
//! 3. **Snapshot**: paginated listing, buffered or page by page, cancellable
//! 4. **Notifications**: routed to the outputs in the negotiated format

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod fetcher;
pub mod input;
pub mod subscription;
pub mod wiring;

#[cfg(test)]
mod testing;

pub use config::AgentConfig;
pub use coordinator::{
    Coordinator, CoordinatorHandle, CoordinatorSettings, CoordinatorStopped, HostEvent, State,
    Status,
};
pub use fetcher::{fetch_snapshot, EmitPolicy, FetchOutcome, MAX_PAGE_INDEX};
pub use input::{HostCommand, InputLine};
pub use wiring::{ChannelWiring, Endpoint, OutputEvent, Wiring};
