//! # NGSI Adapter
//!
//! Typed requests and an HTTP client for the NGSI v2 context broker calls the
//! source needs:
//!
//! - `POST /v2/subscriptions` (create, `skipInitialNotification`)
//! - `PATCH /v2/subscriptions/{id}` (renew expiry)
//! - `DELETE /v2/subscriptions/{id}`
//! - `GET /v2/entities` (paginated listing with `Fiware-Total-Count`)
//!
//! The `ContextBroker` trait is the seam the coordinator talks to; `NgsiClient`
//! is its reqwest implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod client;
pub mod notification;

pub use broker::{
    Condition, Connector, ContextBroker, EntityFilter, EntityPage, EntityQuery, Expression,
    SubscriptionRequest, PAGE_SIZE,
};
pub use client::{ClientError, NgsiClient, NgsiConnector};
pub use notification::Notification;
