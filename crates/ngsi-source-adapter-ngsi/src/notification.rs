//! Notifications delivered by the broker for a subscription.

use crate::client::ClientError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// NGSI v2 notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Subscription that produced the notification
    pub subscription_id: String,
    /// Changed entities, in the format negotiated at creation
    #[serde(default)]
    pub data: Vec<Value>,
}

impl Notification {
    /// Parse a notification body.
    ///
    /// # Errors
    ///
    /// Returns error if the body is not a notification.
    pub fn from_slice(body: &[u8]) -> Result<Self, ClientError> {
        serde_json::from_slice(body).map_err(|e| ClientError::Parse(e.to_string()))
    }
}
