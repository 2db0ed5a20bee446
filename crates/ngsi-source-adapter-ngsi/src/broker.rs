//! Broker operations and their request types.

use crate::client::ClientError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ngsi_source_core::{AttrsFormat, SourceConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Entities requested per listing page.
pub const PAGE_SIZE: u32 = 100;

/// Description attached to every subscription.
pub const SUBSCRIPTION_DESCRIPTION: &str = "ngsi source subscription";

/// One `subject.entities` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFilter {
    /// Entity id pattern
    pub id_pattern: String,
    /// Entity type, any type when absent
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

/// Filter expression of a subscription condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    /// Simple query language filter
    pub q: String,
}

/// `subject.condition` of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Attributes whose change triggers a notification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Vec<String>>,
    /// Filter expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
}

/// Subscription to create on the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    /// Human readable description
    pub description: String,
    /// Entity filters (type list × id pattern)
    pub entities: Vec<EntityFilter>,
    /// Attribute/expression condition
    pub condition: Option<Condition>,
    /// Callback receiving notifications
    pub notification_url: String,
    /// Attribute format of notifications
    pub attrs_format: AttrsFormat,
    /// Expiry of the subscription
    pub expires: DateTime<Utc>,
}

impl SubscriptionRequest {
    /// Build the subscription for a configuration.
    #[must_use]
    pub fn from_config(
        config: &SourceConfig,
        attrs_format: AttrsFormat,
        expires: DateTime<Utc>,
    ) -> Self {
        let id_pattern = config.id_pattern().to_string();
        let entities = match config.entity_types() {
            Some(types) => types
                .into_iter()
                .map(|entity_type| EntityFilter {
                    id_pattern: id_pattern.clone(),
                    entity_type: Some(entity_type),
                })
                .collect(),
            None => vec![EntityFilter {
                id_pattern,
                entity_type: None,
            }],
        };

        let attrs = config.update_attributes();
        let expression = config.query().map(|q| Expression { q: q.to_string() });
        let condition = if attrs.is_empty() && expression.is_none() {
            None
        } else {
            Some(Condition {
                attrs: Some(attrs).filter(|a| !a.is_empty()),
                expression,
            })
        };

        Self {
            description: SUBSCRIPTION_DESCRIPTION.to_string(),
            entities,
            condition,
            notification_url: config.proxy_url.trim().to_string(),
            attrs_format,
            expires,
        }
    }

    /// NGSI v2 JSON body.
    #[must_use]
    pub fn to_body(&self) -> Value {
        let mut subject = json!({ "entities": self.entities });
        if let Some(condition) = &self.condition {
            subject["condition"] = json!(condition);
        }

        json!({
            "description": self.description,
            "subject": subject,
            "notification": {
                "http": { "url": self.notification_url },
                "attrsFormat": self.attrs_format.as_str(),
            },
            "expires": format_expiry(self.expires),
        })
    }
}

/// ISO-8601 form used for `expires`.
#[must_use]
pub fn format_expiry(expires: DateTime<Utc>) -> String {
    expires.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One page of an entity listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityQuery {
    /// Entity id pattern
    pub id_pattern: String,
    /// Entity types, any type when absent
    pub types: Option<Vec<String>>,
    /// Query filter
    pub q: Option<String>,
    /// Attribute format of the results
    pub attrs_format: AttrsFormat,
    /// Maximum entities returned
    pub limit: u32,
    /// Offset of the first entity
    pub offset: u32,
}

impl EntityQuery {
    /// First page of the snapshot query for a configuration.
    #[must_use]
    pub fn from_config(config: &SourceConfig, attrs_format: AttrsFormat) -> Self {
        Self {
            id_pattern: config.id_pattern().to_string(),
            types: config.entity_types(),
            q: config.query().map(str::to_string),
            attrs_format,
            limit: PAGE_SIZE,
            offset: 0,
        }
    }

    /// Same query positioned at `page`.
    #[must_use]
    pub fn page(&self, page: u32) -> Self {
        Self {
            offset: page * self.limit,
            ..self.clone()
        }
    }

    /// Query string parameters.
    #[must_use]
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let options = match self.attrs_format {
            AttrsFormat::KeyValues => "count,keyValues",
            AttrsFormat::Normalized => "count",
        };

        let mut params = vec![
            ("options", options.to_string()),
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
            ("idPattern", self.id_pattern.clone()),
        ];
        if let Some(types) = &self.types {
            params.push(("type", types.join(",")));
        }
        if let Some(q) = &self.q {
            params.push(("q", q.clone()));
        }
        params
    }
}

/// Entities returned by one listing call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPage {
    /// Entities of this page
    pub results: Vec<Value>,
    /// Total matching entities, when the broker reports it
    pub count: Option<u64>,
}

/// Context broker operations used by the source.
#[async_trait]
pub trait ContextBroker: Send + Sync {
    /// Create a subscription and return its id.
    async fn create_subscription(&self, request: &SubscriptionRequest)
        -> Result<String, ClientError>;

    /// Move the expiry of a subscription.
    async fn update_subscription(
        &self,
        subscription_id: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), ClientError>;

    /// Delete a subscription.
    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), ClientError>;

    /// List one page of entities.
    async fn list_entities(&self, query: &EntityQuery) -> Result<EntityPage, ClientError>;
}

/// Opens a broker connection for a configuration cycle.
pub trait Connector: Send + Sync {
    /// Connect using the given configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be set up.
    fn connect(&self, config: &SourceConfig) -> Result<Arc<dyn ContextBroker>, ClientError>;
}
