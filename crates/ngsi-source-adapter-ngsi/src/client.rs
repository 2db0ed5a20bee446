//! HTTP client for the NGSI v2 API.

use crate::broker::{
    format_expiry, Connector, ContextBroker, EntityPage, EntityQuery, SubscriptionRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ngsi_source_core::SourceConfig;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::sync::Arc;

/// Header carrying the total number of matching entities.
pub const TOTAL_COUNT_HEADER: &str = "Fiware-Total-Count";

/// Characters escaped in a path segment.
const PATH_SEGMENT_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'\\');

/// Percent-encode a value used as a single URL path segment.
#[must_use]
pub fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT_ESCAPE).to_string()
}

/// HTTP client for one broker and one set of request headers.
pub struct NgsiClient {
    client: Client,
    base_url: String,
}

impl NgsiClient {
    /// Create a client for a configuration.
    ///
    /// # Errors
    ///
    /// Returns error if a header is not valid or the HTTP client cannot be created.
    pub fn new(config: &SourceConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        for (name, value) in config.request_headers() {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| ClientError::Init(format!("invalid {name} header: {e}")))?;
            headers.insert(header_name(name)?, value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.server_base().to_string(),
        })
    }

    fn subscription_url(&self, subscription_id: &str) -> String {
        format!(
            "{}/v2/subscriptions/{}",
            self.base_url,
            encode_path_segment(subscription_id)
        )
    }
}

fn header_name(name: &str) -> Result<HeaderName, ClientError> {
    HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
        .map_err(|e| ClientError::Init(format!("invalid header name {name}: {e}")))
}

/// Turn a non-success response into an API error.
async fn check_status(response: Response) -> Result<Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }

    Err(ClientError::ApiError {
        status: response.status().as_u16(),
        message: response.text().await.unwrap_or_default(),
    })
}

/// Extract the subscription id from a `Location: /v2/subscriptions/{id}` value.
fn subscription_id_from_location(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty() && *id != "subscriptions")
        .map(str::to_string)
}

#[async_trait]
impl ContextBroker for NgsiClient {
    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<String, ClientError> {
        let url = format!("{}/v2/subscriptions", self.base_url);

        tracing::debug!(url, attrs_format = request.attrs_format.as_str(), "POST subscription");

        let response = self
            .client
            .post(&url)
            .query(&[("options", "skipInitialNotification")])
            .json(&request.to_body())
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let response = check_status(response).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ClientError::MissingLocation)?;

        subscription_id_from_location(location).ok_or(ClientError::MissingLocation)
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        let url = self.subscription_url(subscription_id);

        tracing::debug!(subscription_id, url, "PATCH subscription expiry");

        let response = self
            .client
            .patch(&url)
            .json(&json!({ "expires": format_expiry(expires) }))
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        check_status(response).await?;
        Ok(())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), ClientError> {
        let url = self.subscription_url(subscription_id);

        tracing::debug!(subscription_id, url, "DELETE subscription");

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        check_status(response).await?;
        Ok(())
    }

    async fn list_entities(&self, query: &EntityQuery) -> Result<EntityPage, ClientError> {
        let url = format!("{}/v2/entities", self.base_url);

        tracing::debug!(url, offset = query.offset, limit = query.limit, "GET entities");

        let response = self
            .client
            .get(&url)
            .query(&query.params())
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let response = check_status(response).await?;

        let count = response
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        let Value::Array(results) = body else {
            return Err(ClientError::Parse("expected an array of entities".to_string()));
        };

        Ok(EntityPage { results, count })
    }
}

/// Connector creating a fresh `NgsiClient` per configuration cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NgsiConnector;

impl Connector for NgsiConnector {
    fn connect(&self, config: &SourceConfig) -> Result<Arc<dyn ContextBroker>, ClientError> {
        Ok(Arc::new(NgsiClient::new(config)?))
    }
}

/// Errors that can occur with the NGSI client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Client initialization failed
    #[error("client init error: {0}")]
    Init(String),
    /// The broker could not be reached
    #[error("connection error: {0}")]
    Connection(String),
    /// HTTP request failed
    #[error("request error: {0}")]
    Request(String),
    /// API returned an error status
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from API
        message: String,
    },
    /// Response parsing failed
    #[error("parse error: {0}")]
    Parse(String),
    /// Subscription created without a usable `Location` header
    #[error("subscription response has no Location header")]
    MissingLocation,
}

impl ClientError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connection(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }

    /// Whether the broker was unreachable rather than rejecting the request.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngsi_source_core::AuthMode;

    #[test]
    fn client_creation() {
        let client = NgsiClient::new(&SourceConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn client_creation_with_headers() {
        let config = SourceConfig {
            server_url: "http://localhost:1026/".to_string(),
            tenant: "city".to_string(),
            service_path: "/Madrid".to_string(),
            auth_mode: AuthMode::UserToken,
            auth_token: Some("secret".to_string()),
            ..Default::default()
        };

        let client = NgsiClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:1026");
        assert_eq!(
            client.subscription_url("5f1a"),
            "http://localhost:1026/v2/subscriptions/5f1a"
        );
    }

    #[test]
    fn client_creation_with_invalid_header_fails() {
        let config = SourceConfig {
            tenant: "bad\nvalue".to_string(),
            ..Default::default()
        };

        let result = NgsiClient::new(&config);
        let err_msg = format!("{}", result.err().unwrap());
        assert!(err_msg.contains("client init error"));
    }

    #[test]
    fn unreachable_broker_is_connectivity_error() {
        let config = SourceConfig {
            server_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let client = NgsiClient::new(&config).unwrap();
        let query = EntityQuery::from_config(&config, ngsi_source_core::AttrsFormat::KeyValues);

        let err = tokio_test::block_on(client.list_entities(&query)).unwrap_err();
        assert!(err.is_connectivity(), "unexpected error: {err}");
    }

    #[test]
    fn location_parsing() {
        assert_eq!(
            subscription_id_from_location("/v2/subscriptions/57458eb60962ef754e7c0998"),
            Some("57458eb60962ef754e7c0998".to_string())
        );
        assert_eq!(
            subscription_id_from_location("http://orion:1026/v2/subscriptions/abc?x=1"),
            Some("abc".to_string())
        );
        assert_eq!(subscription_id_from_location("/v2/subscriptions/"), None);
    }

    #[test]
    fn path_segment_encoding() {
        assert_eq!(encode_path_segment("abc123"), "abc123");
        assert_eq!(encode_path_segment("a/b c"), "a%2Fb%20c");
    }
}
