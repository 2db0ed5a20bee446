//! Source configuration.
//!
//! Fields hold the values exactly as the host stores them; the accessor
//! methods apply the normalisation rules used when talking to the broker.

use std::time::Duration;
use url::Url;

/// Id pattern used when none is configured.
pub const DEFAULT_ID_PATTERN: &str = ".*";

/// How requests are authenticated against the context broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Anonymous requests
    #[default]
    None,
    /// Forward the token of the current user through the proxy
    UserToken,
    /// Forward the token of the workspace owner through the proxy
    OwnerCredentials,
}

impl AuthMode {
    /// Parse an auth mode name (`none`, `user`, `owner`).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(Self::None),
            "user" | "user_token" => Some(Self::UserToken),
            "owner" | "owner_credentials" => Some(Self::OwnerCredentials),
            _ => None,
        }
    }

    /// Build an auth mode from the two host flags. Owner credentials win.
    #[must_use]
    pub fn from_flags(use_user_fiware_token: bool, use_owner_credentials: bool) -> Self {
        if use_owner_credentials {
            Self::OwnerCredentials
        } else if use_user_fiware_token {
            Self::UserToken
        } else {
            Self::None
        }
    }

    /// Value of the `FIWARE-OAuth-Source` header, if a token is forwarded.
    #[must_use]
    pub fn oauth_source(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::UserToken => Some("user"),
            Self::OwnerCredentials => Some("workspaceowner"),
        }
    }
}

/// Configuration of one activation cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    /// Context broker URL
    pub server_url: String,
    /// Notification proxy URL (callback target of the subscription)
    pub proxy_url: String,
    /// `FIWARE-Service` tenant
    pub tenant: String,
    /// `FIWARE-ServicePath`
    pub service_path: String,
    /// Comma separated entity types
    pub entity_types: String,
    /// Entity id pattern
    pub id_pattern: String,
    /// Simple query language filter
    pub query: String,
    /// Comma separated attributes that trigger notifications
    pub update_attributes: String,
    /// Emit the initial snapshot as one batch
    pub buffering: bool,
    /// Token forwarding mode
    pub auth_mode: AuthMode,
    /// Static `X-Auth-Token` sent with every request
    pub auth_token: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            server_url: "https://orion.example.com".to_string(),
            proxy_url: "https://ngsiproxy.example.com".to_string(),
            tenant: String::new(),
            service_path: "/".to_string(),
            entity_types: String::new(),
            id_pattern: String::new(),
            query: String::new(),
            update_attributes: String::new(),
            buffering: false,
            auth_mode: AuthMode::None,
            auth_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SourceConfig {
    /// Check that both URLs are usable.
    ///
    /// # Errors
    ///
    /// Returns error if the server or proxy URL cannot be parsed or is not http(s).
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_http_url("server", &self.server_url)?;
        check_http_url("proxy", &self.proxy_url)?;
        Ok(())
    }

    /// Server URL without trailing slash.
    #[must_use]
    pub fn server_base(&self) -> &str {
        self.server_url.trim().trim_end_matches('/')
    }

    /// Entity types to filter on, `None` when any type matches.
    ///
    /// `"A,  B"` and `"A,B"` are equivalent; empty items are skipped.
    #[must_use]
    pub fn entity_types(&self) -> Option<Vec<String>> {
        let types: Vec<String> = self
            .entity_types
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Some(types).filter(|t| !t.is_empty())
    }

    /// Entity id pattern, `.*` when empty.
    #[must_use]
    pub fn id_pattern(&self) -> &str {
        match self.id_pattern.trim() {
            "" => DEFAULT_ID_PATTERN,
            pattern => pattern,
        }
    }

    /// Query filter, `None` when empty.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        Some(self.query.trim()).filter(|q| !q.is_empty())
    }

    /// Attributes whose change triggers a notification.
    #[must_use]
    pub fn update_attributes(&self) -> Vec<String> {
        let attrs = self.update_attributes.trim();
        if attrs.is_empty() {
            return Vec::new();
        }
        attrs
            .split(',')
            .map(|attr| attr.trim_start().to_string())
            .collect()
    }

    /// Tenant header value, `None` when empty.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        Some(self.tenant.trim()).filter(|t| !t.is_empty())
    }

    /// Service path header value, `None` for the root path.
    #[must_use]
    pub fn service_path(&self) -> Option<&str> {
        Some(self.service_path.trim()).filter(|p| !p.is_empty() && *p != "/")
    }

    /// Extra headers sent with every broker request.
    #[must_use]
    pub fn request_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(source) = self.auth_mode.oauth_source() {
            headers.push(("FIWARE-OAuth-Token", "true".to_string()));
            headers.push(("FIWARE-OAuth-Header-Name", "X-Auth-Token".to_string()));
            headers.push(("FIWARE-OAuth-Source", source.to_string()));
        }
        if let Some(token) = &self.auth_token {
            headers.push(("X-Auth-Token", token.clone()));
        }
        if let Some(tenant) = self.tenant() {
            headers.push(("FIWARE-Service", tenant.to_string()));
        }
        if let Some(path) = self.service_path() {
            headers.push(("FIWARE-ServicePath", path.to_string()));
        }

        headers
    }
}

fn check_http_url(field: &'static str, input: &str) -> Result<(), ConfigError> {
    let url = Url::parse(input.trim()).map_err(|e| ConfigError::InvalidUrl {
        field,
        message: format!("{input}: {e}"),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::InvalidUrl {
            field,
            message: format!("{input}: unsupported scheme '{scheme}'"),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A URL field is malformed
    #[error("invalid {field} URL: {message}")]
    InvalidUrl {
        /// Which URL field
        field: &'static str,
        /// Parser message
        message: String,
    },
    /// Unknown auth mode name
    #[error("unknown auth mode '{0}'")]
    UnknownAuthMode(String),
}
