//! Metadata exchanged with companion operators.
//!
//! The export describes the current configuration so that downstream
//! operators can issue compatible queries. The import lets an upstream
//! operator overwrite individual fields.

use crate::config::{AuthMode, SourceConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata record pushed on the metadata output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataExport {
    /// Entity types, split on `,`
    pub types: Vec<String>,
    /// Always empty; this source does not filter attributes
    pub filtered_attributes: String,
    /// Update attributes, split on `,`
    pub update_attributes: Vec<String>,
    /// Always empty
    #[serde(rename = "auth_type")]
    pub auth_type: String,
    /// Entity id pattern as configured
    pub id_pattern: String,
    /// Query filter as configured
    pub query: String,
    /// Always false
    pub values: bool,
    /// Context broker URL
    #[serde(rename = "serverURL")]
    pub server_url: String,
    /// Notification proxy URL
    #[serde(rename = "proxyURL")]
    pub proxy_url: String,
    /// `FIWARE-ServicePath`
    pub service_path: String,
    /// `FIWARE-Service`
    pub tenant: String,
}

impl MetadataExport {
    /// Describe a configuration.
    #[must_use]
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            types: split_list(&config.entity_types),
            filtered_attributes: String::new(),
            update_attributes: split_list(&config.update_attributes),
            auth_type: String::new(),
            id_pattern: config.id_pattern.trim().to_string(),
            query: config.query.trim().to_string(),
            values: false,
            server_url: config.server_url.trim().to_string(),
            proxy_url: config.proxy_url.trim().to_string(),
            service_path: config.service_path.trim().to_string(),
            tenant: config.tenant.trim().to_string(),
        }
    }

    /// JSON form of the record.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_value(&self) -> Result<Value, MetadataError> {
        serde_json::to_value(self).map_err(|e| MetadataError::Serialize(e.to_string()))
    }
}

/// Either a single string or a list joined with `,`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOrList {
    /// Plain text
    Text(String),
    /// List of items
    List(Vec<String>),
}

impl TextOrList {
    /// Flatten to the comma separated form stored in the configuration.
    #[must_use]
    pub fn joined(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::List(items) => items.join(","),
        }
    }
}

/// Metadata record received on the metadata input. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataImport {
    /// Context broker URL
    #[serde(default, rename = "serverURL")]
    pub server_url: Option<String>,
    /// Notification proxy URL
    #[serde(default, rename = "proxyURL")]
    pub proxy_url: Option<String>,
    /// Forward the current user's token
    #[serde(default, rename = "use_user_fiware_token")]
    pub use_user_fiware_token: Option<bool>,
    /// Forward the workspace owner's token
    #[serde(default, rename = "use_owner_credentials")]
    pub use_owner_credentials: Option<bool>,
    /// `FIWARE-Service`
    #[serde(default)]
    pub tenant: Option<String>,
    /// `FIWARE-ServicePath`
    #[serde(default)]
    pub service_path: Option<String>,
    /// Entity types
    #[serde(default)]
    pub types: Option<TextOrList>,
    /// Entity id pattern
    #[serde(default)]
    pub id_pattern: Option<String>,
    /// Query filter
    #[serde(default)]
    pub query: Option<String>,
    /// Update attributes
    #[serde(default)]
    pub update_attributes: Option<TextOrList>,
}

impl MetadataImport {
    /// Parse an import record from a wiring event payload.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a metadata object.
    pub fn from_value(value: Value) -> Result<Self, MetadataError> {
        serde_json::from_value(value).map_err(|e| MetadataError::Deserialize(e.to_string()))
    }

    /// Overwrite the fields present in this record. Returns the number of fields applied.
    pub fn apply_to(&self, config: &mut SourceConfig) -> usize {
        let mut applied = 0;

        let mut set = |target: &mut String, source: Option<String>| {
            if let Some(value) = source {
                *target = value;
                applied += 1;
            }
        };

        set(&mut config.server_url, self.server_url.clone());
        set(&mut config.proxy_url, self.proxy_url.clone());
        set(&mut config.tenant, self.tenant.clone());
        set(&mut config.service_path, self.service_path.clone());
        set(&mut config.entity_types, self.types.as_ref().map(TextOrList::joined));
        set(&mut config.id_pattern, self.id_pattern.clone());
        set(&mut config.query, self.query.clone());
        set(
            &mut config.update_attributes,
            self.update_attributes.as_ref().map(TextOrList::joined),
        );

        if self.use_user_fiware_token.is_some() || self.use_owner_credentials.is_some() {
            let user = self
                .use_user_fiware_token
                .unwrap_or(config.auth_mode == AuthMode::UserToken);
            let owner = self
                .use_owner_credentials
                .unwrap_or(config.auth_mode == AuthMode::OwnerCredentials);
            config.auth_mode = AuthMode::from_flags(user, owner);
            applied += usize::from(self.use_user_fiware_token.is_some())
                + usize::from(self.use_owner_credentials.is_some());
        }

        tracing::debug!(applied, "Applied metadata import");
        applied
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.trim().split(',').map(str::to_string).collect()
}

/// Errors raised while handling metadata records.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MetadataError {
    /// Serialization failed
    #[error("serialize error: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialize error: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn export_field_names() {
        let config = SourceConfig {
            entity_types: "Room,Car".to_string(),
            update_attributes: "temperature".to_string(),
            id_pattern: "urn:.*".to_string(),
            tenant: "city".to_string(),
            ..Default::default()
        };

        let value = MetadataExport::from_config(&config).to_value().unwrap();
        assert_eq!(value["types"], json!(["Room", "Car"]));
        assert_eq!(value["updateAttributes"], json!(["temperature"]));
        assert_eq!(value["idPattern"], json!("urn:.*"));
        assert_eq!(value["serverURL"], json!("https://orion.example.com"));
        assert_eq!(value["proxyURL"], json!("https://ngsiproxy.example.com"));
        assert_eq!(value["servicePath"], json!("/"));
        assert_eq!(value["filteredAttributes"], json!(""));
        assert_eq!(value["auth_type"], json!(""));
        assert_eq!(value["values"], json!(false));
        assert_eq!(value["tenant"], json!("city"));
    }

    #[test]
    fn import_overwrites_present_fields_only() {
        let mut config = SourceConfig {
            query: "temperature>20".to_string(),
            ..Default::default()
        };

        let import = MetadataImport::from_value(json!({
            "serverURL": "http://localhost:1026",
            "types": ["Room", "Car"],
            "updateAttributes": "temperature, pressure",
            "query": null
        }))
        .unwrap();

        let applied = import.apply_to(&mut config);
        assert_eq!(applied, 3);
        assert_eq!(config.server_url, "http://localhost:1026");
        assert_eq!(config.entity_types, "Room,Car");
        assert_eq!(config.update_attributes, "temperature, pressure");
        assert_eq!(config.query, "temperature>20");
    }

    #[test]
    fn import_auth_flags() {
        let mut config = SourceConfig::default();
        let import = MetadataImport::from_value(json!({"use_owner_credentials": true})).unwrap();
        import.apply_to(&mut config);
        assert_eq!(config.auth_mode, AuthMode::OwnerCredentials);

        let import = MetadataImport::from_value(json!({
            "use_owner_credentials": false,
            "use_user_fiware_token": true
        }))
        .unwrap();
        import.apply_to(&mut config);
        assert_eq!(config.auth_mode, AuthMode::UserToken);
    }

    #[test]
    fn import_rejects_non_object() {
        assert!(MetadataImport::from_value(json!(42)).is_err());
    }
}
