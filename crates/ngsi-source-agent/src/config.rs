//! Agent configuration.

use crate::wiring::Endpoint;
use anyhow::{bail, Context, Result};
use ngsi_source_core::{AuthMode, ConfigError, SourceConfig};
use std::time::Duration;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Broker-facing configuration of the first cycle
    pub source: SourceConfig,

    /// Endpoints considered connected
    pub outputs: Vec<Endpoint>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            outputs: vec![Endpoint::EntityOutput],
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `NGSI_SOURCE_SERVER_URL`: Context broker URL
    /// - `NGSI_SOURCE_PROXY_URL`: Notification proxy URL
    /// - `NGSI_SOURCE_TENANT`: `FIWARE-Service`
    /// - `NGSI_SOURCE_SERVICE_PATH`: `FIWARE-ServicePath`
    /// - `NGSI_SOURCE_ENTITY_TYPES`: Comma separated entity types
    /// - `NGSI_SOURCE_ID_PATTERN`: Entity id pattern
    /// - `NGSI_SOURCE_QUERY`: Query filter
    /// - `NGSI_SOURCE_UPDATE_ATTRIBUTES`: Attributes that trigger notifications
    /// - `NGSI_SOURCE_BUFFERING`: `true` to emit the snapshot as one batch
    /// - `NGSI_SOURCE_AUTH_MODE`: `none`, `user` or `owner`
    /// - `NGSI_SOURCE_AUTH_TOKEN`: Static `X-Auth-Token`
    /// - `NGSI_SOURCE_REQUEST_TIMEOUT_SECS`: Per-request timeout
    /// - `NGSI_SOURCE_OUTPUTS`: Connected endpoints (`entityOutput,normalizedOutput,ngsimetadata`)
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let source = &mut config.source;

        let text_fields: [(&str, &mut String); 8] = [
            ("NGSI_SOURCE_SERVER_URL", &mut source.server_url),
            ("NGSI_SOURCE_PROXY_URL", &mut source.proxy_url),
            ("NGSI_SOURCE_TENANT", &mut source.tenant),
            ("NGSI_SOURCE_SERVICE_PATH", &mut source.service_path),
            ("NGSI_SOURCE_ENTITY_TYPES", &mut source.entity_types),
            ("NGSI_SOURCE_ID_PATTERN", &mut source.id_pattern),
            ("NGSI_SOURCE_QUERY", &mut source.query),
            ("NGSI_SOURCE_UPDATE_ATTRIBUTES", &mut source.update_attributes),
        ];
        for (key, field) in text_fields {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        }

        if let Some(buffering) = lookup("NGSI_SOURCE_BUFFERING") {
            source.buffering = parse_flag(&buffering)
                .with_context(|| format!("Invalid NGSI_SOURCE_BUFFERING '{buffering}'"))?;
        }

        if let Some(mode) = lookup("NGSI_SOURCE_AUTH_MODE") {
            source.auth_mode = AuthMode::parse(&mode)
                .ok_or_else(|| ConfigError::UnknownAuthMode(mode.clone()))
                .context("Invalid NGSI_SOURCE_AUTH_MODE")?;
        }

        if let Some(token) = lookup("NGSI_SOURCE_AUTH_TOKEN") {
            source.auth_token = Some(token).filter(|t| !t.trim().is_empty());
        }

        if let Some(secs) = lookup("NGSI_SOURCE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .context("Invalid NGSI_SOURCE_REQUEST_TIMEOUT_SECS")?;
            source.request_timeout = Duration::from_secs(secs);
        }

        if let Some(outputs) = lookup("NGSI_SOURCE_OUTPUTS") {
            config.outputs = parse_endpoints(&outputs)?;
        }

        config
            .source
            .validate()
            .context("Invalid broker configuration")?;

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_endpoints(value: &str) -> Result<Vec<Endpoint>> {
    let mut endpoints = Vec::new();
    for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let Some(endpoint) = Endpoint::from_name(name) else {
            bail!("Unknown endpoint '{name}' in NGSI_SOURCE_OUTPUTS");
        };
        endpoints.push(endpoint);
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = AgentConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.source, SourceConfig::default());
        assert_eq!(config.outputs, vec![Endpoint::EntityOutput]);
    }

    #[test]
    fn reads_source_fields() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("NGSI_SOURCE_SERVER_URL", "http://orion:1026"),
            ("NGSI_SOURCE_ENTITY_TYPES", "Room,Car"),
            ("NGSI_SOURCE_UPDATE_ATTRIBUTES", "temperature"),
            ("NGSI_SOURCE_BUFFERING", "true"),
            ("NGSI_SOURCE_AUTH_MODE", "owner"),
            ("NGSI_SOURCE_REQUEST_TIMEOUT_SECS", "5"),
            ("NGSI_SOURCE_OUTPUTS", "entityOutput, normalizedOutput,ngsimetadata"),
        ]))
        .unwrap();

        assert_eq!(config.source.server_url, "http://orion:1026");
        assert_eq!(config.source.entity_types, "Room,Car");
        assert_eq!(config.source.update_attributes, "temperature");
        assert!(config.source.buffering);
        assert_eq!(config.source.auth_mode, AuthMode::OwnerCredentials);
        assert_eq!(config.source.request_timeout, Duration::from_secs(5));
        assert_eq!(
            config.outputs,
            vec![
                Endpoint::EntityOutput,
                Endpoint::NormalizedOutput,
                Endpoint::NgsiMetadata
            ]
        );
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(AgentConfig::from_lookup(lookup(&[("NGSI_SOURCE_BUFFERING", "maybe")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("NGSI_SOURCE_AUTH_MODE", "root")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("NGSI_SOURCE_OUTPUTS", "widget")])).is_err());
        assert!(AgentConfig::from_lookup(lookup(&[("NGSI_SOURCE_SERVER_URL", "orion")])).is_err());
    }
}
