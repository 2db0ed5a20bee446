//! Line-oriented host input read by the agent binary.
//!
//! Each line is either a broker notification forwarded by the proxy or a
//! host command tagged by `event`:
//!
//! ```json
//! {"subscriptionId": "5f1c...", "data": [{"id": "urn:Room:1", "type": "Room"}]}
//! {"event": "activate"}
//! {"event": "preferences", "values": {"types": "Room", "idPattern": "urn:Room:.*"}}
//! {"event": "metadataImport", "metadata": {"serverURL": "http://orion:1026"}}
//! {"event": "wiring", "outputs": ["entityOutput", "normalizedOutput"]}
//! {"event": "shutdown"}
//! ```

use crate::coordinator::HostEvent;
use crate::wiring::{ChannelWiring, Endpoint};
use ngsi_source_adapter_ngsi::Notification;
use ngsi_source_core::{MetadataImport, SourceConfig};
use serde::Deserialize;

/// One input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InputLine {
    /// Host command
    Host(HostCommand),
    /// Broker notification
    Notification(Notification),
}

impl InputLine {
    /// Parse one JSON line.
    ///
    /// # Errors
    ///
    /// Returns error if the line is neither a host command nor a notification.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Host command, tagged by `event`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostCommand {
    /// Start the first cycle
    Activate,
    /// New preferences, given as metadata fields over the startup configuration
    Preferences {
        /// Preference values
        #[serde(default)]
        values: MetadataImport,
    },
    /// Metadata received on the metadata input, `null` to clear the outputs
    MetadataImport {
        /// Imported metadata
        #[serde(default)]
        metadata: Option<MetadataImport>,
    },
    /// New set of connected endpoints
    Wiring {
        /// Endpoint names
        outputs: Vec<String>,
    },
    /// Tear down and exit
    Shutdown,
}

impl HostCommand {
    /// Turn the command into a coordinator event.
    ///
    /// `Wiring` updates the connectivity flags of `wiring` before the
    /// coordinator is told about the change.
    #[must_use]
    pub fn into_event(self, startup: &SourceConfig, wiring: &ChannelWiring) -> HostEvent {
        match self {
            Self::Activate => HostEvent::Activate,
            Self::Preferences { values } => {
                let mut config = startup.clone();
                values.apply_to(&mut config);
                HostEvent::PreferencesChanged(config)
            }
            Self::MetadataImport { metadata } => HostEvent::MetadataImport(metadata),
            Self::Wiring { outputs } => {
                for name in &outputs {
                    if Endpoint::from_name(name).is_none() {
                        tracing::warn!(endpoint = %name, "Ignoring unknown endpoint");
                    }
                }
                for endpoint in Endpoint::ALL {
                    let connected = outputs.iter().any(|name| name.trim() == endpoint.name());
                    wiring.set_connected(endpoint, connected);
                }
                HostEvent::WiringStatusChanged
            }
            Self::Shutdown => HostEvent::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_notifications() {
        let line = InputLine::parse(
            r#"{"subscriptionId": "sub-1", "data": [{"id": "urn:Room:1", "type": "Room"}]}"#,
        )
        .unwrap();

        let InputLine::Notification(notification) = line else {
            panic!("expected a notification, got {line:?}");
        };
        assert_eq!(notification.subscription_id, "sub-1");
        assert_eq!(notification.data, vec![json!({"id": "urn:Room:1", "type": "Room"})]);
    }

    #[test]
    fn parses_host_commands() {
        assert_eq!(
            InputLine::parse(r#"{"event": "activate"}"#).unwrap(),
            InputLine::Host(HostCommand::Activate)
        );
        assert_eq!(
            InputLine::parse(r#"{"event": "metadataImport", "metadata": null}"#).unwrap(),
            InputLine::Host(HostCommand::MetadataImport { metadata: None })
        );
        assert!(matches!(
            InputLine::parse(r#"{"event": "wiring", "outputs": ["entityOutput"]}"#).unwrap(),
            InputLine::Host(HostCommand::Wiring { outputs }) if outputs == ["entityOutput"]
        ));
    }

    #[test]
    fn rejects_unknown_lines() {
        assert!(InputLine::parse(r#"{"event": "restart"}"#).is_err());
        assert!(InputLine::parse(r#"{"data": []}"#).is_err());
        assert!(InputLine::parse("not json").is_err());
    }

    #[test]
    fn preferences_overlay_startup_configuration() {
        let startup = SourceConfig {
            update_attributes: "temperature".to_string(),
            ..Default::default()
        };
        let (wiring, _events) = ChannelWiring::new(&[Endpoint::EntityOutput]);

        let line = InputLine::parse(
            r#"{"event": "preferences", "values": {"types": "Car", "serverURL": "http://orion:1026"}}"#,
        )
        .unwrap();
        let InputLine::Host(command) = line else {
            panic!("expected a host command");
        };

        let HostEvent::PreferencesChanged(config) = command.into_event(&startup, &wiring) else {
            panic!("expected a preference change");
        };
        assert_eq!(config.entity_types, "Car");
        assert_eq!(config.server_url, "http://orion:1026");
        assert_eq!(config.update_attributes, "temperature");
    }

    #[test]
    fn wiring_command_updates_connectivity() {
        use crate::wiring::Wiring;

        let (wiring, _events) = ChannelWiring::new(&[Endpoint::EntityOutput]);
        let command = HostCommand::Wiring {
            outputs: vec!["normalizedOutput".to_string(), "widget".to_string()],
        };

        let event = command.into_event(&SourceConfig::default(), &wiring);

        assert!(matches!(event, HostEvent::WiringStatusChanged));
        assert!(!wiring.is_connected(Endpoint::EntityOutput));
        assert!(wiring.is_connected(Endpoint::NormalizedOutput));
    }
}
