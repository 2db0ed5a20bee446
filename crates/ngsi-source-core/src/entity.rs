//! Entity representations and the normalized → key-values translator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute representation requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrsFormat {
    /// Each attribute is an object carrying `type`, `value` and `metadata`
    #[serde(rename = "normalized")]
    Normalized,
    /// Attributes are flattened to bare values
    #[serde(rename = "keyValues")]
    KeyValues,
}

impl AttrsFormat {
    /// Pick the format for the currently connected consumers.
    ///
    /// Normalized output needs full attribute objects; everyone else is
    /// served key-values.
    #[must_use]
    pub fn negotiate(normalized_connected: bool) -> Self {
        if normalized_connected {
            Self::Normalized
        } else {
            Self::KeyValues
        }
    }

    /// Wire name of the format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normalized => "normalized",
            Self::KeyValues => "keyValues",
        }
    }
}

/// Flatten a normalized entity into key-values.
///
/// `id` and `type` are copied verbatim; every other attribute is replaced by
/// its `value` (or `null` if it carries none). Non-object input is returned
/// unchanged.
///
/// ```
/// use ngsi_source_core::normalized_to_key_values;
/// use serde_json::json;
///
/// let entity = json!({"id": "e1", "type": "T", "a": {"type": "Number", "value": 5}});
/// assert_eq!(
///     normalized_to_key_values(&entity),
///     json!({"id": "e1", "type": "T", "a": 5})
/// );
/// ```
#[must_use]
pub fn normalized_to_key_values(entity: &Value) -> Value {
    let Value::Object(attrs) = entity else {
        return entity.clone();
    };

    let flattened: Map<String, Value> = attrs
        .iter()
        .map(|(key, attr)| {
            let value = if key == "id" || key == "type" {
                attr.clone()
            } else {
                attr.get("value").cloned().unwrap_or(Value::Null)
            };
            (key.clone(), value)
        })
        .collect();

    Value::Object(flattened)
}

/// Flatten every entity of a batch.
#[must_use]
pub fn flatten_batch(entities: &[Value]) -> Vec<Value> {
    entities.iter().map(normalized_to_key_values).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_unwraps_values() {
        let entity = json!({"id": "e1", "type": "T", "a": {"value": 5}});
        assert_eq!(
            normalized_to_key_values(&entity),
            json!({"id": "e1", "type": "T", "a": 5})
        );
    }

    #[test]
    fn flatten_drops_metadata() {
        let entity = json!({
            "id": "urn:Room:1",
            "type": "Room",
            "temperature": {
                "type": "Number",
                "value": 21.5,
                "metadata": {"unit": {"type": "Text", "value": "CEL"}}
            },
            "location": {
                "type": "geo:json",
                "value": {"type": "Point", "coordinates": [-3.7, 40.4]},
                "metadata": {}
            }
        });

        let flat = normalized_to_key_values(&entity);
        assert_eq!(flat["temperature"], json!(21.5));
        assert_eq!(
            flat["location"],
            json!({"type": "Point", "coordinates": [-3.7, 40.4]})
        );
        assert_eq!(flat["type"], json!("Room"));
    }

    #[test]
    fn flatten_missing_value_is_null() {
        let entity = json!({"id": "e1", "type": "T", "broken": 3, "empty": {}});
        let flat = normalized_to_key_values(&entity);
        assert_eq!(flat["broken"], Value::Null);
        assert_eq!(flat["empty"], Value::Null);
    }

    #[test]
    fn negotiate_format() {
        assert_eq!(AttrsFormat::negotiate(true), AttrsFormat::Normalized);
        assert_eq!(AttrsFormat::negotiate(false), AttrsFormat::KeyValues);
        assert_eq!(
            serde_json::to_value(AttrsFormat::KeyValues).unwrap(),
            json!("keyValues")
        );
    }
}
