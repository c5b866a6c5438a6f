//! Inbound recognition events and the identities they carry.

use crate::error::MalformedEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Name of the push-channel event carrying recognized identities.
pub const PERSONS_RECOGNIZED: &str = "persons_recognized";

/// A recognized person's display label, or the sentinel `"Unknown"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub const UNKNOWN: &'static str = "Unknown";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// A `persons_recognized` message: the identities currently in frame, in
/// the order the backend reported them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognitionEvent {
    pub names: Vec<Identity>,
}

impl RecognitionEvent {
    /// Validates a raw event payload.
    ///
    /// The payload must be an object whose `names` field is an array of
    /// strings. Anything else is rejected without partial results.
    pub fn from_payload(payload: &Value) -> Result<Self, MalformedEvent> {
        let object = payload
            .as_object()
            .ok_or_else(|| MalformedEvent(format!("expected an object, got {}", payload)))?;
        let names = object
            .get("names")
            .ok_or_else(|| MalformedEvent("missing `names` field".to_string()))?
            .as_array()
            .ok_or_else(|| MalformedEvent("`names` is not an array".to_string()))?;

        let names = names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                name.as_str()
                    .map(Identity::new)
                    .ok_or_else(|| MalformedEvent(format!("`names[{}]` is not a string", idx)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { names })
    }
}
