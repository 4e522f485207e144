//! The resource contract and the canonical current-user profile.

use crate::{EntityId, InvalidPayloadError, Timestamp};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A record managed by the synchronization engine.
///
/// The engine is agnostic to wire format; it only needs a normalized,
/// serializable object with a stable identifier.
///
/// # Implementation Requirements
///
/// - `resource_id()` must be stable across refetches of the same record
/// - `validate()` must reject payloads that decoded but are unusable
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier of this record.
    fn resource_id(&self) -> String;

    /// Shape checks beyond what deserialization enforces.
    fn validate(&self) -> Result<(), InvalidPayloadError> {
        Ok(())
    }

    /// Decode and validate a raw transport payload.
    ///
    /// Non-object payloads and payloads that fail to deserialize are rejected
    /// as malformed before [`Resource::validate`] runs.
    fn from_payload(payload: serde_json::Value) -> Result<Self, InvalidPayloadError> {
        if !payload.is_object() {
            return Err(InvalidPayloadError::Malformed {
                reason: format!("expected a JSON object, got {}", json_type_name(&payload)),
            });
        }
        let resource: Self = serde_json::from_value(payload)
            .map_err(|e| InvalidPayloadError::Malformed {
                reason: e.to_string(),
            })?;
        resource.validate()?;
        Ok(resource)
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Current-user profile, the shared record most consumers ask for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: EntityId,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub tenant_id: Option<EntityId>,
    pub updated_at: Timestamp,
}

impl UserProfile {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl Resource for UserProfile {
    fn resource_id(&self) -> String {
        self.id.to_string()
    }

    fn validate(&self) -> Result<(), InvalidPayloadError> {
        if self.id.is_nil() {
            return Err(InvalidPayloadError::InvalidValue {
                field: "id".to_string(),
                reason: "must not be the nil uuid".to_string(),
            });
        }
        if self.email.trim().is_empty() {
            return Err(InvalidPayloadError::MissingField {
                field: "email".to_string(),
            });
        }
        if !self.email.contains('@') {
            return Err(InvalidPayloadError::InvalidValue {
                field: "email".to_string(),
                reason: "must contain '@'".to_string(),
            });
        }
        Ok(())
    }
}
