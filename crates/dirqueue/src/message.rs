//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
///
/// The file backend uses the name as a directory component, so only ASCII
/// alphanumerics, hyphens and underscores are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        // Validate length
        if name.is_empty() || name.len() > 80 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-80 characters".to_string(),
            });
        }

        // Validate characters (ASCII alphanumeric, hyphens, underscores)
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        // Validate no consecutive hyphens or leading/trailing hyphens
        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Opaque token identifying one delivery attempt of a message
///
/// Handles are assigned by the backend when a message is pushed and are
/// invalidated by `delete` or by redelivery, which assigns a fresh handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageHandle(String);

impl MessageHandle {
    /// Wrap a backend-assigned handle string
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Build the `<instance>_<sequence>` handle used by the file backend
    pub fn from_parts(instance_id: u64, sequence: u64) -> Self {
        Self(format!("{}_{}", instance_id, sequence))
    }

    /// Split a file-backend handle into its instance id and sequence number
    ///
    /// Returns `None` for handles issued by other backends.
    pub fn parts(&self) -> Option<(u64, u64)> {
        let (instance, sequence) = self.0.split_once('_')?;
        Some((instance.parse().ok()?, sequence.parse().ok()?))
    }

    /// Get handle as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageHandle {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_handle".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message delivered by `pull`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub handle: MessageHandle,
    pub body: String,
}

impl Message {
    /// Create a message from a handle and body
    pub fn new(handle: MessageHandle, body: impl Into<String>) -> Self {
        Self {
            handle,
            body: body.into(),
        }
    }
}

/// Reject bodies that cannot be stored as a single line
pub(crate) fn validate_body(body: &str) -> Result<(), ValidationError> {
    if body.contains('\n') || body.contains('\r') {
        return Err(ValidationError::InvalidFormat {
            field: "body".to_string(),
            message: "message bodies cannot contain line breaks".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
