//! Structured responses and JSON envelopes
//!
//! A [`StructuredResponse`] is what the hosting framework receives once a
//! handler's raw output has been reconstructed. Failures are rendered into
//! the same shape through [`ErrorEnvelope`].

use serde::{Deserialize, Serialize};

use crate::errors::ShimError;
use crate::DEFAULT_CONTENT_TYPE;

/// Final response for one request, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredResponse {
    status: u16,
    content_type: String,
    body: Vec<u8>,
}

impl StructuredResponse {
    /// Create a new structured response
    pub fn new(status: u16, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// Build the response for a dispatch failure
    pub fn from_error(err: &ShimError) -> Self {
        let envelope = err.to_envelope();
        // Serializing a struct of a String and an integer cannot fail.
        let body = serde_json::to_vec(&envelope).unwrap_or_default();
        Self::new(envelope.status_code, DEFAULT_CONTENT_TYPE, body)
    }

    /// Numeric HTTP status
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Declared content type
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Raw body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the response, returning its body
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body parsed as JSON, or the empty object when it is not valid JSON
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// `{"error": ..., "statusCode": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Human-readable failure description
    pub error: String,
    /// Matching HTTP status
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

/// Diagnostic listing returned by the discovery endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiListing {
    pub message: String,
    pub status: String,
    pub functions: Vec<String>,
}

impl ApiListing {
    /// Listing for a running server
    pub fn running(message: impl Into<String>, functions: Vec<String>) -> Self {
        Self {
            message: message.into(),
            status: "running".to_string(),
            functions,
        }
    }
}
