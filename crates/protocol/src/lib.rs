//! Devshim shared request/response types
//!
//! This crate defines the values exchanged between the hosting web framework
//! and the handler runtime: request verbs, the structured response produced
//! by output reconstruction, and the JSON error envelope used for every
//! failure surfaced at the dispatch boundary.

pub mod errors;
pub mod response;
pub mod verb;

pub use errors::ShimError;
pub use response::{ApiListing, ErrorEnvelope, StructuredResponse};
pub use verb::Verb;

/// Result type for shim operations
pub type Result<T> = std::result::Result<T, ShimError>;

/// Protocol version tag presented to handlers
pub const PROTOCOL_VERSION: &str = "HTTP/1.1";

/// Content type used whenever a handler does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Body emitted when a handler produced no body content
pub const EMPTY_JSON_BODY: &str = "{}";
