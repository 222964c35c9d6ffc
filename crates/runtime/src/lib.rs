//! Devshim handler runtime
//!
//! This crate lets handlers written against the raw socket convention
//! (per-verb methods reading a request stream and writing a raw HTTP
//! response) be served as structured request/response calls: the locator
//! finds a handler by name, the synthetic context supplies everything the
//! handler expects to read, and the capture sink turns whatever it wrote
//! back into a status, a content type and a JSON body.

pub mod capture;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod handler;
pub mod locator;
pub mod script;

// Re-export key types for easy access
pub use capture::{classify, CaptureSink, ChunkClass, DEFAULT_STATUS};
pub use config::ShimConfig;
pub use context::{build, BoundHandler, RequestContext, LOOPBACK_CLIENT};
pub use dispatch::{dispatch, try_dispatch, InboundRequest};
pub use handler::{HandlerError, HandlerFactory, LegacyHandler};
pub use locator::{HandlerDescriptor, HandlerRegistry, LocateError};
pub use script::{ScriptDefinition, ScriptError, ScriptHandler};

pub use devshim_protocol::{ShimError, StructuredResponse, Verb};
