//! Protocol adapters (HTTP)
//!
//! This crate hosts the devshim runtime behind an axum server. It owns the
//! web-framework side of the bridge: routing `/api/...` requests, moving the
//! synchronous dispatch onto a blocking thread, and turning structured
//! responses back into HTTP responses.

pub mod api_router;
pub mod http_server;

pub use api_router::{api_router, into_http_response};
pub use http_server::{HttpServer, ServerConfig};
