//! Dispatch boundary
//!
//! Ties locator, synthetic context and reconstruction together for one
//! request. Every failure, including a panic inside a handler, is turned
//! into a structured error response here and goes no further.

use devshim_protocol::{ShimError, StructuredResponse};
use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use tracing::{debug, info, warn};

use crate::context;
use crate::locator::HandlerRegistry;

/// Valid range for a status recorded by a handler
const STATUS_RANGE: std::ops::RangeInclusive<u16> = 100..=999;

thread_local! {
    /// Set while a handler runs under the dispatch boundary
    static INSIDE_BOUNDARY: Cell<bool> = const { Cell::new(false) };
}

static PANIC_HOOK: Once = Once::new();

/// Wrap the process panic hook once. Panics raised under the boundary are
/// logged at debug level instead of printed; every other panic still goes
/// to the previous hook.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if INSIDE_BOUNDARY.with(Cell::get) {
                debug!(panic = %info, "Handler panicked");
            } else {
                previous(info);
            }
        }));
    });
}

/// Run `f` with panics caught and kept off stderr
fn catch_handler_panic<T>(f: impl FnOnce() -> T) -> std::thread::Result<T> {
    install_panic_hook();
    INSIDE_BOUNDARY.with(|inside| inside.set(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    INSIDE_BOUNDARY.with(|inside| inside.set(false));
    outcome
}

/// A request as supplied by the hosting framework
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    /// Verb as received, e.g. `GET`
    pub method: String,
    /// Full request path including any sub-path
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Serve one request with the named handler.
///
/// Always returns a response; failures become `{"error", "statusCode"}`
/// envelopes with the matching status.
pub fn dispatch(registry: &HandlerRegistry, name: &str, request: InboundRequest) -> StructuredResponse {
    match try_dispatch(registry, name, request) {
        Ok(response) => response,
        Err(e) => {
            warn!(
                handler = name,
                status = e.status_code(),
                transient = e.is_transient(),
                error = %e,
                "Dispatch failed"
            );
            StructuredResponse::from_error(&e)
        }
    }
}

/// Like [`dispatch`] but hands the failure back instead of rendering it
pub fn try_dispatch(
    registry: &HandlerRegistry,
    name: &str,
    request: InboundRequest,
) -> devshim_protocol::Result<StructuredResponse> {
    let descriptor = registry.locate(name);
    let factory = descriptor.factory().ok_or_else(|| ShimError::NotFound {
        name: name.to_string(),
    })?;

    debug!(handler = name, method = %request.method, path = %request.path, "Dispatching request");

    let quiet_logs = registry.config().quiet_handler_logs;
    let outcome = catch_handler_panic(|| {
        let bound = context::build(
            factory,
            &request.method,
            request.path,
            request.headers,
            request.body,
            quiet_logs,
        )?;
        bound.run().map_err(ShimError::execution)
    });

    let sink = match outcome {
        Ok(result) => result?,
        Err(payload) => return Err(ShimError::execution(panic_message(payload))),
    };

    if !STATUS_RANGE.contains(&sink.status()) {
        return Err(ShimError::execution(format!(
            "Invalid status code {}",
            sink.status()
        )));
    }

    let response = sink.reconstruct();
    info!(handler = name, status = response.status(), bytes = response.body().len(), "Handler completed");
    Ok(response)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "Handler panicked".to_string()
    }
}
