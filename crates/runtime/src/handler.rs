//! The legacy handler convention as a trait.

use devshim_protocol::Verb;
use std::sync::Arc;
use thiserror::Error;

use crate::context::RequestContext;

/// Failure raised from inside a handler's verb method.
///
/// The display text becomes the `error` field of the 500 envelope verbatim.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{message}")]
    Failed { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Failed {
            message: message.into(),
        }
    }
}

/// A handler written against the raw socket convention.
///
/// Implementations read the request from the [`RequestContext`] (`rfile`,
/// `headers`, `path`) and write a raw HTTP response through `send_response`,
/// `send_header`, `end_headers` and `wfile`.
pub trait LegacyHandler: Send {
    /// Verbs that have a `do_<VERB>` method
    fn verbs(&self) -> &[Verb];

    /// Run the verb method for `ctx.command`. Only called for listed verbs.
    fn handle(&mut self, ctx: &mut RequestContext) -> Result<(), HandlerError>;
}

/// Builds a fresh handler instance; invoked once per request.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn LegacyHandler> + Send + Sync>;
