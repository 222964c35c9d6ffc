//! Synthetic Request Context
//!
//! Legacy handlers expect to be constructed around a live connection. Here
//! the instance comes from a factory and every attribute the convention
//! reads is supplied directly through [`RequestContext`], with a fresh
//! [`CaptureSink`] installed as the write target.

use devshim_protocol::{ShimError, Verb, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use tracing::{debug, info};

use crate::capture::CaptureSink;
use crate::handler::{HandlerError, HandlerFactory, LegacyHandler};

/// Placeholder peer for every synthetic request
pub const LOOPBACK_CLIENT: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

/// Everything a legacy handler may read or write during one verb call.
pub struct RequestContext {
    /// Request verb
    pub command: Verb,
    /// Request path including any sub-path
    pub path: String,
    /// Protocol version tag, always `HTTP/1.1`
    pub request_version: &'static str,
    /// `"<VERB> <PATH> HTTP/1.1"`
    pub requestline: String,
    /// `requestline` as bytes
    pub raw_requestline: Vec<u8>,
    /// Inbound headers, case as supplied
    pub headers: HashMap<String, String>,
    /// Fixed loopback identity
    pub client_address: SocketAddr,
    /// Cursor over the request body, positioned at the start
    pub rfile: Cursor<Vec<u8>>,
    /// Capture sink standing in for the socket
    pub wfile: CaptureSink,
    /// There is never a live connection
    pub connection: Option<TcpStream>,
    pub close_connection: bool,
    pub server_version: String,
    pub sys_version: String,
    quiet_logs: bool,
}

impl RequestContext {
    /// Populate the full attribute surface for one request
    pub fn new(
        command: Verb,
        path: impl Into<String>,
        headers: HashMap<String, String>,
        body: Vec<u8>,
        quiet_logs: bool,
    ) -> Self {
        let path = path.into();
        let requestline = format!("{} {} {}", command, path, PROTOCOL_VERSION);
        let raw_requestline = requestline.clone().into_bytes();

        Self {
            command,
            path,
            request_version: PROTOCOL_VERSION,
            requestline,
            raw_requestline,
            headers,
            client_address: LOOPBACK_CLIENT,
            rfile: Cursor::new(body),
            wfile: CaptureSink::new(),
            connection: None,
            close_connection: true,
            server_version: String::new(),
            sys_version: String::new(),
            quiet_logs,
        }
    }

    pub fn send_response(&mut self, code: u16) {
        self.wfile.send_response(code);
    }

    pub fn send_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.wfile.send_header(key, value);
    }

    pub fn end_headers(&mut self) {
        self.wfile.end_headers();
    }

    /// Handler logging; silent unless the context was built with logs enabled.
    pub fn log_message(&self, message: impl fmt::Display) {
        if self.quiet_logs {
            return;
        }
        info!(target: "devshim::handler", client = %self.client_address, "{}", message);
    }

    /// Inbound header value, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Read whatever remains of the request body
    pub fn read_body(&mut self) -> std::io::Result<Vec<u8>> {
        let mut body = Vec::new();
        self.rfile.read_to_end(&mut body)?;
        Ok(body)
    }

    /// Release the capture sink once the handler has returned
    pub fn into_sink(self) -> CaptureSink {
        self.wfile
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("requestline", &self.requestline)
            .field("headers", &self.headers)
            .field("client_address", &self.client_address)
            .field("body_len", &self.rfile.get_ref().len())
            .finish_non_exhaustive()
    }
}

/// A fresh handler instance paired with its context
pub struct BoundHandler {
    handler: Box<dyn LegacyHandler>,
    ctx: RequestContext,
}

impl BoundHandler {
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Run the verb method and hand back the sink it wrote to
    pub fn run(mut self) -> Result<CaptureSink, HandlerError> {
        self.handler.handle(&mut self.ctx)?;
        Ok(self.ctx.into_sink())
    }
}

/// Instantiate a handler and bind it to a synthetic context.
///
/// Fails with `MethodNotAllowed` when `verb` is unknown or the handler has no
/// method for it.
pub fn build(
    factory: &HandlerFactory,
    verb: &str,
    path: impl Into<String>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    quiet_logs: bool,
) -> devshim_protocol::Result<BoundHandler> {
    let command: Verb = verb.parse()?;
    let handler = factory();

    if !handler.verbs().contains(&command) {
        debug!(method = %command.method_name(), "Handler defines no method for verb");
        return Err(ShimError::MethodNotAllowed {
            verb: verb.to_string(),
        });
    }

    let ctx = RequestContext::new(command, path, headers, body, quiet_logs);
    Ok(BoundHandler { handler, ctx })
}
