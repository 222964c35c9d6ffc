//! Script-backed handlers
//!
//! Files in the handler directory are run as child processes, one run per
//! request. The request is handed over CGI-style (environment plus body on
//! stdin) and the script's stdout is replayed into the capture sink as the
//! raw HTTP response it is.

use devshim_protocol::Verb;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::capture::decode_ignoring_invalid;
use crate::context::RequestContext;
use crate::handler::{HandlerError, LegacyHandler};

/// Marker of the optional verb directive
pub const VERBS_DIRECTIVE: &str = "handler-verbs:";

/// Only this many leading lines are searched for the directive
const DIRECTIVE_SEARCH_LINES: usize = 16;

/// Load-time failures. The locator reports all of them as not found.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read handler definition {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Handler definition {} is not valid UTF-8", path.display())]
    NotUtf8 { path: PathBuf },

    #[error("Unknown verb '{verb}' in {}", path.display())]
    UnknownVerb { verb: String, path: PathBuf },

    #[error("Handler definition {} has no interpreter and is not executable", path.display())]
    NotRunnable { path: PathBuf },
}

/// A loaded handler definition file
#[derive(Debug, Clone)]
pub struct ScriptDefinition {
    path: PathBuf,
    interpreter: Option<String>,
    verbs: Vec<Verb>,
}

impl ScriptDefinition {
    /// Read and check a definition file. Called on every request.
    ///
    /// The stored path is absolute, so the script runs the same regardless
    /// of the child's working directory.
    pub fn load(path: &Path, interpreters: &BTreeMap<String, String>) -> Result<Self, ScriptError> {
        let unreadable = |source| ScriptError::Unreadable {
            path: path.to_path_buf(),
            source,
        };
        let bytes = fs::read(path).map_err(unreadable)?;
        let absolute = fs::canonicalize(path).map_err(unreadable)?;
        let source = String::from_utf8(bytes).map_err(|_| ScriptError::NotUtf8 {
            path: path.to_path_buf(),
        })?;

        let interpreter = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| interpreters.get(ext))
            .cloned();

        if interpreter.is_none() && !is_executable(path) {
            return Err(ScriptError::NotRunnable {
                path: path.to_path_buf(),
            });
        }

        let verbs = parse_verbs_directive(&source, path)?;

        Ok(Self {
            path: absolute,
            interpreter,
            verbs,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    fn command(&self) -> Command {
        let mut command = match &self.interpreter {
            Some(program) => {
                let mut command = Command::new(program);
                command.arg(&self.path);
                command
            }
            None => Command::new(&self.path),
        };
        if let Some(dir) = self.path.parent() {
            command.current_dir(dir);
        }
        command
    }
}

/// Handler instance backed by a [`ScriptDefinition`]
pub struct ScriptHandler {
    definition: Arc<ScriptDefinition>,
}

impl ScriptHandler {
    pub fn new(definition: Arc<ScriptDefinition>) -> Self {
        Self { definition }
    }
}

impl LegacyHandler for ScriptHandler {
    fn verbs(&self) -> &[Verb] {
        self.definition.verbs()
    }

    fn handle(&mut self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
        let body = ctx.read_body()?;

        let mut command = self.definition.command();
        command
            .envs(cgi_environment(ctx, body.len()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(script = %self.definition.path.display(), "Spawning handler script");
        let mut child = command.spawn().map_err(|e| {
            HandlerError::msg(format!(
                "Failed to start {}: {}",
                self.definition.path.display(),
                e
            ))
        })?;

        // stdin is fed from its own thread; scripts may fill stdout first.
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || {
                // Scripts are free to ignore their input.
                let _ = stdin.write_all(&body);
            })
        });

        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            let _ = writer.join();
        }

        let stderr = decode_ignoring_invalid(&output.stderr);
        if !output.status.success() {
            let stderr = stderr.trim();
            let message = if stderr.is_empty() {
                format!("Handler script exited with {}", output.status)
            } else {
                stderr.to_string()
            };
            return Err(HandlerError::msg(message));
        }

        for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
            ctx.log_message(line);
        }

        replay_output(ctx, &output.stdout);
        Ok(())
    }
}

/// Replay raw script output as status, header, end-of-headers and body calls.
///
/// The head ends at the first blank line or at the first line that is
/// neither a status line nor a header; everything after that is written to
/// the sink as a single chunk.
pub fn replay_output(ctx: &mut RequestContext, stdout: &[u8]) {
    let mut rest = stdout;

    while !rest.is_empty() {
        let (line, remainder) = split_line(rest);
        let text = decode_ignoring_invalid(line);
        let trimmed = text.trim();

        if trimmed.is_empty() {
            ctx.end_headers();
            rest = remainder;
            break;
        }

        if let Some(code) = parse_status_line(trimmed) {
            ctx.send_response(code);
        } else if let Some((key, value)) = parse_header_line(trimmed) {
            ctx.send_header(key, value);
        } else {
            break;
        }
        rest = remainder;
    }

    if !rest.is_empty() {
        ctx.wfile.write(rest);
    }
}

fn split_line(bytes: &[u8]) -> (&[u8], &[u8]) {
    match bytes.iter().position(|&b| b == b'\n') {
        Some(idx) => (&bytes[..idx], &bytes[idx + 1..]),
        None => (bytes, &[]),
    }
}

/// `HTTP/1.1 201 Created` -> 201
fn parse_status_line(line: &str) -> Option<u16> {
    let rest = line.strip_prefix("HTTP/")?;
    let mut parts = rest.split_whitespace();
    let _version = parts.next()?;
    parts.next()?.parse().ok()
}

/// `Key: Value` with a token-like key
fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let is_token = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    is_token.then(|| (key, value.trim()))
}

fn parse_verbs_directive(source: &str, path: &Path) -> Result<Vec<Verb>, ScriptError> {
    let directive = source
        .lines()
        .take(DIRECTIVE_SEARCH_LINES)
        .find_map(|line| line.split_once(VERBS_DIRECTIVE).map(|(_, verbs)| verbs));

    let Some(list) = directive else {
        return Ok(Verb::ALL.to_vec());
    };

    list.split(',')
        .map(str::trim)
        .map(|verb| {
            verb.parse::<Verb>().map_err(|_| ScriptError::UnknownVerb {
                verb: verb.to_string(),
                path: path.to_path_buf(),
            })
        })
        .collect()
}

fn cgi_environment(ctx: &RequestContext, content_length: usize) -> Vec<(String, String)> {
    let mut env = vec![
        ("REQUEST_METHOD".to_string(), ctx.command.to_string()),
        ("PATH_INFO".to_string(), ctx.path.clone()),
        ("SERVER_PROTOCOL".to_string(), ctx.request_version.to_string()),
        ("REQUEST_LINE".to_string(), ctx.requestline.clone()),
        ("REMOTE_ADDR".to_string(), ctx.client_address.ip().to_string()),
        ("REMOTE_PORT".to_string(), ctx.client_address.port().to_string()),
        ("CONTENT_LENGTH".to_string(), content_length.to_string()),
    ];

    for (key, value) in &ctx.headers {
        let name = key.to_ascii_uppercase().replace('-', "_");
        env.push((format!("HTTP_{}", name), value.clone()));
    }

    env
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShimConfig;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn context(verb: Verb, body: &[u8]) -> RequestContext {
        RequestContext::new(verb, "/api/script", HashMap::new(), body.to_vec(), true)
    }

    fn write_script(dir: &TempDir, name: &str, source: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, source).unwrap();
        path
    }

    #[test]
    fn test_replay_framed_output() {
        let mut ctx = context(Verb::Get, b"");
        replay_output(
            &mut ctx,
            b"HTTP/1.1 201 Created\r\nContent-Type: application/json\r\n\r\n{\"id\": 7}\n",
        );

        let response = ctx.into_sink().reconstruct();
        assert_eq!(response.status(), 201);
        assert_eq!(response.content_type(), "application/json");
        assert_eq!(response.body(), b"{\"id\": 7}");
    }

    #[test]
    fn test_replay_bare_json() {
        let mut ctx = context(Verb::Get, b"");
        replay_output(&mut ctx, b"{\"ok\": true}\n");
        assert!(!ctx.wfile.headers_complete());
        assert_eq!(ctx.into_sink().reconstruct().body(), b"{\"ok\": true}");
    }

    #[test]
    fn test_replay_plain_text_without_head_is_dropped() {
        let mut ctx = context(Verb::Get, b"");
        replay_output(&mut ctx, b"hello there\n");
        assert_eq!(ctx.into_sink().reconstruct().body(), b"{}");
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(parse_status_line("HTTP/1.0 404 Not Found"), Some(404));
        assert_eq!(parse_status_line("HTTP/1.1"), None);
        assert_eq!(parse_header_line("X-Id: 42"), Some(("X-Id", "42")));
        assert_eq!(parse_header_line("{\"a\": 1}"), None);
        assert_eq!(parse_header_line("no colon here"), None);
    }

    #[test]
    fn test_verbs_directive() {
        let dir = TempDir::new().unwrap();
        let config = ShimConfig::default();

        let path = write_script(&dir, "limited.sh", "#!/bin/sh\n# handler-verbs: GET, POST\n");
        let definition = ScriptDefinition::load(&path, &config.interpreters).unwrap();
        assert_eq!(definition.verbs(), &[Verb::Get, Verb::Post]);
        assert_eq!(definition.interpreter(), Some("sh"));

        let path = write_script(&dir, "open.sh", "echo '{}'\n");
        let definition = ScriptDefinition::load(&path, &config.interpreters).unwrap();
        assert_eq!(definition.verbs(), &Verb::ALL);

        let path = write_script(&dir, "bad.sh", "# handler-verbs: GET, FETCH\n");
        let err = ScriptDefinition::load(&path, &config.interpreters).unwrap_err();
        assert!(matches!(err, ScriptError::UnknownVerb { ref verb, .. } if verb == "FETCH"));
    }

    #[test]
    fn test_load_rejects_unrunnable_and_binary() {
        let dir = TempDir::new().unwrap();
        let config = ShimConfig::default();

        let path = write_script(&dir, "notes.txt", "just text\n");
        let err = ScriptDefinition::load(&path, &config.interpreters).unwrap_err();
        assert!(matches!(err, ScriptError::NotRunnable { .. }));

        let path = dir.path().join("blob.sh");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        let err = ScriptDefinition::load(&path, &config.interpreters).unwrap_err();
        assert!(matches!(err, ScriptError::NotUtf8 { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_script_with_body_and_env() {
        let dir = TempDir::new().unwrap();
        let config = ShimConfig::default();
        let path = write_script(
            &dir,
            "echo.sh",
            "body=$(cat)\n\
             printf 'HTTP/1.1 200 OK\\r\\n'\n\
             printf 'Content-Type: application/json\\r\\n\\r\\n'\n\
             printf '{\"method\": \"%s\", \"path\": \"%s\", \"body\": %s}' \"$REQUEST_METHOD\" \"$PATH_INFO\" \"$body\"\n",
        );
        let definition = Arc::new(ScriptDefinition::load(&path, &config.interpreters).unwrap());

        let mut ctx = context(Verb::Post, b"{\"n\": 3}");
        ScriptHandler::new(definition).handle(&mut ctx).unwrap();

        let response = ctx.into_sink().reconstruct();
        assert_eq!(
            response.body_json(),
            serde_json::json!({"method": "POST", "path": "/api/script", "body": {"n": 3}})
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_run_script_from_relative_handler_dir() {
        let dir = tempfile::Builder::new()
            .prefix("relative_handlers")
            .tempdir_in(".")
            .unwrap();
        let relative = Path::new(".").join(dir.path().file_name().unwrap());
        assert!(relative.is_relative());
        fs::write(
            relative.join("health.sh"),
            "printf 'HTTP/1.1 200 OK\\r\\n\\r\\n{\"status\": \"ok\"}'\n",
        )
        .unwrap();

        let config = ShimConfig::default();
        let definition =
            Arc::new(ScriptDefinition::load(&relative.join("health.sh"), &config.interpreters).unwrap());
        assert!(definition.path().is_absolute());

        let mut ctx = context(Verb::Get, b"");
        ScriptHandler::new(definition).handle(&mut ctx).unwrap();

        let response = ctx.into_sink().reconstruct();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body_json(), serde_json::json!({"status": "ok"}));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_script_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let config = ShimConfig::default();
        let path = write_script(&dir, "boom.sh", "echo 'database unreachable' >&2\nexit 3\n");
        let definition = Arc::new(ScriptDefinition::load(&path, &config.interpreters).unwrap());

        let mut ctx = context(Verb::Get, b"");
        let err = ScriptHandler::new(definition).handle(&mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "database unreachable");
    }
}
