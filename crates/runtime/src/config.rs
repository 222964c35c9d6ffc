//! Shim configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Directory scanned for handler definitions
pub const DEFAULT_HANDLER_DIR: &str = "api";

/// Name of the adapter's own entry point, never resolvable as a handler
pub const DEFAULT_ENTRY_POINT: &str = "dev_server";

/// Configuration shared by the locator and the synthetic request context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimConfig {
    /// Directory holding handler definition files
    pub handler_dir: PathBuf,
    /// Entry point name excluded from resolution and listing
    pub entry_point: String,
    /// Whether handler `log_message` calls are silenced
    pub quiet_handler_logs: bool,
    /// File extension to interpreter program for script handlers
    pub interpreters: BTreeMap<String, String>,
}

impl Default for ShimConfig {
    fn default() -> Self {
        let interpreters = [("sh", "sh"), ("py", "python3"), ("js", "node")]
            .into_iter()
            .map(|(ext, program)| (ext.to_string(), program.to_string()))
            .collect();

        Self {
            handler_dir: PathBuf::from(DEFAULT_HANDLER_DIR),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            quiet_handler_logs: true,
            interpreters,
        }
    }
}

impl ShimConfig {
    /// Default configuration rooted at the given handler directory
    pub fn with_handler_dir(handler_dir: impl Into<PathBuf>) -> Self {
        Self {
            handler_dir: handler_dir.into(),
            ..Self::default()
        }
    }

    /// Interpreter configured for a file extension, if any
    pub fn interpreter_for(&self, extension: &str) -> Option<&str> {
        self.interpreters.get(extension).map(String::as_str)
    }
}
