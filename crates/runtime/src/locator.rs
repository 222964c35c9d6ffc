//! Handler Locator
//!
//! Resolves a symbolic handler name to a factory. Compiled-in handlers are
//! registered up front; definition files in the handler directory are
//! re-resolved and re-loaded on every call so each request sees fresh state.
//! Nothing that was loaded is cached between requests.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ShimConfig;
use crate::handler::{HandlerFactory, LegacyHandler};
use crate::script::{ScriptDefinition, ScriptError, ScriptHandler};

/// Module-initializer stem never offered as a handler
const PACKAGE_INIT_STEM: &str = "__init__";

/// Why a name did not resolve. Callers only ever see "not found".
#[derive(Error, Debug)]
pub enum LocateError {
    #[error("Invalid handler name: {name:?}")]
    InvalidName { name: String },

    #[error("{name} is the adapter entry point")]
    SelfReference { name: String },

    #[error("No definition for {name} in {}", dir.display())]
    Missing { name: String, dir: PathBuf },

    #[error("Definition for {name} failed to load: {source}")]
    LoadFailed { name: String, source: ScriptError },
}

/// Result of a lookup, created per request and dropped after dispatch.
#[derive(Clone)]
pub struct HandlerDescriptor {
    name: String,
    factory: Option<HandlerFactory>,
}

impl HandlerDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The constructible handler, if the name resolved
    pub fn factory(&self) -> Option<&HandlerFactory> {
        self.factory.as_ref()
    }

    pub fn is_found(&self) -> bool {
        self.factory.is_some()
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("found", &self.is_found())
            .finish()
    }
}

/// Name to factory registry backed by compiled handlers and a directory
pub struct HandlerRegistry {
    config: ShimConfig,
    compiled: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// Create a registry with no compiled handlers
    pub fn new(config: ShimConfig) -> Self {
        Self {
            config,
            compiled: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    /// Register a compiled handler. The factory runs once per request.
    pub fn register<F, H>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: LegacyHandler + 'static,
    {
        let factory: HandlerFactory = Arc::new(move || Box::new(factory()) as Box<dyn LegacyHandler>);
        self.compiled.insert(name.into(), factory);
        self
    }

    /// Resolve a name. Invalid, missing and broken definitions all come back
    /// as a descriptor without a factory.
    pub fn locate(&self, name: &str) -> HandlerDescriptor {
        let factory = match self.resolve(name) {
            Ok(factory) => Some(factory),
            Err(e) => {
                debug!(handler = name, reason = %e, "Handler not resolvable");
                None
            }
        };

        HandlerDescriptor {
            name: name.to_string(),
            factory,
        }
    }

    /// Resolve a name, keeping the reason it failed
    pub fn resolve(&self, name: &str) -> Result<HandlerFactory, LocateError> {
        if !is_valid_name(name) {
            return Err(LocateError::InvalidName {
                name: name.to_string(),
            });
        }
        if name == self.config.entry_point {
            return Err(LocateError::SelfReference {
                name: name.to_string(),
            });
        }

        if let Some(factory) = self.compiled.get(name) {
            return Ok(factory.clone());
        }

        let definition = Arc::new(self.load_definition(name)?);
        let factory: HandlerFactory = Arc::new(move || {
            Box::new(ScriptHandler::new(definition.clone())) as Box<dyn LegacyHandler>
        });
        Ok(factory)
    }

    /// Names currently resolvable, sorted. Diagnostic only.
    pub fn list(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.compiled.keys().cloned().collect();
        let files = self.definition_files();

        let stems: BTreeSet<&str> = files.iter().filter_map(|path| definition_name(path)).collect();
        for name in stems {
            if self.load_from(name, &files).is_ok() {
                names.insert(name.to_string());
            }
        }

        names
            .into_iter()
            .filter(|name| is_valid_name(name))
            .filter(|name| *name != self.config.entry_point && name != PACKAGE_INIT_STEM)
            .collect()
    }

    /// Log what is resolvable right now; returns the listing.
    pub fn scan(&self) -> Vec<String> {
        let names = self.list();
        info!(
            dir = %self.config.handler_dir.display(),
            count = names.len(),
            "Discovered handlers: {}",
            names.join(", ")
        );
        names
    }

    fn load_definition(&self, name: &str) -> Result<ScriptDefinition, LocateError> {
        self.load_from(name, &self.definition_files())
    }

    /// First file with a matching stem that loads, in path order. When
    /// every match fails, the last failure is reported.
    fn load_from(&self, name: &str, files: &[PathBuf]) -> Result<ScriptDefinition, LocateError> {
        let mut failure = None;
        for path in files.iter().filter(|path| definition_name(path) == Some(name)) {
            match ScriptDefinition::load(path, &self.config.interpreters) {
                Ok(definition) => return Ok(definition),
                Err(source) => failure = Some(source),
            }
        }

        Err(match failure {
            Some(source) => LocateError::LoadFailed {
                name: name.to_string(),
                source,
            },
            None => LocateError::Missing {
                name: name.to_string(),
                dir: self.config.handler_dir.clone(),
            },
        })
    }

    /// Regular files in the handler directory, sorted by path
    fn definition_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.config.handler_dir) else {
            return Vec::new();
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        files
    }
}

/// A single, visible path segment
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

/// Handler name a definition file provides
fn definition_name(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::handler::HandlerError;
    use devshim_protocol::Verb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Health;

    impl LegacyHandler for Health {
        fn verbs(&self) -> &[Verb] {
            &[Verb::Get]
        }

        fn handle(&mut self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
            ctx.wfile.write(r#"{"status": "ok"}"#);
            Ok(())
        }
    }

    fn registry_in(dir: &TempDir) -> HandlerRegistry {
        HandlerRegistry::new(ShimConfig::with_handler_dir(dir.path()))
    }

    #[test]
    fn test_locate_compiled_handler() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir);
        registry.register("health", || Health);

        let descriptor = registry.locate("health");
        assert!(descriptor.is_found());
        assert_eq!(descriptor.name(), "health");
        assert!(!registry.locate("missing").is_found());
    }

    #[test]
    fn test_factory_runs_per_lookup() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir);
        registry.register("counted", || {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Health
        });

        let descriptor = registry.locate("counted");
        let factory = descriptor.factory().unwrap();
        let _first = factory();
        let _second = factory();
        assert_eq!(BUILT.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejects_escaping_names() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);

        for name in ["", ".", "..", "../etc/passwd", "a/b", "a\\b", ".hidden"] {
            assert!(matches!(
                registry.resolve(name),
                Err(LocateError::InvalidName { .. })
            ));
        }
    }

    #[test]
    fn test_entry_point_is_excluded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("dev_server.sh"), "echo '{}'\n").unwrap();
        fs::write(dir.path().join("users.sh"), "echo '{}'\n").unwrap();
        let mut registry = registry_in(&dir);
        registry.register("dev_server", || Health);

        assert!(matches!(
            registry.resolve("dev_server"),
            Err(LocateError::SelfReference { .. })
        ));
        assert_eq!(registry.list(), vec!["users".to_string()]);
    }

    #[test]
    fn test_directory_definitions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("orders.sh"), "echo '{}'\n").unwrap();
        fs::write(dir.path().join("broken.sh"), [0xffu8, 0x00]).unwrap();
        fs::write(dir.path().join("readme.md"), "# docs\n").unwrap();
        fs::write(dir.path().join("__init__.py"), "").unwrap();

        let mut registry = registry_in(&dir);
        registry.register("health", || Health);

        assert!(registry.locate("orders").is_found());
        assert!(matches!(
            registry.resolve("broken"),
            Err(LocateError::LoadFailed { .. })
        ));
        assert!(matches!(
            registry.resolve("ghost"),
            Err(LocateError::Missing { .. })
        ));
        assert_eq!(
            registry.list(),
            vec!["health".to_string(), "orders".to_string()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_unloadable_sibling_does_not_shadow_definition() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("orders.md"), "# orders\n").unwrap();
        fs::write(
            dir.path().join("orders.sh"),
            "printf 'HTTP/1.1 200 OK\\r\\n\\r\\n{\"orders\": []}'\n",
        )
        .unwrap();
        let registry = registry_in(&dir);

        assert_eq!(registry.list(), vec!["orders".to_string()]);
        assert!(registry.locate("orders").is_found());

        let response = crate::dispatch::dispatch(
            &registry,
            "orders",
            crate::dispatch::InboundRequest::new("GET", "/api/orders"),
        );
        assert_eq!(response.status(), 200);
        assert_eq!(response.body_json(), serde_json::json!({"orders": []}));
    }

    #[test]
    fn test_definitions_are_reloaded() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);
        assert!(!registry.locate("late").is_found());

        fs::write(dir.path().join("late.sh"), "echo '{}'\n").unwrap();
        assert!(registry.locate("late").is_found());

        fs::remove_file(dir.path().join("late.sh")).unwrap();
        assert!(!registry.locate("late").is_found());
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let registry = HandlerRegistry::new(ShimConfig::with_handler_dir("/nonexistent/devshim"));
        assert!(registry.list().is_empty());
        assert!(!registry.locate("anything").is_found());
    }
}
