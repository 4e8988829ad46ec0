//! Capability modules and the typed task-handler table.
//!
//! A worker resolves every task name through a [`HandlerTable`] built at
//! role-assignment time. Lookups that miss produce an explicit
//! [`TaskOutcome::UnknownTask`] rather than a silent drop.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::protocol::{error_payload, Payload};

/// A task handler: opaque payload in, opaque payload (or failure) out.
pub type TaskHandler = Arc<dyn Fn(&Payload) -> Result<Payload, HandlerError> + Send + Sync>;

/// A unit of functionality that contributes task handlers to a role.
pub trait CapabilityModule: Send + Sync {
    /// Module name as referenced by the role registry.
    fn name(&self) -> &str;
    
    /// Registers this module's handlers.
    fn install(&self, table: &mut HandlerTable);
}

/// Resolves module names to modules.
pub trait ModuleLoader: Send + Sync {
    /// Returns `None` when the module cannot be loaded.
    fn load(&self, name: &str) -> Option<Box<dyn CapabilityModule>>;
}

/// Result of invoking a task by name.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Payload),
    Failed(HandlerError),
    UnknownTask(String),
}

impl TaskOutcome {
    /// Converts the outcome into the payload sent back in a `result`.
    pub fn into_payload(self) -> Payload {
        match self {
            TaskOutcome::Completed(payload) => payload,
            TaskOutcome::Failed(err) => error_payload(err.to_string()),
            TaskOutcome::UnknownTask(name) => error_payload(format!("unknown task: {name}")),
        }
    }
    
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

/// Map from task name to handler, fixed once a role is loaded.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, TaskHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Registers a handler, replacing any previous one with the same name.
    pub fn register<F>(&mut self, task: impl Into<String>, handler: F)
    where
        F: Fn(&Payload) -> Result<Payload, HandlerError> + Send + Sync + 'static,
    {
        let task = task.into();
        if self.handlers.insert(task.clone(), Arc::new(handler)).is_some() {
            debug!(task = %task, "handler replaced");
        }
    }
    
    pub fn contains(&self, task: &str) -> bool {
        self.handlers.contains_key(task)
    }
    
    /// Registered task names, sorted.
    pub fn task_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
    
    pub fn len(&self) -> usize {
        self.handlers.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
    
    /// Runs the named task. Handler errors and panics become `Failed`.
    pub fn invoke(&self, task: &str, data: &Payload) -> TaskOutcome {
        let Some(handler) = self.handlers.get(task) else {
            return TaskOutcome::UnknownTask(task.to_string());
        };
        
        match catch_unwind(AssertUnwindSafe(|| handler(data))) {
            Ok(Ok(payload)) => TaskOutcome::Completed(payload),
            Ok(Err(err)) => TaskOutcome::Failed(err),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(task = %task, panic = %message, "task handler panicked");
                TaskOutcome::Failed(HandlerError::Panicked(message))
            }
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("tasks", &self.task_names())
            .finish()
    }
}

/// Which requested modules loaded and which did not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl LoadResult {
    /// A role is usable when at least one module loaded.
    pub fn ok(&self) -> bool {
        !self.succeeded.is_empty()
    }
}

/// Loads each named module, tolerating individual failures.
pub fn load_modules(loader: &dyn ModuleLoader, names: &[String]) -> (HandlerTable, LoadResult) {
    let mut table = HandlerTable::new();
    let mut result = LoadResult::default();
    
    for name in names {
        match loader.load(name) {
            Some(module) => {
                module.install(&mut table);
                debug!(module = %module.name(), "capability module loaded");
                result.succeeded.push(name.clone());
            }
            None => {
                warn!(module = %name, "capability module failed to load");
                result.failed.push(name.clone());
            }
        }
    }
    
    (table, result)
}

/// Constructor for a capability module.
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn CapabilityModule> + Send + Sync>;

/// Loader backed by a fixed name → constructor table built at startup.
#[derive(Clone, Default)]
pub struct StaticModuleLoader {
    factories: BTreeMap<String, ModuleFactory>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// A loader that knows the built-in modules.
    pub fn with_builtins() -> Self {
        Self::new().with_module(crate::builtin::DIAGNOSTICS, || {
            Box::new(crate::builtin::DiagnosticsModule)
        })
    }
    
    /// Registers a module constructor under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn CapabilityModule> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }
    
    /// Builder form of [`register`](Self::register).
    pub fn with_module<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn CapabilityModule> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }
    
    /// Names this loader can resolve.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, name: &str) -> Option<Box<dyn CapabilityModule>> {
        self.factories.get(name).map(|factory| factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Greeter;

    impl CapabilityModule for Greeter {
        fn name(&self) -> &str {
            "greeter"
        }

        fn install(&self, table: &mut HandlerTable) {
            table.register("greet", |data| {
                let who = data
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| HandlerError::InvalidInput("missing name".into()))?;
                let mut out = Payload::new();
                out.insert("text".into(), json!(format!("hello, {who}")));
                Ok(out)
            });
            table.register("explode", |_| panic!("circuit fried"));
        }
    }

    fn loader() -> StaticModuleLoader {
        StaticModuleLoader::with_builtins().with_module("greeter", || Box::new(Greeter))
    }

    #[test]
    fn test_partial_load() {
        let names = vec!["greeter".to_string(), "markov".to_string()];
        let (table, result) = load_modules(&loader(), &names);
        
        assert_eq!(result.succeeded, vec!["greeter"]);
        assert_eq!(result.failed, vec!["markov"]);
        assert!(result.ok());
        assert_eq!(table.task_names(), vec!["explode", "greet"]);
    }

    #[test]
    fn test_nothing_loaded_is_not_ok() {
        let names = vec!["markov".to_string()];
        let (table, result) = load_modules(&loader(), &names);
        assert!(!result.ok());
        assert!(table.is_empty());
    }

    #[test]
    fn test_invoke_outcomes() {
        let (table, _) = load_modules(&loader(), &["greeter".to_string()]);
        
        let mut data = Payload::new();
        data.insert("name".into(), json!("ada"));
        let outcome = table.invoke("greet", &data);
        assert!(outcome.is_completed());
        assert_eq!(outcome.into_payload()["text"], json!("hello, ada"));
        
        let outcome = table.invoke("greet", &Payload::new());
        assert_eq!(outcome, TaskOutcome::Failed(HandlerError::InvalidInput("missing name".into())));
        
        let outcome = table.invoke("sing", &Payload::new());
        assert_eq!(outcome, TaskOutcome::UnknownTask("sing".into()));
        assert_eq!(outcome.into_payload()["error"], json!("unknown task: sing"));
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let (table, _) = load_modules(&loader(), &["greeter".to_string()]);
        let outcome = table.invoke("explode", &Payload::new());
        assert_eq!(outcome, TaskOutcome::Failed(HandlerError::Panicked("circuit fried".into())));
        
        // Table still usable afterwards
        assert!(table.contains("greet"));
    }
}
