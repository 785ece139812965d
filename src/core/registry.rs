/// Tool Handler Registry
///
/// Tool authors plug into the server through three pieces defined here:
/// - `ToolHandler`: the async function executed for a `tools/call`
/// - `ToolImplementation`: a tool module with an init/register/shutdown lifecycle
/// - `ToolCatalog`: the explicit list of tool constructors assembled at startup
///
/// `HandlerRegistry` maps tool names to handlers. Registration is guarded by a
/// write lock; lookups during request handling take the read lock only, so
/// concurrent calls never block each other.

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::core::convert::ToolOutput;
use crate::core::error::ToolError;

/// Tool arguments as received in `tools/call`.
pub type Arguments = Map<String, Value>;

/// Result type returned by every tool handler.
pub type ToolResult = Result<ToolOutput, ToolError>;

/// Request-scoped information handed to each handler invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolContext {
    /// Name the tool was invoked under.
    pub tool_name: String,
    /// Whether the session negotiated MCP Apps UI support. Handlers use this
    /// to choose between a brief summary plus structured data, and verbose
    /// text-only output.
    pub client_supports_ui: bool,
}

/// Tool handler function type.
///
/// Handlers are shared async closures taking the request context and the call
/// arguments. They must be Send + Sync so any transport task can run them.
pub type ToolHandler = Arc<dyn Fn(ToolContext, Arguments) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// Wraps an async function or closure into a `ToolHandler`.
pub fn handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolContext, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    Arc::new(move |ctx, args| Box::pin(f(ctx, args)))
}

/// Mapping of tool names to their handler functions.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, ToolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. A later registration under the same name replaces
    /// the earlier one without error.
    pub fn register(&self, name: impl Into<String>, handler: ToolHandler) {
        let name = name.into();
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(tool = %name, "handler re-registered, previous handler replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<ToolHandler> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Lifecycle contract for a tool module.
///
/// Any state a tool needs lives inside its implementation and is scoped by
/// `initialize`/`shutdown`.
pub trait ToolImplementation: Send + Sync {
    /// Called once when the tool is loaded.
    fn initialize(&mut self) -> Result<(), ToolError> {
        Ok(())
    }

    /// Registers the tool's handler functions.
    fn register_handlers(&self, registry: &HandlerRegistry) -> Result<(), ToolError>;

    /// Called once during server teardown.
    fn shutdown(&self) -> Result<(), ToolError> {
        Ok(())
    }
}

/// Builds a fresh tool implementation.
pub type ToolConstructor = Box<dyn Fn() -> Box<dyn ToolImplementation> + Send + Sync>;

/// A loaded tool implementation, owned by the `ToolManager` for the server's
/// lifetime.
pub struct RegisteredTool {
    pub name: String,
    pub implementation: Box<dyn ToolImplementation>,
}

/// Ordered list of tool constructors, assembled explicitly at startup.
#[derive(Default)]
pub struct ToolCatalog {
    entries: Vec<(String, ToolConstructor)>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool constructor. Registering a name twice keeps the original
    /// position but uses the newer constructor.
    pub fn register_tool<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn ToolImplementation> + Send + Sync + 'static,
    {
        let name = name.into();
        let constructor: ToolConstructor = Box::new(constructor);
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = constructor,
            None => self.entries.push((name, constructor)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Instantiates every registered tool, in registration order.
    pub fn instantiate(&self) -> Vec<RegisteredTool> {
        self.entries
            .iter()
            .map(|(name, constructor)| RegisteredTool {
                name: name.clone(),
                implementation: constructor(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_handler(text: &'static str) -> ToolHandler {
        handler(move |_ctx, _args| async move { Ok(ToolOutput::text(text)) })
    }

    async fn run(handler: &ToolHandler) -> ToolOutput {
        handler(ToolContext::default(), Arguments::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = HandlerRegistry::new();
        registry.register("dup", text_handler("first"));
        registry.register("dup", text_handler("second"));

        assert_eq!(registry.len(), 1);
        let handler = registry.get("dup").unwrap();
        assert_eq!(run(&handler).await, ToolOutput::text("second"));
    }

    #[test]
    fn test_lookup_miss() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("nothing").is_none());
        assert!(!registry.contains("nothing"));
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(HandlerRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.register(format!("tool-{i}"), text_handler("x"));
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(registry.len(), 8);
    }

    struct Noop;

    impl ToolImplementation for Noop {
        fn register_handlers(&self, _registry: &HandlerRegistry) -> Result<(), ToolError> {
            Ok(())
        }
    }

    #[test]
    fn test_catalog_keeps_order_and_replaces_duplicates() {
        let mut catalog = ToolCatalog::new();
        catalog.register_tool("b", || Box::new(Noop));
        catalog.register_tool("a", || Box::new(Noop));
        catalog.register_tool("b", || Box::new(Noop));

        assert_eq!(catalog.len(), 2);
        let names: Vec<_> = catalog.instantiate().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
