/// Tool Manager
///
/// Facade over the tool schema registry, the handler registry and the loaded
/// tool implementations. Built once at startup and then shared read-only by
/// every transport task.

use serde::Serialize;
use serde_json::Value;

use crate::core::error::{ToolError, ValidationError};
use crate::core::registry::{Arguments, HandlerRegistry, RegisteredTool, ToolCatalog, ToolHandler};
use crate::core::resources;
use crate::core::schema::{ParamType, ToolDefinition, ToolRegistry};

/// Load result for a single tool.
#[derive(Debug)]
pub struct LoadOutcome {
    pub name: String,
    pub result: Result<(), ToolError>,
}

/// Per-tool outcomes of `ToolManager::load_all`, in catalog order.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub outcomes: Vec<LoadOutcome>,
}

impl LoadReport {
    pub fn loaded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.loaded()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Names of the tools that failed to load, in catalog order.
    pub fn failed_names(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.name.as_str())
            .collect()
    }
}

/// Diagnostic counters, reported by `/metrics` and at startup.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolStats {
    pub total_tools: usize,
    pub tools_with_ui: usize,
    pub definitions_count: usize,
    pub handlers_count: usize,
    pub implementations_count: usize,
}

pub struct ToolManager {
    definitions: ToolRegistry,
    handlers: HandlerRegistry,
    implementations: Vec<RegisteredTool>,
}

impl ToolManager {
    pub fn new(definitions: ToolRegistry) -> Self {
        Self {
            definitions,
            handlers: HandlerRegistry::new(),
            implementations: Vec::new(),
        }
    }

    /// Instantiates, initializes and registers every tool in the catalog.
    ///
    /// A tool that fails to initialize is skipped. A tool whose handler
    /// registration fails is still kept for shutdown, since it was
    /// initialized. Neither aborts the remaining tools.
    pub fn load_all(&mut self, catalog: &ToolCatalog) -> LoadReport {
        let mut report = LoadReport::default();
        tracing::debug!(tools = catalog.len(), "loading tools");

        for RegisteredTool {
            name,
            mut implementation,
        } in catalog.instantiate()
        {
            if let Err(e) = implementation.initialize() {
                tracing::error!(tool = %name, error = %e, "failed to initialize tool, skipping");
                report.outcomes.push(LoadOutcome { name, result: Err(e) });
                continue;
            }

            let result = implementation.register_handlers(&self.handlers);
            match &result {
                Ok(()) => tracing::info!(tool = %name, "loaded tool"),
                Err(e) => {
                    tracing::error!(tool = %name, error = %e, "failed to register handlers for tool")
                }
            }

            self.implementations.push(RegisteredTool {
                name: name.clone(),
                implementation,
            });
            report.outcomes.push(LoadOutcome { name, result });
        }

        report
    }

    pub fn definitions(&self) -> &ToolRegistry {
        &self.definitions
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.get_by_name(name)
    }

    pub fn handler(&self, name: &str) -> Option<ToolHandler> {
        self.handlers.get(name)
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Names of every declared tool, in schema order.
    pub fn available_tool_names(&self) -> Vec<String> {
        self.definitions
            .definitions()
            .iter()
            .map(|tool| tool.name.clone())
            .collect()
    }

    /// Checks required parameters against the tool's schema.
    ///
    /// Only presence is checked, plus non-empty string values for required
    /// string parameters. Numeric bounds are left to the handlers. Tools
    /// without a schema entry always pass.
    pub fn validate_arguments(&self, name: &str, args: &Arguments) -> Result<(), ValidationError> {
        let Some(definition) = self.definition(name) else {
            return Ok(());
        };

        for param in definition.params.iter().filter(|p| p.is_required) {
            let value = match args.get(&param.name) {
                None | Some(Value::Null) => {
                    return Err(ValidationError::MissingParameter {
                        name: param.name.clone(),
                        description: param.description.clone(),
                    });
                }
                Some(value) => value,
            };

            if param.param_type == ParamType::String {
                match value.as_str() {
                    None => {
                        return Err(ValidationError::NotAString {
                            name: param.name.clone(),
                        });
                    }
                    Some("") => {
                        return Err(ValidationError::EmptyString {
                            name: param.name.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }

    /// Shuts down every loaded implementation. Errors are logged only.
    pub fn shutdown(&self) {
        for tool in &self.implementations {
            match tool.implementation.shutdown() {
                Ok(()) => tracing::debug!(tool = %tool.name, "tool shut down"),
                Err(e) => tracing::warn!(tool = %tool.name, error = %e, "tool shutdown failed"),
            }
        }
    }

    pub fn stats(&self) -> ToolStats {
        let definitions = self.definitions.definitions();
        ToolStats {
            total_tools: definitions.len(),
            tools_with_ui: definitions
                .iter()
                .filter(|tool| resources::ui_resource_uri(&tool.name).is_some())
                .count(),
            definitions_count: self.definitions.len(),
            handlers_count: self.handlers.len(),
            implementations_count: self.implementations.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::convert::ToolOutput;
    use crate::core::registry::{ToolContext, ToolImplementation, handler};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SCHEMA: &str = r#"{
        "tools": [
            {
                "name": "scan",
                "description": "Scan",
                "params": [
                    {"name": "application_path", "type": "string", "isRequired": true, "description": "Application root"},
                    {"name": "count", "type": "integer", "isRequired": true, "validation": {"min": 1, "max": 5}, "description": "How many"},
                    {"name": "label", "type": "string", "description": "Optional label"}
                ]
            },
            {"name": "pipeline-findings", "description": "Findings"},
            {"name": "dup", "description": "Duplicate registrations"}
        ]
    }"#;

    fn manager() -> ToolManager {
        ToolManager::new(ToolRegistry::load(SCHEMA.as_bytes()).unwrap())
    }

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => panic!("arguments must be an object"),
        }
    }

    #[test]
    fn test_validation_reports_each_missing_required_param() {
        let manager = manager();
        let complete = args(json!({"application_path": "/app", "count": 2}));
        assert_eq!(manager.validate_arguments("scan", &complete), Ok(()));

        for missing in ["application_path", "count"] {
            let mut partial = complete.clone();
            partial.remove(missing);
            let err = manager.validate_arguments("scan", &partial).unwrap_err();
            assert!(err.to_string().contains(missing), "{err} should name {missing}");
        }
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = manager()
            .validate_arguments("scan", &args(json!({"application_path": null, "count": 1})))
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingParameter { ref name, .. } if name == "application_path"));
        assert!(err.to_string().contains("Application root"));
    }

    #[test]
    fn test_required_string_checks() {
        let manager = manager();
        let err = manager
            .validate_arguments("scan", &args(json!({"application_path": 7, "count": 1})))
            .unwrap_err();
        assert_eq!(err.to_string(), "parameter application_path must be a string");

        let err = manager
            .validate_arguments("scan", &args(json!({"application_path": "", "count": 1})))
            .unwrap_err();
        assert_eq!(err.to_string(), "parameter application_path cannot be empty");
    }

    #[test]
    fn test_numeric_bounds_and_optional_params_not_enforced() {
        let manager = manager();
        let out_of_range = args(json!({"application_path": "/app", "count": 99, "label": ""}));
        assert_eq!(manager.validate_arguments("scan", &out_of_range), Ok(()));
    }

    #[test]
    fn test_unknown_tool_passes_validation() {
        assert_eq!(manager().validate_arguments("not-declared", &Arguments::new()), Ok(()));
    }

    struct Fixed {
        name: &'static str,
        text: &'static str,
    }

    impl ToolImplementation for Fixed {
        fn register_handlers(&self, registry: &HandlerRegistry) -> Result<(), ToolError> {
            let text = self.text;
            registry.register(self.name, handler(move |_, _| async move { Ok(ToolOutput::text(text)) }));
            Ok(())
        }
    }

    struct BrokenInit;

    impl ToolImplementation for BrokenInit {
        fn initialize(&mut self) -> Result<(), ToolError> {
            Err(ToolError::Initialization("missing credentials".to_string()))
        }

        fn register_handlers(&self, _registry: &HandlerRegistry) -> Result<(), ToolError> {
            unreachable!("handlers are never registered after a failed initialize")
        }
    }

    struct BrokenRegistration;

    impl ToolImplementation for BrokenRegistration {
        fn register_handlers(&self, _registry: &HandlerRegistry) -> Result<(), ToolError> {
            Err(ToolError::Initialization("bad handler table".to_string()))
        }
    }

    #[test]
    fn test_load_all_skips_failing_tools() {
        let mut catalog = ToolCatalog::new();
        catalog.register_tool("scan", || Box::new(Fixed { name: "scan", text: "ok" }));
        catalog.register_tool("broken-init", || Box::new(BrokenInit));
        catalog.register_tool("broken-registration", || Box::new(BrokenRegistration));
        catalog.register_tool("pipeline-findings", || {
            Box::new(Fixed {
                name: "pipeline-findings",
                text: "ok",
            })
        });

        let mut manager = manager();
        let report = manager.load_all(&catalog);

        assert_eq!(report.total(), 4);
        assert_eq!(report.loaded(), 2);
        assert_eq!(report.failed(), 2);
        assert!(report.outcomes[1].result.is_err());
        assert_eq!(report.failed_names(), vec!["broken-init", "broken-registration"]);
        assert!(manager.handler("scan").is_some());
        assert!(manager.handler("pipeline-findings").is_some());

        let stats = manager.stats();
        assert_eq!(
            stats,
            ToolStats {
                total_tools: 3,
                tools_with_ui: 1,
                definitions_count: 3,
                handlers_count: 2,
                implementations_count: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_later_tool_registration_wins() {
        let mut catalog = ToolCatalog::new();
        catalog.register_tool("first", || Box::new(Fixed { name: "dup", text: "first" }));
        catalog.register_tool("second", || Box::new(Fixed { name: "dup", text: "second" }));

        let mut manager = manager();
        manager.load_all(&catalog);

        let dup = manager.handler("dup").unwrap();
        let output = dup(ToolContext::default(), Arguments::new()).await.unwrap();
        assert_eq!(output, ToolOutput::text("second"));
    }

    struct CountingShutdown {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ToolImplementation for CountingShutdown {
        fn register_handlers(&self, _registry: &HandlerRegistry) -> Result<(), ToolError> {
            Ok(())
        }

        fn shutdown(&self) -> Result<(), ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ToolError::Process("still running".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_shutdown_is_best_effort() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut catalog = ToolCatalog::new();
        for (name, fail) in [("a", true), ("b", false), ("c", true)] {
            let calls = Arc::clone(&calls);
            catalog.register_tool(name, move || {
                Box::new(CountingShutdown {
                    calls: Arc::clone(&calls),
                    fail,
                })
            });
        }

        let mut manager = manager();
        manager.load_all(&catalog);
        manager.shutdown();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
