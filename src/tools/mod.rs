/// Built-in Tools
///
/// Each tool lives in its own module and is listed explicitly in `catalog`.
/// Their parameters are declared in the embedded `tools.json` schema
/// document, which `--tools` can replace at startup.

pub mod args;
pub mod pipeline_findings;
pub mod pipeline_job;
pub mod pipeline_scan;
pub mod pipeline_status;

use std::path::PathBuf;

use crate::core::registry::ToolCatalog;

/// Tool schema document compiled into the binary.
pub const TOOLS_SCHEMA: &str = include_str!("tools.json");

/// Settings the built-in tools need from the server configuration.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub veracode_cli: PathBuf,
}

/// All built-in tools, in registration order.
pub fn catalog(settings: &ToolSettings) -> ToolCatalog {
    let mut catalog = ToolCatalog::new();

    let cli = settings.veracode_cli.clone();
    catalog.register_tool(pipeline_scan::NAME, move || {
        Box::new(pipeline_scan::PipelineScanTool::new(cli.clone()))
    });
    catalog.register_tool(pipeline_status::NAME, || Box::new(pipeline_status::PipelineStatusTool));
    catalog.register_tool(pipeline_findings::NAME, || Box::new(pipeline_findings::PipelineFindingsTool));

    catalog
}
