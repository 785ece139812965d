/// UI Resources
///
/// Static mapping from tool names to their `ui://<tool>/app.html` resources,
/// plus the embedded HTML bodies served by `resources/read`.

use serde_json::{Value, json};

use crate::core::protocol::{Resource, ResourceContents, UI_MIME_TYPE};

/// Tools that have an interactive UI resource.
pub const UI_TOOLS: &[&str] = &[
    "pipeline-findings",
    "static-findings",
    "dynamic-findings",
    "local-sca-findings",
];

struct EmbeddedResource {
    tool: &'static str,
    name: &'static str,
    description: &'static str,
    body: &'static str,
}

/// Resources whose HTML bundle ships inside the binary. Only these are
/// listed and readable.
const EMBEDDED: &[EmbeddedResource] = &[EmbeddedResource {
    tool: "pipeline-findings",
    name: "Pipeline Findings UI",
    description: "Interactive UI for pipeline scan findings",
    body: include_str!("../../ui/pipeline-findings.html"),
}];

fn resource_uri(tool: &str) -> String {
    format!("ui://{tool}/app.html")
}

/// UI resource URI for a tool, if it has one.
pub fn ui_resource_uri(tool: &str) -> Option<String> {
    UI_TOOLS.contains(&tool).then(|| resource_uri(tool))
}

/// `_meta` attached to a UI-linked tool in `tools/list`. Both the nested
/// form and the flat legacy key are emitted for older hosts.
pub fn tool_ui_meta(uri: &str) -> Value {
    json!({
        "ui": {"resourceUri": uri},
        "ui/resourceUri": uri,
    })
}

pub fn list() -> Vec<Resource> {
    EMBEDDED
        .iter()
        .map(|res| Resource {
            uri: resource_uri(res.tool),
            name: res.name.to_string(),
            description: res.description.to_string(),
            mime_type: UI_MIME_TYPE.to_string(),
        })
        .collect()
}

/// Looks up an embedded resource body by URI.
pub fn read(uri: &str) -> Option<ResourceContents> {
    let resource = EMBEDDED.iter().find(|res| resource_uri(res.tool) == uri)?;

    tracing::debug!(uri, bytes = resource.body.len(), "serving UI resource");

    Some(ResourceContents {
        uri: uri.to_string(),
        mime_type: UI_MIME_TYPE.to_string(),
        text: resource.body.to_string(),
        meta: Some(json!({"ui": {"permissions": {}}})),
    })
}
