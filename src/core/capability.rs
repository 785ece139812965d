/// UI Capability Detection
///
/// Decides once per session, during `initialize`, whether the client can
/// render MCP Apps UI resources. The answer controls whether tool results
/// carry `structuredContent` and whether `tools/list` advertises UI links.

use serde_json::Value;

use crate::core::protocol::{ClientCapabilities, UI_EXTENSION_KEY, UI_MIME_TYPE};

#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityDetector {
    /// Operator override (`--force-mcp-app`).
    force: bool,
}

impl CapabilityDetector {
    pub fn new(force: bool) -> Self {
        Self { force }
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    /// Returns true when forced, or when the client's extensions map declares
    /// the UI extension with a `mimeTypes` list containing the exact MCP App
    /// MIME type.
    pub fn detect(&self, capabilities: &ClientCapabilities) -> bool {
        if self.force {
            tracing::info!("UI mode forced by operator, structuredContent always sent");
            return true;
        }

        let Some(extensions) = &capabilities.extensions else {
            tracing::debug!("client declared no extensions, using text-only mode");
            return false;
        };

        tracing::debug!(keys = ?extensions.keys().collect::<Vec<_>>(), "client extensions");

        let Some(ui) = extensions.get(UI_EXTENSION_KEY).and_then(Value::as_object) else {
            tracing::debug!(key = UI_EXTENSION_KEY, "UI extension not declared");
            return false;
        };

        let Some(mime_types) = ui.get("mimeTypes").and_then(Value::as_array) else {
            tracing::warn!("UI extension has no mimeTypes array");
            return false;
        };

        let supported = mime_types
            .iter()
            .any(|mime| mime.as_str() == Some(UI_MIME_TYPE));

        if supported {
            tracing::info!("client supports MCP Apps UI");
        } else {
            tracing::info!(?mime_types, "client UI extension lacks the MCP App MIME type");
        }
        supported
    }
}
