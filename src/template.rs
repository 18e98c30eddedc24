//! # Template Rendering
//!
//! Backs the `core.render` Lua call. Templates live at `<plugin_dir>/views/<name>.etlua`;
//! rendering is done with `tera` rather than embedding a Lua template engine, so a
//! malformed template fails with a host-side error instead of a second, harder-to-sandbox
//! Lua interpreter running inside the plugin's own.

use crate::error::PluginHostError;
use std::path::Path;

/// Renders `<plugin_dir>/views/<view_name>.etlua` against `data`.
///
/// Rejects `view_name`s containing `..` before touching the filesystem — the same
/// directory-traversal guard the Lua framework library historically enforced, kept
/// here since this is now the function that actually opens the file.
pub fn render(
    plugin_dir: &Path,
    view_name: &str,
    data: &serde_json::Value,
) -> Result<String, PluginHostError> {
    if view_name.contains("..") {
        return Err(PluginHostError::PluginLoad {
            message: format!("invalid view name: {view_name}"),
        });
    }

    let path = plugin_dir.join("views").join(format!("{view_name}.etlua"));
    let source = std::fs::read_to_string(&path).map_err(|e| PluginHostError::Internal {
        message: format!("template not found at {}: {}", path.display(), e),
    })?;

    let context = tera::Context::from_serialize(data).map_err(|e| PluginHostError::Internal {
        message: format!("template data is not serializable: {e}"),
    })?;

    tera::Tera::one_off(&source, &context, true).map_err(|e| PluginHostError::Internal {
        message: format!("template error in {view_name}: {e}"),
    })
}
