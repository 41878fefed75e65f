use serde_json::{Map, Value};

/// Every action the backend may ask the editor to perform
pub const EDITOR_ACTION_CATALOG: &[&str] = &[
    "create_node",
    "delete_node",
    "rename_node",
    "reparent_node",
    "get_property",
    "set_property",
    "attach_resource",
    "create_resource",
    "spawn_grid",
    "spawn_random",
    "spawn_along_path",
    "get_scene_tree",
    "instantiate_scene",
    "save_scene",
    "attach_script",
    "connect_signal",
    "get_selection",
    "set_selection",
    "get_pending_changes",
    "clear_pending_changes",
    "undo_last",
];

/// Port for the scene mutation façade
///
/// Results are JSON objects: `{"success": true, ...}` or
/// `{"success": false, "error": "..."}`.
pub trait EditorActions {
    /// Actions this implementation can perform; checked when it is attached
    fn supported_actions(&self) -> Vec<&'static str>;

    fn perform(&mut self, action: &str, data: &Map<String, Value>) -> Value;
}

/// Failure result in the façade's reply shape
pub fn action_error(message: impl Into<String>) -> Value {
    serde_json::json!({ "success": false, "error": message.into() })
}
