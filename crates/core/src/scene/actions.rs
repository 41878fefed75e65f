use super::graph::{SceneGraph, SceneNode, ROOT_PATH};
use super::history::{PendingChanges, SceneCommand};
use super::{SceneError, SceneResult};
use crate::ports::editor::{action_error, EditorActions};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

const SUPPORTED_ACTIONS: &[&str] = &[
    "create_node",
    "delete_node",
    "rename_node",
    "reparent_node",
    "get_property",
    "set_property",
    "get_scene_tree",
    "get_selection",
    "set_selection",
    "spawn_grid",
    "get_pending_changes",
    "clear_pending_changes",
    "undo_last",
];

const MAX_GRID_SIDE: u64 = 50;

/// Scene façade backed by an in-memory graph
#[derive(Debug, Default)]
pub struct HeadlessScene {
    graph: SceneGraph,
    undo: Vec<SceneCommand>,
    changes: PendingChanges,
    selection: Vec<String>,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn changes(&self) -> &PendingChanges {
        &self.changes
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    fn execute(&mut self, action: &str, data: &Map<String, Value>) -> SceneResult<Value> {
        match action {
            "create_node" => {
                let parent = text(data, "parent_path")?;
                let node = SceneNode::new(text(data, "node_name")?, text(data, "node_class")?)
                    .with_properties(&object(data, "properties"));
                let inverse = self.mutate(
                    action,
                    data,
                    SceneCommand::Insert {
                        parent: parent.to_string(),
                        node,
                        index: None,
                    },
                )?;
                Ok(json!({ "node_path": removed_path(&inverse) }))
            }
            "delete_node" => {
                let path = SceneGraph::canonical(text(data, "node_path")?)?;
                self.mutate(action, data, SceneCommand::Remove { path: path.clone() })?;
                let subtree = format!("{}/", path);
                self.selection
                    .retain(|selected| selected != &path && !selected.starts_with(&subtree));
                Ok(json!({ "node_path": path }))
            }
            "rename_node" => {
                let path = text(data, "node_path")?;
                let name = text(data, "new_name")?;
                let inverse = self.mutate(
                    action,
                    data,
                    SceneCommand::Rename {
                        path: path.to_string(),
                        name: name.to_string(),
                    },
                )?;
                let new_path = match &inverse {
                    SceneCommand::Rename { path, .. } => path.clone(),
                    _ => String::new(),
                };
                Ok(json!({ "node_path": new_path }))
            }
            "reparent_node" => {
                let path = text(data, "node_path")?;
                let parent = text(data, "new_parent_path")?;
                let inverse = self.mutate(
                    action,
                    data,
                    SceneCommand::Reparent {
                        path: path.to_string(),
                        parent: parent.to_string(),
                        index: None,
                    },
                )?;
                let new_path = match &inverse {
                    SceneCommand::Reparent { path, .. } => path.clone(),
                    _ => String::new(),
                };
                Ok(json!({ "node_path": new_path }))
            }
            "get_property" => {
                let path = text(data, "node_path")?;
                let property = text(data, "property")?;
                let value = self
                    .graph
                    .get(path)?
                    .properties
                    .get(property)
                    .cloned()
                    .ok_or_else(|| SceneError::PropertyNotFound {
                        path: path.to_string(),
                        property: property.to_string(),
                    })?;
                Ok(json!({ "value": value }))
            }
            "set_property" => {
                let path = text(data, "node_path")?;
                let property = text(data, "property")?;
                let value = data
                    .get("value")
                    .cloned()
                    .ok_or(SceneError::InvalidParameter("value"))?;
                self.mutate(
                    action,
                    data,
                    SceneCommand::SetProperty {
                        path: path.to_string(),
                        property: property.to_string(),
                        value: Some(value),
                    },
                )?;
                Ok(json!({ "node_path": path, "property": property }))
            }
            "get_scene_tree" => Ok(json!({ "tree": self.graph.tree() })),
            "get_selection" => Ok(json!({ "node_paths": self.selection })),
            "set_selection" => {
                let paths = data
                    .get("node_paths")
                    .and_then(Value::as_array)
                    .ok_or(SceneError::InvalidParameter("node_paths"))?;
                let mut selection = Vec::with_capacity(paths.len());
                for path in paths {
                    let path = path.as_str().ok_or(SceneError::InvalidParameter("node_paths"))?;
                    self.graph.get(path)?;
                    selection.push(SceneGraph::canonical(path)?);
                }
                self.selection = selection;
                Ok(json!({ "node_paths": self.selection }))
            }
            "spawn_grid" => self.spawn_grid(data),
            "get_pending_changes" => {
                let changes: Vec<_> = self.changes.entries().collect();
                Ok(json!({ "changes": changes, "count": changes.len() }))
            }
            "clear_pending_changes" => Ok(json!({ "cleared": self.changes.clear() })),
            "undo_last" => {
                let inverse = self.undo.pop().ok_or(SceneError::NothingToUndo)?;
                if let Err(e) = inverse.clone().apply(&mut self.graph) {
                    self.undo.push(inverse);
                    return Err(e);
                }
                self.changes.push(action, json!({}));
                Ok(json!({ "remaining": self.undo.len() }))
            }
            other => {
                warn!("Headless scene cannot perform '{}'", other);
                Err(SceneError::InvalidParameter("action"))
            }
        }
    }

    fn spawn_grid(&mut self, data: &Map<String, Value>) -> SceneResult<Value> {
        let parent = text(data, "parent_path")?;
        let class = text(data, "node_class")?;
        let rows = grid_side(data, "rows")?;
        let cols = grid_side(data, "cols")?;
        let spacing = data
            .get("spacing")
            .and_then(Value::as_array)
            .filter(|s| s.len() == 3)
            .and_then(|s| s.iter().map(Value::as_f64).collect::<Option<Vec<f64>>>())
            .ok_or(SceneError::InvalidParameter("spacing"))?;
        let prefix = data
            .get("name_prefix")
            .and_then(Value::as_str)
            .unwrap_or("Tile");

        let mut commands = Vec::with_capacity((rows * cols) as usize);
        for row in 0..rows {
            for col in 0..cols {
                let mut properties = Map::new();
                properties.insert(
                    "position".to_string(),
                    json!([col as f64 * spacing[0], 0.0, row as f64 * spacing[2]]),
                );
                commands.push(SceneCommand::Insert {
                    parent: parent.to_string(),
                    node: SceneNode::new(format!("{}_{}_{}", prefix, row, col), class)
                        .with_properties(&properties),
                    index: None,
                });
            }
        }

        let count = commands.len();
        self.mutate("spawn_grid", data, SceneCommand::Batch(commands))?;
        Ok(json!({ "count": count, "parent_path": SceneGraph::canonical(parent)? }))
    }

    /// Apply a command, keep its inverse and log the action
    fn mutate(
        &mut self,
        action: &str,
        data: &Map<String, Value>,
        command: SceneCommand,
    ) -> SceneResult<SceneCommand> {
        let inverse = command.apply(&mut self.graph)?;
        self.undo.push(inverse.clone());
        self.changes.push(action, Value::Object(data.clone()));
        debug!("Scene {} applied ({} nodes)", action, self.graph.node_count());
        Ok(inverse)
    }
}

impl EditorActions for HeadlessScene {
    fn supported_actions(&self) -> Vec<&'static str> {
        SUPPORTED_ACTIONS.to_vec()
    }

    fn perform(&mut self, action: &str, data: &Map<String, Value>) -> Value {
        if !SUPPORTED_ACTIONS.iter().any(|a| *a == action) {
            return action_error(format!("Unsupported action: {}", action));
        }
        match self.execute(action, data) {
            Ok(Value::Object(mut result)) => {
                result.insert("success".to_string(), Value::Bool(true));
                Value::Object(result)
            }
            Ok(other) => json!({ "success": true, "result": other }),
            Err(e) => action_error(e.to_string()),
        }
    }
}

fn text<'a>(data: &'a Map<String, Value>, key: &'static str) -> SceneResult<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or(SceneError::InvalidParameter(key))
}

fn object(data: &Map<String, Value>, key: &str) -> Map<String, Value> {
    data.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn grid_side(data: &Map<String, Value>, key: &'static str) -> SceneResult<u64> {
    data.get(key)
        .and_then(Value::as_u64)
        .filter(|n| (1..=MAX_GRID_SIDE).contains(n))
        .ok_or(SceneError::InvalidParameter(key))
}

fn removed_path(inverse: &SceneCommand) -> String {
    match inverse {
        SceneCommand::Remove { path } => path.clone(),
        _ => ROOT_PATH.to_string(),
    }
}
