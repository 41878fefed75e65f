use super::graph::{SceneGraph, SceneNode};
use super::SceneResult;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

/// An undoable scene mutation
///
/// `apply` performs the mutation and returns the command that reverts it,
/// so the undo stack only ever holds inverses.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneCommand {
    Insert {
        parent: String,
        node: SceneNode,
        index: Option<usize>,
    },
    Remove {
        path: String,
    },
    Rename {
        path: String,
        name: String,
    },
    Reparent {
        path: String,
        parent: String,
        index: Option<usize>,
    },
    /// `None` removes the property
    SetProperty {
        path: String,
        property: String,
        value: Option<Value>,
    },
    /// Applied in order, inverted in reverse order
    Batch(Vec<SceneCommand>),
}

impl SceneCommand {
    pub fn apply(self, graph: &mut SceneGraph) -> SceneResult<SceneCommand> {
        match self {
            SceneCommand::Insert {
                parent,
                node,
                index,
            } => {
                let path = graph.insert(&parent, node, index)?;
                Ok(SceneCommand::Remove { path })
            }
            SceneCommand::Remove { path } => {
                let (parent, index, node) = graph.remove(&path)?;
                Ok(SceneCommand::Insert {
                    parent,
                    node,
                    index: Some(index),
                })
            }
            SceneCommand::Rename { path, name } => {
                let old_name = graph.get(&path)?.name.clone();
                let new_path = graph.rename(&path, &name)?;
                Ok(SceneCommand::Rename {
                    path: new_path,
                    name: old_name,
                })
            }
            SceneCommand::Reparent {
                path,
                parent,
                index,
            } => {
                let (new_path, old_parent, old_index) = graph.reparent(&path, &parent, index)?;
                Ok(SceneCommand::Reparent {
                    path: new_path,
                    parent: old_parent,
                    index: Some(old_index),
                })
            }
            SceneCommand::SetProperty {
                path,
                property,
                value,
            } => {
                let node = graph.get_mut(&path)?;
                let previous = match value {
                    Some(value) => node.properties.insert(property.clone(), value),
                    None => node.properties.remove(&property),
                };
                Ok(SceneCommand::SetProperty {
                    path,
                    property,
                    value: previous,
                })
            }
            SceneCommand::Batch(commands) => {
                let mut inverses = Vec::with_capacity(commands.len());
                for command in commands {
                    match command.apply(graph) {
                        Ok(inverse) => inverses.push(inverse),
                        Err(e) => {
                            // Leave the graph as it was before the batch
                            for inverse in inverses.into_iter().rev() {
                                let _ = inverse.apply(graph);
                            }
                            return Err(e);
                        }
                    }
                }
                inverses.reverse();
                Ok(SceneCommand::Batch(inverses))
            }
        }
    }
}

/// One applied action, as reported by `get_pending_changes`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub sequence: u64,
    pub action: String,
    pub detail: Value,
}

/// Bounded log of applied actions; the oldest entry is evicted when full
#[derive(Debug, Clone)]
pub struct PendingChanges {
    capacity: usize,
    next_sequence: u64,
    entries: VecDeque<ChangeRecord>,
}

impl PendingChanges {
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_sequence: 0,
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, action: impl Into<String>, detail: Value) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.next_sequence += 1;
        self.entries.push_back(ChangeRecord {
            sequence: self.next_sequence,
            action: action.into(),
            detail,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }
}

impl Default for PendingChanges {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
