use super::{SceneError, SceneResult};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const ROOT_PATH: &str = "/root";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneNode {
    pub name: String,
    pub class: String,
    pub properties: BTreeMap<String, Value>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: &Map<String, Value>) -> Self {
        self.properties
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    fn child(&self, name: &str) -> Option<&SceneNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut SceneNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(SceneNode::count).sum::<usize>()
    }

    fn tree_json(&self, path: &str) -> Value {
        let children: Vec<Value> = self
            .children
            .iter()
            .map(|c| c.tree_json(&format!("{}/{}", path, c.name)))
            .collect();
        json!({
            "name": self.name,
            "class": self.class,
            "path": path,
            "children": children,
        })
    }
}

/// In-memory node tree addressed by `/`-separated paths under `/root`
///
/// Paths without a leading `/` are taken relative to the root.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    root: SceneNode,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self {
            root: SceneNode::new("root", "Node"),
        }
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical `/root/...` form of a path
    pub fn canonical(path: &str) -> SceneResult<String> {
        let segments = segments(path)?;
        if segments.is_empty() {
            return Ok(ROOT_PATH.to_string());
        }
        Ok(format!("{}/{}", ROOT_PATH, segments.join("/")))
    }

    pub fn get(&self, path: &str) -> SceneResult<&SceneNode> {
        let mut node = &self.root;
        for segment in segments(path)? {
            node = node
                .child(segment)
                .ok_or_else(|| SceneError::NodeNotFound(path.to_string()))?;
        }
        Ok(node)
    }

    pub fn get_mut(&mut self, path: &str) -> SceneResult<&mut SceneNode> {
        let mut node = &mut self.root;
        for segment in segments(path)? {
            node = node
                .child_mut(segment)
                .ok_or_else(|| SceneError::NodeNotFound(path.to_string()))?;
        }
        Ok(node)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    pub fn node_count(&self) -> usize {
        self.root.count()
    }

    /// Add `node` under `parent`, at `index` or last; returns its path
    pub fn insert(
        &mut self,
        parent: &str,
        node: SceneNode,
        index: Option<usize>,
    ) -> SceneResult<String> {
        validate_name(&node.name)?;
        let parent_path = Self::canonical(parent)?;
        let path = format!("{}/{}", parent_path, node.name);

        let parent_node = self.get_mut(&parent_path)?;
        if parent_node.child(&node.name).is_some() {
            return Err(SceneError::NodeExists(path));
        }
        let at = index
            .unwrap_or(parent_node.children.len())
            .min(parent_node.children.len());
        parent_node.children.insert(at, node);
        Ok(path)
    }

    /// Detach a node; returns its parent path, former index and the subtree
    pub fn remove(&mut self, path: &str) -> SceneResult<(String, usize, SceneNode)> {
        let (parent_path, name) = split_parent(path, "deleted")?;
        let parent = self.get_mut(&parent_path)?;
        let index = parent
            .children
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| SceneError::NodeNotFound(path.to_string()))?;
        let node = parent.children.remove(index);
        Ok((parent_path, index, node))
    }

    /// Rename in place; returns the new path
    pub fn rename(&mut self, path: &str, new_name: &str) -> SceneResult<String> {
        validate_name(new_name)?;
        let (parent_path, name) = split_parent(path, "renamed")?;
        let new_path = format!("{}/{}", parent_path, new_name);

        let parent = self.get_mut(&parent_path)?;
        if name != new_name && parent.child(new_name).is_some() {
            return Err(SceneError::NodeExists(new_path));
        }
        let node = parent
            .child_mut(&name)
            .ok_or_else(|| SceneError::NodeNotFound(path.to_string()))?;
        node.name = new_name.to_string();
        Ok(new_path)
    }

    /// Move a node under another parent; returns the new path plus where it
    /// used to be
    pub fn reparent(
        &mut self,
        path: &str,
        new_parent: &str,
        index: Option<usize>,
    ) -> SceneResult<(String, String, usize)> {
        let path = Self::canonical(path)?;
        let new_parent = Self::canonical(new_parent)?;
        if new_parent == path || new_parent.starts_with(&format!("{}/", path)) {
            return Err(SceneError::Cycle(path));
        }

        let (old_parent, name) = split_parent(&path, "moved")?;
        self.get(&path)?;
        let target = self.get(&new_parent)?;
        if old_parent != new_parent && target.child(&name).is_some() {
            return Err(SceneError::NodeExists(format!("{}/{}", new_parent, name)));
        }

        let (old_parent, old_index, node) = self.remove(&path)?;
        let new_path = self.insert(&new_parent, node, index)?;
        Ok((new_path, old_parent, old_index))
    }

    /// Nested `{name, class, path, children}` description of the tree
    pub fn tree(&self) -> Value {
        self.root.tree_json(ROOT_PATH)
    }
}

fn segments(path: &str) -> SceneResult<Vec<&str>> {
    let trimmed = path.trim();
    let rest = if trimmed == ROOT_PATH {
        ""
    } else if let Some(rest) = trimmed.strip_prefix("/root/") {
        rest
    } else if trimmed.starts_with('/') || trimmed.is_empty() {
        return Err(SceneError::InvalidPath(path.to_string()));
    } else {
        trimmed
    };

    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(SceneError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

fn split_parent(path: &str, verb: &'static str) -> SceneResult<(String, String)> {
    let mut parts = segments(path)?;
    let Some(name) = parts.pop() else {
        return Err(SceneError::RootImmutable(verb));
    };
    let parent = if parts.is_empty() {
        ROOT_PATH.to_string()
    } else {
        format!("{}/{}", ROOT_PATH, parts.join("/"))
    };
    Ok((parent, name.to_string()))
}

fn validate_name(name: &str) -> SceneResult<()> {
    if name.trim().is_empty() || name.contains('/') {
        return Err(SceneError::InvalidName(name.to_string()));
    }
    Ok(())
}
