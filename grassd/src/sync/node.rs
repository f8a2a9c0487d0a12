use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

/// A node of a user's remote file tree, keyed by encoded segment.
///
/// On the wire a file is `{"type": "file", "modified": ...}`; a folder is
/// either a bare object of children or `{"type": "folder", "children": {..}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteNode {
    Folder(BTreeMap<String, RemoteNode>),
    File { modified: Option<String> },
}

impl RemoteNode {
    pub fn file(modified: impl Into<String>) -> Self {
        RemoteNode::File {
            modified: Some(modified.into()),
        }
    }

    pub fn empty_folder() -> Self {
        RemoteNode::Folder(BTreeMap::new())
    }

    /// Parses a stored value. Anything that is not an object has no place in
    /// the tree and yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        match object.get("type").and_then(Value::as_str) {
            Some("file") => Some(RemoteNode::File {
                modified: object
                    .get("modified")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            Some("folder") => Some(RemoteNode::Folder(
                object
                    .get("children")
                    .and_then(Value::as_object)
                    .map(parse_children)
                    .unwrap_or_default(),
            )),
            _ => Some(RemoteNode::Folder(parse_children(object))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RemoteNode::File { modified } => match modified {
                Some(modified) => json!({ "type": "file", "modified": modified }),
                None => json!({ "type": "file" }),
            },
            RemoteNode::Folder(children) => Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.to_value()))
                    .collect(),
            ),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, RemoteNode::File { .. })
    }

    pub fn modified(&self) -> Option<&str> {
        match self {
            RemoteNode::File { modified } => modified.as_deref(),
            RemoteNode::Folder(_) => None,
        }
    }

    /// Depth-first search for a file at the encoded `segments` below this
    /// node.
    pub fn contains_file(&self, segments: &[String]) -> bool {
        match (self, segments) {
            (RemoteNode::File { .. }, []) => true,
            (RemoteNode::Folder(children), [head, rest @ ..]) => children
                .get(head)
                .is_some_and(|child| child.contains_file(rest)),
            _ => false,
        }
    }

    pub fn find(&self, segments: &[String]) -> Option<&RemoteNode> {
        match segments {
            [] => Some(self),
            [head, rest @ ..] => match self {
                RemoteNode::Folder(children) => children.get(head)?.find(rest),
                RemoteNode::File { .. } => None,
            },
        }
    }
}

fn parse_children(object: &Map<String, Value>) -> BTreeMap<String, RemoteNode> {
    object
        .iter()
        .filter_map(|(key, value)| RemoteNode::from_value(value).map(|node| (key.clone(), node)))
        .collect()
}
