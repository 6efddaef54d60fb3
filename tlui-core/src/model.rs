use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DAYS_TYPE: &str = "days";
pub const TODO_BUCKET_TYPE: &str = "todo bucket";
pub const POOL_IDS_KEY: &str = "ids";

const INLINE_ROOT_ID: &str = "inline-root";
const INLINE_ROOT_TYPE: &str = "root";

/// One item of the tracked work tree as the backend serializes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(
        default,
        deserialize_with = "de_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<NodeOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildRef>,
    #[serde(
        default,
        deserialize_with = "de_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub active_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub started: Option<bool>,
    #[serde(
        default,
        deserialize_with = "de_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub finished: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_toplevel: bool,
    #[serde(
        default,
        deserialize_with = "de_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            node_type: node_type.into(),
            text: None,
            options: Vec::new(),
            children: Vec::new(),
            active_id: None,
            started: None,
            finished: None,
            is_toplevel: false,
            target: None,
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children
            .into_iter()
            .map(|child| ChildRef::Id(child.into()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_option(mut self, kind: impl Into<String>, text: Option<&str>) -> Self {
        self.options.push(NodeOption {
            kind: kind.into(),
            text: text.map(ToString::to_string),
        });
        self
    }

    #[must_use]
    pub fn with_active_id(mut self, active_id: impl Into<String>) -> Self {
        self.active_id = Some(active_id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// `type: text`, or just the type for text-less nodes.
    pub fn label(&self) -> String {
        match self.text.as_deref() {
            Some(text) => format!("{}: {text}", self.node_type),
            None => self.node_type.clone(),
        }
    }

    pub fn child_ids(&self) -> impl Iterator<Item = &str> {
        self.children.iter().filter_map(|child| match child {
            ChildRef::Id(id) => Some(id.as_str()),
            ChildRef::Inline(_) => None,
        })
    }

    /// Position of the last option of the given type.
    pub fn last_option(&self, kind: &str) -> Option<usize> {
        self.options.iter().rposition(|option| option.kind == kind)
    }
}

/// Timestamped annotation such as `started`, `finished`, `active` or `time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOption {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub text: Option<String>,
}

/// A child is either embedded (legacy `tree` message) or referenced by id
/// through the pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChildRef {
    Id(String),
    Inline(Box<Node>),
}

impl<'de> Deserialize<'de> for ChildRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Some(id) = id_from_value(&value) {
            return Ok(Self::Id(id));
        }
        Node::deserialize(value)
            .map(|node| Self::Inline(Box::new(node)))
            .map_err(de::Error::custom)
    }
}

/// The reserved `ids` entry of a pool message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolIds {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub root: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub days: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub active: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub active_ref: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub todo_bucket: Option<String>,
}

/// Flat id-indexed snapshot of the node graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pool {
    pub nodes: BTreeMap<String, Node>,
    pub ids: PoolIds,
    /// Built from a legacy inline `tree`; top-level nodes carry their own
    /// `is_toplevel` flag instead of being implied by the root.
    pub inline: bool,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut node: Node) -> Option<Node> {
        let id = node.id.get_or_insert_with(String::new).clone();
        self.nodes.insert(id, node)
    }

    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.insert(node);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Converts the inline-children `tree` form into a pool. Id-less nodes get
    /// synthetic ids, the forest hangs off a synthetic root, and the first
    /// node carrying an `active` option becomes the active id.
    pub fn from_forest(forest: Vec<Node>) -> Self {
        let mut builder = ForestFlattener::default();
        let mut top_level = Vec::with_capacity(forest.len());
        for node in forest {
            let id = builder.flatten(node);
            top_level.push(id);
        }

        let mut pool = Self {
            nodes: builder.nodes,
            ids: PoolIds::default(),
            inline: true,
        };

        for id in &top_level {
            let Some(node) = pool.nodes.get(id) else {
                continue;
            };
            if pool.ids.days.is_none() && node.node_type == DAYS_TYPE {
                pool.ids.days = Some(id.clone());
            }
            if pool.ids.todo_bucket.is_none() && node.node_type == TODO_BUCKET_TYPE {
                pool.ids.todo_bucket = Some(id.clone());
            }
        }
        pool.ids.active = builder.first_active;

        let root_id = unique_id(INLINE_ROOT_ID, &pool.nodes, &mut builder.next_synthetic);
        let mut root = Node::new(root_id.clone(), INLINE_ROOT_TYPE);
        root.children = top_level.into_iter().map(ChildRef::Id).collect();
        pool.nodes.insert(root_id.clone(), root);
        pool.ids.root = Some(root_id);

        pool
    }
}

#[derive(Default)]
struct ForestFlattener {
    nodes: BTreeMap<String, Node>,
    next_synthetic: usize,
    first_active: Option<String>,
}

impl ForestFlattener {
    fn flatten(&mut self, mut node: Node) -> String {
        let id = match node.id.clone() {
            Some(id) if !self.nodes.contains_key(&id) => id,
            _ => {
                let candidate = format!("inline-{}", self.next_synthetic);
                self.next_synthetic += 1;
                unique_id(&candidate, &self.nodes, &mut self.next_synthetic)
            }
        };
        node.id = Some(id.clone());
        // Reserve the id before descending so children cannot claim it.
        self.nodes.insert(id.clone(), Node::new(id.clone(), ""));

        if self.first_active.is_none() && node.last_option("active").is_some() {
            self.first_active = Some(id.clone());
        }

        let children = std::mem::take(&mut node.children);
        node.children = children
            .into_iter()
            .map(|child| match child {
                ChildRef::Id(child_id) => ChildRef::Id(child_id),
                ChildRef::Inline(child) => ChildRef::Id(self.flatten(*child)),
            })
            .collect();

        self.nodes.insert(id.clone(), node);
        id
    }
}

fn unique_id(base: &str, nodes: &BTreeMap<String, Node>, counter: &mut usize) -> String {
    let mut candidate = base.to_string();
    while nodes.contains_key(&candidate) {
        candidate = format!("inline-{counter}");
        *counter += 1;
    }
    candidate
}

impl Serialize for Pool {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.nodes.len() + 1))?;
        for (id, node) in &self.nodes {
            map.serialize_entry(id, node)?;
        }
        map.serialize_entry(POOL_IDS_KEY, &self.ids)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Pool {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut entries = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        let ids = match entries.remove(POOL_IDS_KEY) {
            Some(Value::Null) | None => PoolIds::default(),
            Some(value) => PoolIds::deserialize(value)
                .map_err(|err| de::Error::custom(format!("pool ids: {err}")))?,
        };

        let mut nodes = BTreeMap::new();
        for (key, value) in entries {
            let mut node = Node::deserialize(value)
                .map_err(|err| de::Error::custom(format!("pool entry {key}: {err}")))?;
            if node.id.is_none() {
                node.id = Some(key.clone());
            }
            nodes.insert(key, node);
        }

        Ok(Self {
            nodes,
            ids,
            inline: false,
        })
    }
}

/// Display flags computed for one projected node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub started: bool,
    pub finished: bool,
    pub active: bool,
    pub activeref: bool,
    pub activewithref: bool,
}

impl NodeStatus {
    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedNode<'a> {
    pub id: &'a str,
    pub node: &'a Node,
    pub depth: usize,
    pub parent: Option<&'a str>,
    /// Position among the parent's resolvable children.
    pub index: usize,
    pub is_last: bool,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Root,
    Child,
    Active,
    ActiveRef,
    ActiveId,
    Prompt,
    Cycle,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Child => write!(f, "child"),
            Self::Active => write!(f, "active"),
            Self::ActiveRef => write!(f, "active_ref"),
            Self::ActiveId => write!(f, "active_id"),
            Self::Prompt => write!(f, "prompt"),
            Self::Cycle => write!(f, "cycle"),
        }
    }
}

/// A reference whose target is absent from the pool (or, for `Cycle`, one
/// that loops back onto its own ancestor path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingRef {
    pub kind: RefKind,
    pub from: Option<String>,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Projection<'a> {
    pub entries: Vec<ProjectedNode<'a>>,
    pub dangling: Vec<DanglingRef>,
}

impl Projection<'_> {
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    pub fn find(&self, id: &str) -> Option<&ProjectedNode<'_>> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}

/// The backend emits ids as strings, but numeric ids show up in hand-written
/// fixtures and older snapshots.
pub(crate) fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        other => id_from_value(&other)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected an id, got {other}"))),
    }
}

pub(crate) fn de_id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    values
        .iter()
        .map(|value| {
            id_from_value(value)
                .ok_or_else(|| de::Error::custom(format!("expected an id, got {value}")))
        })
        .collect()
}

fn de_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

// Task nodes send booleans; older snapshots carried the timestamp itself.
fn de_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::Bool(flag) => Some(flag),
        Value::String(text) => Some(!text.is_empty()),
        _ => Some(true),
    })
}
