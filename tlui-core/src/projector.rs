use std::collections::BTreeSet;

use tracing::debug;

use crate::model::{
    DAYS_TYPE, DanglingRef, Node, NodeStatus, Pool, ProjectedNode, Projection, RefKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectOptions {
    /// Only top-level nodes of this type take part in a snapshot pass.
    /// `None` keeps every top-level node.
    pub toplevel_type: Option<String>,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        Self {
            toplevel_type: Some(DAYS_TYPE.to_string()),
        }
    }
}

impl ProjectOptions {
    pub fn unfiltered() -> Self {
        Self {
            toplevel_type: None,
        }
    }
}

/// The pool's active pointers after dropping the ones that do not resolve.
struct ActiveContext<'a> {
    active: Option<&'a str>,
    active_ref: Option<&'a str>,
}

impl<'a> ActiveContext<'a> {
    fn resolve(pool: &'a Pool, dangling: &mut Vec<DanglingRef>) -> Self {
        let active = resolve_pointer(pool, pool.ids.active.as_deref(), RefKind::Active, dangling);
        let active_ref = resolve_pointer(
            pool,
            pool.ids.active_ref.as_deref(),
            RefKind::ActiveRef,
            dangling,
        );
        Self { active, active_ref }
    }

    fn status(
        &self,
        pool: &Pool,
        id: &str,
        node: &Node,
        dangling: &mut Vec<DanglingRef>,
    ) -> NodeStatus {
        let (started, finished) = progress_flags(node);

        let effective = self.active_ref.or(self.active);
        let active = effective == Some(id);
        let activeref = self.active_ref == Some(id);

        let mut activewithref = false;
        if let Some(active_id) = node.active_id.as_deref()
            && active_id != id
        {
            if pool.contains(active_id) {
                activewithref = self.active == Some(active_id);
            } else {
                record(dangling, DanglingRef {
                    kind: RefKind::ActiveId,
                    from: Some(id.to_string()),
                    target: active_id.to_string(),
                });
            }
        }
        if let Some(active_ref) = self.active_ref
            && self.active == Some(id)
            && active_ref != id
        {
            activewithref = true;
        }

        NodeStatus {
            started,
            finished,
            active,
            activeref,
            activewithref,
        }
    }
}

fn resolve_pointer<'a>(
    pool: &'a Pool,
    pointer: Option<&str>,
    kind: RefKind,
    dangling: &mut Vec<DanglingRef>,
) -> Option<&'a str> {
    let target = pointer?;
    match pool.nodes.get_key_value(target) {
        Some((key, _)) => Some(key.as_str()),
        None => {
            debug!(event = "dangling_reference", kind = %kind, target);
            dangling.push(DanglingRef {
                kind,
                from: None,
                target: target.to_string(),
            });
            None
        }
    }
}

/// `finished` once any finished option is present; `started` only while no
/// finished option follows the last started one. Nodes without such options
/// fall back to their boolean fields.
fn progress_flags(node: &Node) -> (bool, bool) {
    let started_at = node.last_option("started");
    let finished_at = node.last_option("finished");

    if started_at.is_none() && finished_at.is_none() {
        let finished = node.finished.unwrap_or(false);
        let started = node.started.unwrap_or(false) && !finished;
        return (started, finished);
    }

    let finished = finished_at.is_some();
    let started = match (started_at, finished_at) {
        (Some(started), Some(finished)) => started > finished,
        (Some(_), None) => true,
        (None, _) => false,
    };
    (started, finished)
}

struct Frame<'a> {
    id: &'a str,
    depth: usize,
    parent: Option<&'a str>,
    index: usize,
    is_last: bool,
}

/// Depth-first pre-order traversal of the subtrees under `roots`.
///
/// Missing ids (roots or children) are skipped and recorded as dangling
/// references; a child that is already on its own ancestor path is recorded
/// as a cycle and not followed.
pub fn project<'a, S: AsRef<str>>(pool: &'a Pool, roots: &[S]) -> Projection<'a> {
    let mut dangling = Vec::new();
    let context = ActiveContext::resolve(pool, &mut dangling);

    let root_ids = resolve_children(pool, None, roots.iter().map(AsRef::as_ref), &mut dangling);
    let mut entries = Vec::new();
    let mut stack: Vec<Frame<'a>> = frames(&root_ids, 0, None);
    let mut path: Vec<&'a str> = Vec::new();

    while let Some(frame) = stack.pop() {
        path.truncate(frame.depth);
        let Some(node) = pool.get(frame.id) else {
            continue;
        };

        let status = context.status(pool, frame.id, node, &mut dangling);
        entries.push(ProjectedNode {
            id: frame.id,
            node,
            depth: frame.depth,
            parent: frame.parent,
            index: frame.index,
            is_last: frame.is_last,
            status,
        });
        path.push(frame.id);

        let mut children = resolve_children(pool, Some(frame.id), node.child_ids(), &mut dangling);
        children.retain(|child| {
            if path.contains(child) {
                record(&mut dangling, DanglingRef {
                    kind: RefKind::Cycle,
                    from: Some(frame.id.to_string()),
                    target: (*child).to_string(),
                });
                false
            } else {
                true
            }
        });
        stack.extend(frames(&children, frame.depth + 1, Some(frame.id)));
    }

    Projection { entries, dangling }
}

/// Projects the whole snapshot: the root node's children, filtered to the
/// configured top-level type (for inline trees, only nodes flagged
/// `is_toplevel` are filtered). Without a resolvable root, every node that is
/// nobody's child counts as top-level.
pub fn project_snapshot<'a>(pool: &'a Pool, options: &ProjectOptions) -> Projection<'a> {
    let mut missing_root = None;
    let top_level: Vec<&str> = match pool.ids.root.as_deref() {
        Some(root_id) => match pool.get(root_id) {
            Some(root) => root.child_ids().collect(),
            None => {
                missing_root = Some(root_id.to_string());
                orphan_ids(pool)
            }
        },
        None => orphan_ids(pool),
    };

    let roots: Vec<&str> = top_level
        .into_iter()
        .filter(|id| {
            let Some(node) = pool.get(id) else {
                // Left in so `project` records it.
                return true;
            };
            match options.toplevel_type.as_deref() {
                Some(wanted) if !pool.inline || node.is_toplevel => node.node_type == wanted,
                _ => true,
            }
        })
        .collect();

    let mut projection = project(pool, roots.as_slice());
    if let Some(target) = missing_root {
        projection.dangling.insert(
            0,
            DanglingRef {
                kind: RefKind::Root,
                from: None,
                target,
            },
        );
    }
    projection
}

fn orphan_ids(pool: &Pool) -> Vec<&str> {
    let referenced: BTreeSet<&str> = pool.nodes.values().flat_map(Node::child_ids).collect();
    pool.nodes
        .keys()
        .map(String::as_str)
        .filter(|id| !referenced.contains(id))
        .collect()
}

fn resolve_children<'a, 'i>(
    pool: &'a Pool,
    from: Option<&str>,
    ids: impl Iterator<Item = &'i str>,
    dangling: &mut Vec<DanglingRef>,
) -> Vec<&'a str> {
    let mut resolved = Vec::new();
    for id in ids {
        match pool.nodes.get_key_value(id) {
            Some((key, _)) => resolved.push(key.as_str()),
            None => record(dangling, DanglingRef {
                kind: RefKind::Child,
                from: from.map(ToString::to_string),
                target: id.to_string(),
            }),
        }
    }
    resolved
}

// Shared subtrees are walked once per parent; report each reference once.
fn record(dangling: &mut Vec<DanglingRef>, entry: DanglingRef) {
    if !dangling.contains(&entry) {
        dangling.push(entry);
    }
}

// Reversed so the first child is popped first.
fn frames<'a>(ids: &[&'a str], depth: usize, parent: Option<&'a str>) -> Vec<Frame<'a>> {
    let count = ids.len();
    ids.iter()
        .enumerate()
        .rev()
        .map(|(index, id)| Frame {
            id: *id,
            depth,
            parent,
            index,
            is_last: index + 1 == count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::model::{Node, Pool, PoolIds, RefKind};
    use crate::projector::{ProjectOptions, project, project_snapshot};

    fn pool_with_ids(nodes: Vec<Node>, ids: PoolIds) -> Pool {
        let mut pool = Pool::new();
        for node in nodes {
            pool.insert(node);
        }
        pool.ids = ids;
        pool
    }

    #[test]
    fn active_id_pointing_at_active_node_marks_activewithref() {
        let pool = pool_with_ids(
            vec![
                Node::new("1", "day").with_active_id("2"),
                Node::new("2", "task"),
            ],
            PoolIds {
                active: Some("2".to_string()),
                ..PoolIds::default()
            },
        );

        let day = project(&pool, &["1"]);
        let status = day.find("1").expect("day projected").status;
        assert!(status.activewithref);
        assert!(!status.active);

        let task = project(&pool, &["2"]);
        let status = task.find("2").expect("task projected").status;
        assert!(status.active);
        assert!(!status.activewithref);
    }

    #[test]
    fn dangling_active_id_degrades_to_plain_status() {
        let pool = pool_with_ids(
            vec![Node::new("1", "task").with_active_id("5")],
            PoolIds {
                active: Some("5".to_string()),
                ..PoolIds::default()
            },
        );

        let projection = project(&pool, &["1"]);
        let entry = projection.find("1").expect("node projected");
        assert!(entry.status.is_plain());

        let kinds: Vec<RefKind> = projection.dangling.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![RefKind::Active, RefKind::ActiveId]);
    }

    #[test]
    fn redirect_marks_reference_active_and_target_activewithref() {
        let pool = pool_with_ids(
            vec![
                Node::new("targt", "task").with_text("target"),
                Node::new("rfrnc", "reference")
                    .with_text("#targt")
                    .with_active_id("targt"),
                Node::new("other", "task"),
            ],
            PoolIds {
                active: Some("targt".to_string()),
                active_ref: Some("rfrnc".to_string()),
                ..PoolIds::default()
            },
        );

        let projection = project(&pool, &["targt", "rfrnc", "other"]);

        let target = projection.find("targt").expect("target").status;
        assert!(!target.active);
        assert!(target.activewithref);
        assert!(!target.activeref);

        let reference = projection.find("rfrnc").expect("reference").status;
        assert!(reference.active);
        assert!(reference.activeref);
        assert!(reference.activewithref);

        assert!(projection.find("other").expect("other").status.is_plain());
    }

    #[test]
    fn dangling_active_ref_falls_back_to_active() {
        let pool = pool_with_ids(
            vec![Node::new("a", "task")],
            PoolIds {
                active: Some("a".to_string()),
                active_ref: Some("gone".to_string()),
                ..PoolIds::default()
            },
        );

        let projection = project(&pool, &["a"]);
        let status = projection.find("a").expect("node").status;
        assert!(status.active);
        assert!(!status.activewithref);
        assert_eq!(projection.dangling[0].kind, RefKind::ActiveRef);
    }

    #[test]
    fn started_and_finished_follow_option_order() {
        let pool = Pool::new()
            .with_node(Node::new("running", "task").with_option("started", Some("10:00")))
            .with_node(
                Node::new("done", "task")
                    .with_option("started", Some("10:00"))
                    .with_option("finished", Some("11:00")),
            )
            .with_node(
                Node::new("restarted", "task")
                    .with_option("finished", Some("11:00"))
                    .with_option("started", Some("12:00")),
            );
        let mut legacy = Node::new("legacy", "task");
        legacy.started = Some(true);
        legacy.finished = Some(true);
        let pool = pool.with_node(legacy);

        let projection = project(&pool, &["running", "done", "restarted", "legacy"]);
        let flags = |id: &str| {
            let status = projection.find(id).expect("projected").status;
            (status.started, status.finished)
        };

        assert_eq!(flags("running"), (true, false));
        assert_eq!(flags("done"), (false, true));
        assert_eq!(flags("restarted"), (true, true));
        assert_eq!(flags("legacy"), (false, true));
    }

    fn build_full_tree(pool: &mut Pool, id: String, depth: usize, branching: usize) {
        let children: Vec<String> = if depth == 0 {
            Vec::new()
        } else {
            (0..branching).map(|idx| format!("{id}.{idx}")).collect()
        };
        pool.insert(Node::new(id, "task").with_children(children.clone()));
        for child in children {
            build_full_tree(pool, child, depth - 1, branching);
        }
    }

    fn manual_preorder(id: &str, depth: usize, branching: usize, out: &mut Vec<String>) {
        out.push(id.to_string());
        if depth == 0 {
            return;
        }
        for idx in 0..branching {
            manual_preorder(&format!("{id}.{idx}"), depth - 1, branching, out);
        }
    }

    #[test]
    fn full_tree_visits_every_node_in_preorder() {
        let (depth, branching) = (3, 3);
        let mut pool = Pool::new();
        build_full_tree(&mut pool, "r".to_string(), depth, branching);

        let projection = project(&pool, &["r"]);

        let mut expected = Vec::new();
        manual_preorder("r", depth, branching, &mut expected);
        assert_eq!(expected.len(), 1 + 3 + 9 + 27);
        assert_eq!(projection.ids(), expected);
        assert!(projection.dangling.is_empty());

        let leaf = projection.find("r.2.2.2").expect("leaf");
        assert_eq!(leaf.depth, 3);
        assert_eq!(leaf.parent, Some("r.2.2"));
        assert_eq!(leaf.index, 2);
        assert!(leaf.is_last);
    }

    #[test]
    fn shared_subtrees_are_visited_under_every_parent() {
        let pool = Pool::new()
            .with_node(Node::new("a", "task").with_children(["shared"]))
            .with_node(Node::new("b", "reference").with_children(["shared"]))
            .with_node(Node::new("shared", "task"));

        let projection = project(&pool, &["a", "b"]);
        assert_eq!(projection.ids(), vec!["a", "shared", "b", "shared"]);
    }

    #[test]
    fn shared_node_reports_its_dangling_refs_once() {
        let pool = Pool::new()
            .with_node(Node::new("a", "task").with_children(["shared"]))
            .with_node(Node::new("b", "reference").with_children(["shared"]))
            .with_node(
                Node::new("shared", "day")
                    .with_active_id("gone")
                    .with_children(["ghost"]),
            );

        let projection = project(&pool, &["a", "b"]);
        assert_eq!(projection.ids(), vec!["a", "shared", "b", "shared"]);

        let kinds: Vec<RefKind> = projection.dangling.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![RefKind::ActiveId, RefKind::Child]);
        assert_eq!(projection.dangling[0].from.as_deref(), Some("shared"));
        assert_eq!(projection.dangling[0].target, "gone");
    }

    #[test]
    fn missing_children_and_cycles_are_recorded_not_followed() {
        let pool = Pool::new()
            .with_node(Node::new("a", "task").with_children(["b", "ghost"]))
            .with_node(Node::new("b", "task").with_children(["a"]));

        let projection = project(&pool, &["a"]);
        assert_eq!(projection.ids(), vec!["a", "b"]);

        let kinds: Vec<RefKind> = projection.dangling.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![RefKind::Child, RefKind::Cycle]);
        assert_eq!(projection.dangling[0].target, "ghost");
        assert_eq!(projection.dangling[1].from.as_deref(), Some("b"));
    }

    #[test]
    fn snapshot_keeps_only_days_at_top_level() {
        let mut pool = Pool::new()
            .with_node(Node::new("00000", "life").with_children(["00001", "todo"]))
            .with_node(Node::new("00001", "days").with_children(["d1"]))
            .with_node(
                Node::new("d1", "day")
                    .with_text("March 1, 2014")
                    .with_children(["todo"]),
            )
            .with_node(Node::new("todo", "todo bucket"));
        pool.ids.root = Some("00000".to_string());

        let projection = project_snapshot(&pool, &ProjectOptions::default());
        assert_eq!(projection.ids(), vec!["00001", "d1", "todo"]);
        assert_eq!(projection.find("todo").expect("nested todo").depth, 2);

        let unfiltered = project_snapshot(&pool, &ProjectOptions::unfiltered());
        assert_eq!(unfiltered.ids(), vec!["00001", "d1", "todo", "todo"]);
    }

    #[test]
    fn snapshot_without_root_uses_orphans_and_flags_missing_root() {
        let mut pool = Pool::new()
            .with_node(Node::new("days", "days").with_children(["d"]))
            .with_node(Node::new("d", "day"));
        pool.ids.root = Some("00000".to_string());

        let projection = project_snapshot(&pool, &ProjectOptions::default());
        assert_eq!(projection.ids(), vec!["days", "d"]);
        assert_eq!(projection.dangling[0].kind, RefKind::Root);
    }

    #[test]
    fn inline_tree_projects_through_the_same_path() {
        let forest: Vec<Node> = serde_json::from_str(
            r#"[{"type":"days","text":null,"is_toplevel":true,"children":[
                    {"type":"day","text":"today","children":[
                        {"type":"task","text":"herp","options":[{"type":"active","text":null}]},
                        {"type":"task","text":"derp"}]}]},
                {"type":"category","text":"misc","is_toplevel":true}]"#,
        )
        .expect("parse forest");
        let pool = Pool::from_forest(forest);

        let projection = project_snapshot(&pool, &ProjectOptions::default());
        let labels: Vec<String> = projection
            .entries
            .iter()
            .map(|entry| entry.node.label())
            .collect();
        assert_eq!(labels, vec!["days", "day: today", "task: herp", "task: derp"]);

        let herp = &projection.entries[2];
        assert!(herp.status.active);
        assert_eq!(herp.depth, 2);
        assert!(!herp.is_last);
        assert!(projection.entries[3].is_last);
    }

    #[test]
    fn inline_tree_filters_only_flagged_top_level_nodes() {
        let forest: Vec<Node> = serde_json::from_str(
            r#"[{"type":"days","text":null,"is_toplevel":true},
                {"type":"todo bucket","text":null,"is_toplevel":true},
                {"type":"category","text":"loose"}]"#,
        )
        .expect("parse forest");
        let pool = Pool::from_forest(forest);

        let projection = project_snapshot(&pool, &ProjectOptions::default());
        let labels: Vec<String> = projection
            .entries
            .iter()
            .map(|entry| entry.node.label())
            .collect();
        assert_eq!(labels, vec!["days", "category: loose"]);
    }
}
