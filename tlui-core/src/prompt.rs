use crate::model::{DanglingRef, Pool, RefKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub lines: Vec<String>,
    pub dangling: Vec<DanglingRef>,
}

/// Resolves the backend's display chain (outermost first) into prompt lines.
pub fn build_prompt<S: AsRef<str>>(pool: &Pool, ids: &[S]) -> Prompt {
    let mut prompt = Prompt::default();
    for id in ids {
        let id = id.as_ref();
        match pool.get(id) {
            Some(node) => prompt.lines.push(node.label()),
            None => prompt.dangling.push(DanglingRef {
                kind: RefKind::Prompt,
                from: None,
                target: id.to_string(),
            }),
        }
    }
    prompt
}
