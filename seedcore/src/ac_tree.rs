//! AC Tree & Scheduler (C11).
//!
//! Owns the hierarchical acceptance-criteria tree and drives it to
//! completion: atomic leaves execute, non-atomic leaves decompose and graft
//! in children, and sibling `depends_on` edges are honored as dependency
//! batches so independent children run concurrently.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};

/// Lifecycle state of a single node in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcStatus {
    Pending,
    Atomic,
    Decomposed,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct AcNode {
    pub id: String,
    pub content: String,
    pub depth: u32,
    pub parent_id: Option<String>,
    pub status: AcStatus,
    pub is_atomic: bool,
    pub children_ids: Vec<String>,
    /// Sibling ids this node must wait on before it can execute. Resolved
    /// from the zero-based indices a decomposition returns.
    pub depends_on: Vec<String>,
    pub execution_id: Option<String>,
    pub metadata: Value,
}

impl AcNode {
    fn new(id: String, content: String, depth: u32, parent_id: Option<String>) -> Self {
        Self {
            id,
            content,
            depth,
            parent_id,
            status: AcStatus::Pending,
            is_atomic: false,
            children_ids: Vec::new(),
            depends_on: Vec::new(),
            execution_id: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children_ids.is_empty()
    }
}

/// A child to graft in, as produced by `decomposition::decompose` but
/// expressed by sibling index rather than a pre-resolved id.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub id: String,
    pub content: String,
    pub depends_on_indices: Vec<usize>,
}

/// Owns every AC node exclusively. Enforces depth and parent-resolution
/// invariants on every insertion.
pub struct AcTree {
    nodes: HashMap<String, AcNode>,
    root_ids: Vec<String>,
    max_depth: u32,
}

impl AcTree {
    pub fn new(max_depth: u32) -> Self {
        Self {
            nodes: HashMap::new(),
            root_ids: Vec::new(),
            max_depth,
        }
    }

    pub fn insert_root(&mut self, id: impl Into<String>, content: impl Into<String>) -> Result<String> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(Error::validation(format!("AC node '{id}' already exists")));
        }
        let node = AcNode::new(id.clone(), content.into(), 0, None);
        self.nodes.insert(id.clone(), node);
        self.root_ids.push(id.clone());
        Ok(id)
    }

    pub fn node(&self, id: &str) -> Option<&AcNode> {
        self.nodes.get(id)
    }

    pub fn root_ids(&self) -> &[String] {
        &self.root_ids
    }

    pub fn set_atomic(&mut self, id: &str) -> Result<()> {
        let node = self.get_mut(id)?;
        if !node.children_ids.is_empty() {
            return Err(Error::validation(format!(
                "cannot mark '{id}' atomic: it already has children"
            )));
        }
        node.is_atomic = true;
        node.status = AcStatus::Atomic;
        Ok(())
    }

    /// Graft decomposition children onto `parent_id`, validating depth and
    /// cyclic content before mutating the tree. Resolves each child's
    /// `depends_on_indices` into sibling node ids.
    pub fn attach_children(&mut self, parent_id: &str, children: Vec<ChildSpec>) -> Result<Vec<String>> {
        let (parent_depth, parent_content) = {
            let parent = self.get(parent_id)?;
            (parent.depth, parent.content.clone())
        };
        let child_depth = parent_depth + 1;
        if child_depth > self.max_depth {
            return Err(Error::decomposition(crate::error::DecompositionErrorKind::MaxDepth));
        }

        let parent_normalized = parent_content.trim().to_lowercase();
        for child in &children {
            if self.nodes.contains_key(&child.id) {
                return Err(Error::validation(format!("AC node '{}' already exists", child.id)));
            }
            if child.content.trim().to_lowercase() == parent_normalized {
                return Err(Error::decomposition(crate::error::DecompositionErrorKind::Cyclic));
            }
        }

        let mut new_ids = Vec::with_capacity(children.len());
        for child in &children {
            let node = AcNode::new(child.id.clone(), child.content.clone(), child_depth, Some(parent_id.to_string()));
            self.nodes.insert(child.id.clone(), node);
            new_ids.push(child.id.clone());
        }
        for (i, child) in children.iter().enumerate() {
            let resolved: Vec<String> = child
                .depends_on_indices
                .iter()
                .filter(|&&idx| idx < i)
                .map(|&idx| new_ids[idx].clone())
                .collect();
            self.nodes.get_mut(&child.id).expect("just inserted").depends_on = resolved;
        }

        let parent = self.get_mut(parent_id)?;
        parent.children_ids = new_ids.clone();
        parent.status = AcStatus::Decomposed;
        Ok(new_ids)
    }

    fn get(&self, id: &str) -> Result<&AcNode> {
        self.nodes.get(id).ok_or_else(|| Error::validation(format!("unknown AC node '{id}'")))
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut AcNode> {
        self.nodes.get_mut(id).ok_or_else(|| Error::validation(format!("unknown AC node '{id}'")))
    }

    /// Nodes still pending with no children — candidates for an atomicity
    /// check or decomposition.
    pub fn pending_leaves(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| matches!(n.status, AcStatus::Pending) && n.is_leaf())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Atomic leaves not yet executing or terminal.
    pub fn runnable_atomic_leaves(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| matches!(n.status, AcStatus::Atomic))
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn mark_executing(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.status = AcStatus::Executing;
        Ok(())
    }

    /// Mark a node completed and propagate: a parent becomes `completed`
    /// only once every child is `completed`.
    pub fn mark_completed(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.status = AcStatus::Completed;
        self.propagate_from(id);
        Ok(())
    }

    /// Mark a node failed and propagate failure upward unconditionally —
    /// the core defines no fallback strategy.
    pub fn mark_failed(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.status = AcStatus::Failed;
        self.propagate_from(id);
        Ok(())
    }

    fn propagate_from(&mut self, id: &str) {
        let mut current = self.nodes.get(id).and_then(|n| n.parent_id.clone());
        while let Some(parent_id) = current {
            let Some(parent) = self.nodes.get(&parent_id) else { break };
            if parent.children_ids.is_empty() {
                break;
            }
            let mut any_failed = false;
            let mut all_completed = true;
            for child_id in &parent.children_ids {
                match self.nodes.get(child_id).map(|c| c.status) {
                    Some(AcStatus::Failed) => any_failed = true,
                    Some(AcStatus::Completed) => {}
                    _ => all_completed = false,
                }
            }
            let next_status = if any_failed {
                Some(AcStatus::Failed)
            } else if all_completed {
                Some(AcStatus::Completed)
            } else {
                None
            };
            let Some(next_status) = next_status else { break };
            let parent_mut = self.nodes.get_mut(&parent_id).expect("looked up above");
            parent_mut.status = next_status;
            current = parent_mut.parent_id.clone();
        }
    }

    /// Group a set of sibling leaf ids into dependency-respecting waves:
    /// wave 0 has no unresolved dependencies among the set, wave k depends
    /// only on ids in earlier waves. Ids whose dependency lies outside the
    /// given set are treated as already satisfied.
    pub fn dependency_batches(&self, ids: &[String]) -> Vec<Vec<String>> {
        let id_set: HashSet<&String> = ids.iter().collect();
        let mut remaining: VecDeque<String> = ids.iter().cloned().collect();
        let mut satisfied: HashSet<String> = HashSet::new();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let mut wave = Vec::new();
            let mut still_waiting = VecDeque::new();
            for id in remaining.drain(..) {
                let ready = self
                    .nodes
                    .get(&id)
                    .map(|n| {
                        n.depends_on
                            .iter()
                            .all(|dep| !id_set.contains(dep) || satisfied.contains(dep))
                    })
                    .unwrap_or(true);
                if ready {
                    wave.push(id);
                } else {
                    still_waiting.push_back(id);
                }
            }
            if wave.is_empty() {
                // Cyclic or unsatisfiable dependency graph; run whatever is
                // left as one final wave rather than spinning forever.
                batches.push(still_waiting.into_iter().collect());
                break;
            }
            for id in &wave {
                satisfied.insert(id.clone());
            }
            batches.push(wave);
            remaining = still_waiting;
        }
        batches
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True once every node in the tree is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.nodes
            .values()
            .all(|n| matches!(n.status, AcStatus::Completed | AcStatus::Failed))
    }
}

/// Decides whether a leaf should execute directly or be decomposed.
#[async_trait]
pub trait AtomicityChecker: Send + Sync {
    async fn is_atomic(&self, node: &AcNode) -> bool;
}

/// Breaks a non-atomic leaf into children.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, node: &AcNode) -> Result<Vec<ChildSpec>>;
}

/// Executes a single atomic leaf to completion.
#[async_trait]
pub trait LeafExecutor: Send + Sync {
    async fn execute(&self, node: &AcNode) -> Result<()>;
}

/// Drives an `AcTree` to completion using injected atomicity/decomposition/
/// execution collaborators, so the scheduling loop stays decoupled from any
/// concrete LLM client or agent pool implementation.
pub struct Scheduler<'a> {
    checker: &'a dyn AtomicityChecker,
    decomposer: &'a dyn Decomposer,
    executor: &'a dyn LeafExecutor,
}

impl<'a> Scheduler<'a> {
    pub fn new(checker: &'a dyn AtomicityChecker, decomposer: &'a dyn Decomposer, executor: &'a dyn LeafExecutor) -> Self {
        Self { checker, decomposer, executor }
    }

    /// Runs the scheduling loop to completion: decompose until every
    /// remaining leaf is atomic, then execute atomic leaves in
    /// dependency-respecting batches, one batch at a time, each batch
    /// dispatched concurrently.
    pub async fn run(&self, tree: &mut AcTree) -> Result<()> {
        loop {
            let leaves = tree.pending_leaves();
            if leaves.is_empty() {
                break;
            }
            for id in leaves {
                let node = tree.node(&id).expect("came from pending_leaves").clone();
                if self.checker.is_atomic(&node).await {
                    tree.set_atomic(&id)?;
                } else {
                    let children = self.decomposer.decompose(&node).await?;
                    tree.attach_children(&id, children)?;
                }
            }
        }

        let runnable = tree.runnable_atomic_leaves();
        for batch in tree.dependency_batches(&runnable) {
            let mut batch_nodes = Vec::with_capacity(batch.len());
            for id in &batch {
                tree.mark_executing(id)?;
                batch_nodes.push(tree.node(id).expect("in batch").clone());
            }

            let futures = batch_nodes.iter().map(|node| async move {
                (node.id.clone(), self.executor.execute(node).await)
            });
            let results = futures::future::join_all(futures).await;
            for (id, result) in results {
                match result {
                    Ok(()) => tree.mark_completed(&id)?,
                    Err(_) => tree.mark_failed(&id)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn spec(id: &str, content: &str, deps: Vec<usize>) -> ChildSpec {
        ChildSpec { id: id.to_string(), content: content.to_string(), depends_on_indices: deps }
    }

    #[test]
    fn insert_root_then_attach_children_sets_depth_and_status() {
        let mut tree = AcTree::new(5);
        tree.insert_root("root", "do the thing").unwrap();
        tree.attach_children(
            "root",
            vec![spec("c0", "part 1", vec![]), spec("c1", "part 2", vec![0])],
        )
        .unwrap();

        assert_eq!(tree.node("root").unwrap().status, AcStatus::Decomposed);
        assert_eq!(tree.node("c0").unwrap().depth, 1);
        assert_eq!(tree.node("c1").unwrap().depends_on, vec!["c0".to_string()]);
    }

    #[test]
    fn attach_children_rejects_depth_beyond_max() {
        let mut tree = AcTree::new(0);
        tree.insert_root("root", "do the thing").unwrap();
        let err = tree.attach_children("root", vec![spec("c0", "a", vec![]), spec("c1", "b", vec![])]).unwrap_err();
        assert!(matches!(err, Error::Decomposition { kind: crate::error::DecompositionErrorKind::MaxDepth }));
    }

    #[test]
    fn attach_children_rejects_cyclic_content() {
        let mut tree = AcTree::new(5);
        tree.insert_root("root", "  Do The Thing  ").unwrap();
        let err = tree
            .attach_children("root", vec![spec("c0", "do the thing", vec![]), spec("c1", "other", vec![])])
            .unwrap_err();
        assert!(matches!(err, Error::Decomposition { kind: crate::error::DecompositionErrorKind::Cyclic }));
    }

    #[test]
    fn set_atomic_rejects_node_with_children() {
        let mut tree = AcTree::new(5);
        tree.insert_root("root", "do the thing").unwrap();
        tree.attach_children("root", vec![spec("c0", "a", vec![]), spec("c1", "b", vec![])]).unwrap();
        assert!(tree.set_atomic("root").is_err());
    }

    #[test]
    fn completion_propagates_to_parent_only_when_all_children_done() {
        let mut tree = AcTree::new(5);
        tree.insert_root("root", "parent").unwrap();
        tree.attach_children("root", vec![spec("c0", "a", vec![]), spec("c1", "b", vec![])]).unwrap();
        tree.set_atomic("c0").unwrap();
        tree.set_atomic("c1").unwrap();

        tree.mark_completed("c0").unwrap();
        assert_eq!(tree.node("root").unwrap().status, AcStatus::Decomposed);

        tree.mark_completed("c1").unwrap();
        assert_eq!(tree.node("root").unwrap().status, AcStatus::Completed);
        assert!(tree.is_finished());
    }

    #[test]
    fn failure_propagates_to_parent_even_if_siblings_succeed() {
        let mut tree = AcTree::new(5);
        tree.insert_root("root", "parent").unwrap();
        tree.attach_children("root", vec![spec("c0", "a", vec![]), spec("c1", "b", vec![])]).unwrap();
        tree.set_atomic("c0").unwrap();
        tree.set_atomic("c1").unwrap();

        tree.mark_completed("c0").unwrap();
        tree.mark_failed("c1").unwrap();
        assert_eq!(tree.node("root").unwrap().status, AcStatus::Failed);
    }

    #[test]
    fn dependency_batches_orders_by_sibling_dependency() {
        let mut tree = AcTree::new(5);
        tree.insert_root("root", "parent").unwrap();
        tree.attach_children(
            "root",
            vec![spec("c0", "a", vec![]), spec("c1", "b", vec![0]), spec("c2", "c", vec![])],
        )
        .unwrap();

        let batches = tree.dependency_batches(&["c0".into(), "c1".into(), "c2".into()]);
        assert_eq!(batches.len(), 2);
        let mut wave0 = batches[0].clone();
        wave0.sort();
        assert_eq!(wave0, vec!["c0".to_string(), "c2".to_string()]);
        assert_eq!(batches[1], vec!["c1".to_string()]);
    }

    struct AlwaysAtomic;
    #[async_trait]
    impl AtomicityChecker for AlwaysAtomic {
        async fn is_atomic(&self, _node: &AcNode) -> bool {
            true
        }
    }

    struct NeverDecomposes;
    #[async_trait]
    impl Decomposer for NeverDecomposes {
        async fn decompose(&self, _node: &AcNode) -> Result<Vec<ChildSpec>> {
            unreachable!("should not be called when everything is atomic")
        }
    }

    struct CountingExecutor {
        calls: AtomicUsize,
        fail_ids: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl LeafExecutor for CountingExecutor {
        async fn execute(&self, node: &AcNode) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_ids.lock().unwrap().contains(&node.id) {
                Err(Error::validation("boom"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn scheduler_runs_atomic_roots_straight_through() {
        let mut tree = AcTree::new(5);
        tree.insert_root("root", "do the thing").unwrap();
        let checker = AlwaysAtomic;
        let decomposer = NeverDecomposes;
        let executor = CountingExecutor { calls: AtomicUsize::new(0), fail_ids: Mutex::new(HashSet::new()) };

        let scheduler = Scheduler::new(&checker, &decomposer, &executor);
        scheduler.run(&mut tree).await.unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tree.node("root").unwrap().status, AcStatus::Completed);
        assert!(tree.is_finished());
    }

    struct OneShotDecomposer;
    #[async_trait]
    impl AtomicityChecker for OneShotDecomposer {
        async fn is_atomic(&self, node: &AcNode) -> bool {
            node.depth > 0
        }
    }
    #[async_trait]
    impl Decomposer for OneShotDecomposer {
        async fn decompose(&self, _node: &AcNode) -> Result<Vec<ChildSpec>> {
            Ok(vec![spec("c0", "a", vec![]), spec("c1", "b", vec![])])
        }
    }

    #[tokio::test]
    async fn scheduler_decomposes_then_executes_children() {
        let mut tree = AcTree::new(5);
        tree.insert_root("root", "do the thing").unwrap();
        let checker = OneShotDecomposer;
        let executor = CountingExecutor { calls: AtomicUsize::new(0), fail_ids: Mutex::new(HashSet::new()) };

        let scheduler = Scheduler::new(&checker, &checker, &executor);
        scheduler.run(&mut tree).await.unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert!(tree.is_finished());
        assert_eq!(tree.node("root").unwrap().status, AcStatus::Completed);
    }

    #[tokio::test]
    async fn scheduler_propagates_child_failure_to_root() {
        let mut tree = AcTree::new(5);
        tree.insert_root("root", "do the thing").unwrap();
        let checker = OneShotDecomposer;
        let mut fail_ids = HashSet::new();
        fail_ids.insert("c1".to_string());
        let executor = CountingExecutor { calls: AtomicUsize::new(0), fail_ids: Mutex::new(fail_ids) };

        let scheduler = Scheduler::new(&checker, &checker, &executor);
        scheduler.run(&mut tree).await.unwrap();

        assert_eq!(tree.node("root").unwrap().status, AcStatus::Failed);
    }
}
