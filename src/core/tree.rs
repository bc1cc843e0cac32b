//! Execution tree registry.
//!
//! Every instrumented step invocation appends an [`ExecutionNode`] under the
//! step that was active when it was invoked, or under the registry root.
//! Steps chained onto another step's helpers are recorded once per run
//! instead, beneath whatever the enclosing executor is visiting at the time.
//! Nodes are never removed; only their child lists grow.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::context::Ambient;
use super::runtime::Runtime;

/// Record of one step invocation.
#[derive(Debug)]
pub struct ExecutionNode {
    id: Uuid,
    name: String,
    content_hash: String,
    arguments: Vec<String>,
    children: Mutex<Vec<Arc<ExecutionNode>>>,
}

impl ExecutionNode {
    /// Create a node, hashing the name, operation body and arguments.
    pub fn new<A: Serialize + ?Sized>(name: &str, body: &str, args: &A) -> Self {
        let arguments = match serde_json::to_value(args) {
            Ok(serde_json::Value::Array(items)) => items.iter().map(render_argument).collect(),
            Ok(serde_json::Value::Null) | Err(_) => Vec::new(),
            Ok(other) => vec![render_argument(&other)],
        };
        let content_hash = content_hash(name, body, &arguments);

        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            content_hash,
            arguments,
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hash identifying structurally identical steps.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Children in invocation order.
    pub fn children(&self) -> Vec<Arc<ExecutionNode>> {
        self.children.lock().clone()
    }

    /// Fresh record of another run of the same step.
    pub(crate) fn rerun(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            content_hash: self.content_hash.clone(),
            arguments: self.arguments.clone(),
            children: Mutex::new(Vec::new()),
        }
    }

    fn push_child(&self, child: Arc<ExecutionNode>) {
        self.children.lock().push(child);
    }

    /// Serializable copy of this subtree.
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            name: self.name.clone(),
            content_hash: self.content_hash.clone(),
            arguments: self.arguments.clone(),
            children: self.children.lock().iter().map(|child| child.snapshot()).collect(),
        }
    }
}

fn render_argument(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn content_hash(name: &str, body: &str, arguments: &[String]) -> String {
    let payload = serde_json::json!({ "name": name, "fn": body, "args": arguments });
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serializable view of a node and its descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub content_hash: String,
    pub arguments: Vec<String>,
    pub children: Vec<NodeSnapshot>,
}

/// Append-only tree of executed steps.
#[derive(Debug, Default)]
pub struct TreeRegistry {
    roots: Mutex<Vec<Arc<ExecutionNode>>>,
}

impl TreeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node under `parent`, or at the root when there is none.
    pub fn attach(&self, parent: Option<&Arc<ExecutionNode>>, node: Arc<ExecutionNode>) {
        match parent {
            Some(parent) => parent.push_child(node),
            None => self.roots.lock().push(node),
        }
    }

    /// Top-level nodes in invocation order.
    pub fn roots(&self) -> Vec<Arc<ExecutionNode>> {
        self.roots.lock().clone()
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.roots.lock().iter().map(|node| node.snapshot()).collect()
    }

    /// Drop every recorded node.
    pub fn reset(&self) {
        self.roots.lock().clear();
    }
}

/// Create a node under the active parent step and return it.
pub fn record<A: Serialize + ?Sized>(name: &str, body: &str, args: &A) -> Arc<ExecutionNode> {
    attach(ExecutionNode::new(name, body, args))
}

/// Record another run of `template` under the active parent step.
pub(crate) fn record_run(template: &ExecutionNode) -> Arc<ExecutionNode> {
    attach(template.rerun())
}

fn attach(node: ExecutionNode) -> Arc<ExecutionNode> {
    let ambient = Ambient::current();
    let node = Arc::new(node);
    let runtime = ambient.runtime().cloned().unwrap_or_else(Runtime::global);
    runtime.registry().attach(ambient.parent.as_ref(), Arc::clone(&node));
    node
}

/// Step factory wrapper.
///
/// Records a node for this invocation under the active parent step, then
/// calls `f` with the new node installed as the current step. The closure's
/// type name stands in for the operation body in the content hash.
///
/// Inside a chained helper the node is only a template: nothing is attached
/// until the step runs, see [`record_run`].
pub fn instrument<A, R, F>(name: &str, args: &A, f: F) -> R
where
    A: Serialize + ?Sized,
    F: FnOnce() -> R,
{
    let ambient = Ambient::current();
    let body = std::any::type_name::<F>();
    let node = if ambient.wrapper.is_some() {
        Arc::new(ExecutionNode::new(name, body, args))
    } else {
        record(name, body, args)
    };
    tracing::trace!(step = name, hash = node.content_hash(), "Step invoked");
    ambient.with_step(Some(node)).sync_scope(f)
}
