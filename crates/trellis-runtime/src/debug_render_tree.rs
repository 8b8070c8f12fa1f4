//! Debug render tree
//!
//! When enabled, the VM reports every component, `in-element` region and
//! modifier it renders. Nodes are entered on create (or update) and exited
//! once their bounds are known, so the enter/exit stack mirrors rendering
//! nesting. `capture` produces a serializable snapshot for tooling.

use crate::arguments::CapturedArguments;
use crate::dom::Bounds;
use crate::error::RenderError;
use crate::validator::untrack;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderNodeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderNodeKind {
    Component,
    Keyword,
    Modifier,
}

#[derive(Debug)]
struct RenderNode {
    kind: RenderNodeKind,
    name: String,
    args: CapturedArguments,
    bounds: Option<Bounds>,
    children: Vec<RenderNodeId>,
    parent: Option<RenderNodeId>,
    destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedBounds {
    pub parent: usize,
    pub first: usize,
    pub last: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedRenderNode {
    pub id: String,
    pub kind: RenderNodeKind,
    pub name: String,
    pub args: serde_json::Value,
    pub bounds: Option<CapturedBounds>,
    pub children: Vec<CapturedRenderNode>,
}

#[derive(Debug, Default)]
pub struct DebugRenderTree {
    nodes: Vec<RenderNode>,
    roots: Vec<RenderNodeId>,
    stack: Vec<RenderNodeId>,
}

impl DebugRenderTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node under the one currently being rendered and enter it
    pub fn create(
        &mut self,
        kind: RenderNodeKind,
        name: impl Into<String>,
        args: CapturedArguments,
    ) -> RenderNodeId {
        let id = RenderNodeId(self.nodes.len() as u32);
        let parent = self.stack.last().copied();
        self.nodes.push(RenderNode {
            kind,
            name: name.into(),
            args,
            bounds: None,
            children: Vec::new(),
            parent,
            destroyed: false,
        });
        match parent {
            Some(parent) => self.node_mut(parent).children.push(id),
            None => self.roots.push(id),
        }
        self.stack.push(id);
        id
    }

    /// Re-enter a node that is being revalidated
    pub fn update(&mut self, id: RenderNodeId) {
        self.stack.push(id);
    }

    /// Exit a node, recording where it rendered
    pub fn did_render(&mut self, id: RenderNodeId, bounds: Bounds) -> Result<(), RenderError> {
        match self.stack.pop() {
            Some(top) if top == id => {
                self.node_mut(id).bounds = Some(bounds);
                Ok(())
            }
            other => Err(RenderError::invariant(format!(
                "debug render tree exited {:?} while {:?} was current",
                id, other
            ))),
        }
    }

    pub fn will_destroy(&mut self, id: RenderNodeId) {
        let parent = {
            let node = self.node_mut(id);
            node.destroyed = true;
            node.parent
        };
        match parent {
            Some(parent) => self.node_mut(parent).children.retain(|c| *c != id),
            None => self.roots.retain(|c| *c != id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Snapshot of every live node
    pub fn capture(&self) -> Result<Vec<CapturedRenderNode>, RenderError> {
        untrack(|| self.roots.iter().map(|id| self.capture_node(*id)).collect())
    }

    fn capture_node(&self, id: RenderNodeId) -> Result<CapturedRenderNode, RenderError> {
        let node = &self.nodes[id.0 as usize];
        debug_assert!(!node.destroyed);
        Ok(CapturedRenderNode {
            id: format!("render-node:{}", id.0),
            kind: node.kind,
            name: node.name.clone(),
            args: node.args.to_json()?,
            bounds: node.bounds.map(|b| CapturedBounds {
                parent: b.parent.index(),
                first: b.first.index(),
                last: b.last.index(),
            }),
            children: node
                .children
                .iter()
                .map(|child| self.capture_node(*child))
                .collect::<Result<_, _>>()?,
        })
    }

    fn node_mut(&mut self, id: RenderNodeId) -> &mut RenderNode {
        &mut self.nodes[id.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::reference::Reference;
    use std::rc::Rc;

    fn bounds(doc: &mut Document) -> Bounds {
        let node = doc.create_text("x");
        Bounds {
            parent: doc.root(),
            first: node,
            last: node,
        }
    }

    #[test]
    fn test_nesting_follows_enter_and_exit() {
        let mut doc = Document::new();
        let mut tree = DebugRenderTree::new();
        let outer = tree.create(RenderNodeKind::Component, "Outer", CapturedArguments::empty());
        let inner = tree.create(
            RenderNodeKind::Component,
            "Inner",
            CapturedArguments::new(vec![], vec![(Rc::from("title"), Reference::constant("hi"))]),
        );
        let b = bounds(&mut doc);
        tree.did_render(inner, b).unwrap();
        tree.did_render(outer, b).unwrap();

        let captured = tree.capture().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].name, "Outer");
        assert_eq!(captured[0].children[0].args["named"]["title"], "hi");
        assert!(captured[0].children[0].bounds.is_some());
    }

    #[test]
    fn test_unbalanced_exit_is_an_invariant() {
        let mut doc = Document::new();
        let mut tree = DebugRenderTree::new();
        let a = tree.create(RenderNodeKind::Keyword, "in-element", CapturedArguments::empty());
        let _b = tree.create(RenderNodeKind::Modifier, "on", CapturedArguments::empty());
        assert!(tree.did_render(a, bounds(&mut doc)).unwrap_err().is_fatal());
    }

    #[test]
    fn test_destroyed_nodes_leave_the_capture() {
        let mut doc = Document::new();
        let mut tree = DebugRenderTree::new();
        let a = tree.create(RenderNodeKind::Component, "A", CapturedArguments::empty());
        tree.did_render(a, bounds(&mut doc)).unwrap();
        tree.will_destroy(a);
        assert!(tree.capture().unwrap().is_empty());
        assert!(tree.is_empty());
    }
}
