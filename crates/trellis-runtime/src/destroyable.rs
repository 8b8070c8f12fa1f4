//! Destroyable tree
//!
//! Every rendered region owns a destroyable. Destroying one tears down its
//! children in reverse creation order before running its own destructors, and
//! detaches it from its parent. The tree only decides *what* runs and in
//! which order; destructors that touch the document are executed by the
//! runtime.

use crate::builder::BlockId;
use crate::debug_render_tree::RenderNodeId;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestroyableId(u32);

pub enum Destructor {
    Callback(Box<dyn FnOnce()>),
    /// Remove a remote block's nodes if they are still where it put them
    ClearRemote(BlockId),
    DebugNode(RenderNodeId),
}

impl fmt::Debug for Destructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destructor::Callback(_) => write!(f, "Callback"),
            Destructor::ClearRemote(block) => write!(f, "ClearRemote({:?})", block),
            Destructor::DebugNode(node) => write!(f, "DebugNode({:?})", node),
        }
    }
}

#[derive(Default)]
struct Node {
    parent: Option<DestroyableId>,
    children: Vec<DestroyableId>,
    destructors: Vec<Destructor>,
    destroyed: bool,
}

#[derive(Default)]
pub struct DestroyableTree {
    nodes: Vec<Node>,
}

impl DestroyableTree {
    pub fn create(&mut self, parent: Option<DestroyableId>) -> DestroyableId {
        let id = DestroyableId(self.nodes.len() as u32);
        self.nodes.push(Node {
            parent,
            ..Node::default()
        });
        if let Some(parent) = parent {
            self.nodes[parent.0 as usize].children.push(id);
        }
        id
    }

    pub fn is_destroyed(&self, id: DestroyableId) -> bool {
        self.nodes[id.0 as usize].destroyed
    }

    pub fn children(&self, id: DestroyableId) -> &[DestroyableId] {
        &self.nodes[id.0 as usize].children
    }

    pub fn register_destructor(&mut self, id: DestroyableId, destructor: Destructor) {
        self.nodes[id.0 as usize].destructors.push(destructor);
    }

    /// Mark `id` and its descendants destroyed, returning their destructors
    /// in the order they must run
    pub fn destroy(&mut self, id: DestroyableId) -> Vec<Destructor> {
        let mut pending = Vec::new();
        self.collect(id, &mut pending);
        if let Some(parent) = self.nodes[id.0 as usize].parent.take() {
            self.nodes[parent.0 as usize].children.retain(|child| *child != id);
        }
        pending
    }

    /// Destroy every child of `id`, keeping `id` itself alive
    pub fn destroy_children(&mut self, id: DestroyableId) -> Vec<Destructor> {
        let children = std::mem::take(&mut self.nodes[id.0 as usize].children);
        let mut pending = Vec::new();
        for child in children.into_iter().rev() {
            self.nodes[child.0 as usize].parent = None;
            self.collect(child, &mut pending);
        }
        pending
    }

    fn collect(&mut self, id: DestroyableId, pending: &mut Vec<Destructor>) {
        let node = &mut self.nodes[id.0 as usize];
        if node.destroyed {
            return;
        }
        node.destroyed = true;
        let children = std::mem::take(&mut node.children);
        let own = std::mem::take(&mut node.destructors);
        for child in children.into_iter().rev() {
            self.collect(child, pending);
        }
        pending.extend(own);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Destructor {
        let log = log.clone();
        Destructor::Callback(Box::new(move || log.borrow_mut().push(name)))
    }

    fn run(pending: Vec<Destructor>) {
        for destructor in pending {
            if let Destructor::Callback(f) = destructor {
                f();
            }
        }
    }

    #[test]
    fn test_children_destroyed_in_reverse_before_parent() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut tree = DestroyableTree::default();
        let root = tree.create(None);
        let a = tree.create(Some(root));
        let b = tree.create(Some(root));
        let a1 = tree.create(Some(a));
        tree.register_destructor(root, record(&log, "root"));
        tree.register_destructor(a, record(&log, "a"));
        tree.register_destructor(b, record(&log, "b"));
        tree.register_destructor(a1, record(&log, "a1"));

        run(tree.destroy(root));
        assert_eq!(*log.borrow(), vec!["b", "a1", "a", "root"]);
        assert!(tree.is_destroyed(a1));
    }

    #[test]
    fn test_destroy_detaches_from_parent() {
        let mut tree = DestroyableTree::default();
        let root = tree.create(None);
        let child = tree.create(Some(root));
        assert!(tree.destroy(child).is_empty());
        assert!(tree.children(root).is_empty());
        assert!(!tree.is_destroyed(root));
    }

    #[test]
    fn test_destructors_run_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut tree = DestroyableTree::default();
        let root = tree.create(None);
        tree.register_destructor(root, record(&log, "root"));
        run(tree.destroy(root));
        run(tree.destroy(root));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_destroy_children_keeps_owner() {
        let mut tree = DestroyableTree::default();
        let root = tree.create(None);
        let child = tree.create(Some(root));
        tree.destroy_children(root);
        assert!(tree.is_destroyed(child));
        assert!(!tree.is_destroyed(root));
        let fresh = tree.create(Some(root));
        assert_eq!(tree.children(root), &[fresh]);
    }
}
