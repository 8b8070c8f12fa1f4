//! Render runtime
//!
//! `Runtime` is the state every VM touching one rendered tree shares: the
//! environment, the program, the document, the arena of updating opcodes
//! and the destroyable tree. Lifecycle callbacks raised while a VM runs are
//! queued on the open transaction and delivered when it commits.

use crate::component::{ComponentManager, ComponentState};
use crate::debug_render_tree::{CapturedRenderNode, DebugRenderTree};
use crate::destroyable::{DestroyableId, DestroyableTree, Destructor};
use crate::dom::{Document, Dom};
use crate::environment::Environment;
use crate::error::RenderError;
use crate::modifier::ModifierInstance;
use crate::opcodes::UpdatingOpcode;
use crate::program::Program;
use crate::validator::{track, update_tag};
use std::rc::Rc;
use tracing::debug;
use trellis_config::loader::RenderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Initial evaluation stack capacity
    pub stack_capacity: usize,
    /// Maintain a debug render tree of components and modifiers
    pub debug_render_tree: bool,
    /// Ignore cache-group fast paths during rerender
    pub always_revalidate: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            stack_capacity: 1024,
            debug_render_tree: false,
            always_revalidate: false,
        }
    }
}

impl From<&RenderConfig> for RuntimeOptions {
    fn from(config: &RenderConfig) -> Self {
        Self {
            stack_capacity: config.stack_capacity,
            debug_render_tree: config.debug_render_tree,
            always_revalidate: config.always_revalidate,
        }
    }
}

/// Counters for list reconciliation, accumulated across rerenders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub syncs: usize,
    pub retained: usize,
    pub moved: usize,
    pub inserted: usize,
    pub deleted: usize,
}

/// Handle of an updating opcode in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u32);

enum Slot {
    Live(UpdatingOpcode),
    /// Checked out while it is being evaluated or reconciled
    Taken,
    Freed,
}

/// Owner of every updating opcode
///
/// Block opcodes refer to their children by id, so the tree can be walked
/// and rebuilt without shared mutable pointers. An opcode is taken out of
/// its slot while it runs and put back afterwards.
#[derive(Default)]
pub struct OpcodeArena {
    slots: Vec<Slot>,
    live: usize,
}

impl OpcodeArena {
    pub fn alloc(&mut self, op: UpdatingOpcode) -> OpId {
        self.slots.push(Slot::Live(op));
        self.live += 1;
        OpId((self.slots.len() - 1) as u32)
    }

    fn slot(&self, id: OpId) -> Result<&Slot, RenderError> {
        self.slots
            .get(id.0 as usize)
            .ok_or_else(|| RenderError::invariant(format!("unknown updating opcode {:?}", id)))
    }

    pub fn get(&self, id: OpId) -> Result<&UpdatingOpcode, RenderError> {
        match self.slot(id)? {
            Slot::Live(op) => Ok(op),
            Slot::Taken => Err(RenderError::invariant(format!("{:?} is checked out", id))),
            Slot::Freed => Err(RenderError::invariant(format!("{:?} was released", id))),
        }
    }

    pub fn get_mut(&mut self, id: OpId) -> Result<&mut UpdatingOpcode, RenderError> {
        self.slot(id)?;
        match &mut self.slots[id.0 as usize] {
            Slot::Live(op) => Ok(op),
            Slot::Taken => Err(RenderError::invariant(format!("{:?} is checked out", id))),
            Slot::Freed => Err(RenderError::invariant(format!("{:?} was released", id))),
        }
    }

    pub fn take(&mut self, id: OpId) -> Result<UpdatingOpcode, RenderError> {
        self.get(id)?;
        match std::mem::replace(&mut self.slots[id.0 as usize], Slot::Taken) {
            Slot::Live(op) => Ok(op),
            _ => unreachable!("slot was checked above"),
        }
    }

    /// Return a taken opcode; one released while it was out stays released
    pub fn put(&mut self, id: OpId, op: UpdatingOpcode) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            if matches!(slot, Slot::Taken) {
                *slot = Slot::Live(op);
            }
        }
    }

    /// Free opcodes and everything below them
    pub fn release(&mut self, ids: impl IntoIterator<Item = OpId>) {
        let mut pending: Vec<OpId> = ids.into_iter().collect();
        while let Some(id) = pending.pop() {
            let Some(slot) = self.slots.get_mut(id.0 as usize) else {
                continue;
            };
            match std::mem::replace(slot, Slot::Freed) {
                Slot::Live(op) => {
                    self.live -= 1;
                    pending.extend(op.children().iter().copied());
                }
                Slot::Taken => self.live -= 1,
                Slot::Freed => {}
            }
        }
    }

    pub fn live_count(&self) -> usize {
        self.live
    }
}

#[derive(Default)]
struct Transaction {
    created: Vec<(Rc<dyn ComponentManager>, ComponentState)>,
    updated: Vec<(Rc<dyn ComponentManager>, ComponentState)>,
    install: Vec<ModifierInstance>,
    update: Vec<ModifierInstance>,
}

pub struct Runtime {
    pub env: Environment,
    pub program: Rc<Program>,
    pub dom: Dom,
    pub options: RuntimeOptions,
    pub stats: ReconcileStats,
    pub debug_tree: Option<DebugRenderTree>,
    pub(crate) opcodes: OpcodeArena,
    pub(crate) destroyables: DestroyableTree,
    transaction: Option<Transaction>,
}

impl Runtime {
    pub fn new(env: Environment, program: Program, document: Document, options: RuntimeOptions) -> Self {
        Self {
            env,
            program: Rc::new(program),
            dom: Dom::new(document),
            options,
            stats: ReconcileStats::default(),
            debug_tree: options.debug_render_tree.then(DebugRenderTree::new),
            opcodes: OpcodeArena::default(),
            destroyables: DestroyableTree::default(),
            transaction: None,
        }
    }

    pub fn document(&self) -> &Document {
        &self.dom.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.dom.document
    }

    /// Updating opcodes currently alive
    pub fn live_opcodes(&self) -> usize {
        self.opcodes.live_count()
    }

    pub fn debug_render_tree(&self) -> Result<Vec<CapturedRenderNode>, RenderError> {
        match &self.debug_tree {
            Some(tree) => tree.capture(),
            None => Ok(Vec::new()),
        }
    }

    // ===== Transactions =====

    /// Run `f` inside a render transaction and commit it if `f` succeeds
    pub fn in_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Runtime) -> Result<T, RenderError>,
    ) -> Result<T, RenderError> {
        if self.transaction.is_some() {
            return Err(RenderError::invariant(
                "a render transaction is already open",
            ));
        }
        self.transaction = Some(Transaction::default());
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.transaction = None;
                Err(err)
            }
        }
    }

    fn transaction(&mut self) -> Result<&mut Transaction, RenderError> {
        self.transaction
            .as_mut()
            .ok_or_else(|| RenderError::invariant("no render transaction is open"))
    }

    pub(crate) fn did_create(
        &mut self,
        manager: Rc<dyn ComponentManager>,
        state: ComponentState,
    ) -> Result<(), RenderError> {
        self.transaction()?.created.push((manager, state));
        Ok(())
    }

    pub(crate) fn did_update(
        &mut self,
        manager: Rc<dyn ComponentManager>,
        state: ComponentState,
    ) -> Result<(), RenderError> {
        self.transaction()?.updated.push((manager, state));
        Ok(())
    }

    pub(crate) fn schedule_install_modifier(&mut self, modifier: ModifierInstance) -> Result<(), RenderError> {
        self.transaction()?.install.push(modifier);
        Ok(())
    }

    pub(crate) fn schedule_update_modifier(&mut self, modifier: ModifierInstance) -> Result<(), RenderError> {
        self.transaction()?.update.push(modifier);
        Ok(())
    }

    /// Deliver queued callbacks: creations, updates, installs, then modifier
    /// updates. A modifier's tag follows whatever its hook consumed.
    fn commit(&mut self) -> Result<(), RenderError> {
        let tx = self
            .transaction
            .take()
            .ok_or_else(|| RenderError::invariant("no render transaction is open"))?;
        debug!(
            created = tx.created.len(),
            updated = tx.updated.len(),
            installs = tx.install.len(),
            updates = tx.update.len(),
            "commit render transaction"
        );
        for (manager, state) in &tx.created {
            manager.did_create(state);
        }
        for (manager, state) in &tx.updated {
            manager.did_update(state);
        }
        let document = &mut self.dom.document;
        for modifier in &tx.install {
            let (result, consumed) = track(|| modifier.install(document));
            result?;
            update_tag(&modifier.tag, consumed);
        }
        for modifier in &tx.update {
            let (result, consumed) = track(|| modifier.update(document));
            result?;
            update_tag(&modifier.tag, consumed);
        }
        Ok(())
    }

    // ===== Teardown =====

    pub(crate) fn destroy(&mut self, id: DestroyableId) {
        let destructors = self.destroyables.destroy(id);
        self.run_destructors(destructors);
    }

    pub(crate) fn destroy_children(&mut self, id: DestroyableId) {
        let destructors = self.destroyables.destroy_children(id);
        self.run_destructors(destructors);
    }

    fn run_destructors(&mut self, destructors: Vec<Destructor>) {
        for destructor in destructors {
            match destructor {
                Destructor::Callback(callback) => callback(),
                Destructor::ClearRemote(block) => {
                    let parent = self.dom.blocks.parent_element(block);
                    let still_there = self
                        .dom
                        .blocks
                        .first_node(block)
                        .map_or(false, |first| self.dom.document.parent(first) == Some(parent));
                    if still_there {
                        self.dom.blocks.clear(block, &mut self.dom.document);
                    }
                }
                Destructor::DebugNode(node) => {
                    if let Some(tree) = &mut self.debug_tree {
                        tree.will_destroy(node);
                    }
                }
            }
        }
    }
}
