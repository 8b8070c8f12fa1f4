//! Updating VM
//!
//! Walks the opcode tree left by an append pass. Each block opcode runs its
//! children in a frame of its own; a guard that fails throws, which unwinds
//! to the nearest frame with a handler and rebuilds that handler's region
//! with a resumed append VM.

use crate::builder::ElementBuilder;
use crate::error::RenderError;
use crate::opcodes::Flow;
use crate::runtime::{OpId, Runtime};
use crate::vm::AppendVM;
use tracing::{debug, trace};

struct UpdatingFrame {
    ops: Vec<OpId>,
    /// Index of the next opcode to evaluate
    next: usize,
    /// Block opcode that rebuilds when something in this frame throws
    handler: Option<OpId>,
}

pub struct UpdatingVM<'rt> {
    pub(crate) rt: &'rt mut Runtime,
    frames: Vec<UpdatingFrame>,
}

impl<'rt> UpdatingVM<'rt> {
    pub fn new(rt: &'rt mut Runtime) -> Self {
        Self {
            rt,
            frames: Vec::new(),
        }
    }

    /// Evaluate `ops` and everything they open until every frame is done
    pub fn execute(&mut self, ops: &[OpId], handler: Option<OpId>) -> Result<(), RenderError> {
        self.try_(ops.to_vec(), handler);
        while let Some(frame) = self.frames.last_mut() {
            let Some(&id) = frame.ops.get(frame.next) else {
                self.frames.pop();
                continue;
            };
            frame.next += 1;

            let mut op = self.rt.opcodes.take(id)?;
            trace!(op = op.name(), ?id, depth = self.frames.len(), "update");
            let flow = op.evaluate(id, self);
            self.rt.opcodes.put(id, op);
            if flow? == Flow::Throw {
                self.throw()?;
            }
        }
        Ok(())
    }

    /// Open a frame over `ops`
    pub(crate) fn try_(&mut self, ops: Vec<OpId>, handler: Option<OpId>) {
        self.frames.push(UpdatingFrame {
            ops,
            next: 0,
            handler,
        });
    }

    /// Continue the current frame at `index`
    pub(crate) fn goto(&mut self, index: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.next = index;
        }
    }

    pub(crate) fn always_revalidate(&self) -> bool {
        self.rt.options.always_revalidate
    }

    /// Abandon the current frame and rebuild the region that owns it
    fn throw(&mut self) -> Result<(), RenderError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RenderError::invariant("throw outside of any frame"))?;
        match frame.handler {
            Some(handler) => self.rebuild_block(handler),
            None => Err(RenderError::invariant(
                "a guard failed in a frame without a rebuildable owner",
            )),
        }
    }

    /// Clear a block opcode's region and run its captured state again
    pub(crate) fn rebuild_block(&mut self, id: OpId) -> Result<(), RenderError> {
        let (state, block, destroyable, children) = {
            let op = self.rt.opcodes.get_mut(id)?;
            let name = op.name();
            let region = op
                .block_mut()
                .ok_or_else(|| RenderError::invariant(format!("{} cannot be rebuilt", name)))?;
            (
                region.state.clone(),
                region.block,
                region.destroyable,
                std::mem::take(&mut region.children),
            )
        };
        debug!(?id, pc = state.pc, "rebuild block");

        self.rt.opcodes.release(children);
        self.rt.destroy_children(destroyable);
        let builder = ElementBuilder::resume(&mut self.rt.dom, block)?;
        let mut vm = AppendVM::resume(self.rt, &state, builder, destroyable);
        vm.push_updating(None);
        vm.push_updating(Some(id));
        vm.execute()?;
        Ok(())
    }
}
