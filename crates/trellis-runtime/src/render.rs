//! Render entry points
//!
//! `render_main` runs a template once against a cursor in the document and
//! returns a `RenderResult`; `RenderResult::rerender` revalidates that
//! output after references changed.

use crate::builder::{BlockId, BuilderMode, CursorPosition, ElementBuilder};
use crate::dom::{Bounds, NodeId};
use crate::error::RenderError;
use crate::program::TemplateRef;
use crate::reference::Reference;
use crate::runtime::{OpId, Runtime};
use crate::update::UpdatingVM;
use crate::destroyable::DestroyableId;
use crate::vm::AppendVM;
use tracing::{debug, instrument};

/// The output of one append pass
#[derive(Debug)]
pub struct RenderResult {
    updating: Vec<OpId>,
    block: BlockId,
    drop: DestroyableId,
}

impl RenderResult {
    pub(crate) fn new(updating: Vec<OpId>, block: BlockId, drop: DestroyableId) -> Self {
        Self {
            updating,
            block,
            drop,
        }
    }

    /// Top-level updating opcodes
    pub fn updating(&self) -> &[OpId] {
        &self.updating
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn first_node(&self, rt: &Runtime) -> Option<NodeId> {
        rt.dom.blocks.first_node(self.block)
    }

    pub fn last_node(&self, rt: &Runtime) -> Option<NodeId> {
        rt.dom.blocks.last_node(self.block)
    }

    pub fn bounds(&self, rt: &Runtime) -> Result<Bounds, RenderError> {
        rt.dom.blocks.bounds(self.block)
    }

    /// Revalidate the output, patching or rebuilding whatever changed
    #[instrument(skip_all)]
    pub fn rerender(&self, rt: &mut Runtime) -> Result<(), RenderError> {
        let before = rt.document().mutation_count();
        rt.in_transaction(|rt| UpdatingVM::new(rt).execute(&self.updating, None))?;
        debug!(
            mutations = rt.document().mutation_count() - before,
            "rerender finished"
        );
        Ok(())
    }

    /// Tear down everything the render produced and remove its DOM
    pub fn destroy(self, rt: &mut Runtime) {
        rt.destroy(self.drop);
        rt.dom.blocks.clear(self.block, &mut rt.dom.document);
        rt.opcodes.release(self.updating);
    }
}

/// Render `template` with `self_ref` as `this` at `position`
///
/// `mode` selects fresh construction, construction with rehydration
/// markers, or adoption of markup already under `position.element`.
#[instrument(skip_all, fields(handle = template.handle, ?mode))]
pub fn render_main(
    rt: &mut Runtime,
    template: &TemplateRef,
    self_ref: Reference,
    position: CursorPosition,
    mode: BuilderMode,
) -> Result<RenderResult, RenderError> {
    rt.in_transaction(|rt| {
        let builder = ElementBuilder::for_initial_render(&mut rt.dom, mode, position)?;
        let root = rt.destroyables.create(None);
        AppendVM::initial(rt, template, self_ref, builder, root)?.execute()
    })
}
