//! Updating opcodes
//!
//! The append VM leaves behind a tree of these. Rerendering walks the tree
//! with the updating VM: guards throw when what they assumed changed, block
//! opcodes catch the throw and rebuild their region, leaves patch the DOM in
//! place.

use crate::arguments::CapturedArguments;
use crate::builder::BlockId;
use crate::component::{ComponentManager, ComponentState};
use crate::debug_render_tree::RenderNodeId;
use crate::destroyable::DestroyableId;
use crate::attributes::DynamicAttribute;
use crate::dom::NodeId;
use crate::error::RenderError;
use crate::iterable::ListIterator;
use crate::modifier::{resolve_modifier_value, ModifierInstance};
use crate::reference::{value_for_ref, Reference};
use crate::runtime::OpId;
use crate::scope::{DynamicScope, Scope};
use crate::update::UpdatingVM;
use crate::validator::{
    begin_track_frame, consume_tag, end_track_frame, validate_tag, value_for_tag, Revision, Tag,
};
use crate::value::Value;
use crate::vm::stack::StackValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// What the updating loop does after an opcode ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// Abandon the current frame and let its handler rebuild
    Throw,
}

/// Snapshot an append VM can be resumed from
#[derive(Debug, Clone)]
pub struct ResumableState {
    /// Absolute heap address to resume at
    pub pc: isize,
    pub scope: Scope,
    pub dynamic_scope: DynamicScope,
    /// Values retained from the top of the stack
    pub stack: Vec<StackValue>,
}

/// A rebuildable region and the opcodes recorded inside it
#[derive(Debug)]
pub struct BlockOpcode {
    pub state: ResumableState,
    pub block: BlockId,
    pub children: Vec<OpId>,
    pub destroyable: DestroyableId,
}

#[derive(Debug)]
pub struct ListItemOpcode {
    pub inner: BlockOpcode,
    pub key: Rc<str>,
    pub value: Reference,
    pub memo: Reference,
    /// Set while a sync pass has already placed this item
    pub retained: bool,
    /// Position among the list's children after the last sync
    pub index: usize,
}

#[derive(Debug)]
pub struct ListBlockOpcode {
    pub inner: BlockOpcode,
    pub iterable: Reference,
    pub key: Rc<str>,
    pub items: HashMap<Rc<str>, OpId>,
    pub last_iterated: Revision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    ContentType,
    IsEmpty,
}

impl Filter {
    pub fn apply(self, value: &Value) -> Result<i64, RenderError> {
        Ok(match self {
            Filter::ContentType => value.content_type() as i64,
            Filter::IsEmpty => ListIterator::new(value, "@index")?.is_empty() as i64,
        })
    }
}

#[derive(Debug)]
pub struct AssertOpcode {
    pub reference: Reference,
    pub last: Value,
}

#[derive(Debug)]
pub struct AssertFilterOpcode {
    pub reference: Reference,
    pub filter: Filter,
    pub last: i64,
}

#[derive(Debug)]
pub struct DynamicTextOpcode {
    pub node: NodeId,
    pub reference: Reference,
    pub last: Value,
}

#[derive(Debug)]
pub struct DynamicAttrOpcode {
    pub attribute: DynamicAttribute,
    pub reference: Reference,
    pub last_revision: Revision,
}

#[derive(Debug)]
pub struct UpdateModifierOpcode {
    pub instance: ModifierInstance,
    pub last_updated: Revision,
}

/// A modifier whose definition is itself a reference
pub struct UpdateDynamicModifierOpcode {
    pub definition: Reference,
    pub args: CapturedArguments,
    pub element: NodeId,
    /// Shared with the destructor registered for the element
    pub current: Rc<RefCell<Option<ModifierInstance>>>,
    pub last_definition: Revision,
    pub last_updated: Revision,
}

#[derive(Debug)]
pub struct JumpIfNotModifiedOpcode {
    pub tag: Tag,
    pub last_revision: Revision,
    /// Index in the enclosing list just past the matching `EndTrackFrame`
    pub target: usize,
}

impl JumpIfNotModifiedOpcode {
    pub(crate) fn did_modify(&mut self, tag: Tag) {
        self.last_revision = value_for_tag(&tag);
        consume_tag(&tag);
        self.tag = tag;
    }
}

pub struct UpdateComponentOpcode {
    pub manager: Rc<dyn ComponentManager>,
    pub state: ComponentState,
    pub dynamic_scope: Option<DynamicScope>,
}

pub struct DidUpdateLayoutOpcode {
    pub manager: Rc<dyn ComponentManager>,
    pub state: ComponentState,
    pub block: BlockId,
}

pub enum UpdatingOpcode {
    Try(BlockOpcode),
    ListBlock(ListBlockOpcode),
    ListItem(ListItemOpcode),
    Assert(AssertOpcode),
    AssertFilter(AssertFilterOpcode),
    DynamicText(DynamicTextOpcode),
    DynamicAttr(DynamicAttrOpcode),
    UpdateModifier(UpdateModifierOpcode),
    UpdateDynamicModifier(UpdateDynamicModifierOpcode),
    JumpIfNotModified(JumpIfNotModifiedOpcode),
    BeginTrackFrame,
    EndTrackFrame { guard: OpId },
    UpdateComponent(UpdateComponentOpcode),
    DidUpdateLayout(DidUpdateLayoutOpcode),
    DebugRenderTreeUpdate { node: RenderNodeId },
    DebugRenderTreeDidRender { node: RenderNodeId, block: BlockId },
}

impl UpdatingOpcode {
    pub fn name(&self) -> &'static str {
        match self {
            UpdatingOpcode::Try(_) => "Try",
            UpdatingOpcode::ListBlock(_) => "ListBlock",
            UpdatingOpcode::ListItem(_) => "ListItem",
            UpdatingOpcode::Assert(_) => "Assert",
            UpdatingOpcode::AssertFilter(_) => "AssertFilter",
            UpdatingOpcode::DynamicText(_) => "DynamicText",
            UpdatingOpcode::DynamicAttr(_) => "DynamicAttr",
            UpdatingOpcode::UpdateModifier(_) => "UpdateModifier",
            UpdatingOpcode::UpdateDynamicModifier(_) => "UpdateDynamicModifier",
            UpdatingOpcode::JumpIfNotModified(_) => "JumpIfNotModified",
            UpdatingOpcode::BeginTrackFrame => "BeginTrackFrame",
            UpdatingOpcode::EndTrackFrame { .. } => "EndTrackFrame",
            UpdatingOpcode::UpdateComponent(_) => "UpdateComponent",
            UpdatingOpcode::DidUpdateLayout(_) => "DidUpdateLayout",
            UpdatingOpcode::DebugRenderTreeUpdate { .. } => "DebugRenderTreeUpdate",
            UpdatingOpcode::DebugRenderTreeDidRender { .. } => "DebugRenderTreeDidRender",
        }
    }

    pub fn block(&self) -> Option<&BlockOpcode> {
        match self {
            UpdatingOpcode::Try(block) => Some(block),
            UpdatingOpcode::ListBlock(list) => Some(&list.inner),
            UpdatingOpcode::ListItem(item) => Some(&item.inner),
            _ => None,
        }
    }

    pub fn block_mut(&mut self) -> Option<&mut BlockOpcode> {
        match self {
            UpdatingOpcode::Try(block) => Some(block),
            UpdatingOpcode::ListBlock(list) => Some(&mut list.inner),
            UpdatingOpcode::ListItem(item) => Some(&mut item.inner),
            _ => None,
        }
    }

    pub fn children(&self) -> &[OpId] {
        self.block().map_or(&[], |block| &block.children)
    }

    pub(crate) fn evaluate(&mut self, id: OpId, vm: &mut UpdatingVM<'_>) -> Result<Flow, RenderError> {
        match self {
            UpdatingOpcode::Try(block) => vm.try_(block.children.clone(), Some(id)),
            UpdatingOpcode::ListItem(item) => vm.try_(item.inner.children.clone(), Some(id)),
            UpdatingOpcode::ListBlock(list) => {
                if !validate_tag(&list.iterable.tag(), list.last_iterated) {
                    list.sync(vm.rt)?;
                }
                vm.try_(list.inner.children.clone(), None);
            }

            // ===== Guards =====
            UpdatingOpcode::Assert(assert) => {
                if value_for_ref(&assert.reference)? != assert.last {
                    return Ok(Flow::Throw);
                }
            }
            UpdatingOpcode::AssertFilter(assert) => {
                let value = value_for_ref(&assert.reference)?;
                if assert.filter.apply(&value)? != assert.last {
                    return Ok(Flow::Throw);
                }
            }

            // ===== DOM =====
            UpdatingOpcode::DynamicText(text) => {
                let value = value_for_ref(&text.reference)?;
                if value != text.last {
                    vm.rt.dom.document.set_node_value(text.node, &value.to_text());
                    text.last = value;
                }
            }
            UpdatingOpcode::DynamicAttr(attr) => {
                if !validate_tag(&attr.reference.tag(), attr.last_revision) {
                    let value = value_for_ref(&attr.reference)?;
                    attr.attribute.update(&mut vm.rt.dom.document, &value);
                    attr.last_revision = value_for_tag(&attr.reference.tag());
                }
            }

            // ===== Modifiers =====
            UpdatingOpcode::UpdateModifier(modifier) => {
                if !validate_tag(&modifier.instance.tag, modifier.last_updated) {
                    vm.rt.schedule_update_modifier(modifier.instance.clone())?;
                    modifier.last_updated = value_for_tag(&modifier.instance.tag);
                }
            }
            UpdatingOpcode::UpdateDynamicModifier(modifier) => modifier.evaluate(vm)?,

            // ===== Cache groups =====
            UpdatingOpcode::JumpIfNotModified(guard) => {
                if !vm.always_revalidate() && validate_tag(&guard.tag, guard.last_revision) {
                    consume_tag(&guard.tag);
                    vm.goto(guard.target);
                }
            }
            UpdatingOpcode::BeginTrackFrame => begin_track_frame(),
            UpdatingOpcode::EndTrackFrame { guard } => {
                let tag = end_track_frame();
                match vm.rt.opcodes.get_mut(*guard)? {
                    UpdatingOpcode::JumpIfNotModified(guard) => guard.did_modify(tag),
                    other => {
                        return Err(RenderError::invariant(format!(
                            "cache group guard is a {}",
                            other.name()
                        )))
                    }
                }
            }

            // ===== Components =====
            UpdatingOpcode::UpdateComponent(component) => {
                component
                    .manager
                    .update(&component.state, component.dynamic_scope.as_ref())?;
            }
            UpdatingOpcode::DidUpdateLayout(layout) => {
                let bounds = vm.rt.dom.blocks.bounds(layout.block)?;
                layout.manager.did_update_layout(&layout.state, bounds);
                vm.rt.did_update(layout.manager.clone(), layout.state.clone())?;
            }
            UpdatingOpcode::DebugRenderTreeUpdate { node } => {
                if let Some(tree) = &mut vm.rt.debug_tree {
                    tree.update(*node);
                }
            }
            UpdatingOpcode::DebugRenderTreeDidRender { node, block } => {
                let bounds = vm.rt.dom.blocks.bounds(*block)?;
                if let Some(tree) = &mut vm.rt.debug_tree {
                    tree.did_render(*node, bounds)?;
                }
            }
        }
        Ok(Flow::Continue)
    }
}

impl UpdateDynamicModifierOpcode {
    /// Replace the installed modifier when the definition changed, otherwise
    /// update it when its own inputs did
    fn evaluate(&mut self, vm: &mut UpdatingVM<'_>) -> Result<(), RenderError> {
        if !validate_tag(&self.definition.tag(), self.last_definition) {
            let value = value_for_ref(&self.definition)?;
            self.last_definition = value_for_tag(&self.definition.tag());
            if let Some(previous) = self.current.borrow_mut().take() {
                previous.destroy();
            }
            let resolver = vm.rt.env.resolver();
            if let Some((definition, args)) = resolve_modifier_value(&value, &self.args, &resolver)? {
                let instance = ModifierInstance::create(definition, self.element, &args)?;
                self.last_updated = value_for_tag(&instance.tag);
                vm.rt.schedule_install_modifier(instance.clone())?;
                *self.current.borrow_mut() = Some(instance);
            }
            return Ok(());
        }
        let current = self.current.borrow().clone();
        if let Some(instance) = current {
            if !validate_tag(&instance.tag, self.last_updated) {
                vm.rt.schedule_update_modifier(instance.clone())?;
                self.last_updated = value_for_tag(&instance.tag);
            }
        }
        Ok(())
    }
}

macro_rules! opaque_debug {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($name)
            }
        })*
    };
}

opaque_debug! {
    UpdateDynamicModifierOpcode => "UpdateDynamicModifier",
    UpdateComponentOpcode => "UpdateComponent",
    DidUpdateLayoutOpcode => "DidUpdateLayout",
}

impl std::fmt::Debug for UpdatingOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ContentType;

    #[test]
    fn test_filters() {
        assert_eq!(
            Filter::ContentType.apply(&Value::from("x")).unwrap(),
            ContentType::String as i64
        );
        let empty = Value::from(serde_json::json!([]));
        let full = Value::from(serde_json::json!([1]));
        assert_eq!(Filter::IsEmpty.apply(&empty).unwrap(), 1);
        assert_eq!(Filter::IsEmpty.apply(&full).unwrap(), 0);
        assert_eq!(Filter::IsEmpty.apply(&Value::Null).unwrap(), 1);
    }

    #[test]
    fn test_did_modify_moves_the_snapshot() {
        let tag = crate::validator::create_tag();
        let mut guard = JumpIfNotModifiedOpcode {
            tag: Tag::Constant,
            last_revision: 0,
            target: 3,
        };
        guard.did_modify(tag.clone());
        assert!(validate_tag(&guard.tag, guard.last_revision));
        crate::validator::dirty_tag(&tag);
        assert!(!validate_tag(&guard.tag, guard.last_revision));
    }
}
