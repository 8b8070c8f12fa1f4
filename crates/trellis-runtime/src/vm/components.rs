use super::stack::StackValue;
use super::AppendVM;
use crate::arguments::{ArgsLayout, CapturedArguments};
use crate::component::{ComponentDefinition, ComponentInstance};
use crate::curry::{resolve_curried_value, CurriedKind, ResolvedCurry};
use crate::debug_render_tree::RenderNodeKind;
use crate::destroyable::Destructor;
use crate::error::RenderError;
use crate::opcodes::{
    DidUpdateLayoutOpcode, JumpIfNotModifiedOpcode, UpdateComponentOpcode, UpdatingOpcode,
};
use crate::reference::{value_for_ref, Reference};
use crate::scope::Scope;
use crate::validator::{begin_track_frame, end_track_frame, Tag};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

fn missing_component(value: &Value) -> RenderError {
    RenderError::MissingComponent {
        path: value.to_text(),
    }
}

impl<'rt> AppendVM<'rt> {
    // ===== Resolution =====

    pub(super) fn push_component_instance(
        &mut self,
        definition: ComponentDefinition,
        curried: Option<ResolvedCurry>,
    ) {
        let mut instance = ComponentInstance::new(definition);
        instance.curried = curried;
        self.inner
            .stack
            .push(StackValue::Component(Rc::new(RefCell::new(instance))));
    }

    /// Turn the value of a `{{component}}` expression into something
    /// `PushDynamicComponentInstance` accepts
    pub(super) fn resolve_dynamic_component(&mut self) -> Result<(), RenderError> {
        let value = value_for_ref(&self.pop_reference()?)?;
        let resolved = match value {
            Value::String(name) => Value::Component(self.rt.env.resolver().lookup_component(&name)?),
            Value::Component(_) => value,
            Value::Curried(ref curried) if curried.kind() == CurriedKind::Component => value,
            other => return Err(missing_component(&other)),
        };
        self.inner.stack.push(StackValue::Value(resolved));
        Ok(())
    }

    /// Content-position variant: the value already classified as a component
    pub(super) fn resolve_curried_component(&mut self) -> Result<(), RenderError> {
        let value = value_for_ref(&self.pop_reference()?)?;
        match &value {
            Value::Component(_) => {}
            Value::Curried(curried) if curried.kind() == CurriedKind::Component => {}
            other => return Err(missing_component(other)),
        }
        self.inner.stack.push(StackValue::Value(value));
        Ok(())
    }

    pub(super) fn push_dynamic_component_instance(&mut self) -> Result<(), RenderError> {
        let value = self.inner.stack.pop().as_value()?;
        let resolver = self.rt.env.resolver();
        match value {
            Value::Component(definition) => self.push_component_instance(definition, None),
            Value::String(name) => {
                let definition = resolver.lookup_component(&name)?;
                self.push_component_instance(definition, None);
            }
            Value::Curried(curried) => {
                let resolved = resolve_curried_value(&curried);
                let definition = match &resolved.definition {
                    Value::Component(definition) => definition.clone(),
                    Value::String(name) => resolver.lookup_component(name)?,
                    other => return Err(missing_component(other)),
                };
                self.push_component_instance(definition, Some(resolved));
            }
            other => return Err(missing_component(&other)),
        }
        Ok(())
    }

    // ===== Arguments =====

    /// Merge curried arguments and let the manager rewrite the arguments;
    /// the stack region is rebuilt only when either changed something
    pub(super) fn prepare_args(&mut self, register: i32) -> Result<(), RenderError> {
        let instance = self.component(register)?;
        let layout = self.inner.stack.pop().as_args()?;
        let mut args = layout.capture(&self.inner.stack)?;
        let mut rewritten = false;

        let (curried, capabilities, manager) = {
            let mut instance = instance.borrow_mut();
            (
                instance.curried.take(),
                instance.capabilities,
                instance.manager.clone(),
            )
        };
        if let Some(curried) = curried {
            args = curried.merge(&args);
            rewritten = true;
        }
        if capabilities.prepare_args {
            if let Some(prepared) = manager.prepare_args(&args)? {
                args = CapturedArguments::new(
                    prepared.positional,
                    prepared
                        .named
                        .into_iter()
                        .map(|(name, reference)| (Rc::from(name), reference))
                        .collect(),
                );
                rewritten = true;
            }
        }

        if !rewritten {
            self.inner.stack.push(StackValue::Args(layout));
            return Ok(());
        }

        let mut values = layout.block_slots(&self.inner.stack)?;
        values.extend(args.positional.iter().cloned().map(StackValue::Ref));
        values.extend(args.named.iter().map(|(_, reference)| StackValue::Ref(reference.clone())));
        self.inner.stack.replace_from(layout.base, values);

        let names: Rc<[Rc<str>]> = args.named.iter().map(|(name, _)| name.clone()).collect();
        let prepared = ArgsLayout::setup(
            &self.inner.stack,
            names,
            layout.block_names.clone(),
            args.positional.len(),
        )?;
        self.inner.stack.push(StackValue::Args(prepared));
        Ok(())
    }

    // ===== Lifecycle =====

    /// Open the cache group around a component invocation
    ///
    /// The guard is patched with its skip target and the tag of everything
    /// consumed inside the group when the transaction commits.
    pub(super) fn begin_component_transaction(&mut self) -> Result<(), RenderError> {
        let guard = self.update_with(UpdatingOpcode::JumpIfNotModified(JumpIfNotModifiedOpcode {
            tag: Tag::Constant,
            last_revision: 0,
            target: 0,
        }))?;
        self.update_with(UpdatingOpcode::BeginTrackFrame)?;
        self.cache.push(guard);
        begin_track_frame();
        self.builder.push_simple_block(&mut self.rt.dom)?;
        Ok(())
    }

    pub(super) fn commit_component_transaction(&mut self) -> Result<(), RenderError> {
        let guard = self
            .cache
            .pop()
            .ok_or_else(|| RenderError::invariant("no component transaction is open"))?;
        let tag = end_track_frame();
        self.update_with(UpdatingOpcode::EndTrackFrame { guard })?;
        let target = self.current_updating()?.len();
        match self.rt.opcodes.get_mut(guard)? {
            UpdatingOpcode::JumpIfNotModified(guard) => {
                guard.target = target;
                guard.did_modify(tag);
                Ok(())
            }
            other => Err(RenderError::invariant(format!(
                "cache group guard is a {}",
                other.name()
            ))),
        }
    }

    pub(super) fn create_component(
        &mut self,
        has_default_block: bool,
        register: i32,
    ) -> Result<(), RenderError> {
        let instance = self.component(register)?;
        let (manager, capabilities) = {
            let instance = instance.borrow();
            (instance.manager.clone(), instance.capabilities)
        };

        let layout = self.inner.stack.peek(0).as_args()?;
        let captured = layout.capture(&self.inner.stack)?;
        let dynamic_scope = if capabilities.dynamic_scope {
            Some(self.dynamic_scope()?.clone())
        } else {
            None
        };
        let caller = if capabilities.create_caller {
            Some(self.scope()?.get_self())
        } else {
            None
        };
        let args = capabilities.create_args.then_some(&captured);

        let state = manager.create(
            args,
            dynamic_scope.as_ref(),
            caller.as_ref(),
            has_default_block,
        )?;
        instance.borrow_mut().state = Some(state.clone());

        if capabilities.update_hook {
            // the guard only lets the update through when an argument changed
            captured.positional_values()?;
            captured.named_values()?;
            self.update_with(UpdatingOpcode::UpdateComponent(UpdateComponentOpcode {
                manager,
                state,
                dynamic_scope,
            }))?;
        }
        Ok(())
    }

    pub(super) fn register_component_destructor(&mut self, register: i32) -> Result<(), RenderError> {
        let instance = self.component(register)?;
        let (manager, state, capabilities) = {
            let instance = instance.borrow();
            (instance.manager.clone(), instance.state(), instance.capabilities)
        };
        if capabilities.will_destroy {
            self.associate_destructor(Destructor::Callback(Box::new(move || {
                manager.will_destroy(&state)
            })))?;
        }
        Ok(())
    }

    pub(super) fn get_component_self(&mut self, register: i32) -> Result<(), RenderError> {
        let instance = self.component(register)?;
        let (manager, state, name) = {
            let instance = instance.borrow();
            (
                instance.manager.clone(),
                instance.state(),
                instance.definition.name().to_string(),
            )
        };
        let self_ref = manager.get_self(&state);

        if self.rt.debug_tree.is_some() {
            let args = self.inner.stack.peek(0).as_args()?.capture(&self.inner.stack)?;
            let node = match &mut self.rt.debug_tree {
                Some(tree) => tree.create(RenderNodeKind::Component, name, args),
                None => return Err(RenderError::invariant("debug render tree disappeared")),
            };
            instance.borrow_mut().debug_node = Some(node);
            self.associate_destructor(Destructor::DebugNode(node))?;
            self.update_with(UpdatingOpcode::DebugRenderTreeUpdate { node })?;
        }

        self.inner.stack.push(StackValue::Ref(self_ref));
        Ok(())
    }

    pub(super) fn get_component_layout(&mut self, register: i32) -> Result<(), RenderError> {
        let instance = self.component(register)?;
        let mut instance = instance.borrow_mut();
        let layout = instance.definition.layout().cloned().ok_or_else(|| {
            RenderError::invariant(format!(
                "component {} has no layout",
                instance.definition.name()
            ))
        })?;
        instance.handle = Some(layout.handle);
        instance.table = Some(layout.table);
        Ok(())
    }

    // ===== Layout =====

    /// Fresh scope for the layout, sized by its symbol table
    pub(super) fn virtual_root_scope(&mut self, register: i32) -> Result<(), RenderError> {
        let instance = self.component(register)?;
        let size = instance
            .borrow()
            .table
            .as_ref()
            .map(|table| table.scope_size())
            .ok_or_else(|| RenderError::invariant("layout scope before GetComponentLayout"))?;
        let owner = self.scope()?.owner().clone();
        self.scopes.push(Scope::sized(size, owner));
        Ok(())
    }

    /// Bind `@name` arguments into the layout scope
    pub(super) fn set_named_variables(&mut self, register: i32) -> Result<(), RenderError> {
        let instance = self.component(register)?;
        let (table, lookup) = {
            let instance = instance.borrow();
            (instance.table.clone(), instance.lookup.clone())
        };
        let table = table.ok_or_else(|| RenderError::invariant("named arguments before GetComponentLayout"))?;
        let layout = self.inner.stack.peek(0).as_args()?;

        for name in layout.names.iter().rev() {
            let at_name = format!("@{}", name);
            let reference = layout
                .named(&self.inner.stack, name)?
                .unwrap_or_else(Reference::null);
            if let Some(slot) = table.slot_of(&at_name) {
                self.scope_mut()?.bind_symbol(slot as usize, reference.clone());
            }
            if let Some(lookup) = &lookup {
                lookup.borrow_mut().insert(at_name, reference);
            }
        }
        Ok(())
    }

    /// Bind `&name` blocks into the layout scope
    pub(super) fn set_blocks(&mut self, register: i32) -> Result<(), RenderError> {
        let instance = self.component(register)?;
        let table = instance
            .borrow()
            .table
            .clone()
            .ok_or_else(|| RenderError::invariant("blocks before GetComponentLayout"))?;
        let layout = self.inner.stack.peek(0).as_args()?;

        for name in layout.block_names.iter() {
            if let Some(slot) = table.slot_of(&format!("&{}", name)) {
                let block = layout.block(&self.inner.stack, name)?;
                self.scope_mut()?.bind_block(slot as usize, block);
            }
        }
        Ok(())
    }

    pub(super) fn invoke_component_layout(&mut self, register: i32) -> Result<(), RenderError> {
        let handle = self
            .component(register)?
            .borrow()
            .handle
            .ok_or_else(|| RenderError::invariant("layout invoked before GetComponentLayout"))?;
        self.inner.call(handle)
    }

    pub(super) fn did_render_layout(&mut self, register: i32) -> Result<(), RenderError> {
        let instance = self.component(register)?;
        let (manager, state, capabilities, debug_node) = {
            let instance = instance.borrow();
            (
                instance.manager.clone(),
                instance.state(),
                instance.capabilities,
                instance.debug_node,
            )
        };
        let block = self.builder.pop_block(&mut self.rt.dom)?;
        let bounds = self.rt.dom.blocks.bounds(block)?;

        if let Some(node) = debug_node {
            if let Some(tree) = &mut self.rt.debug_tree {
                tree.did_render(node, bounds)?;
            }
            self.update_with(UpdatingOpcode::DebugRenderTreeDidRender { node, block })?;
        }

        if capabilities.create_instance {
            manager.did_render_layout(&state, bounds);
            self.rt.did_create(manager.clone(), state.clone())?;
            self.update_with(UpdatingOpcode::DidUpdateLayout(DidUpdateLayoutOpcode {
                manager,
                state,
                block,
            }))?;
        }
        Ok(())
    }

    // ===== Blocks =====

    /// Call the block left by `GetBlock`, binding its parameters from the
    /// positional arguments below it; with no block the current scope is
    /// pushed so the trailing `PopScope` balances
    pub(super) fn invoke_yield(&mut self) -> Result<(), RenderError> {
        let handle = self.inner.stack.pop();
        let scope = self.inner.stack.pop();
        let table = self.inner.stack.pop();
        let args = self.inner.stack.pop().as_args()?;

        if handle.is_null() {
            let current = self.scope()?.clone();
            self.scopes.push(current);
            return Ok(());
        }

        let table = table.as_table()?;
        let mut invoking = scope.as_scope()?.child();
        for (i, slot) in table.parameters.iter().enumerate() {
            let reference = args.positional(&self.inner.stack, i)?;
            invoking.bind_symbol(*slot as usize, reference);
        }
        self.scopes.push(invoking);

        let handle = usize::try_from(handle.as_int()?)
            .map_err(|_| RenderError::invariant("negative block handle"))?;
        self.inner.call(handle)
    }
}
