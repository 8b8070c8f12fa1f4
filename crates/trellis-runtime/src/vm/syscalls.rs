//! Syscall dispatch for the append VM

use super::stack::StackValue;
use super::AppendVM;
use crate::arguments::ArgsLayout;
use crate::builder::RemoteInsertion;
use crate::curry::{create_curry_ref, CurriedKind};
use crate::destroyable::Destructor;
use crate::error::RenderError;
use crate::helper::{dynamic_helper_ref, invoke_helper};
use crate::iterable::ListIterator;
use crate::modifier::{resolve_modifier_value, ModifierInstance};
use crate::opcodes::{
    AssertFilterOpcode, AssertOpcode, BlockOpcode, DynamicAttrOpcode, DynamicTextOpcode, Filter,
    ListBlockOpcode, UpdateDynamicModifierOpcode, UpdateModifierOpcode, UpdatingOpcode,
};
use crate::program::{Opcode, SysOp};
use crate::reference::{
    child_ref_for, create_compute_ref, is_const_ref, value_for_ref, Reference,
};
use crate::validator::value_for_tag;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

fn operand_usize(value: i32) -> Result<usize, RenderError> {
    usize::try_from(value).map_err(|_| RenderError::invariant(format!("negative operand {}", value)))
}

impl<'rt> AppendVM<'rt> {
    pub(super) fn evaluate_syscall(&mut self, op: SysOp, opcode: &Opcode) -> Result<(), RenderError> {
        let program = self.inner.program().clone();
        match op {
            // ===== Stack =====
            SysOp::Pop => {
                self.inner.stack.pop_n(operand_usize(opcode.op1)?);
            }
            SysOp::Load => {
                let value = self.inner.stack.pop();
                self.load_value(Self::register(opcode.op1)?, value)?;
            }
            SysOp::Fetch => {
                let value = self.fetch_value(Self::register(opcode.op1)?)?;
                self.inner.stack.push(value);
            }
            SysOp::Dup => {
                let base = self.inner.fetch_register(Self::register(opcode.op1)?)?;
                self.inner.stack.dup(base - opcode.op2 as isize);
            }
            SysOp::Primitive => {
                let value = program.value(opcode.op1)?.clone();
                self.inner.stack.push(StackValue::Value(value));
            }
            SysOp::PrimitiveReference => {
                let value = self.inner.stack.pop().as_value()?;
                self.inner.stack.push(StackValue::Ref(Reference::constant(value)));
            }
            SysOp::PushSymbolTable => {
                let table = program.block_table(opcode.op1)?.clone();
                self.inner.stack.push(StackValue::Table(table));
            }
            SysOp::PushBlockScope => {
                let scope = self.scope()?.clone();
                self.inner.stack.push(StackValue::Scope(scope));
            }
            SysOp::PushHandle => self.inner.stack.push(StackValue::Int(opcode.op1 as i64)),

            // ===== Variables =====
            SysOp::GetVariable => {
                let reference = self.scope()?.get_symbol(operand_usize(opcode.op1)?);
                self.inner.stack.push(StackValue::Ref(reference));
            }
            SysOp::SetVariable => {
                let reference = self.pop_reference()?;
                self.scope_mut()?.bind_symbol(operand_usize(opcode.op1)?, reference);
            }
            SysOp::GetBlock => match self.scope()?.get_block(operand_usize(opcode.op1)?) {
                Some(block) => {
                    self.inner.stack.push(StackValue::Table(block.table));
                    self.inner.stack.push(StackValue::Scope(block.scope));
                    self.inner.stack.push(StackValue::Int(block.handle as i64));
                }
                None => {
                    for _ in 0..3 {
                        self.inner.stack.push(StackValue::Null);
                    }
                }
            },
            SysOp::HasBlock => {
                let handle = self.inner.stack.pop_n(3);
                let present = !handle.is_null();
                self.inner.stack.push(StackValue::Ref(Reference::constant(present)));
            }
            SysOp::GetProperty => {
                let key = program.string(opcode.op1)?.clone();
                let parent = self.pop_reference()?;
                self.inner.stack.push(StackValue::Ref(child_ref_for(&parent, &key)));
            }
            SysOp::ResolveMaybeLocal => {
                let name = program.string(opcode.op1)?;
                let scope = self.scope()?;
                let reference = scope
                    .lookup_local(name)
                    .unwrap_or_else(|| child_ref_for(&scope.get_self(), name));
                self.inner.stack.push(StackValue::Ref(reference));
            }

            // ===== Scopes =====
            SysOp::VirtualRootScope => self.virtual_root_scope(opcode.op1)?,
            SysOp::ChildScope => {
                let child = self.scope()?.child();
                self.scopes.push(child);
            }
            SysOp::PopScope => {
                self.scopes
                    .pop()
                    .ok_or_else(|| RenderError::invariant("scope stack is empty"))?;
            }
            SysOp::SetNamedVariables => self.set_named_variables(opcode.op1)?,
            SysOp::SetBlocks => self.set_blocks(opcode.op1)?,
            SysOp::SetupForEval => {
                let instance = self.component(opcode.op1)?;
                let mut instance = instance.borrow_mut();
                self.setup_for_eval(&mut instance)?;
            }
            SysOp::BindDynamicScope => {
                let names = program.strings(opcode.op1)?;
                for name in names.iter().rev() {
                    let reference = self.pop_reference()?;
                    self.dynamic_scope()?.set(name, reference);
                }
            }
            SysOp::GetDynamicVar => {
                let name_ref = self.pop_reference()?;
                let scope = self.dynamic_scope()?.clone();
                let reference = if is_const_ref(&name_ref) {
                    scope.get(&value_for_ref(&name_ref)?.to_text())
                } else {
                    create_compute_ref(move || {
                        let name = value_for_ref(&name_ref)?.to_text();
                        value_for_ref(&scope.get(&name))
                    })
                };
                self.inner.stack.push(StackValue::Ref(reference));
            }
            SysOp::PushDynamicScope => {
                let child = self.dynamic_scope()?.child();
                self.dynamic_scopes.push(child);
            }
            SysOp::PopDynamicScope => {
                self.dynamic_scopes
                    .pop()
                    .ok_or_else(|| RenderError::invariant("dynamic scope stack is empty"))?;
            }

            // ===== Expressions =====
            SysOp::Concat => {
                let count = operand_usize(opcode.op1)?;
                let mut parts = Vec::with_capacity(count);
                for _ in 0..count {
                    parts.push(self.pop_reference()?);
                }
                parts.reverse();
                let reference = create_compute_ref(move || {
                    let mut text = String::new();
                    let mut any = false;
                    for part in &parts {
                        let value = value_for_ref(part)?;
                        if !value.is_null() {
                            any = true;
                            text.push_str(&value.to_text());
                        }
                    }
                    Ok(if any { Value::from(text) } else { Value::Null })
                });
                self.inner.stack.push(StackValue::Ref(reference));
            }
            SysOp::ToBoolean => {
                let reference = self.pop_reference()?;
                let to_bool = self.rt.env.to_bool;
                let result = if is_const_ref(&reference) {
                    Reference::constant(to_bool(&value_for_ref(&reference)?))
                } else {
                    create_compute_ref(move || Ok(Value::Bool(to_bool(&value_for_ref(&reference)?))))
                };
                self.inner.stack.push(StackValue::Ref(result));
            }
            SysOp::Helper => {
                let definition = program.helper(opcode.op1)?;
                let layout = self.inner.stack.pop().as_args()?;
                let args = Rc::new(layout.capture(&self.inner.stack)?);
                let (reference, destructor) = invoke_helper(definition, args)?;
                if let Some(destructor) = destructor {
                    self.associate_destructor(Destructor::Callback(destructor))?;
                }
                self.set_v0(StackValue::Ref(reference));
            }
            SysOp::DynamicHelper => {
                let definition = self.pop_reference()?;
                let layout = self.inner.stack.pop().as_args()?;
                let args = Rc::new(layout.capture(&self.inner.stack)?);
                let (reference, destructor) =
                    dynamic_helper_ref(definition, args, self.rt.env.resolver());
                self.associate_destructor(Destructor::Callback(destructor))?;
                self.set_v0(StackValue::Ref(reference));
            }
            SysOp::Curry => {
                let kind = CurriedKind::from_i32(opcode.op1)?;
                let definition = self.pop_reference()?;
                let args = self.inner.stack.pop().as_captured()?;
                let owner = self.scope()?.owner().clone();
                let reference = create_curry_ref(
                    kind,
                    definition,
                    owner,
                    Some(Rc::try_unwrap(args).unwrap_or_else(|shared| (*shared).clone())),
                    self.rt.env.resolver(),
                );
                self.set_v0(StackValue::Ref(reference));
            }

            // ===== Control flow =====
            SysOp::Enter => self.enter(operand_usize(opcode.op1)?)?,
            SysOp::Exit => self.exit()?,
            SysOp::JumpIf | SysOp::JumpUnless => {
                let reference = self.pop_reference()?;
                let value = value_for_ref(&reference)?;
                if value.truthy() == (op == SysOp::JumpIf) {
                    self.inner.goto(opcode.op1);
                }
                if !is_const_ref(&reference) {
                    self.update_with(UpdatingOpcode::Assert(AssertOpcode {
                        reference,
                        last: value,
                    }))?;
                }
            }
            SysOp::JumpEq => {
                if self.inner.stack.peek(0).as_int()? == opcode.op2 as i64 {
                    self.inner.goto(opcode.op1);
                }
            }
            SysOp::AssertSame => {
                let reference = self.peek_reference()?;
                let value = value_for_ref(&reference)?;
                if !is_const_ref(&reference) {
                    self.update_with(UpdatingOpcode::Assert(AssertOpcode {
                        reference,
                        last: value,
                    }))?;
                }
            }
            SysOp::ContentType => {
                let reference = self.peek_reference()?;
                let content_type = Filter::ContentType.apply(&value_for_ref(&reference)?)?;
                self.inner.stack.push(StackValue::Int(content_type));
                if !is_const_ref(&reference) {
                    self.update_with(UpdatingOpcode::AssertFilter(AssertFilterOpcode {
                        reference,
                        filter: Filter::ContentType,
                        last: content_type,
                    }))?;
                }
            }
            SysOp::EnterList => self.enter_list(opcode.op1, opcode.op2)?,
            SysOp::ExitList => {
                self.exit()?;
                self.lists.pop();
            }
            SysOp::Iterate => {
                let iterator = self.inner.stack.peek(0).as_iterator()?;
                let next = iterator.borrow_mut().next();
                match next {
                    Some(item) => {
                        let index = self.current_updating()?.len();
                        let id = self.enter_item(item)?;
                        self.register_item(id, index)?;
                    }
                    None => self.inner.goto(opcode.op1),
                }
            }

            // ===== DOM =====
            SysOp::Text => {
                let text = program.string(opcode.op1)?;
                self.builder.append_text(&mut self.rt.dom, text)?;
            }
            SysOp::Comment => {
                let text = program.string(opcode.op1)?;
                self.builder.append_comment(&mut self.rt.dom, text)?;
            }
            SysOp::OpenElement => {
                let tag = program.string(opcode.op1)?;
                self.builder.open_element(&mut self.rt.dom, tag)?;
            }
            SysOp::FlushElement => self.builder.flush_element(&mut self.rt.dom)?,
            SysOp::CloseElement => {
                for modifier in self.builder.close_element(&mut self.rt.dom)? {
                    self.rt.schedule_install_modifier(modifier)?;
                }
            }
            SysOp::StaticAttr => {
                let name = program.string(opcode.op1)?;
                let value = program.string(opcode.op2)?;
                let namespace = program.optional_string(opcode.op3)?;
                self.builder.set_static_attribute(
                    &mut self.rt.dom,
                    name,
                    value,
                    namespace.map(|ns| &**ns),
                )?;
            }
            SysOp::DynamicAttr => {
                let name = program.string(opcode.op1)?;
                let trusting = opcode.op2 != 0;
                let namespace = program.optional_string(opcode.op3)?.cloned();
                let reference = self.pop_reference()?;
                let value = value_for_ref(&reference)?;
                let attribute = self.builder.set_dynamic_attribute(
                    &mut self.rt.dom,
                    name,
                    &value,
                    trusting,
                    namespace,
                )?;
                if !is_const_ref(&reference) {
                    let last_revision = value_for_tag(&reference.tag());
                    self.update_with(UpdatingOpcode::DynamicAttr(DynamicAttrOpcode {
                        attribute,
                        reference,
                        last_revision,
                    }))?;
                }
            }
            SysOp::AppendText => {
                let reference = self.pop_reference()?;
                let value = value_for_ref(&reference)?;
                let node = self
                    .builder
                    .append_dynamic_text(&mut self.rt.dom, &value.to_text())?;
                if !is_const_ref(&reference) {
                    self.update_with(UpdatingOpcode::DynamicText(DynamicTextOpcode {
                        node,
                        reference,
                        last: value,
                    }))?;
                }
            }
            SysOp::AppendHTML | SysOp::AppendSafeHTML => {
                let value = value_for_ref(&self.pop_reference()?)?;
                self.builder
                    .append_dynamic_html(&mut self.rt.dom, &value.to_text())?;
            }
            SysOp::AppendNode => {
                let value = value_for_ref(&self.pop_reference()?)?;
                match value {
                    Value::Node(node) => self.builder.append_dynamic_node(&mut self.rt.dom, node)?,
                    other => {
                        self.builder
                            .append_dynamic_text(&mut self.rt.dom, &other.to_text())?;
                    }
                }
            }
            SysOp::PushRemoteElement => self.push_remote_element(opcode.op1 != 0)?,
            SysOp::PopRemoteElement => {
                self.builder.pop_remote_element(&mut self.rt.dom)?;
            }
            SysOp::Modifier => {
                if self.rt.env.is_interactive {
                    let definition = program.modifier(opcode.op1)?.clone();
                    let layout = self.inner.stack.pop().as_args()?;
                    let args = layout.capture(&self.inner.stack)?;
                    let element = self.builder.constructing()?;
                    let instance = ModifierInstance::create(definition, element, &args)?;
                    self.install_modifier(instance)?;
                }
            }
            SysOp::DynamicModifier => {
                if self.rt.env.is_interactive {
                    self.dynamic_modifier()?;
                }
            }

            // ===== Arguments =====
            SysOp::PushArgs => {
                let names = program.strings(opcode.op1)?.clone();
                let block_names = program.strings(opcode.op2)?.clone();
                let layout = ArgsLayout::setup(
                    &self.inner.stack,
                    names,
                    block_names,
                    operand_usize(opcode.op3)?,
                )?;
                self.inner.stack.push(StackValue::Args(layout));
            }
            SysOp::PushEmptyArgs => {
                let layout = ArgsLayout::empty(&self.inner.stack);
                self.inner.stack.push(StackValue::Args(layout));
            }
            SysOp::CaptureArgs => {
                let layout = self.inner.stack.pop().as_args()?;
                let captured = layout.capture(&self.inner.stack)?;
                self.inner.stack.push(StackValue::Captured(Rc::new(captured)));
            }
            SysOp::PrepareArgs => self.prepare_args(opcode.op1)?,

            // ===== Components =====
            SysOp::PushComponentDefinition => {
                let definition = program.component(opcode.op1)?.clone();
                self.push_component_instance(definition, None);
            }
            SysOp::ResolveDynamicComponent => self.resolve_dynamic_component()?,
            SysOp::ResolveCurriedComponent => self.resolve_curried_component()?,
            SysOp::PushDynamicComponentInstance => self.push_dynamic_component_instance()?,
            SysOp::BeginComponentTransaction => self.begin_component_transaction()?,
            SysOp::CommitComponentTransaction => self.commit_component_transaction()?,
            SysOp::CreateComponent => self.create_component(opcode.op1 != 0, opcode.op2)?,
            SysOp::RegisterComponentDestructor => self.register_component_destructor(opcode.op1)?,
            SysOp::GetComponentSelf => self.get_component_self(opcode.op1)?,
            SysOp::GetComponentLayout => self.get_component_layout(opcode.op1)?,
            SysOp::InvokeComponentLayout => self.invoke_component_layout(opcode.op1)?,
            SysOp::DidRenderLayout => self.did_render_layout(opcode.op1)?,
            SysOp::InvokeYield => self.invoke_yield()?,
        }
        Ok(())
    }

    /// Open a keyed list, or jump to the inverse when it is empty
    fn enter_list(&mut self, body: i32, otherwise: i32) -> Result<(), RenderError> {
        let list = self.pop_reference()?;
        let key_ref = self.pop_reference()?;
        let key_value = value_for_ref(&key_ref)?;
        let key: Rc<str> = if key_value.is_null() {
            Rc::from("@identity")
        } else {
            Rc::from(key_value.to_text())
        };
        let value = value_for_ref(&list)?;
        let iterator = ListIterator::new(&value, &key)?;

        if !is_const_ref(&list) {
            self.update_with(UpdatingOpcode::AssertFilter(AssertFilterOpcode {
                reference: list.clone(),
                filter: Filter::IsEmpty,
                last: iterator.is_empty() as i64,
            }))?;
        }
        if iterator.is_empty() {
            self.inner.goto(otherwise);
            return Ok(());
        }

        let mut state = self.capture(0)?;
        state.pc = self.inner.target(body);
        let block = self.builder.push_block_list(&mut self.rt.dom)?;
        let destroyable = self.child_destroyable()?;
        let last_iterated = value_for_tag(&list.tag());
        let id = self.rt.opcodes.alloc(UpdatingOpcode::ListBlock(ListBlockOpcode {
            inner: BlockOpcode {
                state,
                block,
                children: Vec::new(),
                destroyable,
            },
            iterable: list,
            key,
            items: HashMap::new(),
            last_iterated,
        }));
        self.did_enter(id, destroyable)?;
        self.lists.push(id);
        self.inner
            .stack
            .push(StackValue::Iterator(Rc::new(RefCell::new(iterator))));
        Ok(())
    }

    fn push_remote_element(&mut self, has_insert_before: bool) -> Result<(), RenderError> {
        let element_ref = self.pop_reference()?;
        let before_ref = if has_insert_before {
            Some(self.pop_reference()?)
        } else {
            None
        };
        let guid_ref = self.pop_reference()?;

        let element = match value_for_ref(&element_ref)? {
            Value::Node(node) if self.rt.dom.document.is_element(node) => node,
            other => {
                return Err(RenderError::dom(format!(
                    "in-element destination must be an element, got {:?}",
                    other
                )))
            }
        };
        let insertion = match &before_ref {
            None => RemoteInsertion::Replace,
            Some(reference) => match value_for_ref(reference)? {
                Value::Null => RemoteInsertion::Before(None),
                Value::Node(node) => RemoteInsertion::Before(Some(node)),
                other => {
                    return Err(RenderError::dom(format!(
                        "in-element insertBefore must be a node or null, got {:?}",
                        other
                    )))
                }
            },
        };
        let guid = value_for_ref(&guid_ref)?.to_text();

        for reference in [Some(element_ref), before_ref, Some(guid_ref)].into_iter().flatten() {
            if !is_const_ref(&reference) {
                let last = value_for_ref(&reference)?;
                self.update_with(UpdatingOpcode::Assert(AssertOpcode { reference, last }))?;
            }
        }

        let block = self
            .builder
            .push_remote_element(&mut self.rt.dom, element, &guid, insertion)?;
        self.associate_destructor(Destructor::ClearRemote(block))
    }

    /// Attach a created modifier to the element under construction; it is
    /// installed when the element closes
    fn install_modifier(&mut self, instance: ModifierInstance) -> Result<(), RenderError> {
        self.builder.add_modifier(instance.clone());
        let last_updated = value_for_tag(&instance.tag);
        let destroyed = instance.clone();
        self.associate_destructor(Destructor::Callback(Box::new(move || destroyed.destroy())))?;
        self.update_with(UpdatingOpcode::UpdateModifier(UpdateModifierOpcode {
            instance,
            last_updated,
        }))?;
        Ok(())
    }

    fn dynamic_modifier(&mut self) -> Result<(), RenderError> {
        let definition = self.pop_reference()?;
        let layout = self.inner.stack.pop().as_args()?;
        let args = layout.capture(&self.inner.stack)?;
        let element = self.builder.constructing()?;
        let value = value_for_ref(&definition)?;
        let last_definition = value_for_tag(&definition.tag());

        let resolver = self.rt.env.resolver();
        let current = Rc::new(RefCell::new(None));
        let mut last_updated = 0;
        if let Some((resolved, merged)) = resolve_modifier_value(&value, &args, &resolver)? {
            let instance = ModifierInstance::create(resolved, element, &merged)?;
            last_updated = value_for_tag(&instance.tag);
            self.builder.add_modifier(instance.clone());
            *current.borrow_mut() = Some(instance);
        }

        let held: Rc<RefCell<Option<ModifierInstance>>> = current.clone();
        self.associate_destructor(Destructor::Callback(Box::new(move || {
            if let Some(instance) = held.borrow_mut().take() {
                instance.destroy();
            }
        })))?;
        self.update_with(UpdatingOpcode::UpdateDynamicModifier(UpdateDynamicModifierOpcode {
            definition,
            args,
            element,
            current,
            last_definition,
            last_updated,
        }))?;
        Ok(())
    }
}
