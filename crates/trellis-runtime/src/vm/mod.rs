//! Append VM
//!
//! Runs a compiled program once, building DOM through the element builder
//! and recording updating opcodes for every place the output depends on a
//! reference. Machine opcodes go to the low-level machine; everything else
//! is a syscall handled here.
//! - Scopes and dynamic scopes are stacks pushed and popped by opcodes
//! - Every updatable region captures a `ResumableState` so it can be rebuilt
//! - Destroyables mirror the region nesting

mod components;
pub mod low_level;
pub mod stack;
mod syscalls;

pub use low_level::LowLevelVM;

use crate::builder::ElementBuilder;
use crate::component::ComponentInstance;
use crate::destroyable::{DestroyableId, Destructor};
use crate::error::RenderError;
use crate::iterable::IterationItem;
use crate::opcodes::{BlockOpcode, ListItemOpcode, ResumableState, UpdatingOpcode};
use crate::program::{OpKind, Opcode, TemplateRef};
use crate::reference::Reference;
use crate::render::RenderResult;
use crate::runtime::{OpId, Runtime};
use crate::scope::{DynamicScope, EvalScope, Scope};
use crate::value::Value;
use stack::{EvaluationStack, Register, StackValue};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{instrument, trace};

/// Opcodes recorded while a region is open
struct UpdatingList {
    /// Block opcode that receives the list as its children when it closes
    owner: Option<OpId>,
    ops: Vec<OpId>,
}

pub struct AppendVM<'rt> {
    rt: &'rt mut Runtime,
    /// Stack, `$pc`, `$ra` and `$fp`
    inner: LowLevelVM,
    /// `$s0`, `$s1`, `$t0`, `$t1` and `$v0`
    registers: [StackValue; 5],
    builder: ElementBuilder,
    scopes: Vec<Scope>,
    dynamic_scopes: Vec<DynamicScope>,
    updating: Vec<UpdatingList>,
    /// Destroyable of the innermost open region
    destructors: Vec<DestroyableId>,
    /// Open list blocks
    lists: Vec<OpId>,
    /// Guards of open cache groups
    cache: Vec<OpId>,
    root: DestroyableId,
}

impl<'rt> AppendVM<'rt> {
    fn new(
        rt: &'rt mut Runtime,
        stack: EvaluationStack,
        scope: Scope,
        dynamic_scope: DynamicScope,
        builder: ElementBuilder,
        root: DestroyableId,
    ) -> Self {
        let program = rt.program.clone();
        Self {
            rt,
            inner: LowLevelVM::new(stack, program),
            registers: Default::default(),
            builder,
            scopes: vec![scope],
            dynamic_scopes: vec![dynamic_scope],
            updating: Vec::new(),
            destructors: vec![root],
            lists: Vec::new(),
            cache: Vec::new(),
            root,
        }
    }

    /// A VM positioned at the start of `template` with `self_ref` as `this`
    pub(crate) fn initial(
        rt: &'rt mut Runtime,
        template: &TemplateRef,
        self_ref: Reference,
        builder: ElementBuilder,
        root: DestroyableId,
    ) -> Result<Self, RenderError> {
        let mut scope = Scope::root(self_ref, template.table.scope_size(), Value::Null);
        if template.table.has_eval {
            scope.bind_eval_scope(EvalScope::default());
        }
        let stack = EvaluationStack::new(rt.options.stack_capacity);
        let address = rt.program.getaddr(template.handle)?;
        let mut vm = Self::new(rt, stack, scope, DynamicScope::new(), builder, root);
        vm.inner.set_pc(address as isize);
        vm.push_updating(None);
        Ok(vm)
    }

    /// A VM that continues from a captured state inside `destroyable`
    ///
    /// The caller pushes the updating lists the resumed code writes into.
    pub(crate) fn resume(
        rt: &'rt mut Runtime,
        state: &ResumableState,
        builder: ElementBuilder,
        destroyable: DestroyableId,
    ) -> Self {
        let stack = EvaluationStack::restore(state.stack.clone());
        let mut vm = Self::new(
            rt,
            stack,
            state.scope.clone(),
            state.dynamic_scope.clone(),
            builder,
            destroyable,
        );
        vm.inner.set_pc(state.pc);
        vm
    }

    /// Run until the machine returns to address -1
    #[instrument(skip_all, level = "debug")]
    pub fn execute(mut self) -> Result<RenderResult, RenderError> {
        if let Err(err) = self.run() {
            self.builder.close_all_blocks(&mut self.rt.dom);
            return Err(err);
        }
        self.inner.stack.reset();
        let updating = self.pop_updating()?.ops;
        let block = self.builder.pop_block(&mut self.rt.dom)?;
        let drop = self.destructors.pop().unwrap_or(self.root);
        Ok(RenderResult::new(updating, block, drop))
    }

    fn run(&mut self) -> Result<(), RenderError> {
        while let Some(opcode) = self.inner.next_statement()? {
            trace!(pc = opcode.offset, op = %opcode.kind, sp = self.inner.stack.sp(), "append");
            let result = match opcode.kind {
                OpKind::Machine(op) => self.inner.evaluate_machine(op, &opcode),
                OpKind::Syscall(op) => self.evaluate_syscall(op, &opcode),
            };
            result.map_err(|err| {
                err.with_location(opcode.offset as isize, self.inner.stack.sp(), &opcode.name())
            })?;
        }
        Ok(())
    }

    // ===== Registers and stacks =====

    fn register(operand: i32) -> Result<Register, RenderError> {
        Register::from_i32(operand)
    }

    fn fetch_value(&self, register: Register) -> Result<StackValue, RenderError> {
        match register.scratch_index() {
            Some(index) => Ok(self.registers[index].clone()),
            None => Ok(StackValue::Int(self.inner.fetch_register(register)? as i64)),
        }
    }

    fn load_value(&mut self, register: Register, value: StackValue) -> Result<(), RenderError> {
        match register.scratch_index() {
            Some(index) => {
                self.registers[index] = value;
                Ok(())
            }
            None => self.inner.load_register(register, value.as_int()? as isize),
        }
    }

    fn set_v0(&mut self, value: StackValue) {
        if let Some(index) = Register::V0.scratch_index() {
            self.registers[index] = value;
        }
    }

    /// Component instance held in the register named by `operand`
    fn component(&self, operand: i32) -> Result<Rc<RefCell<ComponentInstance>>, RenderError> {
        self.fetch_value(Self::register(operand)?)?.as_component()
    }

    fn pop_reference(&mut self) -> Result<Reference, RenderError> {
        self.inner.stack.pop().as_reference()
    }

    fn peek_reference(&self) -> Result<Reference, RenderError> {
        self.inner.stack.peek(0).as_reference()
    }

    fn scope(&self) -> Result<&Scope, RenderError> {
        self.scopes
            .last()
            .ok_or_else(|| RenderError::invariant("scope stack is empty"))
    }

    fn scope_mut(&mut self) -> Result<&mut Scope, RenderError> {
        self.scopes
            .last_mut()
            .ok_or_else(|| RenderError::invariant("scope stack is empty"))
    }

    fn dynamic_scope(&self) -> Result<&DynamicScope, RenderError> {
        self.dynamic_scopes
            .last()
            .ok_or_else(|| RenderError::invariant("dynamic scope stack is empty"))
    }

    // ===== Updating opcodes =====

    pub(crate) fn push_updating(&mut self, owner: Option<OpId>) {
        self.updating.push(UpdatingList {
            owner,
            ops: Vec::new(),
        });
    }

    fn pop_updating(&mut self) -> Result<UpdatingList, RenderError> {
        self.updating
            .pop()
            .ok_or_else(|| RenderError::invariant("updating list stack is empty"))
    }

    fn current_updating(&mut self) -> Result<&mut Vec<OpId>, RenderError> {
        self.updating
            .last_mut()
            .map(|list| &mut list.ops)
            .ok_or_else(|| RenderError::invariant("updating list stack is empty"))
    }

    /// Record an updating opcode in the innermost region
    fn update_with(&mut self, op: UpdatingOpcode) -> Result<OpId, RenderError> {
        let id = self.rt.opcodes.alloc(op);
        self.current_updating()?.push(id);
        Ok(id)
    }

    /// Close the innermost updating list, handing it to its owner
    fn close_updating(&mut self) -> Result<(), RenderError> {
        let list = self.pop_updating()?;
        if let Some(owner) = list.owner {
            let op = self.rt.opcodes.get_mut(owner)?;
            let name = op.name();
            op.block_mut()
                .ok_or_else(|| RenderError::invariant(format!("{} cannot own children", name)))?
                .children = list.ops;
        }
        Ok(())
    }

    // ===== Destroyables =====

    fn destroyable(&self) -> Result<DestroyableId, RenderError> {
        self.destructors
            .last()
            .copied()
            .ok_or_else(|| RenderError::invariant("destroyable stack is empty"))
    }

    /// A new destroyable owned by the innermost region
    fn child_destroyable(&mut self) -> Result<DestroyableId, RenderError> {
        let parent = self.destroyable()?;
        Ok(self.rt.destroyables.create(Some(parent)))
    }

    /// Tie `destructor` to the innermost region through a destroyable of its
    /// own, so rebuilding the region runs it
    fn associate_destructor(&mut self, destructor: Destructor) -> Result<(), RenderError> {
        let id = self.child_destroyable()?;
        self.rt.destroyables.register_destructor(id, destructor);
        Ok(())
    }

    // ===== Regions =====

    /// Snapshot that resumes after the current instruction with the top `n`
    /// stack values
    fn capture(&self, n: usize) -> Result<ResumableState, RenderError> {
        Ok(ResumableState {
            pc: self.inner.pc(),
            scope: self.scope()?.clone(),
            dynamic_scope: self.dynamic_scope()?.clone(),
            stack: self.inner.stack.capture(n),
        })
    }

    fn did_enter(&mut self, id: OpId, destroyable: DestroyableId) -> Result<(), RenderError> {
        self.destructors.push(destroyable);
        self.current_updating()?.push(id);
        self.push_updating(Some(id));
        Ok(())
    }

    fn enter(&mut self, args: usize) -> Result<(), RenderError> {
        let state = self.capture(args)?;
        let block = self.builder.push_updatable_block(&mut self.rt.dom)?;
        let destroyable = self.child_destroyable()?;
        let id = self.rt.opcodes.alloc(UpdatingOpcode::Try(BlockOpcode {
            state,
            block,
            children: Vec::new(),
            destroyable,
        }));
        self.did_enter(id, destroyable)
    }

    fn exit(&mut self) -> Result<(), RenderError> {
        self.destructors.pop();
        self.builder.pop_block(&mut self.rt.dom)?;
        self.close_updating()
    }

    /// Open the region of one list item; its value and memo are pushed and
    /// retained so the item can be rebuilt on its own
    pub(crate) fn enter_item(&mut self, item: IterationItem) -> Result<OpId, RenderError> {
        let value = Reference::root(item.value);
        let memo = Reference::root(item.memo);
        self.inner.stack.push(StackValue::Ref(value.clone()));
        self.inner.stack.push(StackValue::Ref(memo.clone()));
        let state = self.capture(2)?;
        let block = self.builder.push_updatable_block(&mut self.rt.dom)?;
        let destroyable = self.child_destroyable()?;
        let id = self.rt.opcodes.alloc(UpdatingOpcode::ListItem(ListItemOpcode {
            inner: BlockOpcode {
                state,
                block,
                children: Vec::new(),
                destroyable,
            },
            key: item.key,
            value,
            memo,
            retained: false,
            index: 0,
        }));
        self.did_enter(id, destroyable)?;
        Ok(id)
    }

    /// Index a freshly entered item in the innermost list
    fn register_item(&mut self, id: OpId, index: usize) -> Result<(), RenderError> {
        let list_id = *self
            .lists
            .last()
            .ok_or_else(|| RenderError::invariant("iterating outside a list"))?;
        let (key, item_block) = match self.rt.opcodes.get_mut(id)? {
            UpdatingOpcode::ListItem(item) => {
                item.index = index;
                (item.key.clone(), item.inner.block)
            }
            other => {
                return Err(RenderError::invariant(format!(
                    "expected a list item, found {}",
                    other.name()
                )))
            }
        };
        let list_block = match self.rt.opcodes.get_mut(list_id)? {
            UpdatingOpcode::ListBlock(list) => {
                list.items.insert(key, id);
                list.inner.block
            }
            other => {
                return Err(RenderError::invariant(format!(
                    "expected a list block, found {}",
                    other.name()
                )))
            }
        };
        self.rt.dom.blocks.push_list_item(list_block, item_block);
        Ok(())
    }

    /// Eval scope of the innermost scope, creating one for `instance` when
    /// its layout needs it
    fn setup_for_eval(&mut self, instance: &mut ComponentInstance) -> Result<(), RenderError> {
        let needs_eval = instance.table.as_ref().map_or(false, |table| table.has_eval);
        if needs_eval {
            let lookup: EvalScope = Rc::new(RefCell::new(BTreeMap::new()));
            instance.lookup = Some(lookup.clone());
            self.scope_mut()?.bind_eval_scope(lookup);
        }
        Ok(())
    }
}
