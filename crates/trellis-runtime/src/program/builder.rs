//! Program assembler
//!
//! `ProgramBuilder` owns the heap and constant pool while units are being
//! assembled. Each unit (template, component layout, inline block) is written
//! by an `Encoder` into its own buffer; jumps name a `Label` and are patched
//! to offsets relative to the jumping instruction when the unit is finished,
//! so a finished unit can be appended anywhere on the heap.
//!
//! This is an assembler, not a template compiler. The higher-level methods
//! (`if_else`, `each`, `invoke_component`, `append`, ...) emit the fixed
//! instruction sequences the VM expects for those constructs.

use super::opcode::{encode_header, MachineOp, OpKind, SysOp};
use super::{BlockRef, Constant, Program, TemplateRef};
use crate::component::ComponentDefinition;
use crate::curry::CurriedKind;
use crate::error::RenderError;
use crate::helper::HelperDefinition;
use crate::modifier::ModifierDefinition;
use crate::symbol_table::{BlockSymbolTable, ProgramSymbolTable};
use crate::value::{ContentType, Value};
use crate::vm::stack::Register;
use std::collections::HashMap;
use std::rc::Rc;

/// Expressions leave exactly one reference on the stack
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    /// Symbol slot in the current scope
    Local(u32),
    This,
    /// Property path below another expression
    Path(Box<Expr>, Vec<Rc<str>>),
    /// Free name resolved through the eval scope, then `this`
    MaybeLocal(Vec<Rc<str>>),
    Helper(HelperDefinition, Args),
    /// Helper whose definition is itself an expression
    DynamicHelper(Box<Expr>, Args),
    Concat(Vec<Expr>),
    Curry(CurriedKind, Box<Expr>, Args),
    /// Whether block slot is bound
    HasBlock(u32),
    /// Dynamic-scope variable whose name is an expression
    GetDynamicVar(Box<Expr>),
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn local(slot: u32) -> Self {
        Expr::Local(slot)
    }

    /// `head.a.b` for a dotted path
    pub fn path(head: Expr, path: &str) -> Self {
        Expr::Path(Box::new(head), split_path(path))
    }

    /// `this.a.b`
    pub fn this_path(path: &str) -> Self {
        Self::path(Expr::This, path)
    }

    pub fn maybe_local(path: &str) -> Self {
        Expr::MaybeLocal(split_path(path))
    }

    pub fn helper(definition: HelperDefinition, args: Args) -> Self {
        Expr::Helper(definition, args)
    }

    pub fn dynamic_helper(definition: Expr, args: Args) -> Self {
        Expr::DynamicHelper(Box::new(definition), args)
    }

    pub fn curry(kind: CurriedKind, definition: Expr, args: Args) -> Self {
        Expr::Curry(kind, Box::new(definition), args)
    }

    pub fn dynamic_var(name: &str) -> Self {
        Expr::GetDynamicVar(Box::new(Expr::literal(name)))
    }
}

fn split_path(path: &str) -> Vec<Rc<str>> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(Rc::from)
        .collect()
}

/// Arguments of a helper, modifier, curry or component invocation
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Expr>,
    /// Names without the `@` sigil
    pub named: Vec<(Rc<str>, Expr)>,
    pub blocks: Vec<(Rc<str>, BlockRef)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(mut self, expr: Expr) -> Self {
        self.positional.push(expr);
        self
    }

    pub fn named(mut self, name: &str, expr: Expr) -> Self {
        self.named.push((Rc::from(name), expr));
        self
    }

    pub fn block(mut self, name: &str, block: BlockRef) -> Self {
        self.blocks.push((Rc::from(name), block));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty() && self.blocks.is_empty()
    }

    fn has_default_block(&self) -> bool {
        self.blocks.iter().any(|(name, _)| &**name == "default")
    }
}

/// Shared dynamic-content routines, assembled on first use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AppendRoutine {
    Cautious,
    Trusting,
    /// Used for helper results; cannot recurse into components or helpers
    NonDynamic,
}

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    heap: Vec<i32>,
    constants: Vec<Constant>,
    handles: Vec<usize>,
    strings: HashMap<Rc<str>, i32>,
    routines: HashMap<AppendRoutine, usize>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a top-level template or component layout
    pub fn template(
        &mut self,
        table: ProgramSymbolTable,
        body: impl FnOnce(&mut Encoder<'_>) -> Result<(), RenderError>,
    ) -> Result<TemplateRef, RenderError> {
        let handle = self.unit(body)?;
        Ok(TemplateRef {
            handle,
            table: Rc::new(table),
        })
    }

    /// Assemble an inline block whose parameters bind `parameters` slots
    pub fn block(
        &mut self,
        parameters: &[u32],
        body: impl FnOnce(&mut Encoder<'_>) -> Result<(), RenderError>,
    ) -> Result<BlockRef, RenderError> {
        let handle = self.unit(body)?;
        Ok(BlockRef {
            handle,
            table: Rc::new(BlockSymbolTable {
                parameters: parameters.to_vec(),
            }),
        })
    }

    pub fn build(self) -> Program {
        Program {
            heap: self.heap,
            constants: self.constants,
            handles: self.handles,
        }
    }

    fn unit(
        &mut self,
        body: impl FnOnce(&mut Encoder<'_>) -> Result<(), RenderError>,
    ) -> Result<usize, RenderError> {
        let mut encoder = Encoder::new(self);
        body(&mut encoder)?;
        encoder.machine(MachineOp::Return);
        let code = encoder.finish()?;
        Ok(self.place(code))
    }

    /// Append a finished unit to the heap and register its handle
    fn place(&mut self, code: Vec<i32>) -> usize {
        let address = self.heap.len();
        self.heap.extend(code);
        self.handles.push(address);
        self.handles.len() - 1
    }

    fn constant(&mut self, constant: Constant) -> i32 {
        self.constants.push(constant);
        (self.constants.len() - 1) as i32
    }

    fn string(&mut self, s: &str) -> i32 {
        if let Some(index) = self.strings.get(s) {
            return *index;
        }
        let s: Rc<str> = Rc::from(s);
        let index = self.constant(Constant::Str(s.clone()));
        self.strings.insert(s, index);
        index
    }

    fn strings(&mut self, list: Vec<Rc<str>>) -> i32 {
        self.constant(Constant::Strings(Rc::from(list)))
    }

    fn append_routine(&mut self, routine: AppendRoutine) -> Result<usize, RenderError> {
        if let Some(handle) = self.routines.get(&routine) {
            return Ok(*handle);
        }
        let non_dynamic = match routine {
            AppendRoutine::NonDynamic => None,
            _ => Some(self.append_routine(AppendRoutine::NonDynamic)?),
        };
        let mut encoder = Encoder::new(self);
        encoder.std_append(routine == AppendRoutine::Trusting, non_dynamic)?;
        encoder.machine(MachineOp::Return);
        let code = encoder.finish()?;
        let handle = self.place(code);
        self.routines.insert(routine, handle);
        Ok(handle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum Operand {
    Imm(i32),
    Label(Label),
}

#[derive(Debug)]
struct Fixup {
    /// Buffer index of the operand word
    at: usize,
    /// Buffer index of the instruction header
    start: usize,
    label: Label,
}

/// Writes one unit
pub struct Encoder<'p> {
    program: &'p mut ProgramBuilder,
    code: Vec<i32>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl<'p> Encoder<'p> {
    fn new(program: &'p mut ProgramBuilder) -> Self {
        Self {
            program,
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    fn finish(self) -> Result<Vec<i32>, RenderError> {
        let mut code = self.code;
        for fixup in self.fixups {
            let target = self.labels[fixup.label.0].ok_or_else(|| {
                RenderError::invariant(format!("label {} was never bound", fixup.label.0))
            })?;
            code[fixup.at] = target as i32 - fixup.start as i32;
        }
        Ok(code)
    }

    // ===== Raw emission =====

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    fn emit(&mut self, kind: OpKind, operands: &[Operand]) {
        let start = self.code.len();
        self.code.push(encode_header(kind, operands.len()));
        for operand in operands {
            match *operand {
                Operand::Imm(value) => self.code.push(value),
                Operand::Label(label) => {
                    self.fixups.push(Fixup {
                        at: self.code.len(),
                        start,
                        label,
                    });
                    self.code.push(0);
                }
            }
        }
    }

    pub fn op(&mut self, op: SysOp, operands: &[i32]) {
        let operands: Vec<Operand> = operands.iter().map(|v| Operand::Imm(*v)).collect();
        self.emit(op.into(), &operands);
    }

    fn op_to(&mut self, op: SysOp, label: Label) {
        self.emit(op.into(), &[Operand::Label(label)]);
    }

    pub fn machine(&mut self, op: MachineOp) {
        self.emit(op.into(), &[]);
    }

    pub fn jump(&mut self, label: Label) {
        self.emit(MachineOp::Jump.into(), &[Operand::Label(label)]);
    }

    fn return_to(&mut self, label: Label) {
        self.emit(MachineOp::ReturnTo.into(), &[Operand::Label(label)]);
    }

    fn invoke_static(&mut self, handle: usize) {
        self.emit(MachineOp::InvokeStatic.into(), &[Operand::Imm(handle as i32)]);
    }

    fn dup(&mut self, register: Register, offset: i32) {
        self.op(SysOp::Dup, &[register as i32, offset]);
    }

    fn string(&mut self, s: &str) -> i32 {
        self.program.string(s)
    }

    // ===== Expressions =====

    pub fn expr(&mut self, expr: &Expr) -> Result<(), RenderError> {
        match expr {
            Expr::Literal(value) => {
                let index = self.program.constant(Constant::Value(value.clone()));
                self.op(SysOp::Primitive, &[index]);
                self.op(SysOp::PrimitiveReference, &[]);
            }
            Expr::Local(slot) => self.op(SysOp::GetVariable, &[*slot as i32]),
            Expr::This => self.op(SysOp::GetVariable, &[0]),
            Expr::Path(head, path) => {
                self.expr(head)?;
                self.properties(path);
            }
            Expr::MaybeLocal(path) => {
                let (first, rest) = path
                    .split_first()
                    .ok_or_else(|| RenderError::invariant("empty free-variable path"))?;
                let name = self.string(first);
                self.op(SysOp::ResolveMaybeLocal, &[name]);
                self.properties(rest);
            }
            Expr::Helper(definition, args) => {
                self.machine(MachineOp::PushFrame);
                self.args(args)?;
                let index = self.program.constant(Constant::Helper(definition.clone()));
                self.op(SysOp::Helper, &[index]);
                self.machine(MachineOp::PopFrame);
                self.op(SysOp::Fetch, &[Register::V0 as i32]);
            }
            Expr::DynamicHelper(definition, args) => {
                self.machine(MachineOp::PushFrame);
                self.args(args)?;
                self.expr(definition)?;
                self.op(SysOp::DynamicHelper, &[]);
                self.machine(MachineOp::PopFrame);
                self.op(SysOp::Fetch, &[Register::V0 as i32]);
            }
            Expr::Concat(parts) => {
                for part in parts {
                    self.expr(part)?;
                }
                self.op(SysOp::Concat, &[parts.len() as i32]);
            }
            Expr::Curry(kind, definition, args) => {
                self.machine(MachineOp::PushFrame);
                self.args(args)?;
                self.op(SysOp::CaptureArgs, &[]);
                self.expr(definition)?;
                self.op(SysOp::Curry, &[*kind as i32]);
                self.machine(MachineOp::PopFrame);
                self.op(SysOp::Fetch, &[Register::V0 as i32]);
            }
            Expr::HasBlock(slot) => {
                self.op(SysOp::GetBlock, &[*slot as i32]);
                self.op(SysOp::HasBlock, &[]);
            }
            Expr::GetDynamicVar(name) => {
                self.expr(name)?;
                self.op(SysOp::GetDynamicVar, &[]);
            }
        }
        Ok(())
    }

    fn properties(&mut self, path: &[Rc<str>]) {
        for segment in path {
            let name = self.string(segment);
            self.op(SysOp::GetProperty, &[name]);
        }
    }

    /// Push blocks, positional and named arguments, then the layout
    fn args(&mut self, args: &Args) -> Result<(), RenderError> {
        if args.is_empty() {
            self.op(SysOp::PushEmptyArgs, &[]);
            return Ok(());
        }
        for (_, block) in &args.blocks {
            let table = self.program.constant(Constant::BlockTable(block.table.clone()));
            self.op(SysOp::PushSymbolTable, &[table]);
            self.op(SysOp::PushBlockScope, &[]);
            self.op(SysOp::PushHandle, &[block.handle as i32]);
        }
        for expr in &args.positional {
            self.expr(expr)?;
        }
        for (_, expr) in &args.named {
            self.expr(expr)?;
        }
        let names = self
            .program
            .strings(args.named.iter().map(|(name, _)| name.clone()).collect());
        let block_names = self
            .program
            .strings(args.blocks.iter().map(|(name, _)| name.clone()).collect());
        self.op(
            SysOp::PushArgs,
            &[names, block_names, args.positional.len() as i32],
        );
        Ok(())
    }

    // ===== Static content =====

    pub fn text(&mut self, text: &str) {
        let index = self.string(text);
        self.op(SysOp::Text, &[index]);
    }

    pub fn comment(&mut self, text: &str) {
        let index = self.string(text);
        self.op(SysOp::Comment, &[index]);
    }

    pub fn open_element(&mut self, tag: &str) {
        let index = self.string(tag);
        self.op(SysOp::OpenElement, &[index]);
    }

    pub fn flush_element(&mut self) {
        self.op(SysOp::FlushElement, &[]);
    }

    pub fn close_element(&mut self) {
        self.op(SysOp::CloseElement, &[]);
    }

    /// `<tag>` with no attributes and the body as its children
    pub fn element(
        &mut self,
        tag: &str,
        body: impl FnOnce(&mut Self) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        self.open_element(tag);
        self.flush_element();
        body(self)?;
        self.close_element();
        Ok(())
    }

    pub fn static_attr(&mut self, name: &str, value: &str, namespace: Option<&str>) {
        let name = self.string(name);
        let value = self.string(value);
        let namespace = namespace.map_or(-1, |ns| self.string(ns));
        self.op(SysOp::StaticAttr, &[name, value, namespace]);
    }

    pub fn dynamic_attr(
        &mut self,
        name: &str,
        value: &Expr,
        trusting: bool,
        namespace: Option<&str>,
    ) -> Result<(), RenderError> {
        self.expr(value)?;
        let name = self.string(name);
        let namespace = namespace.map_or(-1, |ns| self.string(ns));
        self.op(SysOp::DynamicAttr, &[name, trusting as i32, namespace]);
        Ok(())
    }

    pub fn modifier(&mut self, definition: ModifierDefinition, args: &Args) -> Result<(), RenderError> {
        self.machine(MachineOp::PushFrame);
        self.args(args)?;
        let index = self.program.constant(Constant::Modifier(definition));
        self.op(SysOp::Modifier, &[index]);
        self.machine(MachineOp::PopFrame);
        Ok(())
    }

    pub fn dynamic_modifier(&mut self, definition: &Expr, args: &Args) -> Result<(), RenderError> {
        self.machine(MachineOp::PushFrame);
        self.args(args)?;
        self.expr(definition)?;
        self.op(SysOp::DynamicModifier, &[]);
        self.machine(MachineOp::PopFrame);
        Ok(())
    }

    // ===== Dynamic content =====

    /// `{{expr}}`, or `{{{expr}}}` when trusting
    pub fn append(&mut self, expr: &Expr, trusting: bool) -> Result<(), RenderError> {
        if let (Expr::Literal(Value::String(s)), false) = (expr, trusting) {
            self.text(s);
            return Ok(());
        }
        let routine = if trusting {
            AppendRoutine::Trusting
        } else {
            AppendRoutine::Cautious
        };
        let handle = self.program.append_routine(routine)?;
        self.machine(MachineOp::PushFrame);
        self.expr(expr)?;
        self.invoke_static(handle);
        self.machine(MachineOp::PopFrame);
        Ok(())
    }

    /// Switch on the content type of the reference on top of the stack
    fn std_append(&mut self, trusting: bool, non_dynamic: Option<usize>) -> Result<(), RenderError> {
        let mut clauses = vec![ContentType::String];
        if non_dynamic.is_some() {
            clauses.push(ContentType::Component);
            clauses.push(ContentType::Helper);
        }
        clauses.push(ContentType::SafeString);
        clauses.push(ContentType::Node);

        self.op(SysOp::Enter, &[1]);
        self.op(SysOp::ContentType, &[]);
        let labels: Vec<Label> = clauses.iter().map(|_| self.new_label()).collect();
        let end = self.new_label();

        // the last clause is reached by falling through
        for (clause, label) in clauses.iter().zip(&labels).take(clauses.len() - 1) {
            self.emit(
                SysOp::JumpEq.into(),
                &[Operand::Label(*label), Operand::Imm(*clause as i32)],
            );
        }

        for i in (0..clauses.len()).rev() {
            self.bind(labels[i]);
            self.op(SysOp::Pop, &[1]);
            match clauses[i] {
                ContentType::String if trusting => {
                    self.op(SysOp::AssertSame, &[]);
                    self.op(SysOp::AppendHTML, &[]);
                }
                ContentType::String => self.op(SysOp::AppendText, &[]),
                ContentType::Component => {
                    self.op(SysOp::ResolveCurriedComponent, &[]);
                    self.op(SysOp::PushDynamicComponentInstance, &[]);
                    self.invoke_component_instance(&Args::default())?;
                }
                ContentType::Helper => {
                    let handle = non_dynamic
                        .ok_or_else(|| RenderError::invariant("helper clause without a result routine"))?;
                    self.machine(MachineOp::PushFrame);
                    self.op(SysOp::PushEmptyArgs, &[]);
                    self.dup(Register::Fp, 1);
                    self.op(SysOp::DynamicHelper, &[]);
                    self.op(SysOp::Fetch, &[Register::V0 as i32]);
                    self.invoke_static(handle);
                    self.machine(MachineOp::PopFrame);
                    self.op(SysOp::Pop, &[1]);
                }
                ContentType::SafeString => {
                    self.op(SysOp::AssertSame, &[]);
                    self.op(SysOp::AppendSafeHTML, &[]);
                }
                ContentType::Node => {
                    self.op(SysOp::AssertSame, &[]);
                    self.op(SysOp::AppendNode, &[]);
                }
            }
            if i != 0 {
                self.jump(end);
            }
        }
        self.bind(end);
        self.op(SysOp::Exit, &[]);
        Ok(())
    }

    // ===== Control flow =====

    /// A region the updating VM can re-run from its start
    ///
    /// `args` pushes the values the region needs and returns their count;
    /// they are retained so the region can be rebuilt later. `body` receives
    /// the label that closes the region.
    fn replayable(
        &mut self,
        args: impl FnOnce(&mut Self) -> Result<i32, RenderError>,
        body: impl FnOnce(&mut Self, Label) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        let finally = self.new_label();
        let end = self.new_label();
        self.machine(MachineOp::PushFrame);
        self.return_to(end);
        let count = args(self)?;
        self.op(SysOp::Enter, &[count]);
        body(self, finally)?;
        self.bind(finally);
        self.op(SysOp::Exit, &[]);
        self.machine(MachineOp::Return);
        self.bind(end);
        self.machine(MachineOp::PopFrame);
        Ok(())
    }

    pub fn if_(
        &mut self,
        condition: &Expr,
        then: impl FnOnce(&mut Self) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        self.if_else(condition, then, |_| Ok(()))
    }

    pub fn if_else(
        &mut self,
        condition: &Expr,
        then: impl FnOnce(&mut Self) -> Result<(), RenderError>,
        otherwise: impl FnOnce(&mut Self) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        self.replayable(
            |e| {
                e.expr(condition)?;
                e.op(SysOp::ToBoolean, &[]);
                Ok(1)
            },
            |e, finally| {
                let else_ = e.new_label();
                e.op_to(SysOp::JumpUnless, else_);
                then(e)?;
                e.jump(finally);
                e.bind(else_);
                otherwise(e)
            },
        )
    }

    /// Keyed iteration; `item` and `index` are the slots the body reads
    pub fn each(
        &mut self,
        list: &Expr,
        key: &str,
        item: Option<u32>,
        index: Option<u32>,
        body: impl FnOnce(&mut Self) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        self.each_else(list, key, item, index, body, |_| Ok(()))
    }

    pub fn each_else(
        &mut self,
        list: &Expr,
        key: &str,
        item: Option<u32>,
        index: Option<u32>,
        body: impl FnOnce(&mut Self) -> Result<(), RenderError>,
        inverse: impl FnOnce(&mut Self) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        self.replayable(
            |e| {
                e.expr(&Expr::literal(key))?;
                e.expr(list)?;
                Ok(2)
            },
            |e, finally| {
                let body_label = e.new_label();
                let else_label = e.new_label();
                let iterate = e.new_label();
                let done = e.new_label();

                e.emit(
                    SysOp::EnterList.into(),
                    &[Operand::Label(body_label), Operand::Label(else_label)],
                );
                e.machine(MachineOp::PushFrame);
                e.dup(Register::Fp, 1);
                e.return_to(iterate);
                e.bind(iterate);
                e.op_to(SysOp::Iterate, done);

                // the item's value and memo are on top of the stack here
                e.bind(body_label);
                e.machine(MachineOp::PushFrame);
                e.op(SysOp::ChildScope, &[]);
                if let Some(slot) = item {
                    e.dup(Register::Fp, 2);
                    e.op(SysOp::SetVariable, &[slot as i32]);
                }
                if let Some(slot) = index {
                    e.dup(Register::Fp, 1);
                    e.op(SysOp::SetVariable, &[slot as i32]);
                }
                body(e)?;
                e.op(SysOp::PopScope, &[]);
                e.machine(MachineOp::PopFrame);
                e.op(SysOp::Pop, &[2]);
                e.op(SysOp::Exit, &[]);
                e.machine(MachineOp::Return);

                e.bind(done);
                e.machine(MachineOp::PopFrame);
                e.op(SysOp::ExitList, &[]);
                e.jump(finally);

                e.bind(else_label);
                inverse(e)
            },
        )
    }

    /// Invoke the block bound in `slot` with `positional` as its parameters
    pub fn yield_(&mut self, slot: u32, positional: &[Expr]) -> Result<(), RenderError> {
        self.machine(MachineOp::PushFrame);
        let args = Args {
            positional: positional.to_vec(),
            ..Args::default()
        };
        self.args(&args)?;
        self.op(SysOp::GetBlock, &[slot as i32]);
        self.op(SysOp::InvokeYield, &[]);
        self.op(SysOp::PopScope, &[]);
        self.machine(MachineOp::PopFrame);
        Ok(())
    }

    /// Render `body` into `destination`, a DOM node outside the current tree
    pub fn in_element(
        &mut self,
        destination: &Expr,
        guid: &str,
        insert_before: Option<&Expr>,
        body: impl FnOnce(&mut Self) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        self.replayable(
            |e| {
                e.expr(&Expr::literal(guid))?;
                if let Some(before) = insert_before {
                    e.expr(before)?;
                }
                e.expr(destination)?;
                e.dup(Register::Sp, 0);
                Ok(if insert_before.is_some() { 4 } else { 3 })
            },
            |e, _| {
                let else_ = e.new_label();
                e.op_to(SysOp::JumpUnless, else_);
                e.op(SysOp::PushRemoteElement, &[insert_before.is_some() as i32]);
                body(e)?;
                e.op(SysOp::PopRemoteElement, &[]);
                e.bind(else_);
                Ok(())
            },
        )
    }

    /// Bind dynamic-scope variables for the duration of `body`
    pub fn with_dynamic_vars(
        &mut self,
        vars: &[(&str, Expr)],
        body: impl FnOnce(&mut Self) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        self.op(SysOp::PushDynamicScope, &[]);
        for (_, expr) in vars {
            self.expr(expr)?;
        }
        let names = self
            .program
            .strings(vars.iter().map(|(name, _)| Rc::from(*name)).collect());
        self.op(SysOp::BindDynamicScope, &[names]);
        body(self)?;
        self.op(SysOp::PopDynamicScope, &[]);
        Ok(())
    }

    /// Assemble a block that can be passed to a component or yielded to
    pub fn block(
        &mut self,
        parameters: &[u32],
        body: impl FnOnce(&mut Encoder<'_>) -> Result<(), RenderError>,
    ) -> Result<BlockRef, RenderError> {
        self.program.block(parameters, body)
    }

    // ===== Components =====

    pub fn invoke_component(
        &mut self,
        definition: ComponentDefinition,
        args: &Args,
    ) -> Result<(), RenderError> {
        let index = self.program.constant(Constant::Component(definition));
        self.op(SysOp::PushComponentDefinition, &[index]);
        self.invoke_component_instance(args)
    }

    /// `{{component expr}}`: a string name, a definition or a curried one
    pub fn dynamic_component(&mut self, definition: &Expr, args: &Args) -> Result<(), RenderError> {
        self.replayable(
            |e| {
                e.expr(definition)?;
                e.dup(Register::Sp, 0);
                Ok(2)
            },
            |e, _| {
                let else_ = e.new_label();
                e.op_to(SysOp::JumpUnless, else_);
                e.op(SysOp::ResolveDynamicComponent, &[]);
                e.op(SysOp::PushDynamicComponentInstance, &[]);
                e.invoke_component_instance(args)?;
                e.bind(else_);
                Ok(())
            },
        )
    }

    /// Invoke the component instance on top of the stack, then pop it
    fn invoke_component_instance(&mut self, args: &Args) -> Result<(), RenderError> {
        let s0 = Register::S0 as i32;
        self.op(SysOp::Fetch, &[s0]);
        self.dup(Register::Sp, 1);
        self.op(SysOp::Load, &[s0]);

        self.machine(MachineOp::PushFrame);
        self.args(args)?;
        self.op(SysOp::PrepareArgs, &[s0]);
        self.op(SysOp::BeginComponentTransaction, &[s0]);
        self.op(SysOp::PushDynamicScope, &[]);
        self.op(SysOp::CreateComponent, &[args.has_default_block() as i32, s0]);
        self.op(SysOp::RegisterComponentDestructor, &[s0]);
        self.op(SysOp::GetComponentSelf, &[s0]);
        self.op(SysOp::GetComponentLayout, &[s0]);
        self.op(SysOp::VirtualRootScope, &[s0]);
        self.op(SysOp::SetVariable, &[0]);
        self.op(SysOp::SetupForEval, &[s0]);
        self.op(SysOp::SetNamedVariables, &[s0]);
        self.op(SysOp::SetBlocks, &[s0]);
        self.op(SysOp::Pop, &[1]);
        self.op(SysOp::InvokeComponentLayout, &[s0]);
        self.op(SysOp::DidRenderLayout, &[s0]);
        self.machine(MachineOp::PopFrame);
        self.op(SysOp::PopScope, &[]);
        self.op(SysOp::PopDynamicScope, &[]);
        self.op(SysOp::CommitComponentTransaction, &[]);

        self.op(SysOp::Load, &[s0]);
        self.op(SysOp::Pop, &[1]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Opcode;

    fn ops(program: &Program, handle: usize) -> Vec<Opcode> {
        let heap = program.heap();
        let mut offset = program.getaddr(handle).unwrap();
        let mut out = Vec::new();
        loop {
            let op = Opcode::decode(heap, offset).unwrap();
            out.push(op);
            if op.kind == OpKind::Machine(MachineOp::Return) {
                return out;
            }
            offset += Opcode::size(heap, offset);
        }
    }

    #[test]
    fn test_units_end_with_return() {
        let mut builder = ProgramBuilder::new();
        let template = builder
            .template(ProgramSymbolTable::default(), |e| {
                e.element("p", |e| {
                    e.text("hi");
                    Ok(())
                })
            })
            .unwrap();
        let program = builder.build();
        let kinds: Vec<OpKind> = ops(&program, template.handle).iter().map(|o| o.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SysOp::OpenElement.into(),
                SysOp::FlushElement.into(),
                SysOp::Text.into(),
                SysOp::CloseElement.into(),
                MachineOp::Return.into(),
            ]
        );
        assert_eq!(program.string(ops(&program, 0)[2].op1).unwrap().as_ref(), "hi");
    }

    #[test]
    fn test_jumps_are_relative_to_the_instruction() {
        let mut builder = ProgramBuilder::new();
        let template = builder
            .template(ProgramSymbolTable::default(), |e| {
                e.if_(&Expr::literal(true), |e| {
                    e.text("yes");
                    Ok(())
                })
            })
            .unwrap();
        let program = builder.build();
        let ops = ops(&program, template.handle);
        let jump_unless = ops
            .iter()
            .find(|o| o.kind == SysOp::JumpUnless.into())
            .unwrap();
        let target = (jump_unless.offset as i32 + jump_unless.op1) as usize;
        // the else branch is empty, so it lands on the region's Exit
        assert_eq!(
            Opcode::decode(program.heap(), target).unwrap().kind,
            SysOp::Exit.into()
        );
    }

    #[test]
    fn test_append_routines_are_shared() {
        let mut builder = ProgramBuilder::new();
        builder
            .template(ProgramSymbolTable::new(&["name"], false), |e| {
                e.append(&Expr::local(1), false)?;
                e.append(&Expr::local(1), false)
            })
            .unwrap();
        // non-dynamic routine, cautious routine, template
        assert_eq!(builder.handles.len(), 3);
    }

    #[test]
    fn test_static_strings_append_as_text() {
        let mut builder = ProgramBuilder::new();
        let template = builder
            .template(ProgramSymbolTable::default(), |e| e.append(&Expr::literal("x"), false))
            .unwrap();
        let program = builder.build();
        assert_eq!(ops(&program, template.handle)[0].kind, SysOp::Text.into());
    }

    #[test]
    fn test_unbound_label_is_rejected() {
        let mut builder = ProgramBuilder::new();
        let result = builder.template(ProgramSymbolTable::default(), |e| {
            let label = e.new_label();
            e.jump(label);
            Ok(())
        });
        assert!(result.unwrap_err().is_fatal());
    }

    #[test]
    fn test_strings_are_interned() {
        let mut builder = ProgramBuilder::new();
        builder
            .template(ProgramSymbolTable::default(), |e| {
                e.text("same");
                e.text("same");
                Ok(())
            })
            .unwrap();
        assert_eq!(builder.constants.len(), 1);
    }
}
