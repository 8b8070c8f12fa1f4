//! Instruction set
//!
//! Instructions are stored as `i32` words. The first word of each instruction
//! is a header:
//!
//! ```text
//! bits 0-7   opcode type
//! bits 8-9   operand count (0-3)
//! bit  10    machine flag
//! ```
//!
//! followed by up to three operand words. Machine opcodes occupy types
//! `0x00-0x0F` and are executed by the low-level machine; everything else is
//! a syscall dispatched by the append VM. The machine flag is checked against
//! the type on decode, so a heap that disagrees with itself is rejected
//! instead of being dispatched to the wrong interpreter.

use crate::error::RenderError;
use std::fmt;

pub const TYPE_MASK: i32 = 0xFF;
pub const ARG_SHIFT: i32 = 8;
pub const MACHINE_FLAG: i32 = 1 << 10;
pub const MAX_OPERANDS: usize = 3;

/// Machine-level control flow
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineOp {
    /// Push `$ra` and `$fp`, point `$fp` at the saved pair
    PushFrame = 0x00,
    /// Restore `$ra` and `$fp`, reset `$sp` to below the frame
    PopFrame = 0x01,
    /// Pop a block handle and call it
    InvokeVirtual = 0x02,
    /// Call the handle in op1
    InvokeStatic = 0x03,
    /// Jump by op1 relative to this instruction
    Jump = 0x04,
    /// Jump to `$ra`
    Return = 0x05,
    /// Set `$ra` to op1 relative to this instruction
    ReturnTo = 0x06,
}

/// Template-level operations
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysOp {
    // ===== Stack (0x10-0x1F) =====
    /// Pop op1 values
    Pop = 0x10,
    /// Pop into register op1
    Load = 0x11,
    /// Push the value of register op1
    Fetch = 0x12,
    /// Push `stack[register(op1) - op2]`
    Dup = 0x13,
    /// Push constant op1 as a raw value
    Primitive = 0x14,
    /// Replace the raw value on top with a constant reference
    PrimitiveReference = 0x15,
    /// Push the block symbol table in constant op1
    PushSymbolTable = 0x16,
    /// Push the current scope
    PushBlockScope = 0x17,
    /// Push block handle op1
    PushHandle = 0x18,

    // ===== Variables (0x20-0x2F) =====
    /// Push the reference in slot op1
    GetVariable = 0x20,
    /// Pop a reference into slot op1
    SetVariable = 0x21,
    /// Push handle, scope and table of block slot op1
    GetBlock = 0x23,
    /// Pop a block triple, push whether it is present
    HasBlock = 0x24,
    /// Replace the reference on top with its child named by constant op1
    GetProperty = 0x25,
    /// Push a local from the eval scope or a property of `self`
    ResolveMaybeLocal = 0x26,

    // ===== Scopes (0x30-0x3F) =====
    /// Push a root scope sized for the layout of the component in register op1
    VirtualRootScope = 0x30,
    ChildScope = 0x31,
    PopScope = 0x32,
    /// Bind named arguments into the component layout's `@` symbols
    SetNamedVariables = 0x33,
    /// Bind blocks into the component layout's `&` symbols
    SetBlocks = 0x34,
    /// Attach an eval scope when the layout uses one
    SetupForEval = 0x35,
    /// Pop references for the names in constant op1 into the dynamic scope
    BindDynamicScope = 0x36,
    /// Replace a name reference with a reference to that dynamic variable
    GetDynamicVar = 0x37,
    PushDynamicScope = 0x38,
    PopDynamicScope = 0x39,

    // ===== Expressions (0x40-0x4F) =====
    /// Pop op1 references, push their concatenation
    Concat = 0x40,
    /// Replace the reference on top with its boolean coercion
    ToBoolean = 0x41,
    /// Invoke the helper in constant op1 with the arguments on top
    Helper = 0x42,
    /// Pop a definition reference and arguments, invoke the resolved helper
    DynamicHelper = 0x43,
    /// Pop a definition reference and captured arguments, curry them as kind op1
    Curry = 0x44,

    // ===== Control flow (0x50-0x5F) =====
    /// Open an updatable block retaining op1 stack values for replay
    Enter = 0x50,
    Exit = 0x51,
    JumpIf = 0x52,
    JumpUnless = 0x53,
    /// Jump by op1 when the integer on top equals op2
    JumpEq = 0x54,
    /// Assert the reference on top keeps its value
    AssertSame = 0x55,
    /// Push the content type of the reference on top
    ContentType = 0x56,
    /// Open a keyed list; op1 is the body, op2 the else branch
    EnterList = 0x57,
    ExitList = 0x58,
    /// Advance the iterator on top or jump by op1 when exhausted
    Iterate = 0x59,

    // ===== DOM (0x60-0x6F) =====
    Text = 0x60,
    Comment = 0x61,
    OpenElement = 0x62,
    FlushElement = 0x63,
    CloseElement = 0x64,
    /// Name op1, value op2, namespace op3 (-1 for none)
    StaticAttr = 0x65,
    /// Name op1, trusting op2, namespace op3; pops the value reference
    DynamicAttr = 0x66,
    AppendText = 0x67,
    AppendHTML = 0x68,
    AppendSafeHTML = 0x69,
    AppendNode = 0x6A,
    /// Pop element and guid references; op1 is 1 when an insert-before reference is also on the stack
    PushRemoteElement = 0x6B,
    PopRemoteElement = 0x6C,
    /// Install the modifier in constant op1 on the element under construction
    Modifier = 0x6D,
    /// Pop a definition reference and arguments, install the resolved modifier
    DynamicModifier = 0x6E,

    // ===== Arguments (0x70-0x7F) =====
    /// Named-argument names op1, block names op2, positional count op3
    PushArgs = 0x70,
    PushEmptyArgs = 0x71,
    /// Replace the arguments on top with a captured snapshot
    CaptureArgs = 0x72,
    /// Merge curried arguments and run the manager's `prepare_args`
    PrepareArgs = 0x73,

    // ===== Components (0x80-0x8F) =====
    PushComponentDefinition = 0x80,
    ResolveDynamicComponent = 0x81,
    ResolveCurriedComponent = 0x82,
    PushDynamicComponentInstance = 0x83,
    BeginComponentTransaction = 0x84,
    CommitComponentTransaction = 0x85,
    /// Has-default-block flag op1, instance register op2
    CreateComponent = 0x86,
    RegisterComponentDestructor = 0x87,
    GetComponentSelf = 0x88,
    GetComponentLayout = 0x89,
    InvokeComponentLayout = 0x8A,
    DidRenderLayout = 0x8B,
    InvokeYield = 0x8C,
}

impl TryFrom<u8> for MachineOp {
    type Error = ();

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0x00 => MachineOp::PushFrame,
            0x01 => MachineOp::PopFrame,
            0x02 => MachineOp::InvokeVirtual,
            0x03 => MachineOp::InvokeStatic,
            0x04 => MachineOp::Jump,
            0x05 => MachineOp::Return,
            0x06 => MachineOp::ReturnTo,
            _ => return Err(()),
        })
    }
}

impl TryFrom<u8> for SysOp {
    type Error = ();

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use SysOp::*;
        Ok(match byte {
            0x10 => Pop,
            0x11 => Load,
            0x12 => Fetch,
            0x13 => Dup,
            0x14 => Primitive,
            0x15 => PrimitiveReference,
            0x16 => PushSymbolTable,
            0x17 => PushBlockScope,
            0x18 => PushHandle,
            0x20 => GetVariable,
            0x21 => SetVariable,
            0x23 => GetBlock,
            0x24 => HasBlock,
            0x25 => GetProperty,
            0x26 => ResolveMaybeLocal,
            0x30 => VirtualRootScope,
            0x31 => ChildScope,
            0x32 => PopScope,
            0x33 => SetNamedVariables,
            0x34 => SetBlocks,
            0x35 => SetupForEval,
            0x36 => BindDynamicScope,
            0x37 => GetDynamicVar,
            0x38 => PushDynamicScope,
            0x39 => PopDynamicScope,
            0x40 => Concat,
            0x41 => ToBoolean,
            0x42 => Helper,
            0x43 => DynamicHelper,
            0x44 => Curry,
            0x50 => Enter,
            0x51 => Exit,
            0x52 => JumpIf,
            0x53 => JumpUnless,
            0x54 => JumpEq,
            0x55 => AssertSame,
            0x56 => ContentType,
            0x57 => EnterList,
            0x58 => ExitList,
            0x59 => Iterate,
            0x60 => Text,
            0x61 => Comment,
            0x62 => OpenElement,
            0x63 => FlushElement,
            0x64 => CloseElement,
            0x65 => StaticAttr,
            0x66 => DynamicAttr,
            0x67 => AppendText,
            0x68 => AppendHTML,
            0x69 => AppendSafeHTML,
            0x6A => AppendNode,
            0x6B => PushRemoteElement,
            0x6C => PopRemoteElement,
            0x6D => Modifier,
            0x6E => DynamicModifier,
            0x70 => PushArgs,
            0x71 => PushEmptyArgs,
            0x72 => CaptureArgs,
            0x73 => PrepareArgs,
            0x80 => PushComponentDefinition,
            0x81 => ResolveDynamicComponent,
            0x82 => ResolveCurriedComponent,
            0x83 => PushDynamicComponentInstance,
            0x84 => BeginComponentTransaction,
            0x85 => CommitComponentTransaction,
            0x86 => CreateComponent,
            0x87 => RegisterComponentDestructor,
            0x88 => GetComponentSelf,
            0x89 => GetComponentLayout,
            0x8A => InvokeComponentLayout,
            0x8B => DidRenderLayout,
            0x8C => InvokeYield,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Machine(MachineOp),
    Syscall(SysOp),
}

impl OpKind {
    fn type_byte(self) -> u8 {
        match self {
            OpKind::Machine(op) => op as u8,
            OpKind::Syscall(op) => op as u8,
        }
    }

    pub fn is_machine(self) -> bool {
        matches!(self, OpKind::Machine(_))
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Machine(op) => write!(f, "{:?}", op),
            OpKind::Syscall(op) => write!(f, "{:?}", op),
        }
    }
}

impl From<MachineOp> for OpKind {
    fn from(op: MachineOp) -> Self {
        OpKind::Machine(op)
    }
}

impl From<SysOp> for OpKind {
    fn from(op: SysOp) -> Self {
        OpKind::Syscall(op)
    }
}

/// Encode an instruction header
pub fn encode_header(kind: OpKind, operands: usize) -> i32 {
    let machine = if kind.is_machine() { MACHINE_FLAG } else { 0 };
    i32::from(kind.type_byte()) | ((operands as i32) << ARG_SHIFT) | machine
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub kind: OpKind,
    /// Heap offset of the header word
    pub offset: usize,
    pub op1: i32,
    pub op2: i32,
    pub op3: i32,
}

impl Opcode {
    /// Decode the instruction starting at `offset`
    pub fn decode(heap: &[i32], offset: usize) -> Result<Opcode, RenderError> {
        let header = *heap
            .get(offset)
            .ok_or_else(|| RenderError::invariant(format!("pc {} is outside the heap", offset)))?;
        let type_byte = (header & TYPE_MASK) as u8;
        let operands = ((header >> ARG_SHIFT) & 0b11) as usize;
        let machine_flag = header & MACHINE_FLAG != 0;

        let kind = match (MachineOp::try_from(type_byte), SysOp::try_from(type_byte)) {
            (Ok(op), _) if machine_flag => OpKind::Machine(op),
            (_, Ok(op)) if !machine_flag => OpKind::Syscall(op),
            _ => {
                return Err(RenderError::invariant(format!(
                    "opcode type {:#04x} does not match its machine flag ({})",
                    type_byte, machine_flag
                )))
            }
        };

        if offset + operands >= heap.len() {
            return Err(RenderError::invariant(format!(
                "{} at {} is truncated",
                kind, offset
            )));
        }
        let operand = |i: usize| if i < operands { heap[offset + 1 + i] } else { 0 };
        Ok(Opcode {
            kind,
            offset,
            op1: operand(0),
            op2: operand(1),
            op3: operand(2),
        })
    }

    /// Size in words, header included
    pub fn size(heap: &[i32], offset: usize) -> usize {
        heap.get(offset)
            .map(|header| 1 + ((header >> ARG_SHIFT) & 0b11) as usize)
            .unwrap_or(1)
    }

    pub fn name(&self) -> String {
        self.kind.to_string()
    }
}
