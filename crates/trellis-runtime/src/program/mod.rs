//! Compiled programs
//!
//! A `Program` is an immutable word heap plus a constant pool. Compiled
//! units (templates, component layouts, blocks) are addressed by handle;
//! `getaddr` maps a handle to its heap address.

mod builder;
mod opcode;

pub use builder::{Args, Encoder, Expr, ProgramBuilder};
pub use opcode::{encode_header, MachineOp, OpKind, Opcode, SysOp};

use crate::component::ComponentDefinition;
use crate::error::RenderError;
use crate::helper::HelperDefinition;
use crate::modifier::ModifierDefinition;
use crate::symbol_table::{BlockSymbolTable, ProgramSymbolTable};
use crate::value::Value;
use std::fmt::Write;
use std::rc::Rc;

/// Entry in the constant pool
#[derive(Clone)]
pub enum Constant {
    Str(Rc<str>),
    Strings(Rc<[Rc<str>]>),
    Value(Value),
    BlockTable(Rc<BlockSymbolTable>),
    Component(ComponentDefinition),
    Helper(HelperDefinition),
    Modifier(ModifierDefinition),
}

impl std::fmt::Debug for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Strings(list) => f.debug_list().entries(list.iter()).finish(),
            Constant::Value(v) => write!(f, "{:?}", v),
            Constant::BlockTable(table) => write!(f, "block{:?}", table.parameters),
            Constant::Component(def) => write!(f, "component {}", def.name()),
            Constant::Helper(def) => write!(f, "helper {}", def.name()),
            Constant::Modifier(def) => write!(f, "modifier {}", def.name()),
        }
    }
}

/// A compiled template or component layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub handle: usize,
    pub table: Rc<ProgramSymbolTable>,
}

/// A compiled inline block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub handle: usize,
    pub table: Rc<BlockSymbolTable>,
}

#[derive(Debug, Default)]
pub struct Program {
    pub(crate) heap: Vec<i32>,
    pub(crate) constants: Vec<Constant>,
    pub(crate) handles: Vec<usize>,
}

macro_rules! constant_accessor {
    ($name:ident, $variant:ident, $ty:ty, $what:literal) => {
        pub fn $name(&self, index: i32) -> Result<&$ty, RenderError> {
            match self.constant(index)? {
                Constant::$variant(value) => Ok(value),
                other => Err(RenderError::invariant(format!(
                    "expected {} at constant {}, found {:?}",
                    $what, index, other
                ))),
            }
        }
    };
}

impl Program {
    pub fn heap(&self) -> &[i32] {
        &self.heap
    }

    /// Heap address of a compiled unit
    pub fn getaddr(&self, handle: usize) -> Result<usize, RenderError> {
        self.handles
            .get(handle)
            .copied()
            .ok_or_else(|| RenderError::invariant(format!("unknown handle {}", handle)))
    }

    pub fn constant(&self, index: i32) -> Result<&Constant, RenderError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.constants.get(i))
            .ok_or_else(|| RenderError::invariant(format!("unknown constant {}", index)))
    }

    constant_accessor!(string, Str, Rc<str>, "a string");
    constant_accessor!(strings, Strings, Rc<[Rc<str>]>, "a string array");
    constant_accessor!(value, Value, Value, "a value");
    constant_accessor!(block_table, BlockTable, Rc<BlockSymbolTable>, "a block table");
    constant_accessor!(component, Component, ComponentDefinition, "a component");
    constant_accessor!(helper, Helper, HelperDefinition, "a helper");
    constant_accessor!(modifier, Modifier, ModifierDefinition, "a modifier");

    /// Optional string constant; negative indices mean "none"
    pub fn optional_string(&self, index: i32) -> Result<Option<&Rc<str>>, RenderError> {
        if index < 0 {
            Ok(None)
        } else {
            self.string(index).map(Some)
        }
    }

    /// Render the constant pool and every instruction
    ///
    /// ```text
    /// === Constants ===
    /// 0: "div"
    ///
    /// === Instructions ===
    /// 0000  OpenElement 0
    /// 0002  FlushElement
    /// ```
    pub fn disassemble(&self) -> String {
        let mut output = String::new();

        if !self.constants.is_empty() {
            let _ = writeln!(output, "=== Constants ===");
            for (idx, constant) in self.constants.iter().enumerate() {
                let _ = writeln!(output, "{}: {:?}", idx, constant);
            }
            let _ = writeln!(output);
        }

        let _ = writeln!(output, "=== Instructions ===");
        let mut offset = 0;
        while offset < self.heap.len() {
            if let Some(handle) = self.handles.iter().position(|addr| *addr == offset) {
                let _ = writeln!(output, "handle {}:", handle);
            }
            match Opcode::decode(&self.heap, offset) {
                Ok(op) => {
                    let count = Opcode::size(&self.heap, offset) - 1;
                    let operands = [op.op1, op.op2, op.op3];
                    let mut line = format!("{:04}  {}", offset, op.kind);
                    for operand in &operands[..count] {
                        let _ = write!(line, " {}", operand);
                    }
                    let _ = writeln!(output, "{}", line);
                }
                Err(_) => {
                    let _ = writeln!(output, "{:04}  <invalid {:#x}>", offset, self.heap[offset]);
                }
            }
            offset += Opcode::size(&self.heap, offset);
        }
        output
    }
}
