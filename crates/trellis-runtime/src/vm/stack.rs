//! Evaluation stack and registers
//!
//! Stack discipline is a VM invariant, not an input condition: popping an
//! empty stack or reading past the top means the program or the VM is broken.
//! Those paths panic with a "stack underflow" message instead of returning an
//! error. Wrong *shapes* (a scope where a reference was expected) are
//! reported as `RenderError::Invariant` by the typed accessors.

use crate::arguments::{ArgsLayout, CapturedArguments};
use crate::component::ComponentInstance;
use crate::error::RenderError;
use crate::iterable::ListIterator;
use crate::reference::Reference;
use crate::scope::Scope;
use crate::symbol_table::BlockSymbolTable;
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Register numbers as encoded in `Load`, `Fetch` and `Dup` operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Register {
    Pc = 0,
    Ra = 1,
    Fp = 2,
    Sp = 3,
    S0 = 4,
    S1 = 5,
    T0 = 6,
    T1 = 7,
    V0 = 8,
}

impl Register {
    pub fn from_i32(value: i32) -> Result<Self, RenderError> {
        Ok(match value {
            0 => Register::Pc,
            1 => Register::Ra,
            2 => Register::Fp,
            3 => Register::Sp,
            4 => Register::S0,
            5 => Register::S1,
            6 => Register::T0,
            7 => Register::T1,
            8 => Register::V0,
            other => {
                return Err(RenderError::invariant(format!(
                    "unknown register {}",
                    other
                )))
            }
        })
    }

    /// Index into the scratch register file for `$s0..$v0`
    pub fn scratch_index(self) -> Option<usize> {
        match self {
            Register::S0 => Some(0),
            Register::S1 => Some(1),
            Register::T0 => Some(2),
            Register::T1 => Some(3),
            Register::V0 => Some(4),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub enum StackValue {
    #[default]
    Null,
    Int(i64),
    Value(Value),
    Ref(Reference),
    Scope(Scope),
    Table(Rc<BlockSymbolTable>),
    Args(ArgsLayout),
    Captured(Rc<CapturedArguments>),
    Component(Rc<RefCell<ComponentInstance>>),
    Iterator(Rc<RefCell<ListIterator>>),
}

impl fmt::Debug for StackValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackValue::Null => write!(f, "null"),
            StackValue::Int(i) => write!(f, "{}", i),
            StackValue::Value(v) => write!(f, "{:?}", v),
            StackValue::Ref(r) => write!(f, "{:?}", r),
            StackValue::Scope(s) => write!(f, "Scope({})", s.size()),
            StackValue::Table(t) => write!(f, "Table({:?})", t.parameters),
            StackValue::Args(a) => write!(f, "Args(base={}, len={})", a.base, a.len()),
            StackValue::Captured(_) => write!(f, "CapturedArgs"),
            StackValue::Component(c) => write!(f, "Component({})", c.borrow().definition.name()),
            StackValue::Iterator(_) => write!(f, "Iterator"),
        }
    }
}

macro_rules! typed_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Result<$ty, RenderError> {
            match self {
                StackValue::$variant(value) => Ok(value.clone()),
                other => Err(RenderError::invariant(format!(
                    concat!("expected ", stringify!($variant), ", found {:?}"),
                    other
                ))),
            }
        }
    };
}

impl StackValue {
    typed_accessor!(as_reference, Ref, Reference);
    typed_accessor!(as_value, Value, Value);
    typed_accessor!(as_scope, Scope, Scope);
    typed_accessor!(as_table, Table, Rc<BlockSymbolTable>);
    typed_accessor!(as_args, Args, ArgsLayout);
    typed_accessor!(as_captured, Captured, Rc<CapturedArguments>);
    typed_accessor!(as_component, Component, Rc<RefCell<ComponentInstance>>);
    typed_accessor!(as_iterator, Iterator, Rc<RefCell<ListIterator>>);

    pub fn as_int(&self) -> Result<i64, RenderError> {
        match self {
            StackValue::Int(i) => Ok(*i),
            other => Err(RenderError::invariant(format!(
                "expected Int, found {:?}",
                other
            ))),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StackValue::Null)
    }
}

/// Values plus the `$pc`, `$ra` and `$fp` registers; `$sp` is the index of
/// the top value
#[derive(Debug, Default)]
pub struct EvaluationStack {
    values: Vec<StackValue>,
    pub pc: isize,
    pub ra: isize,
    pub fp: isize,
}

impl EvaluationStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            pc: 0,
            ra: -1,
            fp: -1,
        }
    }

    /// A stack holding `snapshot`, with `$sp` at its end and no frame
    pub fn restore(snapshot: Vec<StackValue>) -> Self {
        Self {
            values: snapshot,
            pc: 0,
            ra: -1,
            fp: -1,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sp(&self) -> isize {
        self.values.len() as isize - 1
    }

    /// Move `$sp`; values above the new top are dropped
    pub fn set_sp(&mut self, sp: isize) {
        let len = usize::try_from(sp + 1).unwrap_or(0);
        assert!(
            len <= self.values.len(),
            "stack underflow: cannot raise $sp from {} to {}",
            self.sp(),
            sp
        );
        self.values.truncate(len);
    }

    pub fn push(&mut self, value: StackValue) {
        self.values.push(value);
    }

    pub fn pop(&mut self) -> StackValue {
        self.values
            .pop()
            .unwrap_or_else(|| panic!("stack underflow: pop from an empty stack"))
    }

    /// Pop `n` values, returning the last one popped
    pub fn pop_n(&mut self, n: usize) -> StackValue {
        assert!(
            n <= self.values.len(),
            "stack underflow: pop {} from a stack of {}",
            n,
            self.values.len()
        );
        let mut last = StackValue::Null;
        for _ in 0..n {
            last = self.pop();
        }
        last
    }

    /// Value `offset` slots below the top
    pub fn peek(&self, offset: usize) -> &StackValue {
        let len = self.values.len();
        assert!(
            offset < len,
            "stack underflow: peek {} into a stack of {}",
            offset,
            len
        );
        &self.values[len - 1 - offset]
    }

    /// Absolute read used by argument views
    pub fn get_abs(&self, index: usize) -> Result<&StackValue, RenderError> {
        self.values.get(index).ok_or_else(|| {
            RenderError::invariant(format!(
                "stack read at {} past $sp {}",
                index,
                self.sp()
            ))
        })
    }

    /// Read relative to `$fp`
    pub fn get(&self, offset: isize) -> &StackValue {
        self.get_from(offset, self.fp)
    }

    pub fn get_from(&self, offset: isize, base: isize) -> &StackValue {
        let index = base + offset;
        assert!(
            index >= 0 && (index as usize) < self.values.len(),
            "stack underflow: read at {} outside 0..={}",
            index,
            self.sp()
        );
        &self.values[index as usize]
    }

    /// Write relative to `base`
    pub fn set(&mut self, value: StackValue, offset: isize, base: isize) {
        let index = base + offset;
        assert!(
            index >= 0 && (index as usize) < self.values.len(),
            "stack underflow: write at {} outside 0..={}",
            index,
            self.sp()
        );
        self.values[index as usize] = value;
    }

    /// Push a copy of the value at absolute `position`
    pub fn dup(&mut self, position: isize) {
        let value = self.get_from(position, 0).clone();
        self.push(value);
    }

    /// Copy of the top `n` values, bottom first
    pub fn capture(&self, n: usize) -> Vec<StackValue> {
        let len = self.values.len();
        assert!(
            n <= len,
            "stack underflow: capture {} from a stack of {}",
            n,
            len
        );
        self.values[len - n..].to_vec()
    }

    /// Replace the values above `base` with `values`
    pub fn replace_from(&mut self, base: usize, values: Vec<StackValue>) {
        self.values.truncate(base);
        self.values.extend(values);
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.fp = -1;
    }
}
