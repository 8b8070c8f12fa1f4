//! Symbol tables handed from the compiler to the VM
//!
//! Symbols are resolved ahead of time; at run time they are plain slot
//! offsets into a `Scope`. Slot 0 is always `self`, so symbol `i` of a program
//! table lives in slot `i + 1`.

use std::rc::Rc;

/// Table of a top-level template or component layout
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramSymbolTable {
    pub symbols: Vec<Rc<str>>,
    pub has_eval: bool,
}

/// Table of an inline block; parameters are slots in the enclosing scope
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockSymbolTable {
    pub parameters: Vec<u32>,
}

impl ProgramSymbolTable {
    pub fn new<S: AsRef<str>>(symbols: &[S], has_eval: bool) -> Self {
        Self {
            symbols: symbols.iter().map(|s| Rc::from(s.as_ref())).collect(),
            has_eval,
        }
    }

    /// Slot for a named symbol such as `@title` or `&default`
    pub fn slot_of(&self, name: &str) -> Option<u32> {
        self.symbols
            .iter()
            .position(|s| &**s == name)
            .map(|i| i as u32 + 1)
    }

    /// Number of scope slots, including `self`
    pub fn scope_size(&self) -> usize {
        self.symbols.len() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolTable {
    Program(Rc<ProgramSymbolTable>),
    Block(Rc<BlockSymbolTable>),
}
