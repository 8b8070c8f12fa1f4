//! Lexical and dynamic scopes

use crate::reference::Reference;
use crate::symbol_table::BlockSymbolTable;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A block captured together with the scope it closes over
#[derive(Debug, Clone)]
pub struct ScopeBlock {
    pub handle: usize,
    pub scope: Scope,
    pub table: Rc<BlockSymbolTable>,
}

#[derive(Debug, Clone)]
pub enum ScopeSlot {
    Ref(Reference),
    Block(Option<ScopeBlock>),
}

/// Name to reference map shared by every scope of an eval-enabled layout
pub type EvalScope = Rc<RefCell<BTreeMap<String, Reference>>>;

/// Slot array indexed by symbol; slot 0 is `self`
///
/// Cloning copies the slot array, so a child scope never writes through to
/// its parent.
#[derive(Debug, Clone)]
pub struct Scope {
    slots: Vec<ScopeSlot>,
    owner: Value,
    caller: Option<Rc<Scope>>,
    eval_scope: Option<EvalScope>,
    partial_map: Option<Rc<BTreeMap<String, Reference>>>,
}

impl Scope {
    pub fn root(self_ref: Reference, size: usize, owner: Value) -> Self {
        let mut slots = vec![ScopeSlot::Ref(Reference::null()); size.max(1)];
        slots[0] = ScopeSlot::Ref(self_ref);
        Self {
            slots,
            owner,
            caller: None,
            eval_scope: None,
            partial_map: None,
        }
    }

    /// Root scope whose `self` is bound later
    pub fn sized(size: usize, owner: Value) -> Self {
        Self::root(Reference::null(), size, owner)
    }

    pub fn child(&self) -> Self {
        self.clone()
    }

    pub fn owner(&self) -> &Value {
        &self.owner
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn get_self(&self) -> Reference {
        self.get_symbol(0)
    }

    /// Reference in `slot`; unbound and block slots read as null
    pub fn get_symbol(&self, slot: usize) -> Reference {
        match self.slots.get(slot) {
            Some(ScopeSlot::Ref(reference)) => reference.clone(),
            _ => Reference::null(),
        }
    }

    pub fn get_block(&self, slot: usize) -> Option<ScopeBlock> {
        match self.slots.get(slot) {
            Some(ScopeSlot::Block(block)) => block.clone(),
            _ => None,
        }
    }

    fn ensure(&mut self, slot: usize) {
        if slot >= self.slots.len() {
            self.slots
                .resize(slot + 1, ScopeSlot::Ref(Reference::null()));
        }
    }

    pub fn bind_self(&mut self, reference: Reference) {
        self.bind_symbol(0, reference);
    }

    pub fn bind_symbol(&mut self, slot: usize, reference: Reference) {
        self.ensure(slot);
        self.slots[slot] = ScopeSlot::Ref(reference);
    }

    pub fn bind_block(&mut self, slot: usize, block: Option<ScopeBlock>) {
        self.ensure(slot);
        self.slots[slot] = ScopeSlot::Block(block);
    }

    pub fn bind_caller(&mut self, caller: Scope) {
        self.caller = Some(Rc::new(caller));
    }

    pub fn caller(&self) -> Option<&Scope> {
        self.caller.as_deref()
    }

    pub fn bind_eval_scope(&mut self, eval_scope: EvalScope) {
        self.eval_scope = Some(eval_scope);
    }

    pub fn eval_scope(&self) -> Option<&EvalScope> {
        self.eval_scope.as_ref()
    }

    pub fn bind_partial_map(&mut self, locals: BTreeMap<String, Reference>) {
        self.partial_map = Some(Rc::new(locals));
    }

    pub fn partial_map(&self) -> Option<&BTreeMap<String, Reference>> {
        self.partial_map.as_deref()
    }

    /// Resolve a free name: eval scope, then partial locals
    pub fn lookup_local(&self, name: &str) -> Option<Reference> {
        if let Some(found) = self
            .eval_scope
            .as_ref()
            .and_then(|lookup| lookup.borrow().get(name).cloned())
        {
            return Some(found);
        }
        self.partial_map().and_then(|map| map.get(name).cloned())
    }
}

/// Values threaded implicitly through a subtree
///
/// Reads made by references created from a dynamic scope see later writes to
/// that same scope; `child` takes a copy.
#[derive(Debug, Clone, Default)]
pub struct DynamicScope {
    bucket: Rc<RefCell<BTreeMap<String, Reference>>>,
}

impl DynamicScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Reference {
        self.bucket
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_else(Reference::null)
    }

    pub fn set(&self, name: &str, reference: Reference) {
        self.bucket.borrow_mut().insert(name.to_string(), reference);
    }

    pub fn child(&self) -> Self {
        Self {
            bucket: Rc::new(RefCell::new(self.bucket.borrow().clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::value_for_ref;

    #[test]
    fn test_child_scope_does_not_write_through() {
        let mut parent = Scope::root(Reference::constant("self"), 3, Value::Null);
        parent.bind_symbol(1, Reference::constant(1i64));

        let mut child = parent.child();
        child.bind_symbol(1, Reference::constant(2i64));

        assert_eq!(value_for_ref(&parent.get_symbol(1)).unwrap(), Value::from(1i64));
        assert_eq!(value_for_ref(&child.get_symbol(1)).unwrap(), Value::from(2i64));
        assert_eq!(value_for_ref(&child.get_self()).unwrap(), Value::from("self"));
    }

    #[test]
    fn test_unbound_slots_read_as_null() {
        let scope = Scope::sized(2, Value::Null);
        assert!(value_for_ref(&scope.get_symbol(1)).unwrap().is_null());
        assert!(value_for_ref(&scope.get_symbol(9)).unwrap().is_null());
        assert!(scope.get_block(1).is_none());
    }

    #[test]
    fn test_dynamic_scope_child_is_copy_on_write() {
        let parent = DynamicScope::new();
        parent.set("theme", Reference::constant("dark"));
        let child = parent.child();
        child.set("theme", Reference::constant("light"));

        assert_eq!(value_for_ref(&parent.get("theme")).unwrap(), Value::from("dark"));
        assert_eq!(value_for_ref(&child.get("theme")).unwrap(), Value::from("light"));
        assert!(value_for_ref(&parent.get("missing")).unwrap().is_null());
    }

    #[test]
    fn test_lookup_local_prefers_eval_scope() {
        let mut scope = Scope::sized(1, Value::Null);
        let mut locals = BTreeMap::new();
        locals.insert("name".to_string(), Reference::constant("partial"));
        scope.bind_partial_map(locals);
        assert_eq!(
            value_for_ref(&scope.lookup_local("name").unwrap()).unwrap(),
            Value::from("partial")
        );

        let eval: EvalScope = Rc::default();
        eval.borrow_mut()
            .insert("name".to_string(), Reference::constant("eval"));
        scope.bind_eval_scope(eval);
        assert_eq!(
            value_for_ref(&scope.lookup_local("name").unwrap()).unwrap(),
            Value::from("eval")
        );
    }
}
