//! Component definitions and managers
//!
//! The VM drives components through `ComponentManager`. A manager declares
//! its capabilities once; the VM only calls the hooks those capabilities
//! enable. Lifecycle notifications (`did_create`, `did_update`) are queued on
//! the render transaction and delivered at commit.

use crate::arguments::{CapturedArguments, PreparedArguments};
use crate::curry::ResolvedCurry;
use crate::debug_render_tree::RenderNodeId;
use crate::dom::Bounds;
use crate::error::RenderError;
use crate::program::TemplateRef;
use crate::reference::Reference;
use crate::scope::{DynamicScope, EvalScope};
use crate::symbol_table::ProgramSymbolTable;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Hooks a manager opts into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentCapabilities {
    /// `create` and `update` receive the dynamic scope
    pub dynamic_scope: bool,
    /// `create` receives the captured arguments
    pub create_args: bool,
    /// `create` receives the caller's `self`
    pub create_caller: bool,
    /// `update` runs whenever the component's inputs changed
    pub update_hook: bool,
    /// The manager creates per-invocation state and receives lifecycle hooks
    pub create_instance: bool,
    /// `will_destroy` runs on teardown
    pub will_destroy: bool,
    /// `prepare_args` may rewrite the arguments before creation
    pub prepare_args: bool,
}

/// Opaque per-invocation state owned by a manager
pub type ComponentState = Rc<dyn Any>;

pub trait ComponentManager {
    fn capabilities(&self) -> ComponentCapabilities;

    fn create(
        &self,
        _args: Option<&CapturedArguments>,
        _dynamic_scope: Option<&DynamicScope>,
        _caller: Option<&Reference>,
        _has_default_block: bool,
    ) -> Result<ComponentState, RenderError> {
        Ok(Rc::new(()))
    }

    fn get_self(&self, _state: &ComponentState) -> Reference {
        Reference::null()
    }

    fn prepare_args(
        &self,
        _args: &CapturedArguments,
    ) -> Result<Option<PreparedArguments>, RenderError> {
        Ok(None)
    }

    fn update(
        &self,
        _state: &ComponentState,
        _dynamic_scope: Option<&DynamicScope>,
    ) -> Result<(), RenderError> {
        Ok(())
    }

    fn did_render_layout(&self, _state: &ComponentState, _bounds: Bounds) {}

    fn did_update_layout(&self, _state: &ComponentState, _bounds: Bounds) {}

    fn did_create(&self, _state: &ComponentState) {}

    fn did_update(&self, _state: &ComponentState) {}

    fn will_destroy(&self, _state: &ComponentState) {}
}

/// Manager for components that are nothing but a layout
#[derive(Debug, Default)]
pub struct TemplateOnlyComponentManager;

impl ComponentManager for TemplateOnlyComponentManager {
    fn capabilities(&self) -> ComponentCapabilities {
        ComponentCapabilities::default()
    }
}

struct DefinitionInner {
    name: String,
    manager: Rc<dyn ComponentManager>,
    layout: Option<TemplateRef>,
}

#[derive(Clone)]
pub struct ComponentDefinition(Rc<DefinitionInner>);

impl ComponentDefinition {
    pub fn new(
        name: impl Into<String>,
        manager: Rc<dyn ComponentManager>,
        layout: Option<TemplateRef>,
    ) -> Self {
        ComponentDefinition(Rc::new(DefinitionInner {
            name: name.into(),
            manager,
            layout,
        }))
    }

    pub fn template_only(name: impl Into<String>, layout: TemplateRef) -> Self {
        Self::new(name, Rc::new(TemplateOnlyComponentManager), Some(layout))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn manager(&self) -> Rc<dyn ComponentManager> {
        self.0.manager.clone()
    }

    pub fn layout(&self) -> Option<&TemplateRef> {
        self.0.layout.as_ref()
    }

    pub fn capabilities(&self) -> ComponentCapabilities {
        self.0.manager.capabilities()
    }

    /// Identity of the definition
    pub fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentDefinition({})", self.0.name)
    }
}

/// A component being invoked, threaded through the invocation opcodes in a
/// register
pub struct ComponentInstance {
    pub definition: ComponentDefinition,
    pub manager: Rc<dyn ComponentManager>,
    pub capabilities: ComponentCapabilities,
    pub state: Option<ComponentState>,
    /// Layout handle, known after `GetComponentLayout`
    pub handle: Option<usize>,
    pub table: Option<Rc<ProgramSymbolTable>>,
    /// Eval scope bound when the layout uses one
    pub lookup: Option<EvalScope>,
    /// Arguments curried into the definition, merged by `PrepareArgs`
    pub curried: Option<ResolvedCurry>,
    pub debug_node: Option<RenderNodeId>,
}

impl ComponentInstance {
    pub fn new(definition: ComponentDefinition) -> Self {
        let manager = definition.manager();
        let capabilities = manager.capabilities();
        Self {
            definition,
            manager,
            capabilities,
            state: None,
            handle: None,
            table: None,
            lookup: None,
            curried: None,
            debug_node: None,
        }
    }

    /// State created by the manager, or a unit placeholder for managers
    /// without `create_instance`
    pub fn state(&self) -> ComponentState {
        self.state.clone().unwrap_or_else(|| Rc::new(()))
    }
}
