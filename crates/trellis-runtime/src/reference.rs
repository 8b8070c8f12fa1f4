//! References
//!
//! A reference is a lazily evaluated handle to a value, paired with the tag
//! that says when it may have changed. Computed references cache their last
//! value together with the combined tag of everything read while computing it.

use crate::error::RenderError;
use crate::validator::{
    consume_tag, create_tag, dirty_tag, track, validate_tag, value_for_tag, Revision, Tag,
};
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type ComputeFn = Box<dyn Fn() -> Result<Value, RenderError>>;
type UpdateFn = Box<dyn Fn(Value) -> Result<(), RenderError>>;

#[derive(Clone)]
pub struct Reference(Rc<RefInner>);

enum RefInner {
    Constant(Value),
    Root {
        value: RefCell<Value>,
        tag: Tag,
    },
    Compute {
        compute: ComputeFn,
        update: Option<UpdateFn>,
        cache: RefCell<Option<Cached>>,
        debug_label: Option<String>,
    },
}

struct Cached {
    value: Value,
    tag: Tag,
    revision: Revision,
}

impl Reference {
    pub fn constant(value: impl Into<Value>) -> Self {
        Reference(Rc::new(RefInner::Constant(value.into())))
    }

    pub fn null() -> Self {
        Reference::constant(Value::Null)
    }

    /// A mutable root cell; `update_ref` dirties it when the value changes
    pub fn root(value: impl Into<Value>) -> Self {
        Reference(Rc::new(RefInner::Root {
            value: RefCell::new(value.into()),
            tag: create_tag(),
        }))
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Reference) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The tag covering this reference's current value
    ///
    /// A computed reference that has never been evaluated reports a volatile tag.
    pub fn tag(&self) -> Tag {
        match &*self.0 {
            RefInner::Constant(_) => Tag::Constant,
            RefInner::Root { tag, .. } => tag.clone(),
            RefInner::Compute { cache, .. } => cache
                .borrow()
                .as_ref()
                .map(|c| c.tag.clone())
                .unwrap_or(Tag::Volatile),
        }
    }

    pub fn debug_label(&self) -> Option<&str> {
        match &*self.0 {
            RefInner::Compute { debug_label, .. } => debug_label.as_deref(),
            _ => None,
        }
    }

    /// Set a root cell without consulting the tracking frame
    pub fn set(&self, value: impl Into<Value>) {
        if let RefInner::Root { value: cell, tag } = &*self.0 {
            let value = value.into();
            if *cell.borrow() != value {
                *cell.borrow_mut() = value;
                dirty_tag(tag);
            }
        }
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            RefInner::Constant(v) => write!(f, "ConstRef({:?})", v),
            RefInner::Root { value, .. } => write!(f, "RootRef({:?})", value.borrow()),
            RefInner::Compute { debug_label, .. } => {
                write!(f, "ComputeRef({})", debug_label.as_deref().unwrap_or("?"))
            }
        }
    }
}

pub fn create_compute_ref(
    compute: impl Fn() -> Result<Value, RenderError> + 'static,
) -> Reference {
    Reference(Rc::new(RefInner::Compute {
        compute: Box::new(compute),
        update: None,
        cache: RefCell::new(None),
        debug_label: None,
    }))
}

pub fn create_updatable_compute_ref(
    compute: impl Fn() -> Result<Value, RenderError> + 'static,
    update: impl Fn(Value) -> Result<(), RenderError> + 'static,
) -> Reference {
    Reference(Rc::new(RefInner::Compute {
        compute: Box::new(compute),
        update: Some(Box::new(update)),
        cache: RefCell::new(None),
        debug_label: None,
    }))
}

pub fn create_labeled_compute_ref(
    label: impl Into<String>,
    compute: impl Fn() -> Result<Value, RenderError> + 'static,
) -> Reference {
    Reference(Rc::new(RefInner::Compute {
        compute: Box::new(compute),
        update: None,
        cache: RefCell::new(None),
        debug_label: Some(label.into()),
    }))
}

pub fn value_for_ref(reference: &Reference) -> Result<Value, RenderError> {
    match &*reference.0 {
        RefInner::Constant(value) => Ok(value.clone()),
        RefInner::Root { value, tag } => {
            consume_tag(tag);
            Ok(value.borrow().clone())
        }
        RefInner::Compute { compute, cache, .. } => {
            if let Some(cached) = cache.borrow().as_ref() {
                if validate_tag(&cached.tag, cached.revision) {
                    consume_tag(&cached.tag);
                    return Ok(cached.value.clone());
                }
            }

            let (result, tag) = track(compute);
            let value = result?;
            let revision = value_for_tag(&tag);
            consume_tag(&tag);
            *cache.borrow_mut() = Some(Cached {
                value: value.clone(),
                tag,
                revision,
            });
            Ok(value)
        }
    }
}

pub fn update_ref(reference: &Reference, value: Value) -> Result<(), RenderError> {
    match &*reference.0 {
        RefInner::Root { .. } => {
            reference.set(value);
            Ok(())
        }
        RefInner::Compute {
            update: Some(update),
            ..
        } => update(value),
        _ => Err(RenderError::invariant(
            "called update_ref on a non-updatable reference",
        )),
    }
}

pub fn is_update_ref(reference: &Reference) -> bool {
    matches!(
        &*reference.0,
        RefInner::Root { .. }
            | RefInner::Compute {
                update: Some(_),
                ..
            }
    )
}

/// Constant references, and computed ones whose dependencies are all constant
pub fn is_const_ref(reference: &Reference) -> bool {
    match &*reference.0 {
        RefInner::Constant(_) => true,
        RefInner::Root { .. } => false,
        RefInner::Compute { cache, .. } => cache
            .borrow()
            .as_ref()
            .map(|c| c.tag.is_constant())
            .unwrap_or(false),
    }
}

/// Reference to `parent.key`
pub fn child_ref_for(parent: &Reference, key: &str) -> Reference {
    if let RefInner::Constant(value) = &*parent.0 {
        return Reference::constant(value.get(key));
    }
    let parent = parent.clone();
    let key = key.to_string();
    let label = key.clone();
    create_labeled_compute_ref(label, move || Ok(value_for_ref(&parent)?.get(&key)))
}

pub fn child_ref_for_path(parent: &Reference, path: &[&str]) -> Reference {
    path.iter()
        .fold(parent.clone(), |current, key| child_ref_for(&current, key))
}
