//! Revision tags
//!
//! A tag answers one question: has anything it covers changed since a given
//! revision? Revisions come from a per-thread monotonically increasing clock.
//! Reads of tracked state are recorded by `consume_tag` into the innermost
//! open track frame, which lets a whole render region be summarised by one
//! combined tag.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

pub type Revision = u64;

/// Revision of a tag that never changes
pub const CONSTANT: Revision = 0;
/// Revision every dirtyable tag starts at
pub const INITIAL: Revision = 1;
/// Revision of a tag that is never valid
pub const VOLATILE: Revision = Revision::MAX;

thread_local! {
    static CLOCK: Cell<Revision> = const { Cell::new(INITIAL) };
    static TRACKING: RefCell<Vec<Vec<Tag>>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone)]
pub enum Tag {
    Constant,
    Volatile,
    Dirtyable(Rc<Cell<Revision>>),
    Updatable(Rc<UpdatableTag>),
    Combinator(Rc<[Tag]>),
}

/// A dirtyable tag whose value also follows a replaceable subtag
pub struct UpdatableTag {
    revision: Cell<Revision>,
    subtag: RefCell<Option<Tag>>,
    buffer: Cell<Option<Revision>>,
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Constant => write!(f, "Tag::Constant"),
            Tag::Volatile => write!(f, "Tag::Volatile"),
            Tag::Dirtyable(rev) => write!(f, "Tag::Dirtyable({})", rev.get()),
            Tag::Updatable(tag) => write!(f, "Tag::Updatable({})", tag.revision.get()),
            Tag::Combinator(tags) => write!(f, "Tag::Combinator({})", tags.len()),
        }
    }
}

impl Tag {
    pub fn is_constant(&self) -> bool {
        matches!(self, Tag::Constant)
    }
}

pub fn current_revision() -> Revision {
    CLOCK.with(|clock| clock.get())
}

fn bump() -> Revision {
    CLOCK.with(|clock| {
        let next = clock.get() + 1;
        clock.set(next);
        next
    })
}

pub fn create_tag() -> Tag {
    Tag::Dirtyable(Rc::new(Cell::new(INITIAL)))
}

pub fn create_updatable_tag() -> Tag {
    Tag::Updatable(Rc::new(UpdatableTag {
        revision: Cell::new(INITIAL),
        subtag: RefCell::new(None),
        buffer: Cell::new(None),
    }))
}

pub fn value_for_tag(tag: &Tag) -> Revision {
    match tag {
        Tag::Constant => CONSTANT,
        Tag::Volatile => VOLATILE,
        Tag::Dirtyable(rev) => rev.get(),
        Tag::Updatable(tag) => {
            let own = tag.revision.get();
            match tag.subtag.borrow().as_ref() {
                None => own,
                Some(subtag) => {
                    let sub = value_for_tag(subtag);
                    if tag.buffer.get() == Some(sub) {
                        own
                    } else {
                        tag.buffer.set(None);
                        own.max(sub)
                    }
                }
            }
        }
        Tag::Combinator(tags) => tags.iter().map(value_for_tag).max().unwrap_or(CONSTANT),
    }
}

/// True when nothing covered by `tag` changed after `snapshot`
///
/// Anything covered by a volatile tag is never valid.
pub fn validate_tag(tag: &Tag, snapshot: Revision) -> bool {
    let value = value_for_tag(tag);
    value != VOLATILE && snapshot >= value
}

pub fn dirty_tag(tag: &Tag) {
    match tag {
        Tag::Dirtyable(rev) => rev.set(bump()),
        Tag::Updatable(tag) => tag.revision.set(bump()),
        _ => {}
    }
}

/// Point an updatable tag at a new subtag without invalidating it
///
/// The subtag's current value is buffered, so only changes made after this
/// call propagate.
pub fn update_tag(tag: &Tag, subtag: Tag) {
    if let Tag::Updatable(inner) = tag {
        if subtag.is_constant() {
            *inner.subtag.borrow_mut() = None;
            inner.buffer.set(None);
        } else {
            inner.buffer.set(Some(value_for_tag(&subtag)));
            *inner.subtag.borrow_mut() = Some(subtag);
        }
    }
}

pub fn combine(tags: Vec<Tag>) -> Tag {
    let mut live: Vec<Tag> = tags.into_iter().filter(|t| !t.is_constant()).collect();
    match live.len() {
        0 => Tag::Constant,
        1 => live.pop().unwrap_or(Tag::Constant),
        _ => Tag::Combinator(live.into()),
    }
}

pub fn consume_tag(tag: &Tag) {
    if tag.is_constant() {
        return;
    }
    TRACKING.with(|frames| {
        if let Some(frame) = frames.borrow_mut().last_mut() {
            frame.push(tag.clone());
        }
    });
}

pub fn begin_track_frame() {
    TRACKING.with(|frames| frames.borrow_mut().push(Vec::new()));
}

pub fn end_track_frame() -> Tag {
    let tags = TRACKING.with(|frames| frames.borrow_mut().pop());
    combine(tags.unwrap_or_default())
}

pub fn is_tracking() -> bool {
    TRACKING.with(|frames| !frames.borrow().is_empty())
}

/// Run `f`, returning its result and the combined tag of everything it consumed
pub fn track<T>(f: impl FnOnce() -> T) -> (T, Tag) {
    begin_track_frame();
    let result = f();
    (result, end_track_frame())
}

/// Run `f` without recording its reads in the enclosing frame
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let saved = TRACKING.with(|frames| std::mem::take(&mut *frames.borrow_mut()));
    let result = f();
    TRACKING.with(|frames| *frames.borrow_mut() = saved);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_invalidates_snapshot() {
        let tag = create_tag();
        let snapshot = value_for_tag(&tag);
        assert!(validate_tag(&tag, snapshot));

        dirty_tag(&tag);
        assert!(!validate_tag(&tag, snapshot));
        assert!(validate_tag(&tag, value_for_tag(&tag)));
    }

    #[test]
    fn test_constant_and_volatile() {
        assert!(validate_tag(&Tag::Constant, CONSTANT));
        assert!(!validate_tag(&Tag::Volatile, current_revision()));
        assert!(!validate_tag(&Tag::Volatile, VOLATILE));
        let mixed = combine(vec![create_tag(), Tag::Volatile]);
        assert!(!validate_tag(&mixed, value_for_tag(&mixed)));
    }

    #[test]
    fn test_track_collects_consumed_tags() {
        let a = create_tag();
        let b = create_tag();
        let ((), combined) = track(|| {
            consume_tag(&a);
            consume_tag(&b);
        });
        let snapshot = value_for_tag(&combined);
        dirty_tag(&b);
        assert!(!validate_tag(&combined, snapshot));
    }

    #[test]
    fn test_untrack_hides_reads() {
        let a = create_tag();
        let ((), combined) = track(|| untrack(|| consume_tag(&a)));
        assert!(combined.is_constant());
    }

    #[test]
    fn test_updatable_tag_buffers_subtag() {
        let tag = create_updatable_tag();
        let sub = create_tag();
        dirty_tag(&sub);
        let before = value_for_tag(&tag);

        update_tag(&tag, sub.clone());
        assert!(validate_tag(&tag, before));

        dirty_tag(&sub);
        assert!(!validate_tag(&tag, before));
    }
}
