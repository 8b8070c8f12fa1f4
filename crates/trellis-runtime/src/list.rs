//! Keyed list reconciliation
//!
//! When a list's iterable changes, the new items are matched against the
//! rendered ones by key. Matching items keep their DOM and get their value
//! and memo updated; items whose position changed are moved; new keys are
//! rendered fresh; keys that disappeared are destroyed.
//!
//! Moves are kept low with a forward scan: an item found further ahead is
//! retained in place when everything between is already placed, otherwise it
//! is moved to the cursor.

use crate::builder::{BlockId, BuilderMode, CursorPosition, ElementBuilder};
use crate::dom::{self, NodeId};
use crate::error::RenderError;
use crate::iterable::{IterationItem, ListIterator};
use crate::opcodes::{ListBlockOpcode, ListItemOpcode, UpdatingOpcode};
use crate::reference::{update_ref, value_for_ref};
use crate::runtime::{OpId, Runtime};
use crate::validator::value_for_tag;
use crate::vm::AppendVM;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

fn item(rt: &Runtime, id: OpId) -> Result<&ListItemOpcode, RenderError> {
    match rt.opcodes.get(id)? {
        UpdatingOpcode::ListItem(item) => Ok(item),
        other => Err(RenderError::invariant(format!(
            "list child is a {}",
            other.name()
        ))),
    }
}

fn item_mut(rt: &mut Runtime, id: OpId) -> Result<&mut ListItemOpcode, RenderError> {
    match rt.opcodes.get_mut(id)? {
        UpdatingOpcode::ListItem(item) => Ok(item),
        other => Err(RenderError::invariant(format!(
            "list child is a {}",
            other.name()
        ))),
    }
}

/// Destroy an item, remove its DOM and free its opcode
fn discard(rt: &mut Runtime, id: OpId) -> Result<Rc<str>, RenderError> {
    let (key, block, destroyable) = {
        let item = item(rt, id)?;
        (item.key.clone(), item.inner.block, item.inner.destroyable)
    };
    rt.destroy(destroyable);
    rt.dom.blocks.clear(block, &mut rt.dom.document);
    rt.opcodes.release([id]);
    Ok(key)
}

#[derive(Debug, Default)]
struct SyncCounts {
    retained: usize,
    moved: usize,
    inserted: usize,
    deleted: usize,
}

/// Working state of one sync pass
struct Sync<'a> {
    list: &'a mut ListBlockOpcode,
    /// Insertion point past the last item
    marker: NodeId,
    /// Children in their new order
    children: Vec<OpId>,
    counts: SyncCounts,
}

impl ListBlockOpcode {
    /// Bring the rendered items in line with the iterable's current value
    pub(crate) fn sync(&mut self, rt: &mut Runtime) -> Result<(), RenderError> {
        let value = value_for_ref(&self.iterable)?;
        let previous = self.last_iterated;
        self.last_iterated = value_for_tag(&self.iterable.tag());
        let iterator = ListIterator::new(&value, &self.key)?;

        let parent = rt.dom.blocks.parent_element(self.inner.block);
        let after = rt
            .dom
            .blocks
            .last_node(self.inner.block)
            .and_then(|last| rt.dom.document.next_sibling(last));
        let marker = rt.dom.document.create_comment("");
        rt.dom.document.insert_before(parent, marker, after)?;

        let old = std::mem::take(&mut self.inner.children);
        let mut sync = Sync {
            list: self,
            marker,
            children: Vec::with_capacity(iterator.len()),
            counts: SyncCounts::default(),
        };
        let result = sync.run(rt, &old, iterator);
        rt.dom.document.remove(marker);
        if let Err(err) = result {
            // the next rerender must sync again over what survived
            self.last_iterated = previous;
            self.restore_children(rt)?;
            return Err(err);
        }

        let Sync {
            children, counts, ..
        } = sync;
        let blocks = children
            .iter()
            .map(|id| item(rt, *id).map(|item| item.inner.block))
            .collect::<Result<Vec<BlockId>, _>>()?;
        rt.dom.blocks.set_list_items(self.inner.block, blocks);
        self.inner.children = children;

        rt.stats.syncs += 1;
        rt.stats.retained += counts.retained;
        rt.stats.moved += counts.moved;
        rt.stats.inserted += counts.inserted;
        rt.stats.deleted += counts.deleted;
        debug!(
            key = %self.key,
            retained = counts.retained,
            moved = counts.moved,
            inserted = counts.inserted,
            deleted = counts.deleted,
            "list synced"
        );
        Ok(())
    }

    /// Rebuild `children` from the live items after a failed pass, in DOM order
    fn restore_children(&mut self, rt: &mut Runtime) -> Result<(), RenderError> {
        let parent = rt.dom.blocks.parent_element(self.inner.block);
        let order: HashMap<NodeId, usize> = rt
            .dom
            .document
            .children(parent)
            .into_iter()
            .enumerate()
            .map(|(position, node)| (node, position))
            .collect();

        let mut live = self
            .items
            .values()
            .map(|&id| {
                let block = item(rt, id)?.inner.block;
                let position = rt
                    .dom
                    .blocks
                    .first_node(block)
                    .and_then(|node| order.get(&node).copied())
                    .unwrap_or(usize::MAX);
                Ok((position, id))
            })
            .collect::<Result<Vec<_>, RenderError>>()?;
        live.sort_by_key(|&(position, _)| position);

        let mut children = Vec::with_capacity(live.len());
        let mut blocks = Vec::with_capacity(live.len());
        for (index, (_, id)) in live.into_iter().enumerate() {
            let item = item_mut(rt, id)?;
            item.retained = false;
            item.index = index;
            blocks.push(item.inner.block);
            children.push(id);
        }
        rt.dom.blocks.set_list_items(self.inner.block, blocks);
        self.inner.children = children;
        Ok(())
    }
}

impl Sync<'_> {
    fn run(
        &mut self,
        rt: &mut Runtime,
        old: &[OpId],
        iterator: ListIterator,
    ) -> Result<(), RenderError> {
        let mut current = 0;
        let mut seen = 0;

        for next in iterator {
            // items moved earlier in this pass are already placed
            while let Some(&id) = old.get(current) {
                if !item(rt, id)?.retained {
                    break;
                }
                current += 1;
            }
            let candidate = old.get(current).copied();

            if let Some(id) = candidate {
                if item(rt, id)?.key == next.key {
                    self.retain(rt, id, next)?;
                    current += 1;
                    continue;
                }
            }

            let Some(&id) = self.list.items.get(&next.key) else {
                self.insert(rt, next, candidate)?;
                continue;
            };

            let index = item(rt, id)?.index;
            if index < seen {
                self.move_item(rt, id, next, candidate)?;
                continue;
            }

            seen = index;
            let mut unplaced_between = false;
            for between in old.iter().take(seen).skip(current + 1) {
                if !item(rt, *between)?.retained {
                    unplaced_between = true;
                    break;
                }
            }
            if unplaced_between {
                self.move_item(rt, id, next, candidate)?;
                current += 1;
            } else {
                self.retain(rt, id, next)?;
                current = seen + 1;
            }
        }

        for &id in old {
            if item(rt, id)?.retained {
                item_mut(rt, id)?.retained = false;
            } else {
                self.delete(rt, id)?;
            }
        }
        Ok(())
    }

    fn place(&mut self, rt: &mut Runtime, id: OpId, next: IterationItem) -> Result<(), RenderError> {
        let index = self.children.len();
        let item = item_mut(rt, id)?;
        update_ref(&item.memo, next.memo)?;
        update_ref(&item.value, next.value)?;
        item.retained = true;
        item.index = index;
        self.children.push(id);
        Ok(())
    }

    fn retain(&mut self, rt: &mut Runtime, id: OpId, next: IterationItem) -> Result<(), RenderError> {
        self.place(rt, id, next)?;
        self.counts.retained += 1;
        Ok(())
    }

    /// First node of `before`'s region, or the marker at the end
    fn insertion_point(&self, rt: &Runtime, before: Option<OpId>) -> Result<Option<NodeId>, RenderError> {
        match before {
            Some(id) => Ok(rt.dom.blocks.first_node(item(rt, id)?.inner.block)),
            None => Ok(Some(self.marker)),
        }
    }

    fn move_item(
        &mut self,
        rt: &mut Runtime,
        id: OpId,
        next: IterationItem,
        before: Option<OpId>,
    ) -> Result<(), RenderError> {
        self.place(rt, id, next)?;
        let bounds = rt.dom.blocks.bounds(item(rt, id)?.inner.block)?;
        let target = self.insertion_point(rt, before)?;
        if rt.dom.document.next_sibling(bounds.last) != target {
            dom::move_bounds(&mut rt.dom.document, bounds, target)?;
        }
        self.counts.moved += 1;
        Ok(())
    }

    /// Render a new item in front of `before` by resuming the list body
    fn insert(
        &mut self,
        rt: &mut Runtime,
        next: IterationItem,
        before: Option<OpId>,
    ) -> Result<(), RenderError> {
        let key = next.key.clone();
        let position = CursorPosition {
            element: rt.dom.blocks.parent_element(self.list.inner.block),
            next_sibling: self.insertion_point(rt, before)?,
        };
        let builder = ElementBuilder::for_initial_render(&mut rt.dom, BuilderMode::Fresh, position)?;
        let mut vm = AppendVM::resume(rt, &self.list.inner.state, builder, self.list.inner.destroyable);
        vm.push_updating(None);
        let id = vm.enter_item(next)?;
        if let Err(err) = vm.execute() {
            discard(rt, id)?;
            return Err(err);
        }

        let index = self.children.len();
        item_mut(rt, id)?.index = index;
        self.children.push(id);
        self.list.items.insert(key, id);
        self.counts.inserted += 1;
        Ok(())
    }

    fn delete(&mut self, rt: &mut Runtime, id: OpId) -> Result<(), RenderError> {
        let key = discard(rt, id)?;
        self.list.items.remove(&key);
        self.counts.deleted += 1;
        Ok(())
    }
}
