//! Pooled containers with stable slot ids
//!
//! `PooledList` hands out slot ids that stay valid until freed and recycles
//! freed slots. `TrackedPooledList` additionally keeps a dense list of the
//! active slots so they can be iterated without scanning holes; freeing is
//! still O(1). `HandlePool` wraps slots with a revision so stale handles are
//! rejected on every access.

use crate::handle::{wrapped_increment_revision, Handle, HANDLE_INDEX_MASK};
use crate::{Error, Result};

/// Slot list with a free list.
///
/// Reused slots keep their previous contents; callers reset what they need.
#[derive(Debug, Clone)]
pub struct PooledList<T> {
    items: Vec<T>,
    free_list: Vec<u32>,
    used: usize,
}

impl<T> Default for PooledList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            free_list: Vec::new(),
            used: 0,
        }
    }
}

impl<T: Default> PooledList<T> {
    /// Takes a slot, growing the pool when no freed slot is available
    pub fn request(&mut self) -> (u32, &mut T) {
        self.used += 1;
        let id = match self.free_list.pop() {
            Some(id) => id,
            None => {
                self.items.push(T::default());
                (self.items.len() - 1) as u32
            }
        };
        (id, &mut self.items[id as usize])
    }
}

impl<T> PooledList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a slot to the free list
    pub fn free(&mut self, id: u32) {
        debug_assert!((id as usize) < self.items.len());
        debug_assert!(!self.free_list.contains(&id));
        self.free_list.push(id);
        self.used -= 1;
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&T> {
        self.items.get(id as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.items.get_mut(id as usize)
    }

    /// Number of slots in use
    #[inline]
    pub fn len(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Number of slots allocated, used or free
    #[inline]
    pub fn reserved_len(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.free_list.clear();
        self.used = 0;
    }
}

/// Pooled list that also tracks its active slots densely
#[derive(Debug, Clone)]
pub struct TrackedPooledList<T> {
    pool: PooledList<T>,
    active_ids: Vec<u32>,
    // position of each slot within `active_ids`
    active_positions: Vec<u32>,
}

impl<T> Default for TrackedPooledList<T> {
    fn default() -> Self {
        Self {
            pool: PooledList::default(),
            active_ids: Vec::new(),
            active_positions: Vec::new(),
        }
    }
}

impl<T: Default> TrackedPooledList<T> {
    pub fn request(&mut self) -> (u32, &mut T) {
        let (id, _) = self.pool.request();
        if self.active_positions.len() <= id as usize {
            self.active_positions.resize(id as usize + 1, u32::MAX);
        }
        self.active_positions[id as usize] = self.active_ids.len() as u32;
        self.active_ids.push(id);
        (id, &mut self.pool.items[id as usize])
    }

    /// Convenience for storing a value in a fresh slot
    pub fn insert(&mut self, value: T) -> u32 {
        let (id, slot) = self.request();
        *slot = value;
        id
    }
}

impl<T> TrackedPooledList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frees a slot; the last active slot takes its place in the dense list
    pub fn free(&mut self, id: u32) -> bool {
        let Some(&pos) = self.active_positions.get(id as usize) else {
            return false;
        };
        if pos == u32::MAX {
            return false;
        }

        self.active_ids.swap_remove(pos as usize);
        if let Some(&moved) = self.active_ids.get(pos as usize) {
            self.active_positions[moved as usize] = pos;
        }
        self.active_positions[id as usize] = u32::MAX;
        self.pool.free(id);
        true
    }

    /// Whether the slot is currently in use
    #[inline]
    pub fn is_active(&self, id: u32) -> bool {
        self.active_positions
            .get(id as usize)
            .is_some_and(|&pos| pos != u32::MAX)
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&T> {
        if self.is_active(id) {
            self.pool.get(id)
        } else {
            None
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        if self.is_active(id) {
            self.pool.get_mut(id)
        } else {
            None
        }
    }

    #[inline]
    pub fn active_len(&self) -> usize {
        self.active_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active_ids.is_empty()
    }

    /// Iterates active entries as `(slot id, value)`
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.active_ids
            .iter()
            .map(move |&id| (id, &self.pool.items[id as usize]))
    }

    pub fn clear(&mut self) {
        self.pool.clear();
        self.active_ids.clear();
        self.active_positions.clear();
    }
}

#[derive(Debug, Clone)]
struct HandleSlot<T> {
    revision: u8,
    value: Option<T>,
}

/// Registry of values addressed by generation-checked handles.
///
/// Every lookup validates the handle revision against the slot, so there is
/// no way to reach a value through a stale or forged handle.
#[derive(Debug, Clone)]
pub struct HandlePool<T, Tag> {
    slots: Vec<HandleSlot<T>>,
    free_list: Vec<u32>,
    len: usize,
    _tag: std::marker::PhantomData<fn() -> Tag>,
}

impl<T, Tag> Default for HandlePool<T, Tag> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
            _tag: std::marker::PhantomData,
        }
    }
}

impl<T, Tag> HandlePool<T, Tag> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value and returns its handle.
    ///
    /// Reused slots keep the revision they were given when freed.
    pub fn insert(&mut self, value: T) -> Result<Handle<Tag>> {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len() as u32;
                if index > HANDLE_INDEX_MASK {
                    return Err(Error::RegistryFull(format!(
                        "handle pool exhausted at {index} slots"
                    )));
                }
                self.slots.push(HandleSlot {
                    revision: 0,
                    value: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.value.is_none());
        if slot.revision == 0 {
            // zero is reserved for the null handle
            slot.revision = 1;
        }
        slot.value = Some(value);
        self.len += 1;
        Ok(Handle::from_parts(index, slot.revision))
    }

    /// Removes a value, bumping the slot revision so the handle goes stale
    pub fn remove(&mut self, handle: Handle<Tag>) -> Option<T> {
        let slot = self.valid_slot_mut(handle)?;
        let value = slot.value.take();
        slot.revision = wrapped_increment_revision(slot.revision);
        self.free_list.push(handle.index());
        self.len -= 1;
        value
    }

    #[inline]
    pub fn contains(&self, handle: Handle<Tag>) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: Handle<Tag>) -> Option<&T> {
        if handle.is_null() {
            return None;
        }
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.revision != handle.revision() {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle<Tag>) -> Option<&mut T> {
        self.valid_slot_mut(handle)?.value.as_mut()
    }

    fn valid_slot_mut(&mut self, handle: Handle<Tag>) -> Option<&mut HandleSlot<T>> {
        if handle.is_null() {
            return None;
        }
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.revision != handle.revision() || slot.value.is_none() {
            return None;
        }
        Some(slot)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates live entries with their current handles
    pub fn iter(&self) -> impl Iterator<Item = (Handle<Tag>, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (Handle::from_parts(i as u32, slot.revision), v))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<Tag>, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let revision = slot.revision;
            slot.value
                .as_mut()
                .map(move |v| (Handle::from_parts(i as u32, revision), v))
        })
    }

    /// Handles of all live entries
    pub fn handles(&self) -> Vec<Handle<Tag>> {
        self.iter().map(|(h, _)| h).collect()
    }

    /// Drops every value; revisions are bumped so old handles stay invalid
    pub fn clear(&mut self) {
        self.free_list.clear();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.revision = wrapped_increment_revision(slot.revision);
            }
            self.free_list.push(i as u32);
        }
        // hand out low slots first
        self.free_list.reverse();
        self.len = 0;
    }
}
