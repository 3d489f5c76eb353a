//! Generation-checked handles
//!
//! A handle packs a 24-bit slot index with an 8-bit revision. The all-zero
//! value is reserved as "no handle"; live slots never carry revision zero, so
//! no valid handle can ever encode to zero.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Number of bits for the slot index
pub const HANDLE_INDEX_BITS: u32 = 24;
/// Number of bits for the revision
pub const HANDLE_REVISION_BITS: u32 = 8;

/// Maximum slot index value (24 bits)
pub const HANDLE_INDEX_MASK: u32 = (1 << HANDLE_INDEX_BITS) - 1;
/// Maximum revision value (8 bits)
pub const HANDLE_REVISION_MASK: u32 = (1 << HANDLE_REVISION_BITS) - 1;

/// Advances a revision, wrapping around and skipping zero
#[inline]
pub fn wrapped_increment_revision(revision: u8) -> u8 {
    match revision.wrapping_add(1) {
        0 => 1,
        r => r,
    }
}

/// Typed handle to an entity stored in a `HandlePool`.
///
/// The type parameter only tags which registry the handle belongs to, so a
/// body handle cannot be passed where a map handle is expected.
pub struct Handle<T> {
    raw: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The reserved invalid handle
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Creates a handle from a slot index and revision
    #[inline]
    pub fn from_parts(index: u32, revision: u8) -> Self {
        debug_assert!(index <= HANDLE_INDEX_MASK);
        Self::from_raw(((revision as u32) << HANDLE_INDEX_BITS) | (index & HANDLE_INDEX_MASK))
    }

    /// Reinterprets a raw 32-bit value as a handle
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// Slot index part
    #[inline]
    pub const fn index(&self) -> u32 {
        self.raw & HANDLE_INDEX_MASK
    }

    /// Revision part
    #[inline]
    pub const fn revision(&self) -> u8 {
        ((self.raw >> HANDLE_INDEX_BITS) & HANDLE_REVISION_MASK) as u8
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Handle(null)")
        } else {
            write!(f, "Handle({}v{})", self.index(), self.revision())
        }
    }
}

impl<T> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Registry tag for agent bodies
#[derive(Debug)]
pub enum BodyTag {}
/// Registry tag for meshes
#[derive(Debug)]
pub enum MeshTag {}
/// Registry tag for mesh instances
#[derive(Debug)]
pub enum MeshInstanceTag {}
/// Registry tag for regions
#[derive(Debug)]
pub enum RegionTag {}
/// Registry tag for maps
#[derive(Debug)]
pub enum MapTag {}

pub type BodyHandle = Handle<BodyTag>;
pub type MeshHandle = Handle<MeshTag>;
pub type MeshInstanceHandle = Handle<MeshInstanceTag>;
pub type RegionHandle = Handle<RegionTag>;
pub type MapHandle = Handle<MapTag>;

/// Membership of an entity in a container's pooled list.
///
/// Remembers the slot so detaching is O(1).
#[derive(Debug)]
pub struct SlotLink<T> {
    pub handle: Handle<T>,
    pub slot: u32,
}

impl<T> Clone for SlotLink<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SlotLink<T> {}

impl<T> PartialEq for SlotLink<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.slot == other.slot
    }
}

impl<T> Eq for SlotLink<T> {}

impl<T> SlotLink<T> {
    pub fn new(handle: Handle<T>, slot: u32) -> Self {
        Self { handle, slot }
    }
}
