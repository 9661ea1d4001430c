use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use thunderdome::Arena;

use crate::error::EngineError;

/// A process-wide unique identifier for a [`NodeSet`](crate::handle::SlotTable)-owning
/// graph. Handles embed their owning set's ID so that a handle minted by one
/// set can never be mistaken for a handle in another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeSetId(u64);

impl NodeSetId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// A sentinel that no real `NodeSet` ever holds (`next()` starts at 1),
    /// used only to give dangling handles a harmless placeholder set.
    const DANGLING: Self = Self(0);
}

/// Marker type identifying what kind of object a [`Handle`] refers to. Never
/// instantiated; only used to keep handles to different tables from being
/// accidentally interchanged at the type level.
pub trait HandleKind: 'static {
    const DEBUG_NAME: &'static str;
}

macro_rules! handle_kind {
    ($name:ident, $debug:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {}
        impl HandleKind for $name {
            const DEBUG_NAME: &'static str = $debug;
        }
    };
}

handle_kind!(NodeKind, "node");
handle_kind!(EdgeKind, "edge");
handle_kind!(ForwardKind, "forward");
handle_kind!(PortArraySizeKind, "port-array-size");
handle_kind!(GraphValueKind, "graph-value");

/// A versioned `(index, version)` identity, resilient to slot reuse.
///
/// Two handles compare equal iff both the slot index and the version
/// (generation) match, and iff they were minted by the same [`NodeSetId`].
/// A handle from a foreign set is rejected with
/// [`EngineError::InvalidForSet`] rather than silently aliasing an unrelated
/// slot that happens to share an index.
pub struct Handle<K: HandleKind> {
    index: thunderdome::Index,
    set_id: NodeSetId,
    _kind: PhantomData<fn() -> K>,
}

impl<K: HandleKind> Handle<K> {
    fn new(index: thunderdome::Index, set_id: NodeSetId) -> Self {
        Self {
            index,
            set_id,
            _kind: PhantomData,
        }
    }

    pub fn set_id(&self) -> NodeSetId {
        self.set_id
    }

    pub(crate) fn index(&self) -> thunderdome::Index {
        self.index
    }

    /// A placeholder handle that belongs to no real `NodeSet`, used to
    /// fill in a slot's own identity immediately after `insert` (the slot
    /// table does not know its handle until the insert call returns).
    pub fn default_dangling() -> Self {
        Self::new(thunderdome::Index::DANGLING, NodeSetId::DANGLING)
    }
}

impl<K: HandleKind> Default for Handle<K> {
    fn default() -> Self {
        Self::default_dangling()
    }
}

impl<K: HandleKind> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K: HandleKind> Copy for Handle<K> {}

impl<K: HandleKind> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.set_id == other.set_id
    }
}
impl<K: HandleKind> Eq for Handle<K> {}

impl<K: HandleKind> Hash for Handle<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.set_id.hash(state);
    }
}

impl<K: HandleKind> Debug for Handle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{}@{}",
            K::DEBUG_NAME,
            self.index.slot(),
            self.index.generation()
        )
    }
}

pub type NodeId = Handle<NodeKind>;
pub type EdgeId = Handle<EdgeKind>;
pub type ForwardId = Handle<ForwardKind>;
pub type PortArraySizeId = Handle<PortArraySizeKind>;
pub type GraphValueId = Handle<GraphValueKind>;

/// A handle that has already been checked against its [`SlotTable`] exactly
/// once. Further accesses through a `Validated` handle skip the liveness
/// check, on the understanding that no intervening mutation of the table can
/// have invalidated it (its lifetime is tied to an immutable borrow of the
/// table).
pub struct Validated<'a, K: HandleKind> {
    index: thunderdome::Index,
    _life: PhantomData<&'a ()>,
    _kind: PhantomData<fn() -> K>,
}

/// A dense slot table: one live object per slot plus a generation counter.
/// Allocation pops a free slot or extends the arena; destruction bumps the
/// generation and returns the slot to the free list (handled internally by
/// [`thunderdome::Arena`]).
pub struct SlotTable<K: HandleKind, T> {
    set_id: NodeSetId,
    arena: Arena<T>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: HandleKind, T> SlotTable<K, T> {
    pub fn new(set_id: NodeSetId, capacity: usize) -> Self {
        Self {
            set_id,
            arena: Arena::with_capacity(capacity),
            _kind: PhantomData,
        }
    }

    pub fn set_id(&self) -> NodeSetId {
        self.set_id
    }

    pub fn insert(&mut self, value: T) -> Handle<K> {
        let index = self.arena.insert(value);
        Handle::new(index, self.set_id)
    }

    pub fn remove(&mut self, handle: Handle<K>) -> Result<T, EngineError> {
        self.check_set(handle)?;
        self.arena
            .remove(handle.index)
            .ok_or(EngineError::InvalidHandle)
    }

    pub fn get(&self, handle: Handle<K>) -> Result<&T, EngineError> {
        self.check_set(handle)?;
        self.arena.get(handle.index).ok_or(EngineError::InvalidHandle)
    }

    pub fn get_mut(&mut self, handle: Handle<K>) -> Result<&mut T, EngineError> {
        self.check_set(handle)?;
        self.arena
            .get_mut(handle.index)
            .ok_or(EngineError::InvalidHandle)
    }

    pub fn contains(&self, handle: Handle<K>) -> bool {
        handle.set_id == self.set_id && self.arena.contains(handle.index)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<K>, &T)> {
        self.arena
            .iter()
            .map(move |(index, v)| (Handle::new(index, self.set_id), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<K>, &mut T)> {
        let set_id = self.set_id;
        self.arena
            .iter_mut()
            .map(move |(index, v)| (Handle::new(index, set_id), v))
    }

    /// Validate `handle` against this table exactly once, returning a token
    /// that permits unchecked dereferencing for as long as the table is not
    /// mutated.
    pub fn validate<'a>(&'a self, handle: Handle<K>) -> Result<Validated<'a, K>, EngineError> {
        self.check_set(handle)?;
        if self.arena.contains(handle.index) {
            Ok(Validated {
                index: handle.index,
                _life: PhantomData,
                _kind: PhantomData,
            })
        } else {
            Err(EngineError::InvalidHandle)
        }
    }

    /// Dereference a previously [`validate`](Self::validate)d handle without
    /// repeating the liveness check.
    ///
    /// # Panics
    /// Panics if `validated` does not belong to this table's arena, which
    /// can only happen if a `Validated` token from one table is passed to
    /// another (a programming error, not a data-driven failure mode).
    pub fn get_validated(&self, validated: &Validated<'_, K>) -> &T {
        // SAFETY: `Validated` is only constructed by `validate` above after
        // confirming `arena.contains(index)`, and its lifetime borrows `self`
        // immutably, so no intervening `remove`/`get_mut` could have
        // invalidated the slot.
        self.arena
            .get(validated.index)
            .expect("Validated token did not originate from this table")
    }

    fn check_set(&self, handle: Handle<K>) -> Result<(), EngineError> {
        if handle.set_id != self.set_id {
            Err(EngineError::InvalidForSet)
        } else {
            Ok(())
        }
    }
}
