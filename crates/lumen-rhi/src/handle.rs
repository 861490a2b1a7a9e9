//! Typed handles and the append-only pools behind them.
//!
//! Every GPU object the context owns is referred to by a [`Handle`]: a plain
//! `u32` index tagged with a zero-sized marker type so a buffer handle cannot
//! be passed where a texture handle is expected. Handles are assigned in
//! creation order and are never recycled, so a stale handle can only ever
//! point past the end of its pool, which is caught by a bounds check.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Marker type for command list handles.
pub enum CommandTag {}
/// Marker type for raw resource handles.
pub enum ResourceTag {}
/// Marker type for buffer handles.
pub enum BufferTag {}
/// Marker type for texture handles.
pub enum TextureTag {}
/// Marker type for render target handles.
pub enum RenderTargetTag {}
/// Marker type for depth stencil handles.
pub enum DepthStencilTag {}
/// Marker type for shader pipeline handles.
pub enum ShaderTag {}

/// A typed index into one of the context's object pools.
///
/// The sentinel [`Handle::NULL`] means "no object"; creation functions accept
/// it where an optional input resource is allowed.
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Sentinel value meaning "no object".
    pub const NULL: Self = Self {
        index: u32::MAX,
        _marker: PhantomData,
    };

    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// Returns the raw index of this handle.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns true if this handle is the null sentinel.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX
    }
}

// Manual impls so `Handle<T>` is Copy/Eq even when `T` is not.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl<T> Eq for Handle<T> {}
impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}
impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Handle(NULL)")
        } else {
            write!(f, "Handle({})", self.index)
        }
    }
}
impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

/// Append-only storage for objects of one kind.
///
/// Destroyed objects keep their slot (the entry is left in place but marked
/// dead by the caller where needed); indices stay valid for the lifetime of
/// the pool.
pub struct Pool<T, V> {
    entries: Vec<V>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, V> Pool<T, V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Stores `value` and returns the handle for it.
    pub fn push(&mut self, value: V) -> Handle<T> {
        let index = self.entries.len() as u32;
        self.entries.push(value);
        Handle::new(index)
    }

    /// Returns the object behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null or out of range. An out-of-range index
    /// can only come from mixing handles between contexts, which is a
    /// programming error rather than a runtime condition.
    #[inline]
    pub fn get(&self, handle: Handle<T>) -> &V {
        &self.entries[handle.index as usize]
    }

    /// Mutable variant of [`Pool::get`].
    #[inline]
    pub fn get_mut(&mut self, handle: Handle<T>) -> &mut V {
        &mut self.entries[handle.index as usize]
    }

    /// Number of objects ever created in this pool.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over every entry ever created.
    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.entries.iter()
    }
}

impl<T, V> Default for Pool<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_assigned_in_creation_order() {
        let mut pool: Pool<BufferTag, &str> = Pool::new();
        for i in 0..8u32 {
            let handle = pool.push("entry");
            assert_eq!(handle.index(), i);
        }
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn test_null_handle() {
        let handle: Handle<TextureTag> = Handle::NULL;
        assert!(handle.is_null());
        assert_eq!(handle, Handle::default());
    }

    #[test]
    fn test_get_returns_stored_value() {
        let mut pool: Pool<ResourceTag, u64> = Pool::new();
        let a = pool.push(10);
        let b = pool.push(20);
        assert_eq!(*pool.get(a), 10);
        assert_eq!(*pool.get(b), 20);
        *pool.get_mut(a) = 11;
        assert_eq!(*pool.get(a), 11);
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_handle_panics() {
        let pool: Pool<CommandTag, ()> = Pool::new();
        let _ = pool.get(Handle::new(3));
    }

    #[test]
    fn test_handle_is_copy_and_hashable() {
        use std::collections::HashSet;
        let mut pool: Pool<ShaderTag, ()> = Pool::new();
        let h = pool.push(());
        let copy = h;
        let mut set = HashSet::new();
        set.insert(h);
        assert!(set.contains(&copy));
    }
}
