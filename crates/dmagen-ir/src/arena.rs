//! Append-only arenas addressed by typed handles.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed index into an [`Arena`].
///
/// Handles stay valid for the lifetime of the arena: nothing is ever removed,
/// so IR mutation detaches statements from their blocks instead of freeing
/// them.
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

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

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the zero-based index of this handle.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// An append-only arena with typed [`Handle`]-based access.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the handle the next [`append`](Self::append) will produce.
    ///
    /// Values that refer back to the statement defining them are created
    /// with this before the statement itself is appended.
    pub fn next_handle(&self) -> Handle<T> {
        Handle::new(Self::checked_index(self.data.len()))
    }

    /// Appends a value and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = self.next_handle();
        self.data.push(value);
        handle
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    pub fn try_get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.data.get_mut(handle.index())
    }

    /// Returns `true` if `handle` was produced by this arena.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        handle.index() < self.data.len()
    }

    /// Iterates over `(handle, &value)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        // Indices fit in u32: `append` refuses to grow past that.
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.data
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    /// Consumes the arena, yielding values in allocation order.
    pub fn into_values(self) -> std::vec::IntoIter<T> {
        self.data.into_iter()
    }

    fn checked_index(len: usize) -> u32 {
        u32::try_from(len)
            .unwrap_or_else(|_| panic!("arena overflow: {len} items exceeds u32::MAX"))
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.data[handle.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_sequential_handles() {
        let mut arena = Arena::new();
        let a = arena.append("load");
        let b = arena.append("store");
        assert_eq!(arena[a], "load");
        assert_eq!(arena[b], "store");
        assert_eq!(b.index(), a.index() + 1);
    }

    #[test]
    fn next_handle_predicts_append() {
        let mut arena = Arena::<u64>::new();
        let predicted = arena.next_handle();
        let actual = arena.append(7);
        assert_eq!(predicted, actual);
        assert_eq!(arena.next_handle().index(), 1);
    }

    #[test]
    fn try_get_out_of_range() {
        let mut arena = Arena::new();
        let h = arena.append(1u8);
        assert!(arena.contains(h));
        assert_eq!(arena.try_get(Handle::new(5)), None);
        *arena.try_get_mut(h).unwrap() = 9;
        assert_eq!(arena[h], 9);
    }

    #[test]
    fn handles_are_ordered_by_index() {
        let h0: Handle<()> = Handle::new(0);
        let h3: Handle<()> = Handle::new(3);
        assert!(h0 < h3);
        assert_eq!(format!("{h3:?}"), "[3]");
    }
}
