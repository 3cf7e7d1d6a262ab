//! Persistent Singly-Linked List
//!
//! This is the structurally-shared container the whole engine accumulates
//! results into: prepending never touches existing cells, so every state
//! derived during a parse keeps its own consistent view of history at zero
//! copy cost. It backs iteration counters, collected back-references, the
//! value cache entries, and the item storage inside
//! [`ParseGraph`](crate::graph::ParseGraph).
//!
//! Reversal is a lazy view: [`reverse`](ImmutableList::reverse) is O(1) and
//! shares the underlying cells; the forward rendering of a reversed list is
//! materialized at most once, on first traversal, through the stack-safe
//! [`Trampoline`] driver. Reversing a reversed list returns the original in
//! O(1).

use std::sync::{Arc, OnceLock};

use crate::trampoline::Trampoline;

/// A persistent list with O(1) prepend and an O(1) lazy reversed view.
///
/// Cloning is O(1) and shares storage. Equality and hashing are structural
/// over the elements; the cached size does not participate.
pub struct ImmutableList<T> {
    repr: Repr<T>,
    size: u64,
}

enum Repr<T> {
    Nil,
    Cons(Arc<ConsCell<T>>),
    Rev(Arc<RevCell<T>>),
}

struct ConsCell<T> {
    head: T,
    tail: ImmutableList<T>,
}

/// Reversed view over `inner`. The forward rendering is computed once and
/// memoized; `inner` is kept so reversing back is O(1).
struct RevCell<T> {
    inner: ImmutableList<T>,
    forced: OnceLock<ImmutableList<T>>,
}

impl<T> Clone for ImmutableList<T> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Nil => Repr::Nil,
            Repr::Cons(cell) => Repr::Cons(Arc::clone(cell)),
            Repr::Rev(cell) => Repr::Rev(Arc::clone(cell)),
        };
        ImmutableList {
            repr,
            size: self.size,
        }
    }
}

impl<T> Default for ImmutableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ImmutableList<T> {
    /// Dismantles the spine iteratively. The compiler-generated drop glue
    /// would recurse once per cell, overflowing the stack on the long
    /// chains this list exists to hold.
    fn drop(&mut self) {
        let mut repr = std::mem::replace(&mut self.repr, Repr::Nil);
        loop {
            match repr {
                Repr::Nil => return,
                Repr::Cons(cell) => match Arc::try_unwrap(cell) {
                    Ok(mut cell) => {
                        repr = std::mem::replace(&mut cell.tail.repr, Repr::Nil);
                    }
                    // A shared cell stays alive through its other owners.
                    Err(_) => return,
                },
                Repr::Rev(cell) => match Arc::try_unwrap(cell) {
                    Ok(mut cell) => {
                        // The memoized forward rendering dismantles itself
                        // through this same impl, one call deep.
                        drop(cell.forced.take());
                        repr = std::mem::replace(&mut cell.inner.repr, Repr::Nil);
                    }
                    Err(_) => return,
                },
            }
        }
    }
}

impl<T> ImmutableList<T> {
    /// The empty list.
    #[inline]
    pub fn new() -> Self {
        ImmutableList {
            repr: Repr::Nil,
            size: 0,
        }
    }

    /// Number of elements, O(1).
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the list has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Head and tail of the list, resolving through a reversed view.
    ///
    /// Resolution depth is at most one: a reversed view delegates to its
    /// memoized forward rendering, whose spine contains no further views.
    fn spine(&self) -> Option<(&T, &ImmutableList<T>)>
    where
        T: Clone + 'static,
    {
        match &self.repr {
            Repr::Nil => None,
            Repr::Cons(cell) => Some((&cell.head, &cell.tail)),
            Repr::Rev(cell) => cell.forced().spine(),
        }
    }

    /// First element, or `None` for the empty list.
    #[inline]
    pub fn head(&self) -> Option<&T>
    where
        T: Clone + 'static,
    {
        self.spine().map(|(head, _)| head)
    }

    /// The list without its first element.
    ///
    /// The tail of the empty list is itself the empty list, not an error.
    #[inline]
    pub fn tail(&self) -> ImmutableList<T>
    where
        T: Clone + 'static,
    {
        match self.spine() {
            Some((_, tail)) => tail.clone(),
            None => ImmutableList::new(),
        }
    }

    /// Prepend an element, O(1).
    ///
    /// Prepending onto a reversed view forces its forward rendering first;
    /// the rendering is shared, so the cost is paid once per view.
    pub fn push(&self, head: T) -> ImmutableList<T>
    where
        T: Clone + 'static,
    {
        let tail = match &self.repr {
            Repr::Rev(cell) => cell.forced().clone(),
            _ => self.clone(),
        };
        ImmutableList {
            size: tail.size + 1,
            repr: Repr::Cons(Arc::new(ConsCell { head, tail })),
        }
    }

    /// A reversed view sharing this list's storage, O(1).
    ///
    /// Reversing a reversed view returns the original list in O(1).
    pub fn reverse(&self) -> ImmutableList<T> {
        match &self.repr {
            Repr::Nil => self.clone(),
            Repr::Rev(cell) => cell.inner.clone(),
            Repr::Cons(_) => ImmutableList {
                size: self.size,
                repr: Repr::Rev(Arc::new(RevCell {
                    inner: self.clone(),
                    forced: OnceLock::new(),
                })),
            },
        }
    }

    /// Concatenate, with `other`'s elements preceding the receiver's when
    /// iterated. Downstream name-resolution order depends on exactly this
    /// asymmetry.
    pub fn concat(&self, other: &ImmutableList<T>) -> ImmutableList<T>
    where
        T: Clone + 'static,
    {
        if other.is_empty() {
            return self.clone();
        }
        // Walk other back-to-front, prepending onto self.
        prepend_all(other.reverse(), self.clone()).run()
    }

    /// Iterate the elements front to back.
    pub fn iter(&self) -> Iter<'_, T>
    where
        T: Clone + 'static,
    {
        Iter { current: self }
    }
}

impl<T: Clone + 'static> RevCell<T> {
    /// The memoized forward rendering of the reversed view.
    fn forced(&self) -> &ImmutableList<T> {
        self.forced
            .get_or_init(|| prepend_all(self.inner.clone(), ImmutableList::new()).run())
    }
}

/// Prepend every element of `from`, front to back, onto `onto`.
///
/// The result iterates `from` in reverse followed by `onto`. Driven by the
/// trampoline because `from` can be arbitrarily long.
fn prepend_all<T: Clone + 'static>(
    from: ImmutableList<T>,
    onto: ImmutableList<T>,
) -> Trampoline<ImmutableList<T>> {
    match from.spine() {
        None => Trampoline::done(onto),
        Some((head, tail)) => {
            let head = head.clone();
            let tail = tail.clone();
            Trampoline::pending(move || prepend_all(tail, onto.push(head)))
        }
    }
}

/// Front-to-back iterator over an [`ImmutableList`].
pub struct Iter<'a, T> {
    current: &'a ImmutableList<T>,
}

impl<'a, T: Clone + 'static> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let (head, tail) = self.current.spine()?;
        self.current = tail;
        Some(head)
    }
}

impl<T: Clone + PartialEq + 'static> PartialEq for ImmutableList<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.size != other.size {
            return false;
        }
        self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<T: Clone + Eq + 'static> Eq for ImmutableList<T> {}

impl<T: Clone + std::hash::Hash + 'static> std::hash::Hash for ImmutableList<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for item in self.iter() {
            item.hash(state);
        }
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for ImmutableList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Clone + 'static> FromIterator<T> for ImmutableList<T> {
    /// Collects so that iteration order matches the source iterator.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = ImmutableList::new();
        for item in iter {
            list = list.push(item);
        }
        list.reverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn of(items: &[u32]) -> ImmutableList<u32> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_empty_list() {
        let list: ImmutableList<u32> = ImmutableList::new();
        assert!(list.is_empty());
        assert_eq!(list.head(), None);
        assert!(list.tail().is_empty());
    }

    #[test]
    fn test_push_is_prepend() {
        let list = ImmutableList::new().push(1).push(2);
        assert_eq!(list.head(), Some(&2));
        assert_eq!(list.tail().head(), Some(&1));
        assert_eq!(list.size(), 2);
    }

    #[test]
    fn test_push_shares_tail() {
        let base = of(&[1, 2, 3]);
        let a = base.push(10);
        let b = base.push(20);
        // Both derived lists see the unchanged base.
        assert_eq!(a.tail(), base);
        assert_eq!(b.tail(), base);
        assert_eq!(base.size(), 3);
    }

    #[test]
    fn test_collect_order() {
        let list = of(&[1, 2, 3]);
        let items: Vec<u32> = list.iter().copied().collect();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn test_reverse_view() {
        let list = of(&[1, 2, 3]);
        let rev = list.reverse();
        let items: Vec<u32> = rev.iter().copied().collect();
        assert_eq!(items, vec![3, 2, 1]);
        assert_eq!(rev.size(), 3);
    }

    #[test]
    fn test_reverse_twice_is_original() {
        let list = of(&[1, 2, 3]);
        let back = list.reverse().reverse();
        assert_eq!(back, list);
    }

    #[test]
    fn test_push_onto_reversed() {
        let rev = of(&[1, 2, 3]).reverse();
        let pushed = rev.push(9);
        let items: Vec<u32> = pushed.iter().copied().collect();
        assert_eq!(items, vec![9, 3, 2, 1]);
    }

    #[test]
    fn test_concat_argument_precedes_receiver() {
        let receiver = of(&[3, 4]);
        let argument = of(&[1, 2]);
        let joined = receiver.concat(&argument);
        let items: Vec<u32> = joined.iter().copied().collect();
        assert_eq!(items, vec![1, 2, 3, 4]);
        assert_eq!(joined.size(), 4);
    }

    #[test]
    fn test_concat_empty_argument() {
        let receiver = of(&[1, 2]);
        let joined = receiver.concat(&ImmutableList::new());
        assert_eq!(joined, receiver);
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(of(&[1, 2, 3]), of(&[1, 2, 3]));
        assert_ne!(of(&[1, 2, 3]), of(&[1, 2]));
        assert_ne!(of(&[1, 2, 3]), of(&[1, 2, 4]));
        // A reversed view equals an independently built list with the same
        // element order.
        assert_eq!(of(&[1, 2, 3]).reverse(), of(&[3, 2, 1]));
    }

    #[test]
    fn test_long_list_reversal_is_stack_safe() {
        let mut list = ImmutableList::new();
        for i in 0..200_000u32 {
            list = list.push(i);
        }
        let rev = list.reverse();
        assert_eq!(rev.head(), Some(&0));
        assert_eq!(rev.size(), 200_000);
    }

    #[test]
    fn test_long_list_drop_is_stack_safe() {
        let mut list = ImmutableList::new();
        for i in 0..1_000_000u32 {
            list = list.push(i);
        }
        drop(list);
    }

    #[test]
    fn test_long_reversed_list_drop_is_stack_safe() {
        let mut list = ImmutableList::new();
        for i in 0..500_000u32 {
            list = list.push(i);
        }
        let rev = list.reverse();
        assert_eq!(rev.head(), Some(&0));
        drop(list);
        drop(rev);
    }
}
