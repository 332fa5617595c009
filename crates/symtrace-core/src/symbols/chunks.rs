//! Append-only list shared between threads without locks.
//!
//! Every link is a `OnceCell`, so a node becomes visible to readers only once
//! fully built and is never changed afterwards. Writers walk to the first
//! empty link and try to fill it; if another writer got there first they
//! start again from the head.

use std::fmt;

use once_cell::sync::OnceCell;

struct Node<T>
{
    value: T,
    next: OnceCell<Box<Node<T>>>,
}

/// Lock-free singly linked list that only grows.
pub struct ChunkList<T>
{
    head: OnceCell<Box<Node<T>>>,
}

impl<T> ChunkList<T>
{
    pub const fn new() -> Self
    {
        Self { head: OnceCell::new() }
    }

    /// Append `value` at the tail.
    pub fn push(&self, value: T)
    {
        let mut node = Box::new(Node {
            value,
            next: OnceCell::new(),
        });
        loop {
            let mut link = &self.head;
            while let Some(next) = link.get() {
                link = &next.next;
            }
            match link.set(node) {
                Ok(()) => return,
                Err(lost) => node = lost,
            }
        }
    }

    pub fn iter(&self) -> Iter<'_, T>
    {
        Iter {
            next: self.head.get().map(|node| &**node),
        }
    }

    pub fn len(&self) -> usize
    {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool
    {
        self.head.get().is_none()
    }
}

impl<T> Default for ChunkList<T>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<T> Drop for ChunkList<T>
{
    fn drop(&mut self)
    {
        // Unlink iteratively; dropping the boxes recursively could overflow the stack.
        let mut next = self.head.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ChunkList<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_list().entries(self.iter()).finish()
    }
}

pub struct Iter<'a, T>
{
    next: Option<&'a Node<T>>,
}

impl<'a, T> Iterator for Iter<'a, T>
{
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T>
    {
        let node = self.next?;
        self.next = node.next.get().map(|node| &**node);
        Some(&node.value)
    }
}

impl<'a, T> IntoIterator for &'a ChunkList<T>
{
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.iter()
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_push_keeps_order()
    {
        let list = ChunkList::new();
        assert!(list.is_empty());
        for i in 0..5 {
            list.push(i);
        }
        assert_eq!(list.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn test_concurrent_push()
    {
        let list = Arc::new(ChunkList::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let list = Arc::clone(&list);
                thread::spawn(move || {
                    for i in 0..100 {
                        list.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut values: Vec<_> = list.iter().copied().collect();
        assert_eq!(values.len(), 800);
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 800);
    }

    #[test]
    fn test_long_list_drops()
    {
        let list = ChunkList::new();
        for i in 0..10_000u32 {
            list.push(i);
        }
        drop(list);
    }
}
