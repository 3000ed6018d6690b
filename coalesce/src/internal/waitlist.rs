// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use slab::Slab;

/// A guarded linked list of parked waiters, in arrival order.
///
/// * `guard`'s `next` points to the first node (regular head).
/// * `guard`'s `prev` points to the last node (regular tail).
///
/// A node stays allocated after it is unlinked until its owner releases it with
/// [`WaitList::release`], so the owner can still read what the notifier left in it.
#[derive(Debug)]
pub(crate) struct WaitList<T> {
    // if None, the list is uninitialized and empty
    guard: Option<usize>,
    nodes: Slab<Node<T>>,
}

#[derive(Debug)]
struct Node<T> {
    prev: usize,
    next: usize,
    linked: bool,
    stat: Option<T>,
}

impl<T> Default for WaitList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WaitList<T> {
    pub(crate) const fn new() -> Self {
        Self {
            guard: None,
            nodes: Slab::new(),
        }
    }

    fn ensure_init(&mut self) -> usize {
        if let Some(guard) = self.guard {
            return guard;
        }

        let first = self.nodes.vacant_entry();
        let guard = first.key();
        first.insert(Node {
            prev: guard,
            next: guard,
            linked: false,
            stat: None,
        });
        self.guard = Some(guard);
        guard
    }

    /// Appends a waiter to the tail of the list and returns its key.
    pub(crate) fn push_back(&mut self, stat: T) -> usize {
        let guard = self.ensure_init();
        let prev_tail = self.nodes[guard].prev;
        let key = self.nodes.insert(Node {
            prev: prev_tail,
            next: guard,
            linked: true,
            stat: Some(stat),
        });
        self.nodes[guard].prev = key;
        self.nodes[prev_tail].next = key;
        key
    }

    /// Returns the key of the first linked waiter.
    pub(crate) fn front(&self) -> Option<usize> {
        let guard = self.guard?;
        let first = self.nodes[guard].next;
        (first != guard).then_some(first)
    }

    /// Unlinks the waiter at `key`. The node stays allocated until released.
    ///
    /// Unlinking a node twice is a no-op.
    pub(crate) fn unlink(&mut self, key: usize) {
        let guard = self.guard.expect("wait list is uninitialized");
        assert_ne!(key, guard);

        let node = &mut self.nodes[key];
        if !node.linked {
            return;
        }
        node.linked = false;
        let (prev, next) = (node.prev, node.next);
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[key].prev = key;
        self.nodes[key].next = key;
    }

    /// Unlinks the first waiter and returns its key, if any.
    pub(crate) fn pop_front(&mut self) -> Option<usize> {
        let first = self.front()?;
        self.unlink(first);
        Some(first)
    }

    /// Returns `true` if the waiter at `key` is still queued.
    pub(crate) fn is_linked(&self, key: usize) -> bool {
        self.nodes[key].linked
    }

    /// Returns `true` if no waiter is queued.
    pub(crate) fn is_empty(&self) -> bool {
        self.front().is_none()
    }

    pub(crate) fn get_mut(&mut self, key: usize) -> &mut T {
        // SAFETY: non-guard nodes always carry `Some(stat)` until released
        self.nodes[key].stat.as_mut().unwrap()
    }

    /// Unlinks and deallocates the waiter at `key`, returning its state.
    pub(crate) fn release(&mut self, key: usize) -> T {
        self.unlink(key);
        let node = self.nodes.remove(key);
        // SAFETY: non-guard nodes always carry `Some(stat)` until released
        node.stat.unwrap()
    }

    /// Unlinks every queued waiter, applying `f` to each in order.
    pub(crate) fn drain_with(&mut self, mut f: impl FnMut(&mut T)) {
        while let Some(key) = self.pop_front() {
            f(self.get_mut(key));
        }
    }
}
