// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Task-local storage: a per-task slab materialized lazily on first access.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A typed key identifying one slot of task-local storage.
///
/// Keys are allocated once (typically in a `static` via [`TaskLocalKey::new`]) and index
/// into every task's lazily-materialized slab. There is no data race on the slab itself:
/// a coroutine only ever touches its own task's storage, single-threaded, by construction.
pub struct TaskLocalKey<T> {
    index: AtomicUsize,
    _marker: PhantomData<fn() -> T>,
}

const UNINIT: usize = usize::MAX;

static NEXT_INDEX: AtomicUsize = AtomicUsize::new(0);

impl<T: Send + 'static> TaskLocalKey<T> {
    /// Construct a new key. Intended for use in a `static TaskLocalKey<T>` initializer;
    /// the actual slab index is assigned lazily on first use so that many keys can be
    /// declared without forcing initialization order.
    pub const fn new() -> TaskLocalKey<T> {
        TaskLocalKey {
            index: AtomicUsize::new(UNINIT),
            _marker: PhantomData,
        }
    }

    /// Access the current task's slot for this key, materializing it with `default` on
    /// first use. Must be called from inside a task coroutine.
    pub fn with<R>(&self, default: impl FnOnce() -> T, f: impl FnOnce(&T) -> R) -> R {
        let task = crate::current::current_task()
            .expect("task-local storage accessed outside a task coroutine");
        let ptr = task.local_storage().get_or_insert_with(self, default);
        // SAFETY: `task` (held above) keeps the slab alive for the duration of this call,
        // and the slab is only ever touched by the one coroutine currently running on this
        // thread, which is `task` itself by construction (see `Storage`'s doc comment).
        f(unsafe { &*ptr })
    }

    fn index(&self) -> usize {
        let current = self.index.load(Ordering::Acquire);
        if current != UNINIT {
            return current;
        }
        let assigned = NEXT_INDEX.fetch_add(1, Ordering::Relaxed);
        match self.index.compare_exchange(
            UNINIT,
            assigned,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => assigned,
            // another thread raced us to assign this same key; use whichever index won
            Err(winner) => winner,
        }
    }
}

/// The slab itself, owned by a [`crate::task::TaskContext`] and materialized on first
/// `Storage::get_or_insert_with` call.
#[derive(Default)]
pub(crate) struct Storage {
    slots: RefCell<Vec<Option<Box<dyn Any + Send>>>>,
}

impl Storage {
    pub(crate) fn new() -> Storage {
        Storage::default()
    }

    pub(crate) fn get_or_insert_with<T: Send + 'static>(
        &self,
        key: &TaskLocalKey<T>,
        default: impl FnOnce() -> T,
    ) -> *const T {
        let index = key.index();
        let mut slots = self.slots.borrow_mut();
        if slots.len() <= index {
            slots.resize_with(index + 1, || None);
        }
        if slots[index].is_none() {
            slots[index] = Some(Box::new(default()));
        }
        let boxed = slots[index].as_deref().unwrap();
        boxed.downcast_ref::<T>().expect("task-local type mismatch") as *const T
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazily_materializes_and_is_stable_across_calls() {
        static KEY: TaskLocalKey<u32> = TaskLocalKey::new();
        let storage = Storage::new();
        let first = storage.get_or_insert_with(&KEY, || 42);
        let second = storage.get_or_insert_with(&KEY, || 0);
        // same slot, default only applied once
        unsafe {
            assert_eq!(*first, 42);
            assert_eq!(*second, 42);
        }
    }

    #[test]
    fn distinct_keys_get_distinct_slots() {
        static A: TaskLocalKey<u32> = TaskLocalKey::new();
        static B: TaskLocalKey<&'static str> = TaskLocalKey::new();
        let storage = Storage::new();
        let a = storage.get_or_insert_with(&A, || 1);
        let b = storage.get_or_insert_with(&B, || "hi");
        unsafe {
            assert_eq!(*a, 1);
            assert_eq!(*b, "hi");
        }
    }
}
