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

//! A bounded free list of guarded stacks (spec §4.1).
//!
//! Grounded on `StackPool` (same source file as `coro::handle`): allocation is the expensive
//! part (mmap + guard page), so finished coroutines return their stack here instead of
//! freeing it, and a new task's bootstrap tries the pool before calling into
//! `context::stack::ProtectedFixedSizeStack::new`.

use context::stack::ProtectedFixedSizeStack;
use parking_lot::Mutex;

/// Default stack size for a pooled coroutine, in bytes.
pub(crate) const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

pub(crate) struct CoroutinePool {
    stack_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<ProtectedFixedSizeStack>>,
}

impl CoroutinePool {
    pub(crate) fn new(stack_size: usize, max_idle: usize) -> CoroutinePool {
        CoroutinePool {
            stack_size,
            max_idle,
            idle: Mutex::new(Vec::with_capacity(max_idle)),
        }
    }

    /// Pop a stack off the free list, or allocate a fresh one if the pool is empty.
    pub(crate) fn acquire(&self) -> ProtectedFixedSizeStack {
        if let Some(stack) = self.idle.lock().pop() {
            return stack;
        }
        ProtectedFixedSizeStack::new(self.stack_size)
            .expect("failed to mmap a guarded coroutine stack")
    }

    /// Return a stack to the free list, dropping it instead if the pool is already full or
    /// the stack doesn't match this pool's configured size (e.g. it came from elsewhere).
    pub(crate) fn release(&self, stack: ProtectedFixedSizeStack) {
        if stack.len() != self.stack_size {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(stack);
        }
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_released_stacks() {
        let pool = CoroutinePool::new(DEFAULT_STACK_SIZE, 4);
        let stack = pool.acquire();
        assert_eq!(pool.idle_count(), 0);
        pool.release(stack);
        assert_eq!(pool.idle_count(), 1);
        let _reused = pool.acquire();
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn drops_stacks_beyond_max_idle() {
        let pool = CoroutinePool::new(DEFAULT_STACK_SIZE, 1);
        pool.release(pool.acquire());
        pool.release(pool.acquire());
        assert_eq!(pool.idle_count(), 1);
    }
}
