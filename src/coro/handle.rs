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

//! One `Coroutine` binds a stackful execution frame to exactly one task's whole lifetime:
//! bootstrap on first `DoStep`, suspend/resume across any number of `Sleep`s, and a final
//! resume that runs it to completion, after which the stack goes back to the pool.
//!
//! Grounded on `coroutine_initialize`/`Handle::resume`
//! (`examples/other_examples/d062e437_rustcc-coroutine-rs__src-coroutine_unique.rs.rs`), with
//! the `std::rt::unwind::try` trampoline boundary modernized to `std::panic::catch_unwind`
//! (done inside `task::context::run_on_coroutine`, which this module calls into but does not
//! otherwise depend on).

use std::cell::Cell;
use std::sync::Arc;

use context::stack::ProtectedFixedSizeStack;
use context::{Context, Transfer};

use crate::task::TaskContext;

use super::pool::CoroutinePool;

thread_local! {
    /// The context to resume to yield control back to the worker thread that resumed us.
    /// Only ever `Some` while running inside a coroutine; a worker thread that never enters
    /// one never touches this cell.
    static PARENT_CONTEXT: Cell<Option<Context>> = Cell::new(None);
}

extern "C" fn trampoline(t: Transfer) -> ! {
    PARENT_CONTEXT.with(|cell| cell.set(Some(t.context)));
    // Reclaim the +1 reference handed to us at bootstrap (see `Coroutine::resume`).
    let task = unsafe { Arc::from_raw(t.data as *const TaskContext) };
    crate::task::context::run_on_coroutine(&task);
    drop(task);
    // The task is done; there is nothing left to resume into. Park forever rather than
    // return, since returning from a `context`-crate entry point is undefined behavior.
    loop {
        yield_to_worker();
    }
}

/// Yield control back to whichever worker thread most recently resumed this coroutine.
/// Called from deep inside `task::context::TaskContext::sleep` — never from worker code.
pub(crate) fn yield_to_worker() {
    PARENT_CONTEXT.with(|cell| {
        let parent = cell
            .take()
            .expect("yield_to_worker called outside of a running coroutine");
        let Transfer { context, .. } = unsafe { parent.resume(0) };
        cell.set(Some(context));
    });
}

struct CoroInner {
    stack: ProtectedFixedSizeStack,
    context: Context,
}

/// The coroutine bound to a single task. Lives in `TaskContext` behind a lock; only the
/// worker thread currently stepping the task ever touches it.
pub(crate) struct Coroutine {
    inner: Option<CoroInner>,
    pool: Arc<CoroutinePool>,
}

impl Coroutine {
    pub(crate) fn new(pool: Arc<CoroutinePool>) -> Coroutine {
        Coroutine { inner: None, pool }
    }

    pub(crate) fn is_bootstrapped(&self) -> bool {
        self.inner.is_some()
    }

    /// Resume the coroutine, allocating a stack and starting the trampoline on the first
    /// call. `task` is only consulted on that first call (and must be the task that owns
    /// this `Coroutine`); later calls ignore it, since the trampoline already captured it.
    pub(crate) fn resume(&mut self, task: &Arc<TaskContext>) {
        match self.inner.take() {
            None => {
                let stack = self.pool.acquire();
                let entry = unsafe { Context::new(&stack, trampoline) };
                let handoff = Arc::into_raw(task.clone()) as usize;
                let Transfer { context, .. } = unsafe { entry.resume(handoff) };
                self.inner = Some(CoroInner { stack, context });
            }
            Some(CoroInner { stack, context }) => {
                let Transfer { context, .. } = unsafe { context.resume(0) };
                self.inner = Some(CoroInner { stack, context });
            }
        }
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        if let Some(CoroInner { stack, .. }) = self.inner.take() {
            self.pool.release(stack);
        }
    }
}
