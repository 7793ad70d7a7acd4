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

//! The thread-local "which task is this worker currently running" slot, plus the small set
//! of free functions (`current_task`, `yield_now`, `sleep_for`) that read it.
//!
//! Grounded on the `COROUTINE_ENVIRONMENT` thread-local
//! (`examples/other_examples/d062e437_rustcc-coroutine-rs__src-coroutine_unique.rs.rs`); set
//! by `processor::Processor`'s worker loop around each `TaskContext::do_step` call.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::task::context::{TaskContext, WaitStrategy};
use crate::task::sleep_state::{Epoch, EpochCheck, SleepFlags};
use crate::task::WakeupSource;

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<TaskContext>>> = const { RefCell::new(None) };
}

/// Bind `task` as the current task for this worker thread, returning whatever was bound
/// before (normally `None`, since a worker only ever runs one task's coroutine at a time).
pub(crate) fn set_current(task: Option<Arc<TaskContext>>) -> Option<Arc<TaskContext>> {
    CURRENT_TASK.with(|cell| cell.replace(task))
}

/// The task running on this worker thread, if any. Returns `None` on a thread that isn't a
/// processor worker (e.g. the thread that called `Engine::run`) or inside `spawn_blocking`.
pub fn current_task() -> Option<Arc<TaskContext>> {
    CURRENT_TASK.with(|cell| cell.borrow().clone())
}

fn require_current(caller: &str) -> Result<Arc<TaskContext>, Error> {
    current_task().ok_or_else(|| {
        log::warn!(target: "taskrt", "{caller} called outside of a task coroutine");
        Error::NotInCoroutineContext
    })
}

struct ImmediateStrategy;

impl WaitStrategy for ImmediateStrategy {
    fn setup_wakeups(&self, task: &Arc<TaskContext>, epoch: Epoch) -> Option<SleepFlags> {
        // Always push back onto the ready queue and always force the real coroutine yield
        // (never take `sleep`'s synchronous shortcut) — that's the whole point of yielding.
        task.wakeup(WakeupSource::WaitList, EpochCheck::Expect(epoch));
        None
    }

    fn disable_wakeups(&self, _task: &Arc<TaskContext>) {}
}

/// Cooperatively yield to the processor: the task goes to the back of the ready queue and
/// some other ready task (if any) gets a turn before this one resumes.
pub fn yield_now() -> Result<(), Error> {
    let task = require_current("yield_now")?;
    task.sleep(&ImmediateStrategy);
    if task.should_cancel() {
        return Err(Error::WaitInterruptedByCancel(task.cancellation_reason()));
    }
    Ok(())
}

/// Suspend the current task for at least `duration`.
pub fn sleep_for(duration: Duration) -> Result<(), Error> {
    let task = require_current("sleep_for")?;
    task.sleep_for(duration);
    if task.should_cancel() {
        return Err(Error::WaitInterruptedByCancel(task.cancellation_reason()));
    }
    Ok(())
}
