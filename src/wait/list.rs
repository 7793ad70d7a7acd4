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

//! Intrusive membership in the C++ original becomes plain `Weak<TaskContext>` bookkeeping
//! here — simpler, at the cost of a `Vec` scan on notify instead of an O(1) unlink. Fine at
//! the scale a single mutex's or task's waiter count reaches in practice.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::task::context::TaskContext;
use crate::task::sleep_state::{Epoch, EpochCheck};
use crate::task::WakeupSource;

struct Entry {
    task: Weak<TaskContext>,
    epoch: Epoch,
}

/// Any number of tasks may be registered at once; `notify_all`/`notify_one` wake them.
pub(crate) struct WaitListHeavy {
    waiters: Mutex<Vec<Entry>>,
}

impl WaitListHeavy {
    pub(crate) fn new() -> WaitListHeavy {
        WaitListHeavy {
            waiters: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, task: &Arc<TaskContext>, epoch: Epoch) {
        self.waiters.lock().push(Entry {
            task: Arc::downgrade(task),
            epoch,
        });
    }

    pub(crate) fn unregister(&self, task: &Arc<TaskContext>) {
        self.waiters
            .lock()
            .retain(|e| !e.task.upgrade().is_some_and(|t| Arc::ptr_eq(&t, task)));
    }

    pub(crate) fn notify_all(&self) {
        let waiters = std::mem::take(&mut *self.waiters.lock());
        for entry in waiters {
            if let Some(task) = entry.task.upgrade() {
                task.wakeup(WakeupSource::WaitList, EpochCheck::Expect(entry.epoch));
            }
        }
    }

    pub(crate) fn notify_one(&self) -> bool {
        let mut waiters = self.waiters.lock();
        while let Some(entry) = waiters.pop() {
            if let Some(task) = entry.task.upgrade() {
                if task
                    .wakeup(WakeupSource::WaitList, EpochCheck::Expect(entry.epoch))
                    .is_some()
                {
                    return true;
                }
            }
        }
        false
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

/// Exactly one waiter at a time (debug-asserted); cheaper than [`WaitListHeavy`] for the
/// common single-owner case such as a mutex's wait slot.
pub(crate) struct WaitListLight {
    slot: Mutex<Option<Entry>>,
}

impl WaitListLight {
    pub(crate) fn new() -> WaitListLight {
        WaitListLight {
            slot: Mutex::new(None),
        }
    }

    pub(crate) fn register(&self, task: &Arc<TaskContext>, epoch: Epoch) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "WaitListLight can only hold one waiter");
        *slot = Some(Entry {
            task: Arc::downgrade(task),
            epoch,
        });
    }

    pub(crate) fn unregister(&self, task: &Arc<TaskContext>) {
        let mut slot = self.slot.lock();
        if let Some(entry) = slot.as_ref() {
            if entry.task.upgrade().is_some_and(|t| Arc::ptr_eq(&t, task)) {
                *slot = None;
            }
        }
    }

    pub(crate) fn notify(&self) -> bool {
        let entry = self.slot.lock().take();
        match entry {
            Some(entry) => match entry.task.upgrade() {
                Some(task) => task
                    .wakeup(WakeupSource::WaitList, EpochCheck::Expect(entry.epoch))
                    .is_some(),
                None => false,
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::context::DeadlineSource;
    use crate::task::context::TaskScheduler;
    use crate::coro::CoroutinePool;
    use crate::task::Importance;
    use std::time::Instant;

    struct NoopScheduler;
    impl TaskScheduler for NoopScheduler {
        fn reschedule(&self, _task: Arc<TaskContext>) {}
    }
    struct NoopReactor;
    impl DeadlineSource for NoopReactor {
        fn arm(
            &self,
            _task: Arc<TaskContext>,
            _epoch: Epoch,
            _deadline: Instant,
        ) -> Box<dyn crate::task::context::TimerGuard> {
            struct G;
            impl crate::task::context::TimerGuard for G {
                fn disarm(self: Box<Self>) {}
            }
            Box::new(G)
        }

        fn arm_cancel(
            &self,
            _task: Arc<TaskContext>,
            _deadline: Instant,
        ) -> Box<dyn crate::task::context::TimerGuard> {
            struct G;
            impl crate::task::context::TimerGuard for G {
                fn disarm(self: Box<Self>) {}
            }
            Box::new(G)
        }
    }

    fn test_task() -> Arc<TaskContext> {
        let pool = Arc::new(CoroutinePool::new(crate::coro::DEFAULT_STACK_SIZE, 1));
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(NoopScheduler);
        let reactor: Arc<dyn DeadlineSource> = Arc::new(NoopReactor);
        TaskContext::new(
            Box::new(|| {}),
            Importance::Normal,
            crate::task::WaitMode::Shared,
            None,
            pool,
            Arc::downgrade(&scheduler),
            Arc::downgrade(&reactor),
        )
    }

    #[test]
    fn heavy_list_notify_all_drains() {
        let list = WaitListHeavy::new();
        let task = test_task();
        list.register(&task, 1);
        assert!(!list.is_empty());
        list.notify_all();
        assert!(list.is_empty());
    }

    #[test]
    fn light_list_holds_single_waiter() {
        let list = WaitListLight::new();
        let task = test_task();
        list.register(&task, 1);
        assert!(list.notify());
        assert!(!list.notify());
    }
}
