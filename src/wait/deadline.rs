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

//! A bare deadline with no other wait condition: `sleep_for`/`sleep_until`.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use crate::task::context::{TaskContext, TimerGuard, WaitStrategy};
use crate::task::sleep_state::{Epoch, EpochCheck, SleepFlags};
use crate::task::WakeupSource;

pub(crate) struct DeadlineStrategy {
    deadline: Instant,
    guard: RefCell<Option<Box<dyn TimerGuard>>>,
}

impl DeadlineStrategy {
    pub(crate) fn new(deadline: Instant) -> DeadlineStrategy {
        DeadlineStrategy {
            deadline,
            guard: RefCell::new(None),
        }
    }
}

impl WaitStrategy for DeadlineStrategy {
    fn setup_wakeups(&self, task: &Arc<TaskContext>, epoch: Epoch) -> Option<SleepFlags> {
        if self.deadline <= Instant::now() {
            return task.wakeup(WakeupSource::DeadlineTimer, EpochCheck::Expect(epoch));
        }
        *self.guard.borrow_mut() = task.arm_deadline_timer(epoch, self.deadline);
        None
    }

    fn disable_wakeups(&self, _task: &Arc<TaskContext>) {
        if let Some(guard) = self.guard.borrow_mut().take() {
            guard.disarm();
        }
    }
}
