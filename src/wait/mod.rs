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

//! Wait lists and wait strategies built on `task::context::{WaitStrategy, TaskContext}`.
//!
//! A `WaitStrategy` is the thing a sleeping task arms before it yields (spec §4.3's
//! `SetupWakeups`/`DisableWakeups`); a wait list is one of the things a strategy can
//! register into. Two shapes are provided, mirroring `may`'s single-slot `Park` versus a
//! broadcast condvar: [`WaitListLight`] for exactly one waiter at a time (a mutex), and
//! [`WaitListHeavy`] for any number (a task's finish waiters, a semaphore).

mod deadline;
mod list;
mod sync;

pub(crate) use self::deadline::DeadlineStrategy;
pub(crate) use self::list::{WaitListHeavy, WaitListLight};

pub use self::sync::{Mutex, MutexGuard, Semaphore, SemaphorePermit};
