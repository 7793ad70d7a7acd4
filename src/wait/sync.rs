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

//! A cooperative `Mutex<T>` and counting `Semaphore`, worked examples of a `WaitStrategy`
//! consumer built on the wait lists in this module rather than a blocking OS primitive.
//! Neither is the core execution engine itself; they exist to demonstrate (and exercise in
//! tests) the `Sleep`/`Wakeup` machinery end to end the way a real caller would use it.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::current::current_task;
use crate::task::context::{TaskContext, WaitStrategy};
use crate::task::sleep_state::{Epoch, EpochCheck, SleepFlags};
use crate::task::WakeupSource;

use super::list::{WaitListHeavy, WaitListLight};

/// A mutex whose `lock()` suspends the calling task (via `TaskContext::sleep`) instead of
/// blocking its worker thread's OS thread.
pub struct Mutex<T> {
    locked: AtomicBool,
    waiters: WaitListLight,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        self.mutex.waiters.notify();
    }
}

struct LockWait<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> WaitStrategy for LockWait<'_, T> {
    fn setup_wakeups(&self, task: &Arc<TaskContext>, epoch: Epoch) -> Option<SleepFlags> {
        self.mutex.waiters.register(task, epoch);
        // The lock may have been released between our failed `try_lock` and this
        // registration; re-check before committing to actually suspend.
        if self
            .mutex
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.mutex.waiters.unregister(task);
            return task.wakeup(WakeupSource::WaitList, EpochCheck::Expect(epoch));
        }
        None
    }

    fn disable_wakeups(&self, task: &Arc<TaskContext>) {
        self.mutex.waiters.unregister(task);
    }
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Mutex<T> {
        Mutex {
            locked: AtomicBool::new(false),
            waiters: WaitListLight::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| MutexGuard { mutex: self })
    }

    /// Acquire the lock, suspending the current task while it's held elsewhere. Must be
    /// called from inside a task coroutine.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            let task = current_task().expect("Mutex::lock called outside a task coroutine");
            task.sleep(&LockWait { mutex: self });
        }
    }
}

/// A counting semaphore: `acquire()` suspends the calling task until a permit is available.
pub struct Semaphore {
    permits: AtomicUsize,
    waiters: WaitListHeavy,
}

pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.permits.fetch_add(1, Ordering::Release);
        self.semaphore.waiters.notify_one();
    }
}

struct AcquireWait<'a> {
    semaphore: &'a Semaphore,
}

impl WaitStrategy for AcquireWait<'_> {
    fn setup_wakeups(&self, task: &Arc<TaskContext>, epoch: Epoch) -> Option<SleepFlags> {
        self.semaphore.waiters.register(task, epoch);
        if self.semaphore.try_take_permit() {
            self.semaphore.waiters.unregister(task);
            return task.wakeup(WakeupSource::WaitList, EpochCheck::Expect(epoch));
        }
        None
    }

    fn disable_wakeups(&self, task: &Arc<TaskContext>) {
        self.semaphore.waiters.unregister(task);
    }
}

impl Semaphore {
    pub fn new(permits: usize) -> Semaphore {
        Semaphore {
            permits: AtomicUsize::new(permits),
            waiters: WaitListHeavy::new(),
        }
    }

    fn try_take_permit(&self) -> bool {
        let mut current = self.permits.load(Ordering::Acquire);
        while current > 0 {
            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.try_take_permit()
            .then_some(SemaphorePermit { semaphore: self })
    }

    /// Acquire a permit, suspending the current task if none are available. Must be called
    /// from inside a task coroutine.
    pub fn acquire(&self) -> SemaphorePermit<'_> {
        loop {
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            let task =
                current_task().expect("Semaphore::acquire called outside a task coroutine");
            task.sleep(&AcquireWait { semaphore: self });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_excludes_second_caller() {
        let mutex = Mutex::new(0u32);
        let first = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        drop(first);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn semaphore_try_acquire_respects_permit_count() {
        let sem = Semaphore::new(1);
        let permit = sem.try_acquire().unwrap();
        assert!(sem.try_acquire().is_none());
        drop(permit);
        assert!(sem.try_acquire().is_some());
    }
}
