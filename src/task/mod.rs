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

//! Task lifecycle, sleep-state machine, cancellation, and task-local storage.

pub(crate) mod context;
pub(crate) mod handle;
pub(crate) mod local;
pub(crate) mod sleep_state;

pub use self::context::TaskContext;
pub use self::handle::{
    spawn, spawn_critical, spawn_with, try_spawn, try_spawn_with, SpawnOptions, TaskHandle,
};
pub use self::local::TaskLocalKey;

/// Life-cycle state of a task, per spec §3.
///
/// Valid transitions: `New -> Queued -> Running -> (Suspended <-> Queued -> Running)* ->
/// {Completed, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Queued,
    Running,
    Suspended,
    Completed,
    Cancelled,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }
}

/// Why a task was (or should be) cancelled. Monotonic: once set away from `None`, a task's
/// reason never reverts and can only be reported as "at least as severe" going forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CancellationReason {
    None,
    UserRequest,
    Overload,
    Shutdown,
    Deadline,
    OperationCancelled,
}

impl CancellationReason {
    pub fn is_requested(self) -> bool {
        !matches!(self, CancellationReason::None)
    }
}

/// Whether a task may bypass a processor's admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    Normal,
    Critical,
}

/// How a task handle's `wait()` behaves when multiple callers await the same task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Only a single caller may `wait()` this task at a time.
    Single,
    /// Any number of callers may `wait()` this task concurrently.
    Shared,
}

/// Set immediately before a coroutine yields control back to its worker thread. Whether a
/// finished task is reported as `Completed` or `Cancelled` is decided separately, from the
/// task's `cancellation_reason` at the moment its payload returns — cancellation here is
/// cooperative, not a forced unwind, so the coroutine always yields as `Complete` when its
/// payload returns, whatever the reason it chose to return early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum YieldReason {
    Waiting,
    Complete,
}

/// The cause that delivered a sleeping task back to the ready queue.
///
/// Ordered highest-priority first; `PartialOrd`/`Ord` follow declaration order so that
/// `GetPrimaryWakeupSource` can simply take the minimum of the pending sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WakeupSource {
    Bootstrap,
    CancelRequest,
    DeadlineTimer,
    WaitList,
}
