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

//! Error kinds surfaced by the core scheduler.

use std::any::Any;
use std::fmt;

use crate::task::CancellationReason;

/// Opaque wrapper around a caught task panic payload.
///
/// `Box<dyn Any + Send>` doesn't implement `Debug`/`PartialEq`, so callers that need to
/// move it around `Result<_, Error>` get this newtype instead of the raw box.
pub struct PanicPayload(pub Box<dyn Any + Send + 'static>);

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&panic_message(&self.0))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Errors the core can surface to callers.
///
/// Violations of core invariants (magic-cookie mismatch, epoch underflow, impossible
/// state transitions) are deliberately *not* represented here: those are fatal bugs and
/// are reported via `panic!`/`unreachable!`, never as a recoverable `Result`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `current_task()` was called from a thread that isn't running a coroutine.
    #[error("not running inside a task coroutine")]
    NotInCoroutineContext,

    /// The task handle refers to a task that has already been cancelled.
    #[error("task was cancelled (reason: {0:?})")]
    TaskCancelled(CancellationReason),

    /// A blocking wait primitive was interrupted because its task got cancelled.
    #[error("wait interrupted by cancellation (reason: {0:?})")]
    WaitInterruptedByCancel(CancellationReason),

    /// Admission control rejected a `try_schedule` call synchronously.
    #[error("task processor is overloaded")]
    ProcessorOverload,

    /// The awaited task's coroutine panicked; its payload is attached for diagnostics.
    #[error("task panicked: {}", panic_message(&.0.0))]
    TaskPanicked(PanicPayload),

    /// Configuration document failed to parse.
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

/// Fatal condition: the sole worker thread of a processor tried to `wait()` for itself.
///
/// Unlike [`Error`], this is not returned — it is logged and the process aborts, mirroring
/// the core's stance that this class of misuse is a programming error, not a recoverable
/// runtime condition.
#[cold]
#[track_caller]
pub(crate) fn report_deadlock(detail: &str) -> ! {
    log::error!("deadlock detected: {detail}");
    std::process::abort();
}
