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

//! `TaskContext`: the per-task state machine. Grounded directly on
//! `examples/original_source/core/src/engine/task/task_context.hpp` — the field list, the
//! `Sleep`/`Wakeup`/`RequestCancel`/`DoStep` method shapes, and the magic-cookie guard are
//! all carried over; intrusive lists and the `boost::context` coroutine are replaced with
//! `Arc`/`Weak` bookkeeping and `crate::coro::Coroutine`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::coro::{Coroutine, CoroutinePool};
use crate::error::{panic_message, Error, PanicPayload};

use super::local::Storage;
use super::sleep_state::{AtomicSleepState, EpochCheck, Epoch, SleepFlags};
use super::{CancellationReason, Importance, TaskState, WaitMode, WakeupSource, YieldReason};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[cfg(debug_assertions)]
const MAGIC: u64 = 0x6b73_6154_5375_5459;

/// Puts a task back on a processor's ready queue. Implemented by `processor::Processor`;
/// `TaskContext` only ever sees the trait object, so `task` and `processor` don't depend on
/// each other's concrete types.
pub(crate) trait TaskScheduler: Send + Sync {
    fn reschedule(&self, task: Arc<TaskContext>);
}

/// Arms a one-shot deadline wakeup. Implemented by `reactor::Reactor`.
pub(crate) trait DeadlineSource: Send + Sync {
    /// Arm a timer that calls `task.wakeup(WakeupSource::DeadlineTimer, Expect(epoch))` no
    /// earlier than `deadline`. The returned guard disarms it on drop if it hasn't fired.
    fn arm(&self, task: Arc<TaskContext>, epoch: Epoch, deadline: Instant) -> Box<dyn TimerGuard>;

    /// Arm a timer that calls `task.request_cancel(CancellationReason::Deadline)` no earlier
    /// than `deadline`. Used for a task's *cancel* deadline (spec §4.3 step 5), which is
    /// level-triggered like any other `RequestCancel` and so carries no epoch.
    fn arm_cancel(&self, task: Arc<TaskContext>, deadline: Instant) -> Box<dyn TimerGuard>;
}

/// An armed timer's disarm handle. Dropping it (or calling `disarm` explicitly) cancels the
/// timer if it hasn't already fired; firing after disarm is harmless, the epoch check drops
/// it as stale.
pub(crate) trait TimerGuard: Send {
    fn disarm(self: Box<Self>);
}

/// A strategy for how a sleeping task gets woken, and from where. Implemented per-wait-site:
/// a plain timeout, a wait-list registration, or some combination of both (e.g. "wait for
/// this mutex, but no longer than the task's deadline").
///
/// Grounded on raya's `TimerThread`/snow-rt's `Scheduler` wakeup plumbing, generalized behind
/// a trait so `TaskContext::sleep` doesn't need to know which kind of wait it's in.
pub(crate) trait WaitStrategy {
    /// Arm whatever wakeup sources this strategy represents, tagged with `epoch`. If doing so
    /// synchronously satisfies the wait (the awaited condition already held), returns the
    /// sleep-flags in effect just before that wakeup — the same value `TaskContext::wakeup`
    /// returns — so `sleep` can skip the actual coroutine yield entirely.
    fn setup_wakeups(&self, task: &Arc<TaskContext>, epoch: Epoch) -> Option<SleepFlags>;

    /// Tear down whatever `setup_wakeups` armed (disarm timers, remove wait-list entries).
    /// Always called once after waking, regardless of which source won.
    fn disable_wakeups(&self, task: &Arc<TaskContext>);
}

/// The payload a spawned task runs. Boxed so `Processor::spawn` can accept any closure.
pub(crate) type Payload = Box<dyn FnOnce() + Send>;

/// Released on drop, clearing a `WaitMode::Single` task's single-waiter claim so a later
/// (non-concurrent) caller may wait on it again.
pub(crate) struct SingleWaitGuard {
    task: Option<Arc<TaskContext>>,
}

impl Drop for SingleWaitGuard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.single_waiter_active.store(false, Ordering::Release);
        }
    }
}

pub struct TaskContext {
    #[cfg(debug_assertions)]
    magic: u64,
    id: u64,
    importance: Importance,

    state: Mutex<TaskState>,
    detached: AtomicBool,

    is_cancellable: AtomicBool,
    cancellation_reason: AtomicU8,
    cancel_deadline: Mutex<Option<Instant>>,

    wait_mode: WaitMode,
    /// Guards against a second concurrent `Wait()` on a `WaitMode::Single` task; see
    /// `task::handle::wait_for_finish`. Unused (always `false`) for `WaitMode::Shared`.
    single_waiter_active: AtomicBool,

    sleep_state: AtomicSleepState,
    /// Set just before the coroutine actually yields to its worker in `sleep`, cleared right
    /// after it resumes. `wakeup` only reschedules a task once this is true — the pre-yield
    /// `SLEEPING` bit alone isn't enough, since `setup_wakeups` can synchronously self-wake
    /// while still on the sleeping task's own stack (see `sleep`'s `synchronous` path).
    parked: AtomicBool,

    // Touched only by the single worker thread currently stepping this task's coroutine;
    // see `run_on_coroutine` and `Coroutine::resume`'s mutex for why that's race-free despite
    // `TaskContext` being shared behind an `Arc` across threads.
    yield_reason: Cell<YieldReason>,
    /// Every wakeup-source flag that was set when the most recent `Sleep` finished, not just
    /// the primary one reported to the caller. Diagnostics-only (`debug_wakeup_sources`); a
    /// non-primary source here does not re-fire on a later sleep.
    last_wakeup_flags: Cell<SleepFlags>,
    payload: RefCell<Option<Payload>>,
    panic_payload: RefCell<Option<PanicPayload>>,
    local_storage: Storage,

    // Serializes resumes: a worker popping this task from the ready queue while another
    // worker is still inside its coroutine (between `do_start_sleep` and the actual yield)
    // simply blocks here until the in-flight step yields or completes. See `do_step`.
    coro: Mutex<Coroutine>,

    finish_waiters: Arc<super::super::wait::WaitListHeavy>,
    /// Blocking fallback for `TaskHandle::wait` called from a plain OS thread (no current
    /// task), per spec §4.3: the one OS-blocking primitive the core itself offers.
    finish_signal: Arc<(Mutex<bool>, Condvar)>,

    scheduler: Weak<dyn TaskScheduler>,
    reactor: Weak<dyn DeadlineSource>,

    created_at: Instant,
    started_at: Mutex<Option<Instant>>,
    /// Written by a processor on enqueue, read (and cleared) on dequeue to report queue
    /// wait latency; see `processor::Processor::worker_loop`.
    queue_wait_timepoint: Mutex<Option<Instant>>,
}

// SAFETY: `yield_reason`, `last_wakeup_flags`, `payload`, `panic_payload` and `local_storage`
// use `Cell`/`RefCell` for speed, but are only ever touched while this task's coroutine is the
// one running, which
// by construction is at most one worker thread at a time (enforced by the `coro` mutex plus
// the fact that a coroutine only inspects its own `TaskContext`). No two threads ever access
// these fields concurrently, so `Sync` is sound even though the fields themselves aren't.
unsafe impl Sync for TaskContext {}

// SAFETY: a stackful coroutine's register context and guarded stack (held in `coro`) have no
// thread affinity — they're plain memory plus a saved register set, and `Processor`'s worker
// loop is exactly what moves a task's `Arc<TaskContext>` from the thread that enqueued or woke
// it onto whichever thread next calls `do_step`/`resume`. Only one thread ever touches `coro`
// at a time (the `Mutex`, same as the `Cell`/`RefCell` fields above), so handing the whole
// `TaskContext` across threads is sound even though the `context` crate's `Context` isn't
// `Send` on its own.
unsafe impl Send for TaskContext {}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .field("importance", &self.importance)
            .finish()
    }
}

impl TaskContext {
    pub(crate) fn new(
        payload: Payload,
        importance: Importance,
        wait_mode: WaitMode,
        cancel_deadline: Option<Instant>,
        pool: Arc<CoroutinePool>,
        scheduler: Weak<dyn TaskScheduler>,
        reactor: Weak<dyn DeadlineSource>,
    ) -> Arc<TaskContext> {
        Arc::new(TaskContext {
            #[cfg(debug_assertions)]
            magic: MAGIC,
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            importance,
            state: Mutex::new(TaskState::New),
            detached: AtomicBool::new(false),
            is_cancellable: AtomicBool::new(true),
            cancellation_reason: AtomicU8::new(CancellationReason::None as u8),
            cancel_deadline: Mutex::new(cancel_deadline),
            wait_mode,
            single_waiter_active: AtomicBool::new(false),
            sleep_state: AtomicSleepState::new(),
            parked: AtomicBool::new(false),
            yield_reason: Cell::new(YieldReason::Complete),
            last_wakeup_flags: Cell::new(SleepFlags::empty()),
            payload: RefCell::new(Some(payload)),
            panic_payload: RefCell::new(None),
            local_storage: Storage::new(),
            coro: Mutex::new(Coroutine::new(pool)),
            finish_waiters: Arc::new(super::super::wait::WaitListHeavy::new()),
            finish_signal: Arc::new((Mutex::new(false), Condvar::new())),
            scheduler,
            reactor,
            created_at: Instant::now(),
            started_at: Mutex::new(None),
            queue_wait_timepoint: Mutex::new(None),
        })
    }

    #[cfg(debug_assertions)]
    fn check_magic(&self) {
        if self.magic != MAGIC {
            crate::error::report_deadlock("TaskContext magic cookie corrupted (use-after-free or buffer overrun)");
        }
    }

    #[cfg(not(debug_assertions))]
    fn check_magic(&self) {}

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn importance(&self) -> Importance {
        self.importance
    }

    pub fn is_critical(&self) -> bool {
        self.importance == Importance::Critical
    }

    pub(crate) fn local_storage(&self) -> &Storage {
        &self.local_storage
    }

    pub(crate) fn finish_waiters(&self) -> &Arc<super::super::wait::WaitListHeavy> {
        &self.finish_waiters
    }

    pub(crate) fn finish_signal(&self) -> &Arc<(Mutex<bool>, Condvar)> {
        &self.finish_signal
    }

    pub fn wait_mode(&self) -> WaitMode {
        self.wait_mode
    }

    /// For `WaitMode::Single` tasks, claim the right to be the one outstanding waiter.
    /// Returns a guard that releases the claim on drop. `WaitMode::Shared` tasks always
    /// succeed without actually taking the flag (any number of concurrent waiters is fine).
    ///
    /// Fatal (not a recoverable `Result`) if a second caller tries to wait on a `Single`
    /// task concurrently with a waiter already in progress: that is a misuse of the API
    /// contract, not a race the scheduler is obliged to arbitrate silently.
    pub(crate) fn begin_wait(self: &Arc<Self>) -> SingleWaitGuard {
        if self.wait_mode == WaitMode::Single
            && self
                .single_waiter_active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            crate::error::report_deadlock(&format!(
                "task {} is WaitMode::Single but was waited on by more than one caller at once",
                self.id()
            ));
        }
        SingleWaitGuard {
            task: if self.wait_mode == WaitMode::Single {
                Some(self.clone())
            } else {
                None
            },
        }
    }

    /// Plain atomic store, invoked by a processor right before the coroutine's first
    /// bootstrap resume so the sleep-state epoch starts from a known baseline.
    pub(crate) fn mark_queued(&self) {
        *self.state.lock() = TaskState::Queued;
    }

    pub(crate) fn set_queue_wait_timepoint(&self) {
        *self.queue_wait_timepoint.lock() = Some(Instant::now());
    }

    /// Consume the timestamp written by `set_queue_wait_timepoint`, returning how long the
    /// task sat on the ready queue before this dequeue.
    pub(crate) fn take_queue_wait_timepoint(&self) -> Option<Duration> {
        self.queue_wait_timepoint
            .lock()
            .take()
            .map(|t| t.elapsed())
    }

    /// Finalize a task that will never run its coroutine at all: admission-rejected at
    /// first `Schedule`. Mirrors the terminal-state half of `do_step`'s `Complete`/
    /// `Cancelled` branch without ever touching `coro`.
    pub(crate) fn finish_terminal(self: &Arc<Self>, state: TaskState) {
        debug_assert!(state.is_finished());
        *self.state.lock() = state;
        self.finish_waiters.notify_all();
        let (lock, cvar) = &*self.finish_signal;
        *lock.lock() = true;
        cvar.notify_all();
        self.finish_detached();
    }

    pub fn is_cancellable(&self) -> bool {
        self.is_cancellable.load(Ordering::Acquire)
    }

    /// Set whether this task may currently be cancelled; returns the previous value. A task
    /// wraps a non-cancellable section (e.g. releasing a resource) in `set_cancellable(false)`
    /// ... `set_cancellable(true)` to guarantee it isn't interrupted mid-cleanup.
    pub fn set_cancellable(&self, value: bool) -> bool {
        self.is_cancellable.swap(value, Ordering::AcqRel)
    }

    pub fn cancellation_reason(&self) -> CancellationReason {
        decode_reason(self.cancellation_reason.load(Ordering::Acquire))
    }

    /// Whether cooperative code should bail out now: a cancellation has been requested and
    /// the task isn't inside a non-cancellable section.
    pub fn should_cancel(&self) -> bool {
        self.is_cancellable() && self.cancellation_reason().is_requested()
    }

    /// Request cancellation. Monotonic: the first reason recorded sticks, later calls with a
    /// different reason are no-ops. If the task is currently sleeping, this also delivers a
    /// level-triggered wakeup that bypasses epoch checking (spec's resolved open question:
    /// `NoEpoch` wakes latch onto `cancellation_reason`, not the sleep-state epoch, so a
    /// `RequestCancel` racing a `DoFinishSleep`/next `DoStartSleep` is never lost even though
    /// the epoch it was sent against may already be stale).
    pub fn request_cancel(self: &Arc<Self>, reason: CancellationReason) {
        let encoded = reason as u8;
        let _ = self.cancellation_reason.compare_exchange(
            CancellationReason::None as u8,
            encoded,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.wakeup(WakeupSource::CancelRequest, EpochCheck::NoEpoch);
    }

    pub fn set_cancel_deadline(&self, deadline: Instant) {
        *self.cancel_deadline.lock() = Some(deadline);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub(crate) fn mark_detached(&self) {
        self.detached.store(true, Ordering::Release);
    }

    /// Release a detached task's place in its processor's detached-task bookkeeping
    /// (spec §4.3's `FinishDetached`). Called automatically from `do_step`'s terminal branch;
    /// a no-op for a task that was never detached. `Processor::alive` already tracks every
    /// task (detached or not) as a `Weak` reference and prunes it once the strong count drops
    /// to zero, so this is an eager release rather than the only path to cleanup — it just
    /// means a detached task doesn't linger in that bookkeeping between finishing and whatever
    /// later `shutdown()` call would otherwise have pruned it.
    pub(crate) fn finish_detached(&self) {
        self.detached.store(false, Ordering::Release);
    }

    /// Panic payload left behind if the task's closure unwound, taken (not cloned) the first
    /// time a waiter observes it.
    pub(crate) fn take_panic(&self) -> Option<PanicPayload> {
        self.panic_payload.borrow_mut().take()
    }

    /// Send a wakeup from `source`, subject to `check`. Returns the sleep-flags in effect
    /// just before this call if it was accepted (not dropped as stale), which is `Some` even
    /// when the task wasn't actually sleeping yet (see `sleep`'s synchronous-wakeup handling)
    /// and `None` only when `check` rejected it as belonging to a stale epoch.
    pub(crate) fn wakeup(self: &Arc<Self>, source: WakeupSource, check: EpochCheck) -> Option<SleepFlags> {
        let prev = self.sleep_state.fetch_or_sleep_flags(source, check)?;
        // Only reschedule once the coroutine has actually yielded to its worker. The
        // `SLEEPING` bit alone is set well before that (at `do_start_sleep`), so a strategy
        // that resolves synchronously inside `setup_wakeups` would otherwise push this task
        // onto the ready queue while it's still running on its own stack, letting a second
        // worker resume it out from under the first once the real yield (or none at all)
        // happens.
        if self.parked.load(Ordering::Acquire) && super::sleep_state::should_schedule(prev) {
            if let Some(scheduler) = self.scheduler.upgrade() {
                scheduler.reschedule(self.clone());
            }
        }
        Some(prev)
    }

    pub(crate) fn arm_deadline_timer(
        self: &Arc<Self>,
        epoch: Epoch,
        deadline: Instant,
    ) -> Option<Box<dyn TimerGuard>> {
        self.reactor
            .upgrade()
            .map(|reactor| reactor.arm(self.clone(), epoch, deadline))
    }

    /// Arm this task's cancel deadline (if finite and still in the future) for the current
    /// sleep cycle. Returns the guard to disarm on resume, or `None` if there is no cancel
    /// deadline or it was already handled synchronously (see `sleep`).
    fn arm_cancel_deadline_timer(self: &Arc<Self>) -> Option<Box<dyn TimerGuard>> {
        let deadline = (*self.cancel_deadline.lock())?;
        self.reactor
            .upgrade()
            .map(|reactor| reactor.arm_cancel(self.clone(), deadline))
    }

    /// Suspend the running coroutine until `strategy` delivers a wakeup. Must only be called
    /// from inside the task's own coroutine. Returns which source woke it.
    ///
    /// See the module docs on `coro` and the `coro` field above for why the synchronous
    /// (same-stack, same-thread) wakeup case below never races a concurrent resume attempt.
    pub(crate) fn sleep(self: &Arc<Self>, strategy: &dyn WaitStrategy) -> WakeupSource {
        self.check_magic();
        let new_epoch = self.sleep_state.epoch() + 1;
        let before = self.sleep_state.do_start_sleep(new_epoch);
        debug_assert!(
            before.primary_wakeup_source().is_none(),
            "Sleep called while a wakeup from a previous cycle was still pending"
        );
        *self.state.lock() = TaskState::Suspended;
        self.yield_reason.set(YieldReason::Waiting);

        // Step 3: let the strategy register for whatever wakeup sources it cares about. It
        // may resolve synchronously (e.g. the mutex it wants was already free).
        let mut synchronous = strategy
            .setup_wakeups(self, new_epoch)
            .map(super::sleep_state::should_schedule)
            .unwrap_or(false);

        // Step 4: a cancellation requested before this Sleep (or synchronously during
        // `setup_wakeups` above) always wins immediately, regardless of what the strategy
        // itself was waiting for.
        if self.should_cancel() {
            if let Some(prev) = self.wakeup(WakeupSource::CancelRequest, EpochCheck::Expect(new_epoch)) {
                synchronous = synchronous || super::sleep_state::should_schedule(prev);
            }
        }

        // Step 5: the cancel deadline is independent of whatever deadline (if any) the
        // strategy itself arms; a finite one always gets its own timer for this sleep cycle,
        // upgrading the eventual wakeup to `CancelRequest` with reason `Deadline` per spec §5.
        let cancel_deadline = *self.cancel_deadline.lock();
        let cancel_guard = match cancel_deadline {
            Some(deadline) if deadline <= Instant::now() => {
                self.request_cancel(CancellationReason::Deadline);
                synchronous = true;
                None
            }
            Some(_) => self.arm_cancel_deadline_timer(),
            None => None,
        };

        if !synchronous {
            self.parked.store(true, Ordering::Release);
            crate::coro::yield_to_worker();
            self.parked.store(false, Ordering::Release);
        }
        *self.state.lock() = TaskState::Running;

        if let Some(guard) = cancel_guard {
            guard.disarm();
        }
        strategy.disable_wakeups(self);
        let flags = self.sleep_state.do_finish_sleep();
        self.last_wakeup_flags.set(flags);
        flags
            .primary_wakeup_source()
            .expect("task resumed with no recorded wakeup source")
    }

    /// Every wakeup source observed on the most recently finished `Sleep`, highest priority
    /// first. Diagnostics only: a source other than the first one did not win the race and
    /// will not re-fire on a later sleep.
    pub fn debug_wakeup_sources(&self) -> Vec<WakeupSource> {
        self.last_wakeup_flags.get().all_wakeup_sources().collect()
    }

    /// Convenience wrapper around `sleep` for a plain timeout with no other wait condition.
    pub(crate) fn sleep_for(self: &Arc<Self>, duration: Duration) -> WakeupSource {
        self.sleep_until(Instant::now() + duration)
    }

    pub(crate) fn sleep_until(self: &Arc<Self>, deadline: Instant) -> WakeupSource {
        let strategy = super::super::wait::DeadlineStrategy::new(deadline);
        self.sleep(&strategy)
    }

    /// Run one scheduling quantum: bootstrap on the task's first step, otherwise resume the
    /// coroutine where it left off. Called by a processor worker with this task popped off
    /// the ready queue; never called re-entrantly for the same task (the `coro` mutex would
    /// simply make a second caller wait, which is the documented, safe outcome of a spurious
    /// double-schedule).
    pub(crate) fn do_step(self: &Arc<Self>) {
        self.check_magic();
        {
            let mut state = self.state.lock();
            if state.is_finished() {
                return;
            }
            if *state == TaskState::New {
                *self.started_at.lock() = Some(Instant::now());
                self.sleep_state.store(SleepFlags::empty(), 0);
            }
            *state = TaskState::Running;
        }

        self.coro.lock().resume(self);

        match self.yield_reason.get() {
            YieldReason::Waiting => {
                // Sleep() already set state back to Suspended (or transiently Running, in
                // the synchronous case, before this is even reached) and armed whatever
                // wakes it; nothing further to do here.
            }
            YieldReason::Complete => {
                let reason = self.cancellation_reason();
                let terminal = if reason.is_requested() {
                    TaskState::Cancelled
                } else {
                    TaskState::Completed
                };
                self.finish_terminal(terminal);
            }
        }
    }

    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// Runs on the coroutine's own stack: takes the payload, executes it, captures a panic if
/// one escapes, and marks the yield reason `Complete`. Called once from `coro::handle`'s
/// trampoline; everything after it returns is `coro::yield_to_worker`'s parking loop.
pub(crate) fn run_on_coroutine(task: &Arc<TaskContext>) {
    let epoch = task.sleep_state.epoch();
    task.wakeup(WakeupSource::Bootstrap, EpochCheck::Expect(epoch));
    // Bootstrap never goes through `do_start_sleep`/`do_finish_sleep`, so nothing else clears
    // the bit it just set; left alone it would look like a pending wakeup from a previous
    // cycle the moment this task's first real `sleep` calls `do_start_sleep`.
    task.sleep_state.store(SleepFlags::empty(), epoch);
    let payload = task.payload.borrow_mut().take();
    if let Some(payload) = payload {
        let result = std::panic::catch_unwind(AssertUnwindSafe(payload));
        if let Err(panic) = result {
            log::warn!(target: "taskrt", "task {} panicked: {}", task.id(), panic_message(&panic));
            *task.panic_payload.borrow_mut() = Some(PanicPayload(panic));
            task.cancellation_reason
                .compare_exchange(
                    CancellationReason::None as u8,
                    CancellationReason::UserRequest as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .ok();
        }
    }
    task.yield_reason.set(YieldReason::Complete);
}

fn decode_reason(byte: u8) -> CancellationReason {
    match byte {
        0 => CancellationReason::None,
        1 => CancellationReason::UserRequest,
        2 => CancellationReason::Overload,
        3 => CancellationReason::Shutdown,
        4 => CancellationReason::Deadline,
        5 => CancellationReason::OperationCancelled,
        _ => unreachable!("invalid encoded CancellationReason"),
    }
}

/// Surface `Error::TaskPanicked`/`Error::TaskCancelled` for a finished task, or `Ok(())`.
pub(crate) fn finish_result(task: &Arc<TaskContext>) -> Result<(), Error> {
    match task.state() {
        TaskState::Completed => {
            if let Some(panic) = task.take_panic() {
                return Err(Error::TaskPanicked(panic));
            }
            Ok(())
        }
        TaskState::Cancelled => Err(Error::TaskCancelled(task.cancellation_reason())),
        other => crate::error::report_deadlock(&format!(
            "finish_result called on task {} in non-terminal state {:?}",
            task.id(),
            other
        )),
    }
}
