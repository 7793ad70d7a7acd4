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

//! Event Thread / Context Timer (§4.5, §4.6): one or more single-threaded reactor lanes
//! servicing deadline timers and cross-thread callback marshaling.
//!
//! Grounded on raya's `TimerThread` (`BinaryHeap` min-heap by reversed deadline ordering,
//! a `parking_lot::Mutex`+`Condvar` the reactor thread sleeps on until the next deadline or
//! a new registration wakes it early). A task is pinned to one lane (by `task.id() % lanes`)
//! for the life of any timer it arms, matching "each task is pinned to one reactor for the
//! lifetime of its armed timers".

use std::cmp::Ordering as CmpOrdering;
use std::cell::Cell;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::EventThreadConfig;
use crate::task::context::{DeadlineSource, TaskContext, TimerGuard};
use crate::task::sleep_state::{Epoch, EpochCheck};
use crate::task::WakeupSource;

type Callback = Box<dyn FnOnce() + Send>;

/// What a fired [`TimerEntry`] does to the task it was armed for.
enum TimerAction {
    /// A plain deadline wakeup (spec §4.6's `ArmTimer`): `task.wakeup(DeadlineTimer, epoch)`.
    Wakeup { task: Weak<TaskContext>, epoch: Epoch },
    /// A task's cancel deadline (spec §4.3 step 5): `task.request_cancel(Deadline)`, which is
    /// level-triggered and so carries no epoch.
    CancelDeadline { task: Weak<TaskContext> },
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    action: TimerAction,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed so `BinaryHeap` (a max-heap) pops the earliest deadline first.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum LaneJob {
    ArmTimer(TimerEntry),
    Run(Callback),
}

struct LaneState {
    heap: BinaryHeap<TimerEntry>,
    callbacks: VecDeque<Callback>,
    shutdown: bool,
}

struct LaneShared {
    state: Mutex<LaneState>,
    condvar: Condvar,
    next_seq: AtomicU64,
}

impl LaneShared {
    fn push(&self, job: LaneJob) {
        let mut state = self.state.lock();
        match job {
            LaneJob::ArmTimer(entry) => state.heap.push(entry),
            LaneJob::Run(callback) => state.callbacks.push_back(callback),
        }
        self.condvar.notify_one();
    }
}

struct ReactorLane {
    shared: Arc<LaneShared>,
    thread: Option<JoinHandle<()>>,
}

thread_local! {
    static CURRENT_LANE: Cell<Option<usize>> = const { Cell::new(None) };
}

/// The reactor: a fixed set of single-threaded lanes, each servicing its own timer heap and
/// marshaled-callback queue.
pub struct Reactor {
    lanes: Vec<ReactorLane>,
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

impl Reactor {
    pub fn new(config: &EventThreadConfig) -> Arc<Reactor> {
        let lane_count = config.thread_count.max(1);
        let mut lanes = Vec::with_capacity(lane_count);
        for index in 0..lane_count {
            let shared = Arc::new(LaneShared {
                state: Mutex::new(LaneState {
                    heap: BinaryHeap::new(),
                    callbacks: VecDeque::new(),
                    shutdown: false,
                }),
                condvar: Condvar::new(),
                next_seq: AtomicU64::new(0),
            });
            let defer_events = config.defer_events;
            let lane_shared = shared.clone();
            let thread = thread::Builder::new()
                .name(format!("taskrt-reactor-{index}"))
                .spawn(move || lane_loop(index, lane_shared, defer_events))
                .expect("failed to spawn reactor thread");
            lanes.push(ReactorLane {
                shared,
                thread: Some(thread),
            });
        }
        Arc::new(Reactor { lanes })
    }

    fn lane_index_for(&self, task_id: u64) -> usize {
        (task_id as usize) % self.lanes.len()
    }

    /// Marshal `callback` onto the lane owning `task_id`. If already running on that lane's
    /// thread, runs inline instead of round-tripping through the queue.
    pub fn run_in_ev_loop(&self, task_id: u64, callback: impl FnOnce() + Send + 'static) {
        let index = self.lane_index_for(task_id);
        let on_this_lane = CURRENT_LANE.with(|c| c.get() == Some(index));
        if on_this_lane {
            callback();
        } else {
            self.lanes[index].shared.push(LaneJob::Run(Box::new(callback)));
        }
    }

    pub fn shutdown(&self) {
        for lane in &self.lanes {
            lane.shared.state.lock().shutdown = true;
            lane.shared.condvar.notify_all();
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
        for lane in &mut self.lanes {
            if let Some(thread) = lane.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl Reactor {
    fn arm_entry(&self, task_id: u64, deadline: Instant, action: TimerAction) -> Box<dyn TimerGuard> {
        let index = self.lane_index_for(task_id);
        let cancelled = Arc::new(AtomicBool::new(false));
        let seq = self.lanes[index].shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = TimerEntry {
            deadline,
            seq,
            action,
            cancelled: cancelled.clone(),
        };
        self.lanes[index].shared.push(LaneJob::ArmTimer(entry));
        Box::new(ReactorTimerGuard { cancelled })
    }
}

impl DeadlineSource for Reactor {
    fn arm(&self, task: Arc<TaskContext>, epoch: Epoch, deadline: Instant) -> Box<dyn TimerGuard> {
        let action = TimerAction::Wakeup {
            task: Arc::downgrade(&task),
            epoch,
        };
        self.arm_entry(task.id(), deadline, action)
    }

    fn arm_cancel(&self, task: Arc<TaskContext>, deadline: Instant) -> Box<dyn TimerGuard> {
        let action = TimerAction::CancelDeadline {
            task: Arc::downgrade(&task),
        };
        self.arm_entry(task.id(), deadline, action)
    }
}

struct ReactorTimerGuard {
    cancelled: Arc<AtomicBool>,
}

impl TimerGuard for ReactorTimerGuard {
    fn disarm(self: Box<Self>) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// One lane's event loop: sleep on the condvar until the next timer deadline (or a new
/// registration wakes it early), then fire expired timers and drain marshaled callbacks.
fn lane_loop(index: usize, shared: Arc<LaneShared>, defer_events: bool) {
    CURRENT_LANE.with(|c| c.set(Some(index)));
    loop {
        let mut state = shared.state.lock();
        if state.shutdown {
            return;
        }
        if state.heap.is_empty() && state.callbacks.is_empty() {
            shared.condvar.wait(&mut state);
            continue;
        }
        let now = Instant::now();
        let wait_for = state.heap.peek().map(|entry| {
            entry.deadline.saturating_duration_since(now)
        });
        if let Some(wait_for) = wait_for {
            if wait_for > Duration::ZERO {
                let timed_out = shared.condvar.wait_for(&mut state, wait_for).timed_out();
                if timed_out && state.shutdown {
                    return;
                }
                continue;
            }
        }

        let mut fired = Vec::new();
        let now = Instant::now();
        while let Some(entry) = state.heap.peek() {
            if entry.deadline > now {
                break;
            }
            fired.push(state.heap.pop().unwrap());
        }

        let pending: Vec<Callback> = if defer_events {
            state.callbacks.drain(..).collect()
        } else if let Some(callback) = state.callbacks.pop_front() {
            vec![callback]
        } else {
            Vec::new()
        };

        drop(state);

        for entry in fired {
            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }
            match entry.action {
                TimerAction::Wakeup { task, epoch } => {
                    if let Some(task) = task.upgrade() {
                        task.wakeup(WakeupSource::DeadlineTimer, EpochCheck::Expect(epoch));
                    }
                }
                TimerAction::CancelDeadline { task } => {
                    if let Some(task) = task.upgrade() {
                        task.request_cancel(crate::task::CancellationReason::Deadline);
                    }
                }
            }
        }
        for callback in pending {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coro::CoroutinePool;
    use crate::task::context::TaskScheduler;
    use crate::task::{Importance, WaitMode};
    use std::sync::mpsc;

    struct NoopScheduler;
    impl TaskScheduler for NoopScheduler {
        fn reschedule(&self, _task: Arc<TaskContext>) {}
    }

    fn test_task(scheduler: Weak<dyn TaskScheduler>, reactor: Weak<dyn DeadlineSource>) -> Arc<TaskContext> {
        let pool = Arc::new(CoroutinePool::new(crate::coro::DEFAULT_STACK_SIZE, 1));
        TaskContext::new(
            Box::new(|| {}),
            Importance::Normal,
            WaitMode::Shared,
            None,
            pool,
            scheduler,
            reactor,
        )
    }

    /// End-to-end through `Processor`/`TaskContext::sleep_for`: a task parked on a pure
    /// timeout wakes once its deadline passes, the real path `arm`/`TimerGuard` exists for.
    #[test]
    fn a_sleeping_task_wakes_once_its_deadline_passes() {
        let reactor = Reactor::new(&EventThreadConfig {
            thread_count: 1,
            defer_events: false,
        });
        let processor = crate::processor::Processor::new(
            crate::config::ProcessorConfig {
                worker_threads: 1,
                ..Default::default()
            },
            reactor.clone(),
        );
        processor.start();

        let started = Instant::now();
        let handle = crate::task::spawn(&processor, move || {
            crate::current::sleep_for(Duration::from_millis(20)).unwrap();
            started.elapsed()
        });
        let elapsed = handle.wait().unwrap();
        assert!(elapsed >= Duration::from_millis(20));

        processor.shutdown();
        reactor.shutdown();
    }

    #[test]
    fn disarmed_timer_never_fires() {
        let reactor = Reactor::new(&EventThreadConfig {
            thread_count: 1,
            defer_events: false,
        });
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(NoopScheduler);
        let task = test_task(Arc::downgrade(&scheduler), Arc::downgrade(&reactor));
        let guard = reactor.arm(task.clone(), 1, Instant::now() + Duration::from_millis(500));
        guard.disarm();
        std::thread::sleep(Duration::from_millis(30));
        reactor.shutdown();
    }

    #[test]
    fn arm_cancel_requests_cancellation_with_deadline_reason_when_it_fires() {
        let reactor = Reactor::new(&EventThreadConfig {
            thread_count: 1,
            defer_events: false,
        });
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(NoopScheduler);
        let task = test_task(Arc::downgrade(&scheduler), Arc::downgrade(&reactor));
        let _guard = reactor.arm_cancel(task.clone(), Instant::now() + Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(
            task.cancellation_reason(),
            crate::task::CancellationReason::Deadline
        );
        reactor.shutdown();
    }

    #[test]
    fn run_in_ev_loop_executes_marshaled_callback() {
        let reactor = Reactor::new(&EventThreadConfig {
            thread_count: 1,
            defer_events: false,
        });
        let (tx, rx) = mpsc::channel();
        reactor.run_in_ev_loop(0, move || {
            tx.send(42).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
        reactor.shutdown();
    }
}
