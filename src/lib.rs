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

//! A user-space cooperative task scheduler built on stackful coroutines: a precise
//! wait/wakeup state machine, deadline-driven timers, and structured cancellation,
//! multiplexing many lightweight tasks over a fixed pool of worker threads.
//!
//! Start an [`Engine`] with an [`config::EngineConfig`], then [`Engine::spawn`] tasks onto
//! it. Inside a spawned task, use [`current::yield_now`]/[`current::sleep_for`] to suspend
//! cooperatively, and [`wait::Mutex`]/[`wait::Semaphore`] for cooperative synchronization.
//!
//! ```no_run
//! use taskrt::{config::EngineConfig, engine::Engine};
//!
//! let engine = Engine::new(EngineConfig::default());
//! let handle = engine.spawn(|| 1 + 1);
//! assert_eq!(handle.wait().unwrap(), 2);
//! engine.shutdown();
//! ```

mod coro;

pub mod config;
pub mod current;
pub mod engine;
pub mod error;
pub mod processor;
pub mod reactor;
pub mod task;
pub mod wait;

pub use crate::engine::Engine;
pub use crate::error::Error;
pub use crate::task::{
    spawn, spawn_critical, spawn_with, try_spawn, try_spawn_with, CancellationReason, Importance,
    SpawnOptions, TaskHandle, TaskLocalKey, TaskState, WaitMode,
};
