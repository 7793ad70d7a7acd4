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

//! Top-level handle bundling the main processor, the dedicated blocking processor, and the
//! reactor, per §6's `EngineConfig` aggregation and §4.4's `spawn_blocking` dispatch.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::Error;
use crate::reactor::Reactor;
use crate::processor::Processor;
use crate::task::{
    spawn, spawn_critical, spawn_with, try_spawn, try_spawn_with, Importance, SpawnOptions,
    TaskHandle,
};

/// Owns the processors and reactor lanes that make up one running scheduler instance.
pub struct Engine {
    main: Arc<Processor>,
    blocking: Arc<Processor>,
    reactor: Arc<Reactor>,
}

impl Engine {
    /// Build and start an engine from `config`: spins up the reactor lanes first (processors
    /// need a reactor reference to arm deadline timers), then both processors' worker pools.
    pub fn new(config: EngineConfig) -> Arc<Engine> {
        let reactor = Reactor::new(&config.event_thread);
        let main = Processor::new(config.main_processor, reactor.clone());
        main.start();
        let blocking = Processor::new(config.blocking_processor, reactor.clone());
        blocking.start();
        log::info!(target: "taskrt", "engine started");
        Arc::new(Engine {
            main,
            blocking,
            reactor,
        })
    }

    pub fn main_processor(&self) -> &Arc<Processor> {
        &self.main
    }

    pub fn blocking_processor(&self) -> &Arc<Processor> {
        &self.blocking
    }

    /// Spawn a normal task onto the main processor.
    pub fn spawn<T, F>(&self, payload: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        spawn(&self.main, payload)
    }

    /// Spawn a critical task onto the main processor (bypasses admission control).
    pub fn spawn_critical<T, F>(&self, payload: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        spawn_critical(&self.main, payload)
    }

    /// Spawn with explicit options onto the main processor.
    pub fn spawn_with<T, F>(&self, importance: Importance, options: SpawnOptions, payload: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        spawn_with(&self.main, importance, options, payload)
    }

    /// Spawn a normal task, failing synchronously with `Error::ProcessorOverload` instead of
    /// spawning a task that would immediately be cancelled for `Overload`.
    pub fn try_spawn<T, F>(&self, payload: F) -> Result<TaskHandle<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        try_spawn(&self.main, payload)
    }

    /// Spawn with explicit options onto the main processor, failing synchronously on
    /// admission rejection.
    pub fn try_spawn_with<T, F>(
        &self,
        importance: Importance,
        options: SpawnOptions,
        payload: F,
    ) -> Result<TaskHandle<T>, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        try_spawn_with(&self.main, importance, options, payload)
    }

    /// Dispatch a closure expected to make blocking OS calls onto the dedicated blocking
    /// processor, so regular worker threads never stall on one (§5's "blocking OS calls are
    /// forbidden on worker threads").
    pub fn spawn_blocking<T, F>(&self, payload: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        spawn(&self.blocking, payload)
    }

    /// Broadcast cancellation to every still-running task on both processors, drain their
    /// ready queues, join all worker threads, then stop the reactor lanes.
    pub fn shutdown(&self) {
        log::info!(target: "taskrt", "engine shutting down");
        self.main.shutdown();
        self.blocking.shutdown();
        self.reactor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawns_and_completes_a_task() {
        let engine = Engine::new(EngineConfig::default());
        let handle = engine.spawn(|| 1 + 1);
        assert_eq!(handle.wait().unwrap(), 2);
        engine.shutdown();
    }

    #[test]
    fn spawn_blocking_runs_on_the_blocking_processor() {
        let engine = Engine::new(EngineConfig::default());
        let handle = engine.spawn_blocking(|| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            "done"
        });
        assert_eq!(handle.wait().unwrap(), "done");
        engine.shutdown();
    }
}
