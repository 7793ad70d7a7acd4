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

//! Static configuration for a [`crate::processor::Processor`] and the [`crate::reactor::Reactor`].
//!
//! Loaded either by hand (`EngineConfig::default()` plus field assignment) or parsed from a
//! TOML document via `serde`/`toml`, mirroring the layered, environment-overridable
//! configuration idiom of the rest of the ecosystem even though this crate has no on-disk
//! format of its own beyond this optional document.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

/// What an overloaded processor does to tasks beyond its admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverloadAction {
    /// Synchronously cancel the task with `CancellationReason::Overload`.
    Cancel,
    /// Accept it anyway; admission limits become advisory-only.
    Ignore,
}

impl Default for OverloadAction {
    fn default() -> Self {
        OverloadAction::Cancel
    }
}

/// Per-`Processor` tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Number of worker OS threads. `0` means "one per available core".
    pub worker_threads: usize,
    /// Emit a `trace!` line every `task_trace_every` scheduled tasks. `0` disables tracing.
    pub task_trace_every: u32,
    /// What to do with non-critical tasks once admission limits are exceeded.
    pub overload_action: OverloadAction,
    /// Reject non-critical tasks once the ready queue holds this many entries.
    pub task_queue_size_limit: usize,
    /// Reject non-critical tasks once the oldest queued task has waited this long.
    #[serde(
        rename = "task_queue_wait_limit_ms",
        deserialize_with = "duration_from_millis"
    )]
    pub task_queue_wait_limit: Duration,
    /// Human-readable name, used in thread names and log lines.
    pub name: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            worker_threads: 0,
            task_trace_every: 0,
            overload_action: OverloadAction::default(),
            task_queue_size_limit: 10_000,
            task_queue_wait_limit: Duration::from_secs(1),
            name: "task-processor".to_string(),
        }
    }
}

impl ProcessorConfig {
    /// Resolve `worker_threads == 0` to the number of available cores.
    pub(crate) fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.worker_threads
        }
    }
}

/// Per-`Reactor` tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventThreadConfig {
    /// Number of reactor threads. Tasks are pinned to one for the life of an armed timer.
    pub thread_count: usize,
    /// If true, marshaled callbacks are coalesced and run at the end of the current
    /// iteration rather than immediately; trades latency for throughput under load.
    pub defer_events: bool,
}

impl Default for EventThreadConfig {
    fn default() -> Self {
        EventThreadConfig {
            thread_count: 1,
            defer_events: false,
        }
    }
}

/// Top-level configuration: one `ProcessorConfig` per named processor plus the reactor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub main_processor: ProcessorConfig,
    pub blocking_processor: ProcessorConfig,
    pub event_thread: EventThreadConfig,
}

impl EngineConfig {
    /// Parse a TOML configuration document into an `EngineConfig`.
    ///
    /// Dotted keys (`main_processor.worker_threads = 4`) and explicit `[main_processor]`
    /// tables are both accepted, since they're equivalent TOML syntax. Any field left out
    /// of the document falls back to `ProcessorConfig`/`EventThreadConfig`/`EngineConfig`'s
    /// own `Default`; an unrecognized field is a hard error rather than silently ignored.
    pub fn from_str(doc: &str) -> Result<EngineConfig, Error> {
        toml::from_str(doc).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a TOML configuration document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<EngineConfig, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        EngineConfig::from_str(&content)
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.main_processor.task_queue_size_limit > 0);
        assert_eq!(cfg.event_thread.thread_count, 1);
    }

    #[test]
    fn parses_minimal_doc() {
        let doc = "
            # comment
            main_processor.worker_threads = 4
            main_processor.task_queue_size_limit = 10
            main_processor.task_queue_wait_limit_ms = 500
            main_processor.overload_action = \"ignore\"
            event_thread.thread_count = 2
            event_thread.defer_events = true
        ";
        let cfg = EngineConfig::from_str(doc).unwrap();
        assert_eq!(cfg.main_processor.worker_threads, 4);
        assert_eq!(cfg.main_processor.task_queue_size_limit, 10);
        assert_eq!(
            cfg.main_processor.task_queue_wait_limit,
            Duration::from_millis(500)
        );
        assert_eq!(cfg.main_processor.overload_action, OverloadAction::Ignore);
        assert_eq!(cfg.event_thread.thread_count, 2);
        assert!(cfg.event_thread.defer_events);
    }

    #[test]
    fn rejects_unknown_key() {
        assert!(EngineConfig::from_str("nonsense.key = 1").is_err());
    }
}
