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

//! Stackful coroutines built on the `context` crate, plus the bounded stack pool that
//! backs them (spec §4.1).
//!
//! Grounded on the `Environment`/`StackPool`/`coroutine_initialize` trampoline idiom
//! (`examples/other_examples/d062e437_rustcc-coroutine-rs__src-coroutine_unique.rs.rs`),
//! adapted so that one `Coroutine` lives for exactly one task's lifetime (bootstrap through
//! completion) rather than being a free-standing object a caller resumes by hand — that
//! binding is owned by `task::TaskContext`.

mod handle;
mod pool;

pub(crate) use self::handle::{yield_to_worker, Coroutine};
pub(crate) use self::pool::{CoroutinePool, DEFAULT_STACK_SIZE};
