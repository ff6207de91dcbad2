//! Single-threaded cooperative runtime of fibrio.
//!
//! One OS thread interleaves every task with the epoll dispatcher: tasks
//! run until they suspend on readiness, then the reactor blocks until a
//! descriptor (or a timeout) has something to say. There is no preemption
//! and there are no locks; a runtime and everything scheduled on it stay
//! on the thread that built it.

#![warn(missing_docs)]

mod runtime;

pub use async_task::Task;
pub use runtime::*;
