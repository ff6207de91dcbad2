//! Low-level readiness driver of fibrio.
//!
//! This crate defines the event and error vocabulary of the engine, the
//! [`Reactor`] registration contract, the level-triggered epoll
//! [`Dispatcher`] implementing it, and the per-descriptor [`SelectClient`]
//! that parks one task until its descriptor is ready again.
//!
//! Everything here is single-threaded by design: the dispatcher, the
//! clients and the wakers they hold all live on the thread that runs the
//! event loop.

#![warn(missing_docs)]

pub use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

#[macro_use]
mod macros;

mod client;
mod epoll;
mod error;
mod event;
mod reactor;

pub use client::*;
pub use epoll::*;
pub use error::*;
pub use event::*;
pub use reactor::*;
