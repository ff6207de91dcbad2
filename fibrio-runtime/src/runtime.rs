use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    io,
    rc::Rc,
    time::Duration,
};

use async_task::{Runnable, Task};
use fibrio_driver::Dispatcher;
use fibrio_log::debug;

scoped_tls::scoped_thread_local!(static CURRENT_RUNTIME: Runtime);

struct RunnableQueue(RefCell<VecDeque<Runnable>>);

/// The cooperative runtime: a runnable queue plus the shared epoll
/// dispatcher. It cannot be sent to another thread.
pub struct Runtime {
    // The queue must outlive the schedule closures pointing into it, so it
    // lives behind its own allocation for the runtime's whole life.
    runnables: Box<RunnableQueue>,
    reactor: Rc<Dispatcher>,
}

impl Runtime {
    /// Create a runtime with a fresh dispatcher.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            runnables: Box::new(RunnableQueue(RefCell::new(VecDeque::new()))),
            reactor: Rc::new(Dispatcher::new()?),
        })
    }

    /// The reactor shared by everything scheduled on this runtime.
    pub fn reactor(&self) -> Rc<Dispatcher> {
        self.reactor.clone()
    }

    /// Try to perform a function on the current runtime, handing the
    /// function back when none is running.
    pub fn try_with_current<T, F: FnOnce(&Self) -> T>(f: F) -> std::result::Result<T, F> {
        if CURRENT_RUNTIME.is_set() {
            Ok(CURRENT_RUNTIME.with(f))
        } else {
            Err(f)
        }
    }

    /// Perform a function on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when no runtime is running on this thread.
    pub fn with_current<T, F: FnOnce(&Self) -> T>(f: F) -> T {
        #[cold]
        fn not_in_runtime() -> ! {
            panic!("not inside a fibrio runtime")
        }

        if CURRENT_RUNTIME.is_set() {
            CURRENT_RUNTIME.with(f)
        } else {
            not_in_runtime()
        }
    }

    /// Spawn a task without the `'static` check.
    ///
    /// # Safety
    ///
    /// The caller must keep everything the future captures alive until the
    /// task finishes or is dropped.
    unsafe fn spawn_unchecked<F: Future>(&self, future: F) -> Task<F::Output> {
        let queue = self.runnables.as_ref() as *const RunnableQueue;
        let schedule = move |runnable| {
            // The queue owns the schedule closure through its runnables, so
            // the pointer is live whenever this runs.
            let queue = unsafe { &*queue };
            queue.0.borrow_mut().push_back(runnable);
        };
        let (runnable, task) = unsafe { async_task::spawn_unchecked(future, schedule) };
        runnable.schedule();
        task
    }

    /// Spawn a task onto this runtime.
    ///
    /// The task runs whenever the owning thread is inside
    /// [`block_on`](Runtime::block_on); a task that panics takes the whole
    /// runtime down with it.
    pub fn spawn<F: Future + 'static>(&self, future: F) -> Task<F::Output> {
        // SAFETY: 'static future, nothing borrowed to keep alive.
        unsafe { self.spawn_unchecked(future) }
    }

    /// Run one round of scheduled tasks; newly scheduled ones wait for the
    /// next round. Returns whether runnables remain.
    fn run_round(&self) -> bool {
        let mut budget = self.runnables.0.borrow().len();
        while budget > 0 {
            let Some(runnable) = self.runnables.0.borrow_mut().pop_front() else {
                break;
            };
            runnable.run();
            budget -= 1;
        }
        !self.runnables.0.borrow().is_empty()
    }

    /// Drive `future` to completion, interleaving every spawned task and
    /// the dispatcher.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        CURRENT_RUNTIME.set(self, || {
            let mut result = None;
            // SAFETY: the task is detached but cannot outlive this frame:
            // block_on only returns once `result` is filled, and the queue
            // dies with the runtime.
            unsafe { self.spawn_unchecked(async { result = Some(future.await) }) }.detach();
            loop {
                let runnables_left = self.run_round();
                if let Some(result) = result.take() {
                    return result;
                }
                let timeout = if runnables_left {
                    Some(Duration::ZERO)
                } else {
                    None
                };
                match self.reactor.dispatch(timeout) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        debug!("interrupted dispatch: {e}");
                    }
                    Err(e) => panic!("dispatcher failure: {e:?}"),
                }
            }
        })
    }
}

/// Spawn a task onto the current runtime.
///
/// # Panics
///
/// Panics when no runtime is running on this thread.
pub fn spawn<F: Future + 'static>(future: F) -> Task<F::Output> {
    Runtime::with_current(|rt| rt.spawn(future))
}
