//! The synchronization context: foreign code posting callbacks back onto a
//! scheduler's thread.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::fiber::Fiber;
use crate::scheduler::Scheduler;

/// Lets code on any thread run callbacks on a scheduler's owner thread.
#[derive(Clone, Debug)]
pub struct SyncContext {
    scheduler: Scheduler,
}

impl SyncContext {
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            scheduler: scheduler.clone(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Enqueue `f` as a fresh fiber on the target scheduler and return
    /// immediately. The returned fiber observes the callback's completion.
    pub fn post<F>(&self, f: F) -> Result<Fiber, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let fiber = Fiber::from_action(
            move || {
                f();
                Ok(())
            },
            CancellationToken::none(),
        );
        self.scheduler.queue(fiber.clone())?;
        Ok(fiber)
    }

    /// `post` with an explicit state value handed to the callback.
    pub fn post_with<S, F>(&self, state: S, f: F) -> Result<Fiber, Error>
    where
        S: Send + 'static,
        F: FnOnce(S) + Send + 'static,
    {
        self.post(move || f(state))
    }

    /// Run `f` on the owner thread and return its result.
    ///
    /// Invoked inline when the caller is already on the owner thread;
    /// otherwise posted, blocking on a one-shot completion signal. Scheduler
    /// teardown signals no completion to pending sends, so do not `send`
    /// against a scheduler whose lifetime you do not own.
    pub fn send<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.scheduler.on_owner_thread() {
            return Ok(f());
        }

        let slot: Arc<(Mutex<Option<Result<R, Error>>>, Condvar)> =
            Arc::new((Mutex::new(None), Condvar::new()));

        let fill = slot.clone();
        let fiber = Fiber::from_action(
            move || {
                let r = f();
                *fill.0.lock() = Some(Ok(r));
                Ok(())
            },
            CancellationToken::none(),
        );

        // Completion (including a fault or cancel) always signals the
        // waiter, on the thread that drove the terminal transition.
        let finish = slot.clone();
        fiber.on_completed(Box::new(move |fb| {
            let mut guard = finish.0.lock();
            if guard.is_none() {
                *guard = Some(Err(fb
                    .error()
                    .unwrap_or(Error::InvalidState("send callback did not run"))));
            }
            finish.1.notify_all();
        }));

        self.scheduler.queue(fiber)?;

        let mut guard = slot.0.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            slot.1.wait(&mut guard);
        }
    }
}
