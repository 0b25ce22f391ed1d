//! The task bridge: fiber completion exposed as a standard future.
//!
//! A [`YieldableTask`] wraps a step-sequence (or thunk, or single
//! instruction) in a fiber and mirrors the fiber's terminal state on a
//! task-shaped surface: `Future` for async consumers, blocking
//! `wait`/`wait_timeout` for plain threads. The typed result is read out of
//! the fiber's result slot exactly once.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::fiber::{Fiber, FiberStatus};
use crate::instruction::Instruction;
use crate::scheduler::Scheduler;
use crate::step::StepSequence;

struct Shared {
    done: Mutex<bool>,
    completed: Condvar,
    waker: Mutex<Option<Waker>>,
}

/// A task whose body runs as a fiber and must therefore execute on the
/// owning scheduler's thread, reaching yields through the fiber state
/// machine.
///
/// The task completes when the fiber does: `RanToCompletion` yields
/// `Ok(T)`, `Canceled` and `Faulted` yield the corresponding error. Reading
/// the result consumes it; poll or wait from one place.
pub struct YieldableTask<T> {
    fiber: Fiber,
    shared: Arc<Shared>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> YieldableTask<T> {
    /// Wrap a step sequence.
    pub fn new(seq: impl StepSequence + 'static, token: CancellationToken) -> Self {
        Self::wrap(Fiber::with_token(seq, token))
    }

    /// Wrap a thunk invoked once per step.
    pub fn from_thunk<F>(f: F, token: CancellationToken) -> Self
    where
        F: FnMut() -> Result<Instruction, Error> + Send + 'static,
    {
        Self::wrap(Fiber::from_thunk(f, token))
    }

    /// Wrap a single instruction: the fiber issues it once, then stops.
    pub fn from_instruction(instr: Instruction, token: CancellationToken) -> Self {
        let mut pending = Some(instr);
        Self::wrap(Fiber::from_thunk(
            move || Ok(pending.take().unwrap_or(Instruction::Stop)),
            token,
        ))
    }

    fn wrap(fiber: Fiber) -> Self {
        let shared = Arc::new(Shared {
            done: Mutex::new(false),
            completed: Condvar::new(),
            waker: Mutex::new(None),
        });
        let signal = shared.clone();
        fiber.on_completed(Box::new(move |_| {
            *signal.done.lock() = true;
            signal.completed.notify_all();
            if let Some(w) = signal.waker.lock().take() {
                w.wake();
            }
        }));
        Self {
            fiber,
            shared,
            _marker: PhantomData,
        }
    }

    /// Queue the underlying fiber on `scheduler`.
    pub fn start(&self, scheduler: &Scheduler) -> Result<(), Error> {
        self.fiber.start(scheduler)
    }

    /// Forward cancellation to the fiber.
    pub fn cancel(&self) {
        self.fiber.cancel();
    }

    pub fn is_completed(&self) -> bool {
        self.fiber.is_completed()
    }

    /// The underlying fiber.
    pub fn fiber(&self) -> &Fiber {
        &self.fiber
    }

    /// Block until the fiber completes, then read the outcome.
    ///
    /// The scheduler runs on its own thread; calling this on the owner
    /// thread deadlocks, since the fiber can no longer be driven.
    pub fn wait(&self) -> Result<T, Error> {
        let mut done = self.shared.done.lock();
        while !*done {
            self.shared.completed.wait(&mut done);
        }
        drop(done);
        self.outcome()
            .unwrap_or(Err(Error::InvalidState("task signaled before completion")))
    }

    /// Like `wait`, bounded: `None` when the fiber is still live at the
    /// deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
        let mut done = self.shared.done.lock();
        if !*done {
            let _ = self.shared.completed.wait_for(&mut done, timeout);
        }
        if !*done {
            return None;
        }
        drop(done);
        self.outcome()
    }

    /// The terminal outcome, `None` while the fiber is live. Consumes the
    /// result on success.
    fn outcome(&self) -> Option<Result<T, Error>> {
        match self.fiber.status() {
            FiberStatus::RanToCompletion => Some(match self.fiber.take_result_as::<T>() {
                Some(v) => Ok(v),
                // bodies without a result still satisfy unit-typed tasks
                None => match (Box::new(()) as Box<dyn Any>).downcast::<T>() {
                    Ok(unit) => Ok(*unit),
                    Err(_) => Err(Error::InvalidState("task result type mismatch")),
                },
            }),
            FiberStatus::Canceled => Some(Err(Error::Canceled {
                token: self.fiber.token().clone(),
            })),
            FiberStatus::Faulted => Some(Err(self
                .fiber
                .error()
                .unwrap_or(Error::Fault("fault with no captured error".into())))),
            _ => None,
        }
    }
}

impl<T: 'static> Future for YieldableTask<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(out) = self.outcome() {
            return Poll::Ready(out);
        }
        *self.shared.waker.lock() = Some(cx.waker().clone());
        // the fiber may have completed between the check and the store
        if let Some(out) = self.outcome() {
            return Poll::Ready(out);
        }
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for YieldableTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YieldableTask")
            .field("fiber", &self.fiber)
            .finish()
    }
}
