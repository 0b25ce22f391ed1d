//! The factory: canonical constructor surface capturing creation defaults.

use crate::cancel::CancellationToken;
use crate::continuation::ContinuationOptions;
use crate::current::current_scheduler;
use crate::error::Error;
use crate::fiber::Fiber;
use crate::instruction::Instruction;
use crate::scheduler::Scheduler;
use crate::step::StepSequence;

/// Creates fibers with captured defaults: a scheduler, a cancellation token,
/// and continuation options.
///
/// Without an explicit scheduler, `start_new_*` fall back to the scheduler
/// dispatching on the current thread, so fibers can spawn siblings from
/// inside their bodies.
#[derive(Clone, Debug)]
pub struct FiberFactory {
    scheduler: Option<Scheduler>,
    token: CancellationToken,
    options: ContinuationOptions,
}

impl Default for FiberFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FiberFactory {
    pub fn new() -> Self {
        Self {
            scheduler: None,
            token: CancellationToken::none(),
            options: ContinuationOptions::NONE,
        }
    }

    /// Capture a default scheduler for `start_new_*` and continuations.
    pub fn scheduler(mut self, scheduler: &Scheduler) -> Self {
        self.scheduler = Some(scheduler.clone());
        self
    }

    /// Capture a default cancellation token for created fibers.
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Capture default continuation options for [`FiberFactory::continue_with`].
    pub fn continuation_options(mut self, options: ContinuationOptions) -> Self {
        self.options = options;
        self
    }

    // -------------------------------------------------------------------------
    // From step sequences
    // -------------------------------------------------------------------------

    /// An unstarted fiber driven by `seq`.
    pub fn create(&self, seq: impl StepSequence + 'static) -> Fiber {
        Fiber::with_token(seq, self.token.clone())
    }

    /// Create and queue a fiber driven by `seq`.
    pub fn start_new(&self, seq: impl StepSequence + 'static) -> Result<Fiber, Error> {
        let fiber = self.create(seq);
        fiber.start(&self.target_scheduler()?)?;
        Ok(fiber)
    }

    // -------------------------------------------------------------------------
    // From thunks returning instructions
    // -------------------------------------------------------------------------

    /// An unstarted fiber whose body is a thunk invoked once per step.
    pub fn create_thunk<F>(&self, f: F) -> Fiber
    where
        F: FnMut() -> Result<Instruction, Error> + Send + 'static,
    {
        Fiber::from_thunk(f, self.token.clone())
    }

    pub fn start_new_thunk<F>(&self, f: F) -> Result<Fiber, Error>
    where
        F: FnMut() -> Result<Instruction, Error> + Send + 'static,
    {
        let fiber = self.create_thunk(f);
        fiber.start(&self.target_scheduler()?)?;
        Ok(fiber)
    }

    // -------------------------------------------------------------------------
    // From plain actions
    // -------------------------------------------------------------------------

    /// An unstarted fiber that runs `f` once and stops.
    pub fn create_action<F>(&self, f: F) -> Fiber
    where
        F: FnOnce() + Send + 'static,
    {
        Fiber::from_action(
            move || {
                f();
                Ok(())
            },
            self.token.clone(),
        )
    }

    pub fn start_new_action<F>(&self, f: F) -> Result<Fiber, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let fiber = self.create_action(f);
        fiber.start(&self.target_scheduler()?)?;
        Ok(fiber)
    }

    /// The one-argument form: `f` receives `state` when the fiber runs.
    pub fn create_action_with<S, F>(&self, state: S, f: F) -> Fiber
    where
        S: Send + 'static,
        F: FnOnce(S) + Send + 'static,
    {
        self.create_action(move || f(state))
    }

    pub fn start_new_action_with<S, F>(&self, state: S, f: F) -> Result<Fiber, Error>
    where
        S: Send + 'static,
        F: FnOnce(S) + Send + 'static,
    {
        let fiber = self.create_action_with(state, f);
        fiber.start(&self.target_scheduler()?)?;
        Ok(fiber)
    }

    // -------------------------------------------------------------------------
    // Continuations with factory defaults
    // -------------------------------------------------------------------------

    /// `antecedent.continue_with` using this factory's options, token, and
    /// scheduler.
    pub fn continue_with<F>(&self, antecedent: &Fiber, f: F) -> Result<Fiber, Error>
    where
        F: FnOnce(Fiber) -> Result<(), Error> + Send + 'static,
    {
        antecedent.continue_with(f, self.options, self.token.clone(), self.scheduler.as_ref())
    }

    fn target_scheduler(&self) -> Result<Scheduler, Error> {
        self.scheduler
            .clone()
            .or_else(current_scheduler)
            .ok_or(Error::InvalidState(
                "factory has no scheduler and none is current",
            ))
    }
}
