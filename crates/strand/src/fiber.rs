//! The fiber: a cooperatively-scheduled unit of execution.
//!
//! A `Fiber` is a cheap cloneable handle to shared state. The body advances
//! one observable instruction at a time through [`Fiber::step`], which only
//! the owning scheduler's thread may call. Status transitions go through a
//! single atomic status word so that concurrent start / cancel / cross-thread
//! queue requests race safely.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::cancel::CancellationToken;
use crate::continuation::{Continuation, ContinuationOptions};
use crate::current;
use crate::error::Error;
use crate::instruction::Instruction;
use crate::scheduler::Scheduler;
use crate::step::{StepOutcome, StepSequence, Yield};
use crate::sync::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use crate::Value;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Status word
// =============================================================================

/// Lifecycle states of a fiber. The last three are terminal; together they
/// are "completed".
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Constructed, not yet handed to a scheduler.
    Created = 0,
    /// A continuation waiting for its antecedent's terminal transition.
    WaitingForActivation = 1,
    /// Queued, waiting to be picked by the dispatch loop for the first time.
    WaitingToRun = 2,
    /// Started. Stays `Running` while parked on a queue between steps.
    Running = 3,
    /// Finished successfully.
    RanToCompletion = 4,
    /// Finished by cancellation.
    Canceled = 5,
    /// Finished by an unhandled body error.
    Faulted = 6,
}

impl FiberStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => FiberStatus::Created,
            1 => FiberStatus::WaitingForActivation,
            2 => FiberStatus::WaitingToRun,
            3 => FiberStatus::Running,
            4 => FiberStatus::RanToCompletion,
            5 => FiberStatus::Canceled,
            _ => FiberStatus::Faulted,
        }
    }

    /// True for the three terminal states.
    pub fn is_completed(self) -> bool {
        matches!(
            self,
            FiberStatus::RanToCompletion | FiberStatus::Canceled | FiberStatus::Faulted
        )
    }

    /// True for the states a fiber may be started from.
    pub fn is_startable(self) -> bool {
        matches!(
            self,
            FiberStatus::Created | FiberStatus::WaitingForActivation
        )
    }
}

impl fmt::Display for FiberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Body
// =============================================================================

/// The body slot: exactly one of a lazy sequence, a repeatable thunk
/// producing instructions, or a one-shot action. State-carrying forms
/// capture their state in the closure.
pub(crate) enum Body {
    Sequence(Box<dyn StepSequence>),
    Thunk(Box<dyn FnMut() -> Result<Instruction, Error> + Send>),
    Action(Box<dyn FnOnce() -> Result<(), Error> + Send>),
}

/// Execution state touched only by the scheduler thread during `step`.
struct ExecState {
    body: Option<Body>,
    /// Pending sub-sequences, innermost last.
    nested: Vec<Box<dyn StepSequence>>,
    /// Result latched by `StopWith`, applied at the terminal transition.
    latched: Option<Value>,
}

type CompletionWaker = Box<dyn FnOnce(&Fiber) + Send>;

/// Outcome of a single `step` call, as seen by the scheduler.
pub(crate) enum StepResult {
    /// A non-terminating instruction to interpret.
    Instruction(Instruction),
    /// The fiber reached a terminal state during this step.
    Completed,
}

// =============================================================================
// Fiber
// =============================================================================

struct Inner {
    id: u64,
    status: AtomicU8,
    cancel_requested: AtomicBool,
    /// True while the fiber sits in a ready or sleep queue. Guards against
    /// double-enqueueing, which would double-step the fiber.
    parked: AtomicBool,
    token: CancellationToken,
    antecedent: Option<Fiber>,
    /// Bound exactly once, at the first transition out of a startable state.
    scheduler: OnceLock<Scheduler>,
    exec: Mutex<ExecState>,
    result: Mutex<Option<Value>>,
    error: Mutex<Option<Error>>,
    /// `None` once drained; drained exactly once, at the terminal transition.
    wakers: Mutex<Option<Vec<CompletionWaker>>>,
    /// `None` once drained; drained exactly once, in enqueue order.
    continuations: Mutex<Option<Vec<Continuation>>>,
    /// String-keyed auxiliary values for host adapters.
    properties: Mutex<FxHashMap<String, Value>>,
}

/// Handle to a cooperatively-scheduled unit of execution.
#[derive(Clone)]
pub struct Fiber {
    inner: Arc<Inner>,
}

impl Fiber {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// A fiber driven by a step sequence, with the neutral token.
    pub fn new(seq: impl StepSequence + 'static) -> Fiber {
        Self::with_token(seq, CancellationToken::none())
    }

    /// A fiber driven by a step sequence, observing `token`.
    pub fn with_token(seq: impl StepSequence + 'static, token: CancellationToken) -> Fiber {
        Self::from_body(Body::Sequence(Box::new(seq)), token, None, FiberStatus::Created)
    }

    /// A fiber whose body is a thunk invoked once per step, each call
    /// producing the next instruction. The thunk ends the fiber by returning
    /// `Stop` or `StopWith`.
    pub fn from_thunk<F>(f: F, token: CancellationToken) -> Fiber
    where
        F: FnMut() -> Result<Instruction, Error> + Send + 'static,
    {
        Self::from_body(Body::Thunk(Box::new(f)), token, None, FiberStatus::Created)
    }

    /// A fiber whose body runs once and stops.
    pub fn from_action<F>(f: F, token: CancellationToken) -> Fiber
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        Self::from_body(Body::Action(Box::new(f)), token, None, FiberStatus::Created)
    }

    pub(crate) fn from_body(
        body: Body,
        token: CancellationToken,
        antecedent: Option<Fiber>,
        status: FiberStatus,
    ) -> Fiber {
        Fiber {
            inner: Arc::new(Inner {
                id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
                status: AtomicU8::new(status as u8),
                cancel_requested: AtomicBool::new(false),
                parked: AtomicBool::new(false),
                token,
                antecedent,
                scheduler: OnceLock::new(),
                exec: Mutex::new(ExecState {
                    body: Some(body),
                    nested: Vec::new(),
                    latched: None,
                }),
                result: Mutex::new(None),
                error: Mutex::new(None),
                wakers: Mutex::new(Some(Vec::new())),
                continuations: Mutex::new(Some(Vec::new())),
                properties: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// An already ran-to-completion fiber carrying `result`. Used by the
    /// wait-set helpers for their trivially-complete cases.
    pub(crate) fn completed_with(result: Option<Value>) -> Fiber {
        let fiber = Self::from_body(
            Body::Action(Box::new(|| Ok(()))),
            CancellationToken::none(),
            None,
            FiberStatus::Created,
        );
        if let Some(v) = result {
            *fiber.inner.result.lock() = Some(v);
        }
        fiber.inner.status.store(FiberStatus::RanToCompletion as u8, Ordering::Release);
        *fiber.inner.wakers.lock() = None;
        *fiber.inner.continuations.lock() = None;
        fiber
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Monotonic per-process fiber id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn status(&self) -> FiberStatus {
        FiberStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    /// True once the fiber reached a terminal state.
    pub fn is_completed(&self) -> bool {
        self.status().is_completed()
    }

    /// The cancellation token captured at construction.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// The fiber this one continues from, if it is a continuation.
    pub fn antecedent(&self) -> Option<&Fiber> {
        self.inner.antecedent.as_ref()
    }

    /// The scheduler this fiber is bound to, once started.
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.inner.scheduler.get().cloned()
    }

    /// The error captured when the fiber faulted. Empty for canceled and
    /// successful fibers.
    pub fn error(&self) -> Option<Error> {
        self.inner.error.lock().clone()
    }

    /// Take the result set by a `StopWith`-terminated body. One-shot: the
    /// first taker gets the value.
    pub fn take_result(&self) -> Option<Value> {
        self.inner.result.lock().take()
    }

    /// Take the result downcast to `T`. On a type mismatch the value is put
    /// back and `None` is returned.
    pub fn take_result_as<T: 'static>(&self) -> Option<T> {
        let mut slot = self.inner.result.lock();
        let value = slot.take()?;
        match value.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(v) => {
                *slot = Some(v);
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    /// Bind to `scheduler` and enter the ready queue.
    ///
    /// Fails with `InvalidState` when the fiber is not in a startable state
    /// or is already bound elsewhere.
    pub fn start(&self, scheduler: &Scheduler) -> Result<(), Error> {
        if !self.status().is_startable() {
            return Err(Error::InvalidState("fiber already started"));
        }
        scheduler.queue(self.clone())
    }

    /// Request cancellation. A fiber that has not started goes straight to
    /// `Canceled` without running any body code; a running fiber observes the
    /// request at its next step. Idempotent; a no-op on completed fibers.
    pub fn cancel(&self) {
        loop {
            let cur = self.status();
            if cur.is_completed() {
                return;
            }
            if cur == FiberStatus::Running {
                self.inner.cancel_requested.store(true, Ordering::Release);
                // rouse the run loop so sleeping fibers observe promptly
                if let Some(s) = self.inner.scheduler.get() {
                    s.signal();
                }
                return;
            }
            if self.try_complete_from(cur, FiberStatus::Canceled, None) {
                return;
            }
            // lost a race with start or another cancel; re-read and retry
        }
    }

    /// The instruction a body yields to wait for this fiber's completion.
    pub fn wait_until_complete(&self) -> Instruction {
        Instruction::YieldUntil(self.clone())
    }

    // -------------------------------------------------------------------------
    // Continuations
    // -------------------------------------------------------------------------

    /// Create a continuation fiber gated on this fiber's terminal transition.
    ///
    /// The continuation starts in `WaitingForActivation`; when this fiber
    /// completes it is either queued or canceled-without-running according to
    /// `options`. It runs on `scheduler` when given, otherwise on this
    /// fiber's scheduler. The body receives the antecedent handle.
    pub fn continue_with<F>(
        &self,
        f: F,
        options: ContinuationOptions,
        token: CancellationToken,
        scheduler: Option<&Scheduler>,
    ) -> Result<Fiber, Error>
    where
        F: FnOnce(Fiber) -> Result<(), Error> + Send + 'static,
    {
        options.validate()?;

        let antecedent = self.clone();
        let body = Body::Action(Box::new(move || f(antecedent)));
        let fiber = Fiber::from_body(
            body,
            token,
            Some(self.clone()),
            FiberStatus::WaitingForActivation,
        );
        let record = Continuation::new(fiber.clone(), options, scheduler.cloned());

        // Enqueue, or resolve immediately when the antecedent already
        // completed and the queue has been drained.
        let immediate = {
            let mut slot = self.inner.continuations.lock();
            match slot.as_mut() {
                Some(list) => {
                    list.push(record);
                    None
                }
                None => Some(record),
            }
        };
        if let Some(record) = immediate {
            record.resolve(self.status(), self);
        }
        Ok(fiber)
    }

    /// Run `f` with this fiber when it completes; immediately if it already
    /// has. Fires exactly once, on whichever thread drives the terminal
    /// transition.
    pub(crate) fn on_completed(&self, f: CompletionWaker) {
        let immediate = {
            let mut slot = self.inner.wakers.lock();
            match slot.as_mut() {
                Some(list) => {
                    list.push(f);
                    None
                }
                None => Some(f),
            }
        };
        if let Some(f) = immediate {
            f(self);
        }
    }

    // -------------------------------------------------------------------------
    // Property map (host adapter auxiliary handles)
    // -------------------------------------------------------------------------

    /// Associate an opaque value with `key`. Host adapters use this to attach
    /// engine-native handles; writable only on the scheduler thread.
    pub fn set_property(&self, key: impl Into<String>, value: impl std::any::Any + Send) {
        self.inner.properties.lock().insert(key.into(), Box::new(value));
    }

    pub fn take_property(&self, key: &str) -> Option<Value> {
        self.inner.properties.lock().remove(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.inner.properties.lock().contains_key(key)
    }

    // -------------------------------------------------------------------------
    // Status word plumbing
    // -------------------------------------------------------------------------

    pub(crate) fn try_transition(&self, from: FiberStatus, to: FiberStatus) -> bool {
        self.inner
            .status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn bind(&self, scheduler: &Scheduler) -> Result<(), Error> {
        let bound = self.inner.scheduler.get_or_init(|| scheduler.clone());
        if bound == scheduler {
            Ok(())
        } else {
            Err(Error::InvalidState("fiber is bound to a different scheduler"))
        }
    }

    pub(crate) fn cancel_observed(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire) || self.inner.token.is_canceled()
    }

    /// Claim the queue slot. False when the fiber is already parked in a
    /// ready or sleep queue.
    pub(crate) fn try_park(&self) -> bool {
        !self.inner.parked.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn unpark(&self) {
        self.inner.parked.store(false, Ordering::Release);
    }

    /// CAS `from` → terminal, then run the completion protocol. Returns false
    /// when the status word moved underneath us.
    fn try_complete_from(
        &self,
        from: FiberStatus,
        terminal: FiberStatus,
        error: Option<Error>,
    ) -> bool {
        debug_assert!(terminal.is_completed());
        if !self.try_transition(from, terminal) {
            return false;
        }
        self.after_terminal(terminal, error);
        true
    }

    /// CAS whatever non-terminal state holds → terminal. Exactly one caller
    /// wins; everyone else sees `false`.
    pub(crate) fn complete(&self, terminal: FiberStatus, error: Option<Error>) -> bool {
        loop {
            let cur = self.status();
            if cur.is_completed() {
                return false;
            }
            if self.try_complete_from(cur, terminal, error.clone()) {
                return true;
            }
        }
    }

    /// The completion protocol: latch outcome, drop the body, fire wakers,
    /// drain continuations. Runs exactly once per fiber.
    fn after_terminal(&self, terminal: FiberStatus, error: Option<Error>) {
        {
            let mut exec = self.inner.exec.lock();
            if terminal == FiberStatus::RanToCompletion {
                if let Some(v) = exec.latched.take() {
                    *self.inner.result.lock() = Some(v);
                }
            }
            // drop body and nesting eagerly; captured fibers and closures go now
            exec.body = None;
            exec.nested.clear();
            exec.latched = None;
        }

        if let Some(err) = error {
            *self.inner.error.lock() = Some(err.clone());
            if terminal == FiberStatus::Faulted {
                match self.inner.scheduler.get() {
                    Some(s) => s.report_fault(self, &err),
                    None => log::error!("fiber {} faulted unbound: {}", self.inner.id, err),
                }
            }
        }

        log::trace!("fiber {} -> {}", self.inner.id, terminal);

        let wakers = self.inner.wakers.lock().take();
        if let Some(wakers) = wakers {
            for w in wakers {
                w(self);
            }
        }

        let continuations = self.inner.continuations.lock().take();
        if let Some(continuations) = continuations {
            for c in continuations {
                c.resolve(terminal, self);
            }
        }
    }

    // -------------------------------------------------------------------------
    // The execution driver
    // -------------------------------------------------------------------------

    /// Advance by exactly one observable instruction.
    ///
    /// Owner-thread only, status must be `Running`. Errors raised by the body
    /// (including panics) terminate only this fiber; a cancellation carrying
    /// the fiber's own token ends it as `Canceled`, everything else as
    /// `Faulted`.
    pub(crate) fn step(&self) -> Result<StepResult, Error> {
        let scheduler = self
            .inner
            .scheduler
            .get()
            .cloned()
            .ok_or(Error::InvalidState("step on an unbound fiber"))?;
        if !scheduler.on_owner_thread() {
            return Err(Error::InvalidState("step off the scheduler's owner thread"));
        }
        if self.status() != FiberStatus::Running {
            return Err(Error::InvalidState("step on a fiber that is not running"));
        }

        let _slot = current::enter_fiber(self);

        // A concurrent cancel observed at step entry always wins.
        if self.cancel_observed() {
            self.complete(FiberStatus::Canceled, None);
            return Ok(StepResult::Completed);
        }

        // One move of the innermost body; the exec lock is scoped to the
        // move and free again before any terminal transition runs.
        let advanced = match self.inner.exec.try_lock() {
            Some(mut exec) => self.advance(&mut exec),
            // a yield chain looped back into a fiber that is mid-step
            None => return Err(Error::InvalidState("fiber is already mid-step")),
        };
        match advanced {
            Ok(Advance::Instruction(instr)) => Ok(StepResult::Instruction(instr)),
            Ok(Advance::Finished) => {
                self.complete(FiberStatus::RanToCompletion, None);
                Ok(StepResult::Completed)
            }
            Err(e) => {
                if e.is_cancellation_of(&self.inner.token) {
                    self.complete(FiberStatus::Canceled, None);
                } else {
                    self.complete(FiberStatus::Faulted, Some(e));
                }
                Ok(StepResult::Completed)
            }
        }
    }

    /// Execute one move of the innermost body and interpret the produced
    /// value.
    fn advance(&self, exec: &mut ExecState) -> Result<Advance, Error> {
        loop {
            // Innermost nested sequence first.
            if let Some(seq) = exec.nested.last_mut() {
                match body_call(|| seq.step())? {
                    StepOutcome::Done => {
                        exec.nested.pop();
                        continue;
                    }
                    StepOutcome::Yielded(y) => match self.interpret(exec, y)? {
                        None => continue,
                        Some(Instruction::Stop) => {
                            // a bare Stop only ends this nesting level
                            exec.nested.pop();
                            continue;
                        }
                        Some(instr) => return self.emit(exec, instr),
                    },
                }
            }

            // Primary body.
            match exec.body.as_mut() {
                None => return Ok(Advance::Finished),
                Some(Body::Sequence(seq)) => match body_call(|| seq.step())? {
                    StepOutcome::Done => {
                        exec.body = None;
                        return Ok(Advance::Finished);
                    }
                    StepOutcome::Yielded(y) => match self.interpret(exec, y)? {
                        None => continue,
                        Some(instr) => return self.emit(exec, instr),
                    },
                },
                Some(Body::Thunk(f)) => {
                    let instr = body_call(|| f())?;
                    self.validate_instruction(&instr)?;
                    return self.emit(exec, instr);
                }
                Some(Body::Action(_)) => {
                    let Some(Body::Action(f)) = exec.body.take() else {
                        unreachable!()
                    };
                    body_call(f)?;
                    return Ok(Advance::Finished);
                }
            }
        }
    }

    /// Map a yielded value onto an instruction. `Ok(None)` means a nested
    /// sequence was pushed and the move continues without an extra tick.
    fn interpret(
        &self,
        exec: &mut ExecState,
        y: Yield,
    ) -> Result<Option<Instruction>, Error> {
        match y {
            Yield::Instruction(instr) => {
                self.validate_instruction(&instr)?;
                Ok(Some(instr))
            }
            Yield::Nested(seq) => {
                exec.nested.push(seq);
                Ok(None)
            }
            Yield::Fiber(f) => {
                let instr = Instruction::YieldUntil(f);
                self.validate_instruction(&instr)?;
                Ok(Some(instr))
            }
            Yield::Foreign(v) => Ok(Some(Instruction::Foreign(v))),
        }
    }

    /// Turn a surfaced instruction into the step's outcome, latching results
    /// and collapsing the terminating variants.
    fn emit(&self, exec: &mut ExecState, instr: Instruction) -> Result<Advance, Error> {
        match instr {
            Instruction::Stop => {
                exec.body = None;
                exec.nested.clear();
                Ok(Advance::Finished)
            }
            Instruction::StopWith(v) => {
                exec.latched = Some(v);
                exec.body = None;
                exec.nested.clear();
                Ok(Advance::Finished)
            }
            other => Ok(Advance::Instruction(other)),
        }
    }

    /// Scheduler-affinity validation for targeted yields.
    fn validate_instruction(&self, instr: &Instruction) -> Result<(), Error> {
        match instr {
            Instruction::YieldUntil(target) => {
                if target == self {
                    return Err(Error::InvalidState("fiber cannot wait on itself"));
                }
                self.validate_affinity(target)
            }
            Instruction::YieldTo(target) => {
                if target == self {
                    return Err(Error::InvalidState("fiber cannot yield to itself"));
                }
                if target.is_completed() {
                    return Err(Error::InvalidState("yield to a completed fiber"));
                }
                self.validate_affinity(target)
            }
            _ => Ok(()),
        }
    }

    fn validate_affinity(&self, target: &Fiber) -> Result<(), Error> {
        match (self.inner.scheduler.get(), target.inner.scheduler.get()) {
            (Some(a), Some(b)) if a == b => Ok(()),
            _ => Err(Error::InvalidState(
                "yield target is not bound to the same scheduler",
            )),
        }
    }
}

enum Advance {
    Instruction(Instruction),
    Finished,
}

/// Run one body move, converting panics into faults.
fn body_call<T>(f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(Error::from_panic(payload)))
}

impl PartialEq for Fiber {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Fiber {}

impl std::hash::Hash for Fiber {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = Fiber::from_action(|| Ok(()), CancellationToken::none());
        let b = Fiber::from_action(|| Ok(()), CancellationToken::none());
        assert_ne!(a.id(), b.id());
        assert!(b.id() > a.id());
    }

    #[test]
    fn new_fiber_starts_created() {
        let f = Fiber::new(std::iter::empty::<Yield>());
        assert_eq!(f.status(), FiberStatus::Created);
        assert!(!f.is_completed());
        assert!(f.scheduler().is_none());
        assert!(f.error().is_none());
    }

    #[test]
    fn cancel_before_start_runs_no_body() {
        let f = Fiber::from_action(|| panic!("must not run"), CancellationToken::none());
        f.cancel();
        assert_eq!(f.status(), FiberStatus::Canceled);
        assert!(f.error().is_none());

        // idempotent
        f.cancel();
        assert_eq!(f.status(), FiberStatus::Canceled);
    }

    #[test]
    fn completion_wakers_fire_immediately_on_completed_fibers() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let f = Fiber::from_action(|| Ok(()), CancellationToken::none());
        f.cancel();

        let fired = Arc::new(AtomicBool::new(false));
        let observed = fired.clone();
        f.on_completed(Box::new(move |fb| {
            assert_eq!(fb.status(), FiberStatus::Canceled);
            observed.store(true, Ordering::SeqCst);
        }));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn completed_with_carries_result() {
        let f = Fiber::completed_with(Some(Box::new(41u32)));
        assert_eq!(f.status(), FiberStatus::RanToCompletion);
        assert_eq!(f.take_result_as::<u32>(), Some(41));
        // one-shot
        assert!(f.take_result().is_none());
    }

    #[test]
    fn take_result_as_restores_on_type_mismatch() {
        let f = Fiber::completed_with(Some(Box::new(String::from("x"))));
        assert_eq!(f.take_result_as::<u32>(), None);
        assert_eq!(f.take_result_as::<String>(), Some(String::from("x")));
    }

    #[test]
    fn property_map_round_trip() {
        let f = Fiber::new(std::iter::empty::<Yield>());
        assert!(!f.has_property("native"));
        f.set_property("native", 7u64);
        assert!(f.has_property("native"));
        let v = f.take_property("native").unwrap();
        assert_eq!(*v.downcast::<u64>().unwrap(), 7);
        assert!(!f.has_property("native"));
    }

    #[test]
    fn step_requires_binding() {
        let f = Fiber::new(std::iter::empty::<Yield>());
        assert!(matches!(f.step(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn statuses_classify() {
        assert!(FiberStatus::Created.is_startable());
        assert!(FiberStatus::WaitingForActivation.is_startable());
        assert!(!FiberStatus::Running.is_startable());
        assert!(FiberStatus::Canceled.is_completed());
        assert!(!FiberStatus::WaitingToRun.is_completed());
    }
}
