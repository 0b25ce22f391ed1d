//! Wait-set helpers built on the fiber primitive.
//!
//! `when_all`, `when_any`, and `delay` are ordinary supervisor fibers: their
//! bodies poll conditions between yields and have no privileged access to
//! scheduler internals. Timeouts read the scheduler's current-time marker,
//! not the wall clock, so a host driving `update` with synthetic time gets
//! deterministic behavior.

use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::current::current_scheduler;
use crate::error::Error;
use crate::fiber::{Fiber, FiberStatus};
use crate::instruction::Instruction;
use crate::scheduler::Scheduler;

/// A fiber that completes once `duration` of scheduler time has passed since
/// its first step, or cancels when `token` signals.
///
/// A zero duration completes on the first step after creation.
pub fn delay(
    duration: Duration,
    token: CancellationToken,
    scheduler: &Scheduler,
) -> Result<Fiber, Error> {
    let supervisor_token = token.clone();
    let mut begin: Option<Duration> = None;
    let fiber = Fiber::from_thunk(
        move || {
            supervisor_token.err_if_canceled()?;
            let now = clock()?;
            let begin = *begin.get_or_insert(now);
            if now - begin >= duration {
                Ok(Instruction::Stop)
            } else {
                Ok(Instruction::YieldToAny)
            }
        },
        token,
    );
    fiber.start(scheduler)?;
    Ok(fiber)
}

/// A fiber that completes successfully (result `true`) once every member of
/// `fibers` has terminated.
///
/// Raises the token's cancellation when `token` signals, a timeout fault
/// when `timeout` passes first, and an aggregate of the members' errors when
/// all have terminated but some ended faulted or canceled.
///
/// An empty set completes immediately, without touching the scheduler.
pub fn when_all(
    fibers: Vec<Fiber>,
    timeout: Option<Duration>,
    token: CancellationToken,
    scheduler: &Scheduler,
) -> Result<Fiber, Error> {
    if fibers.is_empty() {
        return Ok(Fiber::completed_with(Some(Box::new(true))));
    }

    let supervisor_token = token.clone();
    let mut begin: Option<Duration> = None;
    let fiber = Fiber::from_thunk(
        move || {
            supervisor_token.err_if_canceled()?;
            let now = clock()?;
            let begin = *begin.get_or_insert(now);
            if timeout.is_some_and(|t| now - begin >= t) {
                return Err(Error::Timeout);
            }
            if !fibers.iter().all(Fiber::is_completed) {
                return Ok(Instruction::YieldToAny);
            }
            let errors: Vec<Error> = fibers
                .iter()
                .filter_map(|f| match f.status() {
                    FiberStatus::Faulted => {
                        Some(f.error().unwrap_or(Error::Fault("unknown fault".into())))
                    }
                    FiberStatus::Canceled => Some(Error::Canceled {
                        token: f.token().clone(),
                    }),
                    _ => None,
                })
                .collect();
            if errors.is_empty() {
                Ok(Instruction::StopWith(Box::new(true)))
            } else {
                Err(Error::Aggregate(errors))
            }
        },
        token,
    );
    fiber.start(scheduler)?;
    Ok(fiber)
}

/// A fiber whose result is the first member of `fibers` to terminate,
/// whatever that member's outcome. Losers propagate nothing.
///
/// Raises the token's cancellation when `token` signals and a timeout fault
/// when `timeout` passes first. An empty set completes immediately with no
/// result.
pub fn when_any(
    fibers: Vec<Fiber>,
    timeout: Option<Duration>,
    token: CancellationToken,
    scheduler: &Scheduler,
) -> Result<Fiber, Error> {
    if fibers.is_empty() {
        return Ok(Fiber::completed_with(None));
    }

    let supervisor_token = token.clone();
    let mut begin: Option<Duration> = None;
    let fiber = Fiber::from_thunk(
        move || {
            supervisor_token.err_if_canceled()?;
            let now = clock()?;
            let begin = *begin.get_or_insert(now);
            if timeout.is_some_and(|t| now - begin >= t) {
                return Err(Error::Timeout);
            }
            match fibers.iter().find(|f| f.is_completed()) {
                Some(winner) => Ok(Instruction::StopWith(Box::new(winner.clone()))),
                None => Ok(Instruction::YieldToAny),
            }
        },
        token,
    );
    fiber.start(scheduler)?;
    Ok(fiber)
}

/// Supervisor bodies run on the scheduler thread; the dispatching scheduler
/// is always current there.
fn clock() -> Result<Duration, Error> {
    current_scheduler()
        .map(|s| s.now())
        .ok_or(Error::InvalidState("supervisor stepped outside a scheduler"))
}
