//! Continuation gating: which antecedent outcomes activate a continuation,
//! and the record resolved at the antecedent's terminal transition.

use crate::error::Error;
use crate::fiber::{Fiber, FiberStatus};
use crate::scheduler::Scheduler;

// =============================================================================
// Options
// =============================================================================

/// Flag set gating continuation activation on the antecedent's terminal
/// state.
///
/// The `ONLY_ON_*` constants are compositions of the two complementary
/// suppressions, so contradictory combinations (`ONLY_ON_RAN_TO_COMPLETION |
/// NOT_ON_RAN_TO_COMPLETION`) collapse to "suppressed on every outcome" and
/// are rejected by [`ContinuationOptions::validate`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ContinuationOptions(u8);

impl ContinuationOptions {
    const SUPPRESS_RAN_TO_COMPLETION: u8 = 1 << 0;
    const SUPPRESS_FAULTED: u8 = 1 << 1;
    const SUPPRESS_CANCELED: u8 = 1 << 2;
    const ALL: u8 =
        Self::SUPPRESS_RAN_TO_COMPLETION | Self::SUPPRESS_FAULTED | Self::SUPPRESS_CANCELED;

    /// Always activate.
    pub const NONE: Self = Self(0);
    pub const NOT_ON_RAN_TO_COMPLETION: Self = Self(Self::SUPPRESS_RAN_TO_COMPLETION);
    pub const NOT_ON_FAULTED: Self = Self(Self::SUPPRESS_FAULTED);
    pub const NOT_ON_CANCELED: Self = Self(Self::SUPPRESS_CANCELED);
    pub const ONLY_ON_RAN_TO_COMPLETION: Self =
        Self(Self::SUPPRESS_FAULTED | Self::SUPPRESS_CANCELED);
    pub const ONLY_ON_FAULTED: Self =
        Self(Self::SUPPRESS_RAN_TO_COMPLETION | Self::SUPPRESS_CANCELED);
    pub const ONLY_ON_CANCELED: Self =
        Self(Self::SUPPRESS_RAN_TO_COMPLETION | Self::SUPPRESS_FAULTED);

    /// Reject combinations that suppress every outcome.
    pub fn validate(self) -> Result<(), Error> {
        if self.0 & Self::ALL == Self::ALL {
            Err(Error::InvalidState(
                "continuation options suppress every antecedent outcome",
            ))
        } else {
            Ok(())
        }
    }

    /// Does a continuation with these options run when its antecedent ended
    /// in `status`?
    pub fn activates_on(self, status: FiberStatus) -> bool {
        let bit = match status {
            FiberStatus::RanToCompletion => Self::SUPPRESS_RAN_TO_COMPLETION,
            FiberStatus::Faulted => Self::SUPPRESS_FAULTED,
            FiberStatus::Canceled => Self::SUPPRESS_CANCELED,
            // non-terminal states never resolve continuations
            _ => return false,
        };
        self.0 & bit == 0
    }
}

impl std::ops::BitOr for ContinuationOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for ContinuationOptions {
    fn default() -> Self {
        Self::NONE
    }
}

// =============================================================================
// Record
// =============================================================================

/// A queued continuation, resolved exactly once when the antecedent reaches
/// a terminal state.
pub(crate) struct Continuation {
    fiber: Fiber,
    options: ContinuationOptions,
    /// Target scheduler; falls back to the antecedent's at resolution.
    scheduler: Option<Scheduler>,
}

impl Continuation {
    pub(crate) fn new(fiber: Fiber, options: ContinuationOptions, scheduler: Option<Scheduler>) -> Self {
        Self {
            fiber,
            options,
            scheduler,
        }
    }

    /// Activate or cancel-without-running, based on the antecedent's
    /// terminal status.
    pub(crate) fn resolve(self, antecedent_status: FiberStatus, antecedent: &Fiber) {
        if !self.options.activates_on(antecedent_status) {
            // Suppressed: the continuation completes canceled, body unrun.
            self.fiber.complete(FiberStatus::Canceled, None);
            return;
        }
        if !self
            .fiber
            .try_transition(FiberStatus::WaitingForActivation, FiberStatus::WaitingToRun)
        {
            // externally canceled before the antecedent finished
            return;
        }
        let scheduler = self.scheduler.or_else(|| antecedent.scheduler());
        match scheduler {
            Some(s) => {
                if let Err(e) = s.queue(self.fiber.clone()) {
                    self.fiber.complete(FiberStatus::Faulted, Some(e));
                }
            }
            None => {
                self.fiber.complete(
                    FiberStatus::Faulted,
                    Some(Error::InvalidState("continuation has no scheduler to run on")),
                );
            }
        }
    }
}
