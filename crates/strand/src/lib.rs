//! strand — cooperative fiber scheduler and task runtime.
//!
//! Many logical units of work (*fibers*) share a single OS thread by
//! explicitly yielding control. Each fiber body surrenders one
//! [`Instruction`] per step; a [`Scheduler`] bound to its construction
//! thread interprets the instruction and requeues, sleeps, parks, or
//! switches fibers accordingly. On top of that primitive sit a task-style
//! composition surface ([`YieldableTask`], [`Fiber::continue_with`],
//! [`when_all`], [`when_any`], [`delay`]), cooperative cancellation
//! ([`CancellationToken`]), and a [`SyncContext`] for foreign threads.
//!
//! # Execution model
//!
//! Single-threaded cooperative, per scheduler. A fiber suspends only at the
//! return of a step-visible value; there is no implicit suspension, and
//! blocking inside a body blocks the whole scheduler thread. Cross-thread
//! `queue` / `cancel` ride a lock-free queue plus a wake signal, so other
//! threads may submit work but never execute it.
//!
//! ```
//! use strand::{Scheduler, FiberFactory, Yield};
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new();
//! let factory = FiberFactory::new().scheduler(&scheduler);
//!
//! let fiber = factory
//!     .start_new(vec![Yield::pass(), Yield::result(42u32)].into_iter())
//!     .unwrap();
//!
//! // host-driven: one update per frame, with the frame clock
//! let mut now = Duration::ZERO;
//! while !fiber.is_completed() {
//!     scheduler.update(now).unwrap();
//!     now += Duration::from_millis(16);
//! }
//! assert_eq!(fiber.take_result_as::<u32>(), Some(42));
//! ```
//!
//! Hosts with their own frame loop call [`Scheduler::update`] with their
//! clock; everyone else blocks in [`Scheduler::run`].

mod cancel;
mod compose;
mod continuation;
mod current;
mod error;
mod factory;
mod fiber;
mod host;
mod instruction;
mod scheduler;
mod step;
mod sync;
mod sync_ctx;
mod task;

pub use cancel::CancellationToken;
pub use compose::{delay, when_all, when_any};
pub use continuation::ContinuationOptions;
pub use current::{current_fiber, current_scheduler};
pub use error::Error;
pub use factory::FiberFactory;
pub use fiber::{Fiber, FiberStatus};
pub use host::HostAdapter;
pub use instruction::Instruction;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use step::{from_fn, StepOutcome, StepSequence, Yield};
pub use sync_ctx::SyncContext;
pub use task::YieldableTask;

/// Opaque user payload: fiber results, foreign yields, and property-map
/// values.
pub type Value = Box<dyn std::any::Any + Send>;
