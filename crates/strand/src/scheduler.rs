//! The scheduler: single-threaded cooperative dispatcher.
//!
//! A scheduler owns exactly one OS thread (the thread that created it). All
//! fiber bodies, instruction interpretation, and queue mutations happen
//! there. Cross-thread `queue` and `cancel` ride a lock-free remote queue
//! paired with an edge-triggered wake flag and a thread unpark, so the
//! blocking [`Scheduler::run`] loop returns promptly.
//!
//! The unit of progress is [`Scheduler::update`]: one pass over the ready
//! queue (fibers requeued during the pass run on the *next* update) followed
//! by a wake scan of the sleep queue. Hosts that own their own frame loop
//! call `update(now)` directly; everyone else uses `run`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cancel::CancellationToken;
use crate::current;
use crate::error::Error;
use crate::fiber::{Fiber, FiberStatus, StepResult};
use crate::host::HostAdapter;
use crate::instruction::Instruction;
use crate::sync::{AtomicBool, AtomicU64, Ordering, RemoteQueue};

/// How long an idle `run` loop sleeps at most before re-checking its exit
/// conditions. Keeps cancellation responsive even with no wake signal.
const IDLE_PARK: Duration = Duration::from_millis(10);

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler construction options.
pub struct SchedulerConfig {
    /// Permit owner-thread `queue` calls to execute the fiber inline.
    pub allow_inlining: bool,
    /// Recursion cap for inline execution and yield-to chains; past the cap
    /// fibers are enqueued instead.
    pub max_inline_depth: usize,
    /// Default cadence for `run` invocations that pass `0.0`. `0.0` runs
    /// updates back-to-back whenever work is available.
    pub updates_per_second: f64,
    /// Receiver for foreign yields. Without one, foreign payloads are
    /// dropped and the fiber is requeued.
    pub host: Option<Arc<dyn HostAdapter>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            allow_inlining: true,
            max_inline_depth: 10,
            updates_per_second: 0.0,
            host: None,
        }
    }
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("allow_inlining", &self.allow_inlining)
            .field("max_inline_depth", &self.max_inline_depth)
            .field("updates_per_second", &self.updates_per_second)
            .field("host", &self.host.is_some())
            .finish()
    }
}

// =============================================================================
// Queues
// =============================================================================

struct SleepEntry {
    fiber: Fiber,
    wake_at: Duration,
}

struct Queues {
    /// `None` is the pass sentinel: an update runs fibers up to it, so
    /// anything requeued during the pass waits for the next update.
    ready: VecDeque<Option<Fiber>>,
    sleeping: Vec<SleepEntry>,
}

impl Queues {
    fn ready_len(&self) -> usize {
        self.ready.iter().filter(|e| e.is_some()).count()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

struct Inner {
    owner_id: ThreadId,
    owner: Thread,
    config: SchedulerConfig,
    queues: Mutex<Queues>,
    remote: RemoteQueue<Fiber>,
    woken: AtomicBool,
    disposed: AtomicBool,
    /// Monotonic time marker in nanoseconds; only ever advances.
    now_nanos: AtomicU64,
    fault_handler: Mutex<Option<Box<dyn Fn(&Fiber, &Error) + Send>>>,
}

/// Handle to a single-threaded cooperative dispatcher. Cloneable and
/// sendable; execution stays on the construction thread.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// A scheduler owned by the current thread, with default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// A scheduler owned by the current thread.
    pub fn with_config(config: SchedulerConfig) -> Self {
        let current = thread::current();
        Scheduler {
            inner: Arc::new(Inner {
                owner_id: current.id(),
                owner: current,
                config,
                queues: Mutex::new(Queues {
                    ready: VecDeque::new(),
                    sleeping: Vec::new(),
                }),
                remote: RemoteQueue::new(),
                woken: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                now_nanos: AtomicU64::new(0),
                fault_handler: Mutex::new(None),
            }),
        }
    }

    /// True when called on the thread this scheduler is bound to.
    pub fn on_owner_thread(&self) -> bool {
        thread::current().id() == self.inner.owner_id
    }

    /// The scheduler clock: the time last passed to `update`.
    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.inner.now_nanos.load(Ordering::Acquire))
    }

    /// True once `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Hook observing every fiber fault. Without one, faults are logged and
    /// swallowed.
    pub fn set_fault_handler<F>(&self, f: F)
    where
        F: Fn(&Fiber, &Error) + Send + 'static,
    {
        *self.inner.fault_handler.lock() = Some(Box::new(f));
    }

    /// Stop the run loop and refuse further operations. Idempotent.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            log::debug!("scheduler disposed");
            self.inner.owner.unpark();
        }
    }

    /// (ready, sleeping) queue lengths, for diagnostics.
    pub fn debug_stats(&self) -> (usize, usize) {
        let q = self.inner.queues.lock();
        (q.ready_len(), q.sleeping.len())
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Hand a fiber to this scheduler. Safe from any thread.
    ///
    /// A fiber not yet started is bound to this scheduler and moved to
    /// `WaitingToRun`. On the owner thread, and within the inline depth cap,
    /// the fiber executes immediately; otherwise it lands on the ready queue
    /// and the wake signal fires.
    pub fn queue(&self, fiber: Fiber) -> Result<(), Error> {
        self.check_live()?;
        fiber.bind(self)?;

        loop {
            let status = fiber.status();
            if status.is_startable() {
                if fiber.try_transition(status, FiberStatus::WaitingToRun) {
                    break;
                }
                continue; // raced with start or cancel; re-read
            }
            if status.is_completed() {
                // canceled-before-start or a stale handle: nothing to run
                return Ok(());
            }
            break; // WaitingToRun or Running: plain requeue
        }

        if self.on_owner_thread() {
            if self.inner.config.allow_inlining
                && current::inline_depth() < self.inner.config.max_inline_depth
            {
                // claim the queue slot so a concurrent submission of the
                // same fiber cannot land it in a queue as well
                if fiber.try_park() {
                    fiber.unpark();
                    let _depth = current::enter_inline();
                    let _sched = current::enter_scheduler(self);
                    self.run_fiber(&fiber);
                }
                return Ok(());
            }
            self.push_ready(fiber);
        } else {
            self.inner.remote.push(fiber);
        }
        self.signal();
        Ok(())
    }

    /// Requeue without inlining. Used by completion wakers and host
    /// re-entry; tolerates any calling thread and never recurses.
    pub(crate) fn requeue(&self, fiber: Fiber) {
        if self.is_disposed() {
            log::trace!("dropping requeue of fiber {} on disposed scheduler", fiber.id());
            return;
        }
        if self.on_owner_thread() {
            self.push_ready(fiber);
        } else {
            self.inner.remote.push(fiber);
        }
        self.signal();
    }

    /// Set the wake flag and rouse a parked run loop.
    pub(crate) fn signal(&self) {
        self.inner.woken.store(true, Ordering::Release);
        self.inner.owner.unpark();
    }

    pub(crate) fn report_fault(&self, fiber: &Fiber, err: &Error) {
        let handler = self.inner.fault_handler.lock();
        match handler.as_ref() {
            Some(h) => h(fiber, err),
            None => log::error!("fiber {} faulted: {}", fiber.id(), err),
        }
    }

    // -------------------------------------------------------------------------
    // The unit of progress
    // -------------------------------------------------------------------------

    /// Run one update at scheduler time `now`.
    ///
    /// Phase A drains exactly the fibers that were ready at entry, so a
    /// fiber requeued mid-pass runs on the next update. Phase B wakes
    /// sleepers whose deadline has passed or whose cancellation is pending,
    /// keeping the relative order of the rest.
    ///
    /// `now` values are clamped monotone: time never goes backwards.
    pub fn update(&self, now: Duration) -> Result<(), Error> {
        self.check_live()?;
        if !self.on_owner_thread() {
            return Err(Error::InvalidState("update off the scheduler's owner thread"));
        }
        let _sched = current::enter_scheduler(self);

        let nanos = u64::try_from(now.as_nanos()).unwrap_or(u64::MAX);
        self.inner.now_nanos.fetch_max(nanos, Ordering::AcqRel);

        // Fold cross-thread submissions into the ready queue.
        while let Some(fiber) = self.inner.remote.pop() {
            self.push_ready(fiber);
        }

        // Phase A: a single pass, bounded by a sentinel appended at entry.
        self.inner.queues.lock().ready.push_back(None);
        loop {
            let next = self.inner.queues.lock().ready.pop_front();
            match next {
                Some(Some(fiber)) => {
                    fiber.unpark();
                    self.run_fiber(&fiber);
                }
                // the sentinel: whatever follows runs on the next update
                Some(None) | None => break,
            }
        }

        // Phase B: wake scan.
        let now = self.now();
        let woke = {
            let mut q = self.inner.queues.lock();
            let mut woke = Vec::new();
            q.sleeping.retain(|e| {
                let due = e.wake_at <= now || e.fiber.cancel_observed() || e.fiber.is_completed();
                if due {
                    woke.push(e.fiber.clone());
                }
                !due
            });
            woke
        };
        for fiber in woke {
            fiber.unpark();
            if !fiber.is_completed() {
                self.push_ready(fiber);
            }
        }
        Ok(())
    }

    /// Blocking dispatch loop.
    ///
    /// Queues `root` if it has not started yet, then alternates `update`
    /// with sleeping on the wake signal. Exits when `token` is signaled, the
    /// scheduler is disposed, or the root fiber (when given) terminates.
    ///
    /// `updates_per_second` sets this invocation's cadence; `0.0` falls back
    /// to the configured default, which itself defaults to unthrottled.
    pub fn run(
        &self,
        root: Option<Fiber>,
        token: CancellationToken,
        updates_per_second: f64,
    ) -> Result<(), Error> {
        self.check_live()?;
        if !self.on_owner_thread() {
            return Err(Error::InvalidState("run off the scheduler's owner thread"));
        }

        if let Some(root) = &root {
            if root.status().is_startable() {
                self.queue(root.clone())?;
            }
        }

        let started = Instant::now();
        let ups = if updates_per_second > 0.0 {
            updates_per_second
        } else {
            self.inner.config.updates_per_second
        };
        let cycle = (ups > 0.0).then(|| Duration::from_secs_f64(1.0 / ups));

        loop {
            if self.should_exit(&token, root.as_ref()) {
                return Ok(());
            }

            let tick = Instant::now();
            match self.update(started.elapsed()) {
                Ok(()) => {}
                // disposed between the exit check and the update
                Err(Error::Disposed) => return Ok(()),
                Err(e) => return Err(e),
            }

            if self.should_exit(&token, root.as_ref()) {
                return Ok(());
            }

            // Throttled loops hold the cadence even when work is pending.
            if let Some(cycle) = cycle {
                let spent = tick.elapsed();
                if spent < cycle {
                    thread::sleep(cycle - spent);
                }
                continue;
            }

            let has_ready = {
                let q = self.inner.queues.lock();
                q.ready_len() > 0
            } || !self.inner.remote.is_empty();
            if has_ready {
                continue;
            }

            // Nothing ready: sleep until the wake signal or the earliest
            // sleeper deadline, bounded for exit-condition responsiveness.
            if self.inner.woken.swap(false, Ordering::AcqRel) {
                continue;
            }
            let next_wake = {
                let q = self.inner.queues.lock();
                q.sleeping.iter().map(|e| e.wake_at).min()
            };
            let timeout = match next_wake {
                Some(at) => at.saturating_sub(started.elapsed()).min(IDLE_PARK),
                None => IDLE_PARK,
            };
            if !timeout.is_zero() {
                thread::park_timeout(timeout);
            }
        }
    }

    fn should_exit(&self, token: &CancellationToken, root: Option<&Fiber>) -> bool {
        token.is_canceled()
            || self.is_disposed()
            || root.is_some_and(|r| r.is_completed())
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Step one fiber and interpret what it yields. No queue lock is held
    /// while the body runs.
    fn run_fiber(&self, fiber: &Fiber) {
        loop {
            match fiber.status() {
                FiberStatus::WaitingToRun => {
                    if fiber.try_transition(FiberStatus::WaitingToRun, FiberStatus::Running) {
                        break;
                    }
                    // raced with cancel; re-read
                }
                FiberStatus::Running => break,
                // completed or never activated: stale queue entry
                _ => return,
            }
        }

        match fiber.step() {
            Ok(StepResult::Completed) => {}
            Ok(StepResult::Instruction(instr)) => self.dispatch(fiber, instr),
            Err(e) => {
                // Re-entrant switch into a fiber that is mid-step on this
                // thread. Leave it alone; its own dispatch parks it.
                log::debug!("skipping step of fiber {}: {}", fiber.id(), e);
            }
        }
    }

    fn dispatch(&self, fiber: &Fiber, instr: Instruction) {
        match instr {
            Instruction::YieldToAny => self.push_ready(fiber.clone()),

            Instruction::YieldFor(d) => {
                let wake_at = self.now() + d;
                if fiber.try_park() {
                    self.inner.queues.lock().sleeping.push(SleepEntry {
                        fiber: fiber.clone(),
                        wake_at,
                    });
                }
            }

            Instruction::YieldUntil(target) => {
                if target.is_completed() {
                    self.push_ready(fiber.clone());
                } else {
                    let scheduler = self.clone();
                    let waiter = fiber.clone();
                    target.on_completed(Box::new(move |_| scheduler.requeue(waiter)));
                }
            }

            Instruction::YieldTo(target) => {
                self.remove_from_queues(&target);
                if current::inline_depth() < self.inner.config.max_inline_depth {
                    // requester resumes when the target yields back, or on a
                    // later pass; the target runs right now
                    self.push_ready(fiber.clone());
                    let _depth = current::enter_inline();
                    self.run_fiber(&target);
                } else {
                    // past the cap: enqueue both, target first, so the next
                    // update resumes the chain in switch order
                    self.push_ready(target);
                    self.push_ready(fiber.clone());
                }
            }

            Instruction::Foreign(payload) => match &self.inner.config.host {
                Some(host) => host.push_native_yield(fiber, payload),
                None => {
                    log::debug!(
                        "foreign yield from fiber {} with no host adapter installed",
                        fiber.id()
                    );
                    self.push_ready(fiber.clone());
                }
            },

            Instruction::Stop | Instruction::StopWith(_) => {
                debug_assert!(false, "terminating instruction escaped the step driver");
            }
        }
    }

    fn push_ready(&self, fiber: Fiber) {
        if fiber.try_park() {
            self.inner.queues.lock().ready.push_back(Some(fiber));
        }
    }

    fn remove_from_queues(&self, target: &Fiber) {
        let mut q = self.inner.queues.lock();
        // sentinels stay where they are
        q.ready.retain(|e| e.as_ref() != Some(target));
        q.sleeping.retain(|e| &e.fiber != target);
        drop(q);
        target.unpark();
    }

    fn check_live(&self) -> Result<(), Error> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Scheduler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scheduler {}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (ready, sleeping) = self.debug_stats();
        f.debug_struct("Scheduler")
            .field("owner", &self.inner.owner_id)
            .field("ready", &ready)
            .field("sleeping", &sleeping)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::Fiber;
    use std::sync::atomic::{AtomicU32, Ordering as AtOrdering};

    #[test]
    fn config_defaults() {
        let c = SchedulerConfig::default();
        assert!(c.allow_inlining);
        assert_eq!(c.max_inline_depth, 10);
        assert_eq!(c.updates_per_second, 0.0);
        assert!(c.host.is_none());
    }

    #[test]
    fn clock_is_monotone() {
        let s = Scheduler::new();
        s.update(Duration::from_millis(50)).unwrap();
        assert_eq!(s.now(), Duration::from_millis(50));
        // a late update cannot move time backwards
        s.update(Duration::from_millis(20)).unwrap();
        assert_eq!(s.now(), Duration::from_millis(50));
        s.update(Duration::from_millis(80)).unwrap();
        assert_eq!(s.now(), Duration::from_millis(80));
    }

    #[test]
    fn queue_binds_and_runs_action_inline() {
        let s = Scheduler::new();
        let ran = Arc::new(AtomicU32::new(0));
        let observed = ran.clone();
        let fiber = Fiber::from_action(
            move || {
                observed.fetch_add(1, AtOrdering::SeqCst);
                Ok(())
            },
            CancellationToken::none(),
        );
        s.queue(fiber.clone()).unwrap();
        // default config inlines owner-thread queues: done before update
        assert_eq!(ran.load(AtOrdering::SeqCst), 1);
        assert_eq!(fiber.status(), FiberStatus::RanToCompletion);
        assert_eq!(fiber.scheduler().unwrap(), s);
    }

    #[test]
    fn inlining_disabled_defers_to_update() {
        let s = Scheduler::with_config(SchedulerConfig {
            allow_inlining: false,
            ..Default::default()
        });
        let ran = Arc::new(AtomicU32::new(0));
        let observed = ran.clone();
        let fiber = Fiber::from_action(
            move || {
                observed.fetch_add(1, AtOrdering::SeqCst);
                Ok(())
            },
            CancellationToken::none(),
        );
        s.queue(fiber.clone()).unwrap();
        assert_eq!(ran.load(AtOrdering::SeqCst), 0);
        assert_eq!(fiber.status(), FiberStatus::WaitingToRun);

        s.update(Duration::ZERO).unwrap();
        assert_eq!(ran.load(AtOrdering::SeqCst), 1);
        assert_eq!(fiber.status(), FiberStatus::RanToCompletion);
    }

    #[test]
    fn zero_inline_depth_forces_enqueue() {
        let s = Scheduler::with_config(SchedulerConfig {
            max_inline_depth: 0,
            ..Default::default()
        });
        let fiber = Fiber::from_action(|| Ok(()), CancellationToken::none());
        s.queue(fiber.clone()).unwrap();
        assert_eq!(fiber.status(), FiberStatus::WaitingToRun);
        let (ready, _) = s.debug_stats();
        assert_eq!(ready, 1);
    }

    #[test]
    fn cross_thread_queue_lands_on_next_update() {
        let s = Scheduler::with_config(SchedulerConfig {
            allow_inlining: false,
            ..Default::default()
        });
        let fiber = Fiber::from_action(|| Ok(()), CancellationToken::none());
        let s2 = s.clone();
        let f2 = fiber.clone();
        std::thread::spawn(move || s2.queue(f2).unwrap())
            .join()
            .unwrap();
        s.update(Duration::ZERO).unwrap();
        assert_eq!(fiber.status(), FiberStatus::RanToCompletion);
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_operations() {
        let s = Scheduler::new();
        s.dispose();
        s.dispose();
        assert!(s.is_disposed());
        assert!(matches!(s.update(Duration::ZERO), Err(Error::Disposed)));
        let fiber = Fiber::from_action(|| Ok(()), CancellationToken::none());
        assert!(matches!(s.queue(fiber), Err(Error::Disposed)));
    }

    #[test]
    fn update_rejects_foreign_threads() {
        let s = Scheduler::new();
        let s2 = s.clone();
        let result = std::thread::spawn(move || s2.update(Duration::ZERO))
            .join()
            .unwrap();
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn queueing_a_completed_fiber_is_a_no_op() {
        let s = Scheduler::new();
        let fiber = Fiber::from_action(|| Ok(()), CancellationToken::none());
        fiber.cancel();
        s.queue(fiber.clone()).unwrap();
        let (ready, sleeping) = s.debug_stats();
        assert_eq!((ready, sleeping), (0, 0));
    }
}
