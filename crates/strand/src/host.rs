//! The host adapter seam: how a frame-driven embedding consumes foreign
//! yields.
//!
//! A host that owns its own run loop drives the scheduler with
//! `update(now)` and `queue(fiber)` instead of `run`. When a fiber yields a
//! value the core does not understand, the scheduler wraps it as
//! `Instruction::Foreign` and hands it here unchanged; the host translates
//! it into its own wait primitive and, on resumption, re-enters the fiber
//! via [`Scheduler::queue`](crate::scheduler::Scheduler::queue).
//!
//! Hosts that need to find a fiber again from an engine-native handle store
//! the handle in the fiber's property map
//! ([`Fiber::set_property`](crate::fiber::Fiber::set_property)), which is
//! writable on the scheduler thread during this callback.

use crate::fiber::Fiber;
use crate::Value;

/// Implemented by an embedding run loop; installed through
/// [`SchedulerConfig::host`](crate::scheduler::SchedulerConfig).
///
/// The core never interprets `payload`; it arrives exactly as the body
/// yielded it. The fiber is parked off all queues for the duration of the
/// round-trip.
pub trait HostAdapter: Send + Sync {
    fn push_native_yield(&self, fiber: &Fiber, payload: Value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::fiber::FiberStatus;
    use crate::scheduler::{Scheduler, SchedulerConfig};
    use crate::step::Yield;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Collects foreign payloads and the fibers that produced them.
    struct RecordingHost {
        parked: Mutex<Vec<(Fiber, String)>>,
    }

    impl HostAdapter for RecordingHost {
        fn push_native_yield(&self, fiber: &Fiber, payload: Value) {
            let tag = payload
                .downcast::<String>()
                .map(|s| *s)
                .unwrap_or_else(|_| "<opaque>".to_string());
            fiber.set_property("native-wait", tag.clone());
            self.parked.lock().push((fiber.clone(), tag));
        }
    }

    #[test]
    fn foreign_yields_round_trip_through_the_host() {
        let host = Arc::new(RecordingHost {
            parked: Mutex::new(Vec::new()),
        });
        let s = Scheduler::with_config(SchedulerConfig {
            allow_inlining: false,
            host: Some(host.clone()),
            ..Default::default()
        });

        let fiber = crate::fiber::Fiber::with_token(
            vec![
                Yield::foreign(String::from("wait-for-frame")),
                Yield::result(11u32),
            ]
            .into_iter(),
            CancellationToken::none(),
        );
        fiber.start(&s).unwrap();
        s.update(Duration::ZERO).unwrap();

        // parked with the host, off every queue
        assert_eq!(s.debug_stats(), (0, 0));
        assert!(!fiber.is_completed());
        let (parked_fiber, tag) = {
            let mut parked = host.parked.lock();
            parked.pop().expect("host saw no yield")
        };
        assert_eq!(parked_fiber, fiber);
        assert_eq!(tag, "wait-for-frame");
        assert!(fiber.has_property("native-wait"));

        // host re-enters the fiber
        s.queue(parked_fiber).unwrap();
        s.update(Duration::ZERO).unwrap();
        assert_eq!(fiber.status(), FiberStatus::RanToCompletion);
        assert_eq!(fiber.take_result_as::<u32>(), Some(11));
    }

    #[test]
    fn without_a_host_foreign_degrades_to_yield() {
        let s = Scheduler::with_config(SchedulerConfig {
            allow_inlining: false,
            ..Default::default()
        });
        let fiber = crate::fiber::Fiber::with_token(
            vec![Yield::foreign(5u8), Yield::result(1u8)].into_iter(),
            CancellationToken::none(),
        );
        fiber.start(&s).unwrap();

        s.update(Duration::ZERO).unwrap();
        assert!(!fiber.is_completed()); // requeued, runs next update
        s.update(Duration::ZERO).unwrap();
        assert_eq!(fiber.status(), FiberStatus::RanToCompletion);
    }
}
