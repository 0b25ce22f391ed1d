//! Synchronization primitives abstraction for loom testing.
//!
//! When compiled with `--cfg loom`, this module uses loom's types which allow
//! deterministic concurrency testing. Otherwise, it uses std types.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

// =============================================================================
// RemoteQueue - lock-free queue for cross-thread fiber submission
// =============================================================================
//
// Under loom, a Mutex<VecDeque> stands in since loom doesn't provide SegQueue.
// The loom tests exercise our *usage* of the queue, not the queue's internal
// implementation (crossbeam-queue has its own tests).

#[cfg(not(loom))]
mod queue {
    use crossbeam_queue::SegQueue;

    pub struct RemoteQueue<T>(SegQueue<T>);

    impl<T> RemoteQueue<T> {
        pub fn new() -> Self {
            Self(SegQueue::new())
        }

        pub fn push(&self, value: T) {
            self.0.push(value);
        }

        pub fn pop(&self) -> Option<T> {
            self.0.pop()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }
}

#[cfg(loom)]
mod queue {
    use loom::sync::Mutex;
    use std::collections::VecDeque;

    pub struct RemoteQueue<T>(Mutex<VecDeque<T>>);

    impl<T> RemoteQueue<T> {
        pub fn new() -> Self {
            Self(Mutex::new(VecDeque::new()))
        }

        pub fn push(&self, value: T) {
            self.0.lock().unwrap().push_back(value);
        }

        pub fn pop(&self) -> Option<T> {
            self.0.lock().unwrap().pop_front()
        }

        pub fn is_empty(&self) -> bool {
            self.0.lock().unwrap().is_empty()
        }
    }
}

pub(crate) use queue::RemoteQueue;
