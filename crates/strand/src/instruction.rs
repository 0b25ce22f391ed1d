//! Instructions: the closed set of requests a fiber step hands back to the
//! scheduler.

use std::fmt;
use std::time::Duration;

use crate::fiber::Fiber;
use crate::Value;

/// What a fiber asks of the scheduler when it yields.
///
/// Every observable step of a fiber produces exactly one of these; the
/// scheduler interprets it and parks, requeues, switches, or terminates the
/// fiber accordingly.
pub enum Instruction {
    /// Requeue on the ready queue; run again no earlier than the next update.
    YieldToAny,

    /// Park on the sleep queue until the scheduler clock reaches
    /// `now + duration`.
    YieldFor(Duration),

    /// Park off all queues until the target fiber completes. Both fibers
    /// must be bound to the same scheduler.
    YieldUntil(Fiber),

    /// Switch to the target fiber: it runs next, within the inline depth
    /// cap. Both fibers must be bound to the same scheduler.
    YieldTo(Fiber),

    /// The fiber is finished. Any previously latched result is applied at
    /// the terminal transition.
    Stop,

    /// Set the fiber's user-visible result, then finish as ran-to-completion.
    StopWith(Value),

    /// An opaque payload the scheduler does not understand; transported
    /// unchanged to the host adapter.
    Foreign(Value),
}

impl Instruction {
    /// True for the two instructions that end the fiber.
    pub fn is_terminating(&self) -> bool {
        matches!(self, Instruction::Stop | Instruction::StopWith(_))
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::YieldToAny => f.write_str("YieldToAny"),
            Instruction::YieldFor(d) => f.debug_tuple("YieldFor").field(d).finish(),
            Instruction::YieldUntil(t) => f.debug_tuple("YieldUntil").field(&t.id()).finish(),
            Instruction::YieldTo(t) => f.debug_tuple("YieldTo").field(&t.id()).finish(),
            Instruction::Stop => f.write_str("Stop"),
            Instruction::StopWith(_) => f.write_str("StopWith(..)"),
            Instruction::Foreign(_) => f.write_str("Foreign(..)"),
        }
    }
}
