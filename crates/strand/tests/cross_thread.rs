//! Cross-thread usage: a scheduler running on its own thread, driven from
//! the outside through `queue`, `cancel`, the task bridge, and the
//! synchronization context.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use strand::{
    CancellationToken, Error, FiberStatus, Instruction, Scheduler, SyncContext, Yield,
    YieldableTask,
};

/// Spawn a scheduler on a dedicated thread running its blocking loop, and
/// hand the caller a handle plus the join handle.
fn spawn_scheduler() -> (Scheduler, thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let join = thread::Builder::new()
        .name("strand-owner".to_string())
        .spawn(move || {
            let scheduler = Scheduler::new();
            tx.send(scheduler.clone()).unwrap();
            scheduler
                .run(None, CancellationToken::none(), 0.0)
                .unwrap();
        })
        .unwrap();
    (rx.recv().unwrap(), join)
}

#[test]
fn tasks_started_from_outside_complete_on_the_owner_thread() {
    let (scheduler, join) = spawn_scheduler();

    let task: YieldableTask<u32> = YieldableTask::new(
        vec![
            Yield::sleep(Duration::from_millis(10)),
            Yield::result(42u32),
        ]
        .into_iter(),
        CancellationToken::none(),
    );
    task.start(&scheduler).unwrap();
    assert_eq!(task.wait().unwrap(), 42);
    assert_eq!(task.fiber().status(), FiberStatus::RanToCompletion);

    scheduler.dispose();
    join.join().unwrap();
}

#[test]
fn cancellation_from_outside_interrupts_a_sleeper() {
    let (scheduler, join) = spawn_scheduler();

    let task: YieldableTask<()> = YieldableTask::from_instruction(
        Instruction::YieldFor(Duration::from_secs(3600)),
        CancellationToken::none(),
    );
    task.start(&scheduler).unwrap();

    // let it reach the sleep queue, then cancel from this thread
    thread::sleep(Duration::from_millis(20));
    task.cancel();

    assert!(matches!(task.wait(), Err(Error::Canceled { .. })));
    assert_eq!(task.fiber().status(), FiberStatus::Canceled);

    scheduler.dispose();
    join.join().unwrap();
}

#[test]
fn send_runs_on_the_owner_thread_and_returns_the_value() {
    let (scheduler, join) = spawn_scheduler();
    let ctx = SyncContext::new(&scheduler);

    let owner = scheduler.clone();
    let observed_on_owner = ctx
        .send(move || owner.on_owner_thread())
        .unwrap();
    assert!(observed_on_owner, "callback ran off the owner thread");

    let doubled = ctx.send(|| 21u32 * 2).unwrap();
    assert_eq!(doubled, 42);

    scheduler.dispose();
    join.join().unwrap();
}

#[test]
fn posts_from_many_threads_all_run() {
    let (scheduler, join) = spawn_scheduler();

    let fibers: Vec<_> = (0..8u32)
        .map(|i| {
            let ctx = SyncContext::new(&scheduler);
            thread::spawn(move || ctx.post(move || drop(i)).unwrap())
        })
        .map(|h| h.join().unwrap())
        .collect();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    for fiber in &fibers {
        while !fiber.is_completed() {
            assert!(std::time::Instant::now() < deadline, "posted fiber stuck");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(fiber.status(), FiberStatus::RanToCompletion);
    }

    scheduler.dispose();
    join.join().unwrap();
}
