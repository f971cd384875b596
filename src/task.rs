/*
 * Task record
 *
 * Ported from `original_source/kernel/src/thread.c`'s `struct task`, the
 * counterpart of the kernel's `scheduler::thread::Thread`. Differences
 * from the kernel's `Thread` are exactly the features spec.md §3 asks for
 * and `Thread` doesn't have: an embedded (not boxed-separately) stack
 * bracketed by overflow-detection fences, a `count` used for least-run
 * scheduling instead of CPU-time accounting, and an `alarm` for semaphore
 * sleep instead of a millisecond wake time.
 */

use alloc::string::String;

use crate::am::Context;
use crate::config::{FENCE_BYTE, FENCE_SIZE, STACK_FILL_BYTE, STACK_SIZE};

/// Process id, monotonically increasing from 1 (spec.md §3). Pid 0 is
/// never assigned; it is used as a sentinel in diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Pid(pub u64);

/// Task lifecycle state (spec.md §3's state machine).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskState {
    Unused,
    Embryo,
    Sleeping,
    /// Runnable but not currently on a CPU. Named `Wakeable` per spec.md;
    /// `original_source/kernel/src/thread.c`'s `task_states_human` calls
    /// the same state "Waken up".
    Wakeable,
    Running,
    Zombie,
    /// Used only for the root sentinel task.
    Special,
}

impl core::fmt::Display for TaskState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            TaskState::Unused => "Unused",
            TaskState::Embryo => "Embryo",
            TaskState::Sleeping => "Sleeping",
            TaskState::Wakeable => "Wakeable",
            TaskState::Running => "Running",
            TaskState::Zombie => "Zombie",
            TaskState::Special => "Special",
        };
        f.write_str(s)
    }
}

/// A kernel thread: the unit of scheduling (spec.md §3).
pub struct Task {
    pub pid: Pid,
    pub name: String,
    pub state: TaskState,

    fence_a: [u8; FENCE_SIZE],
    stack: [u8; STACK_SIZE],
    fence_b: [u8; FENCE_SIZE],

    /// Saved CPU context, built by `Am::kcontext` and updated by the
    /// trap dispatcher's save handler. `Context::NULL` until the task has
    /// actually been dispatched at least once.
    pub context: Context,

    /// Run counter driving least-count scheduling (spec.md §4.3).
    pub count: u64,

    /// Address of the semaphore this task is sleeping on, or `None` if
    /// not sleeping. Invariant: `Some` iff `state == Sleeping`.
    pub alarm: Option<usize>,
}

impl Task {
    /// Build the root sentinel task: state `Special`, initialized fences,
    /// no context, head of the task list.
    pub fn root(pid: Pid) -> Task {
        let mut task = Task {
            pid,
            name: String::from("root"),
            state: TaskState::Special,
            fence_a: [0; FENCE_SIZE],
            stack: [0; STACK_SIZE],
            fence_b: [0; FENCE_SIZE],
            context: Context::NULL,
            count: 0,
            alarm: None,
        };
        task.fill_fences();
        task
    }

    /// Build a new task in state `Embryo`: fences and stack filled, but
    /// no context yet — the caller must build one over `stack_area()` via
    /// `Am::kcontext` before the task is schedulable.
    pub fn embryo(pid: Pid, name: String, initial_count: u64) -> Task {
        let mut task = Task {
            pid,
            name,
            state: TaskState::Embryo,
            fence_a: [0; FENCE_SIZE],
            stack: [0; STACK_SIZE],
            fence_b: [0; FENCE_SIZE],
            context: Context::NULL,
            count: initial_count,
            alarm: None,
        };
        task.fill_fences();
        task
    }

    fn fill_fences(&mut self) {
        self.fence_a = [FENCE_BYTE; FENCE_SIZE];
        self.stack = [STACK_FILL_BYTE; STACK_SIZE];
        self.fence_b = [FENCE_BYTE; FENCE_SIZE];
    }

    /// The embedded stack area `kcontext` should build the initial
    /// context over.
    pub fn stack_area(&mut self) -> &mut [u8] {
        &mut self.stack
    }

    /// Assert both fence regions still hold the fence byte pattern.
    /// Fatal on mismatch (a stack overflow has clobbered a fence), per
    /// spec.md §4.3 ("Fence inspection").
    pub fn inspect_fence(&self) {
        crate::kassert!(
            self.fence_a.iter().all(|&b| b == FENCE_BYTE),
            "fence A corrupted for task {} ({})",
            self.pid.0,
            self.name
        );
        crate::kassert!(
            self.fence_b.iter().all(|&b| b == FENCE_BYTE),
            "fence B corrupted for task {} ({})",
            self.pid.0,
            self.name
        );
    }
}
