/*
 * Kernel multi-threading: task table and scheduler
 *
 * Ported from `original_source/kernel/src/thread.c`'s `kmt_*` functions,
 * the counterpart of the kernel's `scheduler::{Scheduler, thread}` pair,
 * but with the policy/mechanism split the kernel's own
 * `scheduler::{traits, sched_core}` modules argue for: task-list storage
 * and the three trap handlers live here; least-count selection is the one
 * policy decision spec.md §4.3 pins down, so it isn't pulled out behind a
 * trait the way the kernel's `Scheduler` policies are — there is only one
 * scheduling algorithm this core ever runs.
 *
 * Design notes (spec.md §9) ask for the intrusive C linked list to become
 * "an ordered container of owned task records whose identity is the pid"
 * — `TaskTable` below is a `Vec<Box<Task>>` in insertion order, not a
 * pointer chain.
 */

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::am::{am, Context};
use crate::config::MAX_CPU;
use crate::spinlock::Spinlock;
use crate::task::{Pid, Task, TaskState};
use crate::trap::{self, Event, EventClass, TrapOutcome};
use crate::{kassert, kpanic};

struct TaskTable {
    tasks: Vec<Box<Task>>,
    next_pid: u64,
    min_count: u64,
}

impl TaskTable {
    const fn new() -> Self {
        TaskTable {
            tasks: Vec::new(),
            next_pid: 1,
            min_count: 0,
        }
    }

    fn alloc_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    fn find_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.tasks.iter_mut().map(|b| b.as_mut()).find(|t| t.pid == pid)
    }
}

static TASK_LOCK: Spinlock = Spinlock::new("task_lock");
static TASK_TABLE: spin::Mutex<TaskTable> = spin::Mutex::new(TaskTable::new());

/// Current task running on each CPU, by pid. `None` if the CPU has not
/// been assigned one yet. Guarded by `TASK_LOCK`, matching
/// `original_source/kernel/src/thread.c`'s `cpu_tasks`, which is only ever
/// touched inside a `task_lock` critical section.
static CURRENT: spin::Mutex<[Option<Pid>; MAX_CPU]> = spin::Mutex::new([None; MAX_CPU]);

/// Install the root sentinel task and register the three KMT trap
/// handlers (spec.md §4.3). Must run once, before any other `kmt::*` or
/// `sem::*` call.
pub fn init() {
    *CURRENT.lock() = [None; MAX_CPU];

    let mut table = TASK_TABLE.lock();
    let pid = table.alloc_pid();
    table.tasks.push(Box::new(Task::root(pid)));
    drop(table);

    trap::on_irq(trap::SEQ_MIN, EventClass::Null, context_save);
    trap::on_irq(trap::SEQ_MAX, EventClass::Null, context_switch);
    trap::on_irq(0, EventClass::Yield, yield_handler);
    trap::on_irq(0, EventClass::IrqTimer, yield_handler);
    trap::on_irq(0, EventClass::Sleep, sleep_handler);
    trap::on_irq(0, EventClass::SemSignal, sem_signal_handler);

    log::info!("kmt: initialized, root task is pid {}", pid.0);
}

/// Create a new task in state `Embryo`, build its initial context over
/// its embedded stack via `Am::kcontext`, and append it to the task list.
/// Returns the new task's pid.
///
/// Fatal (spec.md §7, resource exhaustion) if the allocator backing
/// `Box::new` cannot satisfy the allocation — Rust surfaces that as an
/// abort from the global allocator itself, which is exactly the kernel's
/// own `Assert(ret, "MALLOC RETURNED NULL")` behavior, just enforced one
/// layer down.
pub fn create(name: &str, entry: fn(usize), arg: usize) -> Pid {
    TASK_LOCK.acquire();
    let mut table = TASK_TABLE.lock();
    let pid = table.alloc_pid();
    let min_count = table.min_count;
    let mut task = Box::new(Task::embryo(pid, String::from(name), min_count));
    task.context = am().kcontext(task.stack_area(), entry, arg);
    log::debug!("kmt: created task {} ({}), entry={:?}", pid.0, name, task.context);
    table.tasks.push(task);
    drop(table);
    TASK_LOCK.release();
    pid
}

/// Register the calling execution context itself as a schedulable task,
/// already `Running`, instead of building a fresh one via [`create`].
///
/// Every CPU needs something to fall back to when no other task is
/// runnable; on real hardware that's an idle loop spinning in the boot
/// thread. The software AM model in [`crate::sim`] has no separate idle
/// thread to lean on, so its own CPU driver loops register themselves
/// through this entry point instead, taking part in ordinary least-count
/// scheduling like any other task rather than standing outside it.
pub fn bootstrap_root(name: &str, ctx: Context) -> Pid {
    TASK_LOCK.acquire();
    let mut table = TASK_TABLE.lock();
    let pid = table.alloc_pid();
    let mut task = Task::embryo(pid, String::from(name), 0);
    task.context = ctx;
    task.state = TaskState::Running;
    table.tasks.push(Box::new(task));
    drop(table);
    CURRENT.lock()[am().cpu()] = Some(pid);
    TASK_LOCK.release();
    log::debug!("kmt: registered calling context as task {} ({})", pid.0, name);
    pid
}

/// Mark the calling task `Zombie` (excluded from scheduling from now on)
/// and yield the CPU away from it for the last time.
///
/// Every task built via [`create`] must reach this after its entry
/// function returns — a trap handler chain has no way to notice a task
/// simply falling off the end of its function, so whatever builds the
/// initial context (here, `crate::sim`'s `kcontext`) is responsible for
/// calling this itself once `entry` returns.
pub fn exit_current() {
    TASK_LOCK.acquire();
    if let Some(pid) = current_locked() {
        let mut table = TASK_TABLE.lock();
        if let Some(task) = table.find_mut(pid) {
            task.state = TaskState::Zombie;
            log::debug!("kmt: task {} ({}) exited", pid.0, task.name);
        }
    }
    TASK_LOCK.release();
    am().trap(Event::Yield);
}

/// Unlink `pid` from the task list and drop (free) its record.
pub fn teardown(pid: Pid) {
    TASK_LOCK.acquire();
    let mut table = TASK_TABLE.lock();
    let before = table.tasks.len();
    table.tasks.retain(|t| t.pid != pid);
    kassert!(table.tasks.len() == before - 1, "teardown: task {} is not in the task list", pid.0);
    drop(table);
    TASK_LOCK.release();
    log::debug!("kmt: tore down task {}", pid.0);
}

/// Assert both fence regions of `pid`'s stack still hold the fence
/// pattern. Fatal on mismatch.
pub fn inspect_fence(pid: Pid) {
    TASK_LOCK.acquire();
    let table = TASK_TABLE.lock();
    match table.tasks.iter().find(|t| t.pid == pid) {
        Some(task) => task.inspect_fence(),
        None => kpanic!("inspect_fence: no such task {}", pid.0),
    }
    drop(table);
    TASK_LOCK.release();
}

/// The pid currently running on the calling CPU, if any.
///
/// Safe to call from ordinary (non-handler) context: acquires `TASK_LOCK`
/// itself. Handlers that already hold `TASK_LOCK` must use
/// [`current_locked`] instead — `Spinlock` is not reentrant.
pub fn current() -> Option<Pid> {
    TASK_LOCK.acquire();
    let pid = current_locked();
    TASK_LOCK.release();
    pid
}

/// Read the current task without acquiring `TASK_LOCK`. Caller must
/// already hold it (every trap handler below does).
fn current_locked() -> Option<Pid> {
    CURRENT.lock()[am().cpu()]
}

/// Pick the task with the smallest run-counter among `Embryo`/`Wakeable`
/// tasks, ties broken by list order. Must be called with `TASK_LOCK` held.
fn sched(table: &mut TaskTable) -> Option<Pid> {
    kassert!(TASK_LOCK.holding(), "kmt_sched: called without holding task_lock");
    log::trace!("kmt: ========== tasks ==========");
    let mut chosen: Option<Pid> = None;
    let mut chosen_count = u64::MAX;
    for task in table.tasks.iter() {
        log::trace!("kmt: {}:{} [{}]", task.pid.0, task.name, task.state);
        if matches!(task.state, TaskState::Embryo | TaskState::Wakeable) && task.count < chosen_count {
            chosen = Some(task.pid);
            chosen_count = task.count;
        }
    }
    log::trace!("kmt: ============================");
    if chosen.is_some() {
        table.min_count = chosen_count;
    }
    chosen
}

/// Context-save handler, registered at `SEQ_MIN` against the wildcard
/// class so it runs before every other handler on every trap.
fn context_save(_event: Event, context: Context, _outcome: &mut TrapOutcome) -> Option<Context> {
    TASK_LOCK.acquire();
    if let Some(pid) = current_locked() {
        let mut table = TASK_TABLE.lock();
        if let Some(task) = table.find_mut(pid) {
            task.context = context;
            log::trace!("kmt: context for task {} ({}) saved", pid.0, task.name);
        }
    }
    TASK_LOCK.release();
    None
}

/// Context-switch handler, registered at `SEQ_MAX` against the wildcard
/// class so it runs after every other handler on every trap.
fn context_switch(_event: Event, _context: Context, _outcome: &mut TrapOutcome) -> Option<Context> {
    TASK_LOCK.acquire();
    let pid = current_locked();
    let ret = pid.and_then(|pid| {
        let table = TASK_TABLE.lock();
        table.tasks.iter().find(|t| t.pid == pid).map(|t| {
            kassert!(!t.context.is_null(), "context_switch: task {} has a null context", pid.0);
            t.context
        })
    });
    TASK_LOCK.release();
    ret
}

/// Yield/timer handler: runs the scheduler and transitions the current
/// and chosen tasks (spec.md §4.3 "Yield handler").
fn yield_handler(_event: Event, _context: Context, _outcome: &mut TrapOutcome) -> Option<Context> {
    TASK_LOCK.acquire();
    let mut table = TASK_TABLE.lock();
    let cur = current_locked();
    let next = sched(&mut table);

    let ret = match next {
        None => {
            if let Some(cur_pid) = cur {
                if let Some(t) = table.find_mut(cur_pid) {
                    if t.state != TaskState::Zombie {
                        t.state = TaskState::Running;
                    }
                }
            }
            None
        }
        Some(next_pid) => {
            if let Some(cur_pid) = cur {
                if cur_pid != next_pid {
                    if let Some(t) = table.find_mut(cur_pid) {
                        if t.state == TaskState::Running {
                            t.state = TaskState::Wakeable;
                        }
                    }
                }
            }
            let next_ctx = {
                let t = match table.find_mut(next_pid) {
                    Some(t) => t,
                    None => kpanic!("yield_handler: scheduler chose pid {} not in the task table", next_pid.0),
                };
                t.count += 1;
                t.state = TaskState::Running;
                t.context
            };
            CURRENT.lock()[am().cpu()] = Some(next_pid);
            Some(next_ctx)
        }
    };
    drop(table);
    TASK_LOCK.release();
    ret
}

/// `sem_wait` trap handler: puts the current task to sleep on `alarm`,
/// forces a fresh scheduling decision in the same trap, and asks the
/// dispatcher to reacquire `lock` on the caller's behalf once
/// `os_trap_lock` is released (spec.md §4.4 "kmt_sleep").
///
/// By the time this runs, the trap dispatcher has already released
/// `lock` (spec.md §4.2 step 2) — the caller's "lock held across sleep"
/// invariant is relaxed right here, under `TASK_LOCK`, not before.
///
/// Going to sleep must hand the CPU to someone else *here*, the same way
/// the original's `kmt_sleep` forces a reschedule via its own internal
/// `_yield()` rather than leaving the switch to whatever runs next:
/// `context_switch` (`SEQ_MAX`) only ever re-reads `CURRENT` and returns
/// that task's own (unchanged) context, so if nothing switched `CURRENT`
/// away from the now-sleeping task first, the dispatcher would hand that
/// same task straight back to itself instead of actually blocking it.
fn sleep_handler(event: Event, _context: Context, outcome: &mut TrapOutcome) -> Option<Context> {
    let (alarm, lock) = match event {
        Event::Sleep { alarm, lock } => (alarm, lock),
        _ => return None,
    };
    TASK_LOCK.acquire();
    let mut table = TASK_TABLE.lock();
    let pid = match current_locked() {
        Some(pid) => pid,
        None => kpanic!("sleep_handler: trap with no current task on cpu {}", am().cpu()),
    };
    {
        let task = match table.find_mut(pid) {
            Some(t) => t,
            None => kpanic!("sleep_handler: current task {} missing from task table", pid.0),
        };
        kassert!(task.state == TaskState::Running, "sleep_handler: task {} sleeping from state {}", pid.0, task.state);
        task.state = TaskState::Sleeping;
        task.alarm = Some(alarm);
        log::debug!("kmt: task {} sleeping on alarm {:#x}", pid.0, alarm);
    }

    // `pid` just left `Running`, so `sched` (which only considers
    // `Embryo`/`Wakeable`) naturally excludes it here, the same way
    // `yield_handler` relies on a preempted task already being out of
    // `Running` before it calls `sched`.
    let ret = match sched(&mut table) {
        Some(next_pid) => {
            let t = match table.find_mut(next_pid) {
                Some(t) => t,
                None => kpanic!("sleep_handler: scheduler chose pid {} not in the task table", next_pid.0),
            };
            t.count += 1;
            t.state = TaskState::Running;
            let ctx = t.context;
            CURRENT.lock()[am().cpu()] = Some(next_pid);
            Some(ctx)
        }
        None => kpanic!("sleep_handler: no runnable task left to switch to (task {} going to sleep)", pid.0),
    };
    drop(table);
    TASK_LOCK.release();
    outcome.reacquire_after(lock);
    ret
}

/// `sem_signal` trap handler: wakes every task sleeping on `alarm`
/// (spec.md §4.4 "kmt_wakeup"). Makes no scheduling decision; the next
/// yield or timer tick picks among the now-`Wakeable` tasks.
fn sem_signal_handler(event: Event, _context: Context, _outcome: &mut TrapOutcome) -> Option<Context> {
    let alarm = match event {
        Event::SemSignal { alarm } => alarm,
        _ => return None,
    };
    TASK_LOCK.acquire();
    let mut table = TASK_TABLE.lock();
    let mut woken = 0;
    for task in table.tasks.iter_mut() {
        if task.state == TaskState::Sleeping && task.alarm == Some(alarm) {
            task.state = TaskState::Wakeable;
            task.alarm = None;
            woken += 1;
        }
    }
    drop(table);
    TASK_LOCK.release();
    log::debug!("kmt: alarm {:#x} woke {} task(s)", alarm, woken);
    None
}
