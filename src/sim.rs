//! Software abstract-machine model used only by this crate's own tests
//! (spec.md §8: "model the AM layer under a scheduler in a harness").
//!
//! Every simulated CPU and every task gets a dedicated OS thread, parked
//! via `std::thread::park`/`unpark` whenever it isn't the one "running".
//! A [`Context`] is a stable handle to one such thread for the entire
//! lifetime of the task it represents — there is nothing to actually save
//! on a trap, because parking preserves the whole call stack for us. That
//! is the sense in which this is a real AM model and not a mock: the
//! locking and scheduling logic under test (`spinlock`, `trap`, `kmt`,
//! `sem`) is the crate's own, unmodified code; only the context-switch
//! primitive underneath it is simulated.
//!
//! One simplification this model does not try to hide: `kcontext` ignores
//! the `Task`'s embedded stack buffer entirely (it can't build a real
//! machine context over an arbitrary byte slice in portable Rust) and
//! runs `entry` on the simulated task's own OS thread stack instead. Fence
//! corruption from a real stack overflow is therefore not reproducible
//! under simulation; `Task::inspect_fence` is exercised here only against
//! deliberately-corrupted fences, not organic overflow.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::{self, Thread};

use crate::am::{Am, Context};
use crate::config::MAX_CPU;
use crate::kassert;
use crate::kmt;
use crate::trap::{self, Event};

struct TaskCtx {
    thread: Mutex<Option<Thread>>,
    granted: AtomicBool,
    assigned_cpu: AtomicUsize,
}

impl TaskCtx {
    fn leaked(initial_thread: Option<Thread>, granted: bool) -> &'static TaskCtx {
        Box::leak(Box::new(TaskCtx {
            thread: Mutex::new(initial_thread),
            granted: AtomicBool::new(granted),
            assigned_cpu: AtomicUsize::new(0),
        }))
    }

    fn context(&'static self) -> Context {
        Context(self as *const TaskCtx as *mut u8)
    }
}

unsafe fn ctx_of(c: Context) -> &'static TaskCtx {
    &*(c.0 as *const TaskCtx)
}

thread_local! {
    static CPU_ID: Cell<usize> = Cell::new(0);
    static INTR_ENABLED: Cell<bool> = Cell::new(true);
    static CURRENT_CTX: Cell<Context> = Cell::new(Context::NULL);
}

/// Hand `next` the CPU: record which CPU it's about to run on, mark it
/// granted, and unpark its thread. Spins briefly if `next`'s thread
/// hasn't registered itself yet (a just-spawned task racing its own
/// first grant).
fn grant(next: &TaskCtx, cpu: usize) {
    next.assigned_cpu.store(cpu, Ordering::Release);
    let thread = loop {
        if let Some(t) = next.thread.lock().expect("sim: TaskCtx.thread poisoned").clone() {
            break t;
        }
        thread::yield_now();
    };
    next.granted.store(true, Ordering::Release);
    thread.unpark();
}

/// Block the calling thread until its `TaskCtx` has been granted the CPU.
fn park_until_granted(me: &TaskCtx) {
    while !me.granted.swap(false, Ordering::AcqRel) {
        thread::park();
    }
}

/// Register the calling OS thread as CPU `cpu`'s initial running context.
/// Call once per simulated CPU before that CPU issues any trap — typically
/// to install the root/idle task, mirroring the per-CPU `cpu_tasks[cpuid()]
/// = &root_task` bring-up in `original_source/kernel/src/thread.c`.
pub fn bootstrap_cpu(cpu: usize, ctx: Context) {
    kassert!(cpu < MAX_CPU, "sim: bootstrap_cpu: cpu {} out of range", cpu);
    let task = unsafe { ctx_of(ctx) };
    *task.thread.lock().expect("sim: TaskCtx.thread poisoned") = Some(thread::current());
    task.assigned_cpu.store(cpu, Ordering::Release);
    task.granted.store(true, Ordering::Release);
    CPU_ID.with(|c| c.set(cpu));
    CURRENT_CTX.with(|c| c.set(ctx));
}

/// Build a `Context` that represents the calling OS thread itself, for use
/// as a CPU's root/idle task context before handing it to [`bootstrap_cpu`].
pub fn context_for_current_thread() -> Context {
    TaskCtx::leaked(Some(thread::current()), true).context()
}

/// The software `Am` implementation backing this crate's test scenarios.
pub struct SimAm;

impl Am for SimAm {
    fn cpu(&self) -> usize {
        CPU_ID.with(|c| c.get())
    }

    fn get_efl(&self) -> bool {
        INTR_ENABLED.with(|c| c.get())
    }

    fn cli(&self) {
        INTR_ENABLED.with(|c| c.set(false));
    }

    fn sti(&self) {
        INTR_ENABLED.with(|c| c.set(true));
    }

    fn intr_write(&self, on: bool) {
        INTR_ENABLED.with(|c| c.set(on));
    }

    fn trap(&self, event: Event) {
        let my_ctx = CURRENT_CTX.with(|c| c.get());
        kassert!(!my_ctx.is_null(), "sim: trap() called before bootstrap_cpu() on this thread");
        let next_ctx = trap::dispatch(event, my_ctx);
        if next_ctx == my_ctx {
            return;
        }
        let me = unsafe { ctx_of(my_ctx) };
        let next = unsafe { ctx_of(next_ctx) };
        let my_cpu = me.assigned_cpu.load(Ordering::Acquire);
        grant(next, my_cpu);
        park_until_granted(me);
        // We may have been re-granted on a different simulated CPU than
        // the one we left — a task is not affine to any one CPU thread.
        CPU_ID.with(|c| c.set(me.assigned_cpu.load(Ordering::Acquire)));
        CURRENT_CTX.with(|c| c.set(my_ctx));
    }

    fn kcontext(&self, _stack: &mut [u8], entry: fn(usize), arg: usize) -> Context {
        let task = TaskCtx::leaked(None, false);
        let ctx = task.context();
        let addr = ctx.0 as usize;
        thread::Builder::new()
            .name(format!("kmt-task-{:#x}", addr))
            .spawn(move || {
                let task = unsafe { ctx_of(Context(addr as *mut u8)) };
                *task.thread.lock().expect("sim: TaskCtx.thread poisoned") = Some(thread::current());
                park_until_granted(task);
                CPU_ID.with(|c| c.set(task.assigned_cpu.load(Ordering::Acquire)));
                CURRENT_CTX.with(|c| c.set(Context(addr as *mut u8)));
                entry(arg);
                // `entry` returning doesn't give the CPU back by itself —
                // nothing preempts this thread asynchronously the way a
                // real timer interrupt would, so the task must explicitly
                // yield the CPU away one last time after marking itself
                // done, or its simulated CPU would simply stall forever.
                kmt::exit_current();
                loop {
                    thread::park();
                }
            })
            .expect("sim: failed to spawn simulated task thread");
        ctx
    }
}

pub static SIM_AM: SimAm = SimAm;
