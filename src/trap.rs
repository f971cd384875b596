/*
 * Trap/event dispatcher
 *
 * Ported from `original_source/kernel/src/os.c`'s `os_trap`/`os_on_irq`,
 * the counterpart of the kernel's own `SchedulerCore`/`Scheduler` split in
 * `scheduler/{sched_core,traits}.rs`: a mechanism (this module) that
 * forwards events to independently-registered handlers without knowing
 * what any one of them does.
 *
 * One redesign relative to the C source (spec.md §9, "Deferred lock
 * reacquisition after sleep"): `os.c` stashes the lock a sleeping task
 * needs reacquired in a single file-scope global
 * (`wakeup_reacquire_lock`) that the end of `os_trap` reads and clears.
 * That is safe only because `os_trap_lock` already serializes every trap
 * body, which makes the global's safety an emergent property of lock
 * discipline elsewhere rather than something the slot enforces itself.
 * Here the pending reacquire travels on a [`TrapOutcome`] value local to
 * this one dispatch call — the kernel's own `KernelSchedCtx` trait takes
 * the same view (policies reach kernel state only through a capability
 * object passed to them, never through a raw global).
 */

use alloc::vec::Vec;

use crate::am::{am, Context};
use crate::config::MAX_CPU;
use crate::spinlock::{cpu_no_spinlock, Spinlock};
use crate::{kassert, kpanic};

/// The event class a handler registers interest in via [`on_irq`].
///
/// Kept distinct from [`Event`] because a registration can't name the
/// per-call payload (which semaphore, which device) that a concrete
/// incoming event carries — it only names the class of trap it wants to
/// see.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventClass {
    /// Wildcard: matches every incoming event class while the dispatcher
    /// is not re-entered.
    Null,
    IrqTimer,
    IrqIo,
    Yield,
    Sleep,
    SemSignal,
}

/// A concrete trap event, as delivered by the abstract machine (spec.md §4.2).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Event {
    IrqTimer,
    /// A device interrupt; `id` distinguishes which device for logging.
    IrqIo(u32),
    Yield,
    /// `sem_wait` syscall trap: `alarm` identifies the semaphore (its
    /// address, as the unique wake-up channel) and `lock` is the
    /// semaphore's own lock, held by the caller on entry.
    Sleep { alarm: usize, lock: *const Spinlock },
    /// `sem_signal` syscall trap.
    SemSignal { alarm: usize },
}

impl Event {
    fn class(&self) -> EventClass {
        match self {
            Event::IrqTimer => EventClass::IrqTimer,
            Event::IrqIo(_) => EventClass::IrqIo,
            Event::Yield => EventClass::Yield,
            Event::Sleep { .. } => EventClass::Sleep,
            Event::SemSignal { .. } => EventClass::SemSignal,
        }
    }
}

/// Minimum registrable sequence number: reserved for KMT's context-save
/// handler, which must run before every other handler on every trap.
pub const SEQ_MIN: i64 = i64::MIN;

/// Maximum registrable sequence number: reserved for KMT's context-switch
/// handler, which must run after every other handler on every trap.
pub const SEQ_MAX: i64 = i64::MAX;

/// Side channel a handler can use to ask the dispatcher to perform an
/// action after the handler chain has finished and `os_trap_lock` has been
/// released, but before the trap returns to the caller.
#[derive(Default)]
pub struct TrapOutcome {
    reacquire: Option<*const Spinlock>,
}

impl TrapOutcome {
    /// Ask the dispatcher to reacquire `lock` on the caller's behalf once
    /// the handler chain and `os_trap_lock` have both been released. Used
    /// by `kmt::sleep` to hand the caller's lock back after the sleep
    /// transition has been captured under `task_lock`.
    pub fn reacquire_after(&mut self, lock: *const Spinlock) {
        self.reacquire = Some(lock);
    }
}

pub type HandlerFn = fn(Event, Context, &mut TrapOutcome) -> Option<Context>;

struct HandlerEntry {
    seq: i64,
    event: EventClass,
    handler: HandlerFn,
}

static TRAP_LOCK: Spinlock = Spinlock::new("os_trap_lock");
static HANDLERS: spin::Mutex<Vec<HandlerEntry>> = spin::Mutex::new(Vec::new());

/// Register `handler` to run on traps matching `event` (or every event, if
/// `event` is [`EventClass::Null`] and the dispatcher is not re-entered),
/// ordered by ascending `seq` (spec.md §4.2).
pub fn on_irq(seq: i64, event: EventClass, handler: HandlerFn) {
    TRAP_LOCK.acquire();
    let mut handlers = HANDLERS.lock();
    let pos = handlers.iter().position(|h| h.seq >= seq).unwrap_or(handlers.len());
    handlers.insert(pos, HandlerEntry { seq, event, handler });
    TRAP_LOCK.release();
}

fn matches(entry_event: EventClass, incoming: Event, reentered: bool) -> bool {
    if entry_event == EventClass::Null {
        return !reentered;
    }
    entry_event == incoming.class()
}

/// Entry point called by the abstract machine on every trap: hardware
/// interrupt, explicit `yield`, or syscall. Returns the context to resume.
///
/// Implements the full contract of spec.md §4.2, steps 1–6.
pub fn dispatch(event: Event, context: Context) -> Context {
    let reentered = TRAP_LOCK.holding();

    // Step 1: a re-entered timer IRQ passes through untouched.
    if event == Event::IrqTimer && reentered {
        return context;
    }

    // Step 2: a sleep trap's lock is released before any dispatcher lock
    // is taken, so the caller's "lock held across the sleep transition"
    // invariant can be relaxed the instant the trap captures the context.
    if let Event::Sleep { lock, .. } = event {
        unsafe { (*lock).release() };
    }

    kassert!(
        event != Event::Yield || cpu_no_spinlock(),
        "yield requested while cpu {} holds a spinlock",
        am().cpu()
    );

    if reentered {
        // Step 3: only I/O interrupt handlers and sem_signal may run
        // while the dispatcher is already entered on this CPU.
        match event {
            Event::IrqIo(_) | Event::SemSignal { .. } => {}
            Event::IrqTimer => kpanic!("No timer interrupt during trap."),
            Event::Yield => kpanic!("No yield inside trap."),
            Event::Sleep { .. } => kpanic!("No semaphore wait inside trap."),
        }
    } else {
        TRAP_LOCK.acquire();
    }

    // Step 4: walk the handler chain in seq order. Every handler sees the
    // original context; the last non-null return wins.
    let mut outcome = TrapOutcome::default();
    let mut result: Option<Context> = None;
    {
        let handlers = HANDLERS.lock();
        for entry in handlers.iter() {
            if matches(entry.event, event, reentered) {
                if let Some(next) = (entry.handler)(event, context, &mut outcome) {
                    result = Some(next);
                }
            }
        }
    }

    // Step 5: consult the deferred reacquire slot, release our own lock,
    // then perform the reacquire on the caller's behalf.
    let pending = outcome.reacquire.take();
    if !reentered {
        TRAP_LOCK.release();
    }
    if let Some(lock) = pending {
        unsafe { (*lock).acquire() };
    }

    // Step 6: return the new context, or the original if re-entered.
    if reentered {
        context
    } else {
        match result {
            Some(c) => c,
            None => kpanic!("returning a null context after a normal (non-re-entered) trap"),
        }
    }
}

/// Number of CPUs this build of the dispatcher was configured for.
/// Exposed for diagnostics and tests only.
pub const fn max_cpu() -> usize {
    MAX_CPU
}
