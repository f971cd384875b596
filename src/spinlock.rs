/*
 * Interrupt-disabling spinlock
 *
 * Ported from `original_source/kernel/src/spinlock.c` ("modified from
 * xv6"), which is itself what the kernel's own `scheduler::SCHEDULER`
 * Mutex and `PREEMPTION_DISABLED`/`SCHEDULER_ENABLED` atomics are a
 * simplified stand-in for. Here the real thing: a lock safe to hold across
 * an interrupt handler and normal kernel context on the same CPU, because
 * acquiring it masks interrupts on the holding CPU for as long as it is
 * held (spec.md §4.1).
 */

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicIsize, Ordering};

use crate::am::am;
use crate::config::MAX_CPU;
use crate::kassert;

/// `ncli[cpu]` — nesting depth of `pushcli` on each CPU.
static NCLI: [AtomicI32; MAX_CPU] = [const { AtomicI32::new(0) }; MAX_CPU];

/// `efif[cpu]` — interrupt-enabled flag recorded before the first nested
/// `pushcli` on each CPU, restored when the nesting unwinds to zero.
static EFIF: [AtomicBool; MAX_CPU] = [const { AtomicBool::new(false) }; MAX_CPU];

/// Disable interrupts on the current CPU, remembering the prior flag on
/// the first nested call so a balanced `popcli` can restore it.
pub fn pushcli() {
    let am = am();
    let was_enabled = am.get_efl();
    am.cli();
    let cpu = am.cpu();
    if NCLI[cpu].load(Ordering::Relaxed) == 0 {
        EFIF[cpu].store(was_enabled, Ordering::Relaxed);
    }
    NCLI[cpu].fetch_add(1, Ordering::Relaxed);
}

/// Undo one `pushcli`. Re-enables interrupts once nesting returns to zero
/// and the flag recorded by the outermost `pushcli` was set.
pub fn popcli() {
    let am = am();
    kassert!(!am.get_efl(), "popcli: interruptible with cli nesting active");
    let cpu = am.cpu();
    let depth = NCLI[cpu].fetch_sub(1, Ordering::Relaxed) - 1;
    kassert!(depth >= 0, "popcli: cli nesting level went negative on cpu {}", cpu);
    if depth == 0 && EFIF[cpu].load(Ordering::Relaxed) {
        am.sti();
    }
}

/// True iff the current CPU holds at least one spinlock right now.
///
/// Valid because `pushcli`/`popcli` are only ever called in matched pairs
/// from [`Spinlock::acquire`]/[`Spinlock::release`] (net +1 per held lock)
/// and from [`Spinlock::holding`] (net 0) — so the nesting counter is
/// exactly the number of spinlocks this CPU currently holds.
pub fn cpu_no_spinlock() -> bool {
    NCLI[am().cpu()].load(Ordering::Relaxed) == 0
}

/// A mutual-exclusion lock that masks interrupts on the holding CPU for
/// its entire critical section (spec.md §3, §4.1).
pub struct Spinlock {
    locked: AtomicI32,
    holder: AtomicIsize,
    name: &'static str,
}

impl Spinlock {
    /// Build a lock in the unlocked state. `const fn` so locks can live in
    /// `static`s the way `scheduler::SCHEDULER` does.
    pub const fn new(name: &'static str) -> Self {
        Spinlock {
            locked: AtomicI32::new(0),
            holder: AtomicIsize::new(-1),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire the lock, spinning until it transitions 0→1. Masks
    /// interrupts on this CPU for the entire hold via `pushcli`.
    pub fn acquire(&self) {
        pushcli();
        kassert!(
            !self.holding_with_cli_held(),
            "acquire: cpu {} already holds lock '{}'",
            am().cpu(),
            self.name
        );
        while self.locked.swap(1, Ordering::Acquire) != 0 {
            core::hint::spin_loop();
        }
        core::sync::atomic::fence(Ordering::SeqCst);
        self.holder.store(am().cpu() as isize, Ordering::SeqCst);
    }

    /// Release the lock and restore this CPU's interrupt state via `popcli`.
    pub fn release(&self) {
        kassert!(
            self.holding_with_cli_held(),
            "release: cpu {} does not hold lock '{}'",
            am().cpu(),
            self.name
        );
        self.holder.store(-1, Ordering::SeqCst);
        core::sync::atomic::fence(Ordering::SeqCst);
        self.locked.store(0, Ordering::Release);
        popcli();
    }

    /// True iff the current CPU is the recorded holder. Runs with
    /// interrupts masked, matching `spinlock_holding` in
    /// `original_source/kernel/src/spinlock.c`.
    pub fn holding(&self) -> bool {
        pushcli();
        let res = self.holding_with_cli_held();
        popcli();
        res
    }

    fn holding_with_cli_held(&self) -> bool {
        self.locked.load(Ordering::SeqCst) != 0 && self.holder.load(Ordering::SeqCst) == am().cpu() as isize
    }
}
