/*
 * Abstract machine boundary
 *
 * spec.md §1 assumes a thin abstract-machine (AM) layer beneath this core:
 * per-CPU id, interrupt-flag manipulation, a `kcontext` primitive that
 * builds an initial context on a stack area, and a `yield` primitive that
 * raises a software trap. The kernel this crate is grounded on talks to its
 * hardware directly (`arch::x86_64::interrupts::{enable, disable,
 * are_enabled}`, the naked-asm context-switch handlers in
 * `scheduler/mod.rs`); this crate instead declares that boundary as a
 * trait and registers one global implementation of it, the same way `log`
 * registers a logger with `log::set_logger` rather than hardcoding one.
 *
 * `atomic_xchg` from spec.md §6 is deliberately not part of this trait:
 * C needed it because C has no atomics; `core::sync::atomic` already gives
 * every primitive here a real compare-and-swap, so threading it through an
 * extra indirection would only obscure the spinlock implementation.
 */

/// Opaque CPU context handle.
///
/// The actual register layout behind this handle belongs to the abstract
/// machine (the counterpart of the kernel's `InterruptContext`); the core
/// only ever stores, compares and forwards it, exactly as
/// `schedule_from_interrupt` in `scheduler/mod.rs` forwards a raw
/// `*const InterruptContext` without interpreting its fields.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Context(pub *mut u8);

// Safety: a Context is an opaque token handed between the AM and this core
// under the protection of `task_lock`/`os_trap_lock`; it is never
// dereferenced by the core itself.
unsafe impl Send for Context {}

impl Context {
    /// Sentinel used where a task genuinely has no context yet (Embryo,
    /// pre-`kcontext`, or the root sentinel).
    pub const NULL: Context = Context(core::ptr::null_mut());

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// The abstract machine contract consumed by this crate (spec.md §6).
///
/// Implementations are supplied by whoever links this crate: production
/// code provides one per target board; tests provide a software model
/// (`sim::SimAm`) that stands real OS threads in for CPUs.
pub trait Am: Send + Sync {
    /// Current CPU id, in `[0, config::MAX_CPU)`.
    fn cpu(&self) -> usize;

    /// Read the current interrupt-enable flag on this CPU.
    fn get_efl(&self) -> bool;

    /// Disable interrupt delivery on this CPU.
    fn cli(&self);

    /// Enable interrupt delivery on this CPU.
    fn sti(&self);

    /// Enable or disable interrupt delivery globally (used once at boot,
    /// spec.md §6's `intr_write`).
    fn intr_write(&self, on: bool);

    /// Raise a software trap carrying `event`, built from this CPU's own
    /// live context, hand the result of [`crate::trap::dispatch`] to the
    /// real (or simulated) context switch, and block until this CPU is
    /// resumed — possibly running a different task than the one that
    /// called `trap`.
    ///
    /// Every syscall this crate exposes (`Event::Yield`, `Event::Sleep`,
    /// `Event::SemSignal`) funnels through here; only the AM knows how to
    /// capture and restore a real (or simulated) CPU context, so only it
    /// can implement the int-0x80-then-`swtch`-equivalent sequence the
    /// original kernel inlines at each syscall site.
    fn trap(&self, event: crate::trap::Event);

    /// Build an initial CPU context over `stack` so that resuming it calls
    /// `entry(arg)`.
    fn kcontext(&self, stack: &mut [u8], entry: fn(usize), arg: usize) -> Context;
}

static AM: spin::Once<&'static dyn Am> = spin::Once::new();

/// Register the abstract machine implementation. Idempotent: later calls
/// are ignored, matching `log::set_logger`'s "first one wins" semantics.
pub fn set_am(am: &'static dyn Am) {
    AM.call_once(|| am);
}

/// Fetch the registered abstract machine.
///
/// # Panics
/// Panics if no implementation has been installed via [`set_am`]. Every
/// entry point into this crate runs after `os::init`, which requires an
/// `Am` to have been registered first.
pub fn am() -> &'static dyn Am {
    *AM.get().expect("Am not installed: call am::set_am() before using this crate")
}
