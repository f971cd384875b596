/*
 * kmt-core: the concurrency substrate of a small teaching kernel —
 * interrupt-disabling spinlocks, a priority-ordered trap/event dispatcher,
 * kernel multi-threading (task table + least-run-count scheduler), and
 * counting semaphores built on top of the other three.
 *
 * This crate owns none of a kernel's boot sequence, memory management,
 * drivers, or filesystem; it assumes a thin abstract-machine layer
 * beneath it ([`am::Am`]) and is itself `no_std` outside of `cargo test`,
 * where it links `std` to run its scenarios on a software-simulated
 * multi-CPU harness ([`sim`]) instead of real hardware.
 */

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod am;
pub mod config;
pub mod error;
pub mod kmt;
pub mod sem;
pub mod spinlock;
pub mod task;
pub mod trap;

#[cfg(test)]
pub mod sim;


pub use am::{set_am, Am};
pub use sem::Semaphore;
pub use task::Pid;

/// Bring up the concurrency substrate: install the abstract machine, then
/// initialize the trap dispatcher's dependents in the order spec.md §2
/// requires (spinlocks have no init step; the trap dispatcher's own state
/// is ready the moment its `static`s run; KMT is the first thing that
/// actually registers handlers, so it must run before anything calls
/// `kmt::create` or blocks on a [`Semaphore`]).
///
/// Grounded on the old `main.rs`'s `kstart` sequence, trimmed to only the
/// steps this crate's scope still owns.
pub fn init(implementation: &'static dyn Am) {
    am::set_am(implementation);
    kmt::init();
    log::info!("kmt-core: concurrency substrate initialized");
}
