/*
 * Counting semaphore
 *
 * Ported from `original_source/kernel/src/semaphore.c`. Built entirely on
 * top of the spinlock and trap dispatcher already in this crate — there is
 * no separate wait-queue data structure, exactly as in the original: the
 * task table's own `Sleeping`/`alarm` bookkeeping (`kmt::sleep_handler`,
 * `kmt::sem_signal_handler`) is the wait queue.
 */

use core::sync::atomic::{AtomicI64, Ordering};

use crate::am::am;
use crate::spinlock::Spinlock;
use crate::trap::Event;

/// A counting semaphore (spec.md §4.4).
///
/// `wait`/`signal` take `&self`, not `&mut self`: like [`Spinlock`], the
/// whole point of a semaphore is concurrent access from multiple tasks,
/// serialized by `lock` rather than by Rust's borrow checker.
///
/// The alarm channel used to tell a semaphore's waiters apart from every
/// other sleeper in the task table is the semaphore's own address, taken
/// at each call site the same way `original_source/kernel/src/semaphore.c`
/// passes `sem` itself as the `%ebx` syscall argument.
pub struct Semaphore {
    lock: Spinlock,
    name: &'static str,
    value: AtomicI64,
}

impl Semaphore {
    /// Build a semaphore in the unlocked state with the given initial
    /// value. `const fn` so semaphores can live in `static`s.
    pub const fn new(name: &'static str, value: i64) -> Self {
        Semaphore {
            lock: Spinlock::new(name),
            name,
            value: AtomicI64::new(value),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn alarm(&self) -> usize {
        self as *const Semaphore as usize
    }

    /// Block until the semaphore's value is positive, then decrement it.
    ///
    /// Mirrors `semaphore_wait`'s `while (sem->value <= 0) { syscall }`
    /// loop: every wakeup re-checks the value under the lock rather than
    /// assuming the wakeup means it's this waiter's turn, which is what
    /// lets one `signal` correctly satisfy exactly one waiter even when
    /// several are sleeping on the same alarm.
    pub fn wait(&self) {
        self.lock.acquire();
        while self.value.load(Ordering::SeqCst) <= 0 {
            // `Am::trap` releases `self.lock` (spec.md §4.2 step 2) before
            // putting this task to sleep, and reacquires it for us once
            // the task is scheduled again — we resume holding the lock,
            // exactly as `semaphore_wait` does on return from `int $0x80`.
            am().trap(Event::Sleep {
                alarm: self.alarm(),
                lock: &self.lock as *const Spinlock,
            });
        }
        self.value.fetch_sub(1, Ordering::SeqCst);
        self.lock.release();
    }

    /// Increment the semaphore's value and wake every task sleeping on it.
    pub fn signal(&self) {
        self.lock.acquire();
        self.value.fetch_add(1, Ordering::SeqCst);
        am().trap(Event::SemSignal { alarm: self.alarm() });
        self.lock.release();
    }

    /// Current value, for diagnostics only — racy the instant it's read
    /// without holding the lock, same caveat as reading `sem->value`
    /// directly in the original.
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}
