/*
 * Fail-fast assertions
 *
 * Every invariant in spec.md §3/§4 is enforced with `kassert!`, which logs
 * the diagnostic at `error` level (the way the kernel's `#[panic_handler]`
 * in `main.rs` logs the panic location before halting) and then panics.
 * There is no recoverable path for these — `original_source`'s `Assert`
 * macro halts the same way, and spec.md §7 calls every one of these a
 * fatal kernel assertion.
 */

/// Log and panic with a formatted diagnostic. Mirrors the `Assert(cond, fmt,
/// ...)` macro in `original_source/kernel/src/spinlock.c` and friends: the
/// condition is checked first so the message is only built on the failing
/// path.
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            log::error!($($arg)+);
            panic!($($arg)+);
        }
    };
}

/// Unconditional fatal diagnostic. Mirrors `original_source`'s `Panic(fmt, ...)`.
#[macro_export]
macro_rules! kpanic {
    ($($arg:tt)+) => {{
        log::error!($($arg)+);
        panic!($($arg)+)
    }};
}
