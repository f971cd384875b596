/*
 * Compile-time configuration
 *
 * Mirrors the kernel's `scheduler::{THREAD_STACK_SIZE, MAX_THREADS}` pattern:
 * fixed `pub const`s rather than a runtime config object, because there is no
 * on-disk or CLI configuration surface at this layer (spec.md §6).
 */

/// Maximum number of CPUs the task table and per-CPU bookkeeping support.
pub const MAX_CPU: usize = 8;

/// Bytes of usable kernel stack embedded in each task record.
pub const STACK_SIZE: usize = 16 * 1024;

/// Size in bytes of each of the two fence regions bracketing a task's stack.
pub const FENCE_SIZE: usize = 32;

/// Byte pattern a fence region is filled with at task creation.
pub const FENCE_BYTE: u8 = 0xCC;

/// Byte pattern the usable stack area is filled with at task creation
/// (`original_source/kernel/src/thread.c`'s `FILL_STACK`). Never inspected
/// for correctness, only useful when dumping a core by hand.
pub const STACK_FILL_BYTE: u8 = 0x00;
