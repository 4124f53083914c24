use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pads and aligns a value to the length of a cache line.
#[cfg_attr(
    any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
    ),
    repr(align(128))
)]
#[cfg_attr(
    any(
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "riscv64",
    ),
    repr(align(32))
)]
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(
    not(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "riscv64",
        target_arch = "s390x",
    )),
    repr(align(64))
)]
#[derive(Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

// Returns a process-unique identifier for the current thread.
//
// `std::thread::ThreadId::as_u64` is unstable, so identifiers are handed out from a
// global counter instead. Zero is never returned and is free to act as an "unowned"
// sentinel.
pub fn thread_id() -> NonZeroU64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);

    thread_local! {
        static ID: NonZeroU64 = {
            // relaxed: only uniqueness matters
            let id = NEXT.fetch_add(1, Ordering::Relaxed);
            NonZeroU64::new(id).expect("thread id counter overflowed")
        };
    }

    ID.with(|id| *id)
}
