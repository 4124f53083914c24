#![allow(dead_code)]

use std::sync::OnceLock;

use treiber::hazard::Domain;
use treiber::{HazardStack, RelaxedStack, Stack, StrictStack};

pub type BoxStack<T> = Box<dyn Stack<T> + Send + Sync>;

// Run the test on every stack backend.
pub fn with_stack<T: Send + 'static>(mut test: impl FnMut(&dyn Fn() -> BoxStack<T>)) {
    // Hazard pointers in the global domain.
    test(&(|| -> BoxStack<T> { Box::new(HazardStack::new()) }));

    // Hazard pointers in a private domain that defers reclamation, keeping retired
    // nodes around while other threads are still traversing.
    if !cfg!(treiber_stress) {
        test(
            &(|| -> BoxStack<T> {
                Box::new(HazardStack::builder().domain(batched_domain()).build())
            }),
        );
    }

    // Split reference counting with sequentially consistent operations.
    test(&(|| -> BoxStack<T> { Box::new(StrictStack::new()) }));

    // Split reference counting with the minimal orderings.
    test(&(|| -> BoxStack<T> { Box::new(RelaxedStack::new()) }));
}

// A domain that runs a reclamation pass every 64 pops.
pub fn batched_domain() -> &'static Domain {
    static DOMAIN: OnceLock<Domain> = OnceLock::new();
    DOMAIN.get_or_init(|| Domain::builder().batch_size(64).build())
}

// Prints a log message if `RUST_LOG=debug` is set.
#[macro_export]
macro_rules! debug {
    ($($x:tt)*) => {
        if std::env::var("RUST_LOG").as_deref() == Ok("debug") {
            println!($($x)*);
        }
    };
}

// Returns the number of threads to use for stress testing.
//
// Tests run in parallel and every popping thread holds a hazard slot of the global
// domain until it exits, so this stays well below its capacity.
pub fn threads() -> usize {
    if cfg!(miri) {
        2
    } else {
        num_cpus::get_physical().next_power_of_two().clamp(4, 8)
    }
}
