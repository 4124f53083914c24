#![deny(unsafe_op_in_unsafe_fn)]
#![doc = include_str!("../README.md")]

mod cfg;
mod counted;
mod stack;
mod utils;

pub mod hazard;

pub use counted::{CountedStack, MemoryOrder, Relaxed, RelaxedStack, Strict, StrictStack};
pub use hazard::{HazardStack, HazardStackBuilder, ResourceExhausted};
pub use stack::Stack;
