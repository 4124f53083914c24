// Log an event with the id of the calling thread, the same id that owns its hazard
// slots. Compiles to nothing without the `tracing` feature.
macro_rules! trace {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        #[cfg(feature = "tracing")]
        tracing::trace!(
            concat!("thread {}: ", $fmt),
            $crate::utils::thread_id() $(, $arg)*
        );
    };
}

pub(crate) use trace;
