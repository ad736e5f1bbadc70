/// Log an allocator invariant violation and halt.
///
/// Corrupted allocator state cannot be recovered from: the message goes to the
/// kernel log first, then the panic handler takes the core down.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        ::log::error!($($arg)+);
        ::core::panic!($($arg)+)
    }};
}
