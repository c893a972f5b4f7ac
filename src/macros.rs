macro_rules! static_assert {
    ($cond:expr, $msg:literal) => {
        const _: () = assert!($cond, $msg);
    };
    ($cond:expr) => {
        static_assert!($cond, "Static assertion failed");
    };
}

/// Reports a broken kernel invariant and halts the current thread of control.
/// Never use it for conditions a caller is expected to recover from.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        ::log::error!($($arg)+);
        panic!($($arg)+)
    }};
}

pub(crate) use fatal;
pub(crate) use static_assert;
