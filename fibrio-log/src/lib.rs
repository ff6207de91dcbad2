//! Logging facade shared by the fibrio crates.
//!
//! By default every macro in this crate expands to nothing, so the reactor
//! and runtime carry no logging overhead in release builds. Enabling the
//! `enable_log` feature routes each macro to its [`tracing`] counterpart;
//! the application then installs whatever subscriber it likes.

#[doc(hidden)]
pub use tracing;
pub use tracing::Level;

/// Enter a span for the duration of the current scope.
#[cfg(feature = "enable_log")]
#[macro_export]
macro_rules! instrument {
    ($lvl:expr, $name:expr $(, $($fields:tt)*)?) => {
        let _guard = $crate::tracing::span!(target: module_path!(), $lvl, $name $(, $($fields)*)?).entered();
    };
}

/// Enter a span for the duration of the current scope.
#[cfg(not(feature = "enable_log"))]
#[macro_export]
macro_rules! instrument {
    ($($args:tt)*) => {};
}

#[cfg(feature = "enable_log")]
mod emit {
    #[macro_export]
    macro_rules! trace {
        ($($args:tt)*) => { $crate::tracing::trace!($($args)*) };
    }

    #[macro_export]
    macro_rules! debug {
        ($($args:tt)*) => { $crate::tracing::debug!($($args)*) };
    }

    #[macro_export]
    macro_rules! info {
        ($($args:tt)*) => { $crate::tracing::info!($($args)*) };
    }

    #[macro_export]
    macro_rules! warn {
        ($($args:tt)*) => { $crate::tracing::warn!($($args)*) };
    }

    #[macro_export]
    macro_rules! error {
        ($($args:tt)*) => { $crate::tracing::error!($($args)*) };
    }
}

#[cfg(not(feature = "enable_log"))]
mod emit {
    #[macro_export]
    macro_rules! trace {
        ($($args:tt)*) => {};
    }

    #[macro_export]
    macro_rules! debug {
        ($($args:tt)*) => {};
    }

    #[macro_export]
    macro_rules! info {
        ($($args:tt)*) => {};
    }

    #[macro_export]
    macro_rules! warn {
        ($($args:tt)*) => {};
    }

    #[macro_export]
    macro_rules! error {
        ($($args:tt)*) => {};
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn macros_expand() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);
        crate::instrument!(crate::Level::TRACE, "macros_expand");
        crate::trace!("trace message");
        crate::debug!("debug {}", 42);
        crate::info!(value = 1, "info");
        crate::warn!("warn");
        crate::error!("error");
    }
}
