/// Helper macro to execute a system call, mapping `-1` to
/// [`std::io::Error::last_os_error`].
#[macro_export]
#[doc(hidden)]
macro_rules! syscall {
    ($e:expr) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { $e };
        if res == -1 {
            Err(::std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}
