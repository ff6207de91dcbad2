use std::{io, mem};

use fibrio_driver::{syscall, RawFd};

/// Lazy probe state for `TCP_CORK` support on one descriptor.
///
/// Corking batches small writes into full TCP segments. Whether the
/// descriptor supports it is only discovered on the first write; pipes and
/// other non-TCP devices land in `Disabled` and skip the option entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorkState {
    /// Not probed yet.
    #[default]
    Unknown,
    /// The descriptor rejected `TCP_CORK`; writes go out unbatched.
    Disabled,
    /// The descriptor is corked; `flush` forces pending bytes out.
    Enabled,
}

/// Set `TCP_CORK` on `fd`.
pub(crate) fn set_cork(fd: RawFd, enabled: bool) -> io::Result<()> {
    let value: libc::c_int = enabled.into();
    syscall!(libc::setsockopt(
        fd,
        libc::IPPROTO_TCP,
        libc::TCP_CORK,
        std::ptr::addr_of!(value).cast(),
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))?;
    Ok(())
}
