use std::io::Error;
use std::ptr;

use libc::c_char;

use crate::util;

const ROOT: *const c_char = b"/\x00".as_ptr() as *const c_char;
const PROC: *const c_char = b"proc\x00".as_ptr() as *const c_char;
const PROC_DIR: *const c_char = b"/proc\x00".as_ptr() as *const c_char;

/// What the trampoline does with its fresh mount namespace before exec. Runs in the child on
/// its small stack, so nothing here logs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MountSetup {
    /// Keep the copy of the launcher's mount table as-is.
    Inherit,
    /// Stop mount propagation to the host and mount a procfs matching the new PID namespace.
    PrivateProc,
}

impl Default for MountSetup {
    fn default() -> Self {
        MountSetup::Inherit
    }
}

impl MountSetup {
    pub(crate) fn apply(self) -> Result<(), Error> {
        match self {
            MountSetup::Inherit => Ok(()),
            MountSetup::PrivateProc => unsafe { mount_private_proc() },
        }
    }
}

unsafe fn mount_private_proc() -> Result<(), Error> {
    // Mounts in a shared peer group would otherwise show up in the launcher's namespace too.
    util::check_syscall(libc::mount(
        ptr::null(),
        ROOT,
        ptr::null(),
        libc::MS_REC | libc::MS_PRIVATE,
        ptr::null(),
    ))?;

    util::check_syscall(libc::mount(
        PROC,
        PROC_DIR,
        PROC,
        libc::MS_NOSUID | libc::MS_NODEV | libc::MS_NOEXEC,
        ptr::null(),
    ))?;

    Ok(())
}
