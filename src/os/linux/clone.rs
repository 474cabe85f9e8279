use std::fs;
use std::io::Error;
use std::path::Path;

use libc::{c_int, c_void, pid_t};
use log::debug;

use crate::error::LaunchError;
use crate::{util, IsolationFlags};

pub type Entry = extern "C" fn(*mut c_void) -> c_int;

const NS_DIR: &str = "/proc/self/ns";

/// Fails early when the kernel does not expose one of the requested namespace types. Hosts
/// without a mounted `/proc` are let through and left to `clone()` to judge.
pub fn check_namespace_support(flags: &IsolationFlags) -> Result<(), LaunchError> {
    let ns_dir = Path::new(NS_DIR);
    if !ns_dir.is_dir() {
        debug!("{} is not readable, skipping namespace preflight", NS_DIR);
        return Ok(());
    }

    check_namespace_entries(ns_dir, flags.namespaces())?;
    debug!("namespace preflight passed for {:?}", flags);
    Ok(())
}

fn check_namespace_entries(
    ns_dir: &Path,
    names: impl Iterator<Item = &'static str>,
) -> Result<(), LaunchError> {
    for name in names {
        fs::symlink_metadata(ns_dir.join(name))
            .map_err(|_| LaunchError::NamespaceUnsupported(name))?;
    }
    Ok(())
}

/// Starts `entry(arg)` in a new process running on `stack`.
///
/// Without `CLONE_VM` the child receives a copy-on-write image of the caller, so `arg` and
/// everything it points to only has to stay valid until this call returns.
pub unsafe fn clone_process(
    flags: c_int,
    stack: *mut c_void,
    entry: Entry,
    arg: *mut c_void,
) -> Result<pid_t, Error> {
    util::check_syscall(libc::clone(entry, stack, flags, arg))
}
