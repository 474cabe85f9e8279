use std::process;

use libc::{c_void, pid_t};
use log::{info, warn};

use crate::error::LaunchError;
use crate::process::Child;
use crate::{util, IsolationFlags};

pub use self::creds::IdMap;
pub use self::mount::MountSetup;
pub use self::stack::ChildStack;
pub use self::trampoline::HandOff;

mod clone;
mod creds;
mod mount;
mod privs;
mod stack;
mod trampoline;

/// Clones a child into the namespaces selected by `flags`, running the trampoline for
/// `handoff` on `stack`. The returned handle keeps the stack alive until it is dropped.
///
/// `clone()` only duplicates the calling thread. Any lock another thread holds at that moment
/// (allocator, stderr, environment) stays locked forever in the child, so callers in
/// multi-threaded programs must make sure none are held.
pub fn create_isolated_process(
    flags: IsolationFlags,
    mut stack: ChildStack,
    handoff: &HandOff,
) -> Result<Child, LaunchError> {
    clone::check_namespace_support(&flags)?;

    info!("clone begin - parent PID: {}", process::id());
    let pid = unsafe {
        clone::clone_process(
            flags.to_clone_flags(),
            stack.top(),
            trampoline::trampoline,
            handoff as *const HandOff as *mut c_void,
        )
    }
    .map_err(|source| LaunchError::IsolationCreation {
        hint: privs::isolation_hint(&source),
        source,
    })?;
    info!("clone end - parent PID: {}, child PID: {}", process::id(), pid);

    let mut child = Child::from_parts(pid, stack);

    if flags.user() {
        // TODO: the child needs a barrier so it cannot exec before these maps are written.
        let written = creds::write_id_maps(
            pid,
            IdMap::root_to_current_uid(),
            IdMap::root_to_current_gid(),
        );
        if let Err(source) = written {
            reap_abandoned(&mut child);
            return Err(LaunchError::IsolationCreation {
                source,
                hint: " (while writing user namespace id maps)".to_string(),
            });
        }
    }

    Ok(child)
}

/// Kills and reaps a child that will not be handed to the caller.
fn reap_abandoned(child: &mut Child) {
    let pid = child.id() as pid_t;
    if let Err(e) = util::check_syscall(unsafe { libc::kill(pid, libc::SIGKILL) }) {
        warn!("failed to kill abandoned child {}: {}", pid, e);
    }
    if let Err(e) = child.wait() {
        warn!("failed to reap abandoned child {}: {}", pid, e);
    }
}
