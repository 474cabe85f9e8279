//! Launches a payload executable inside fresh PID, mount, network, IPC and UTS namespaces.
//!
//! The payload sees a single constant argv entry ([`PROCESS_NAME`]) and an environment holding
//! only `packed_torigoya_content` and `debug_tag`.

use libc::c_int;
use log::info;

pub use self::error::{LaunchError, Result};
pub use self::os::{IdMap, MountSetup};
pub use self::process::{Child, ExitOutcome};
pub use self::protocol::{LaunchConfig, PROCESS_NAME};

pub mod process;
pub mod protocol;

mod error;
mod os;
mod util;

/// Which namespaces the isolated child is cloned into.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IsolationFlags {
    pid: bool,
    mount: bool,
    net: bool,
    ipc: bool,
    uts: bool,
    user: bool,
}

impl IsolationFlags {
    /// Everything but a user namespace. User namespace id mapping is not enabled yet.
    pub const STANDARD: IsolationFlags = IsolationFlags {
        pid: true,
        mount: true,
        net: true,
        ipc: true,
        uts: true,
        user: false,
    };

    pub fn user(&self) -> bool {
        self.user
    }

    /// Names of the requested namespaces as they appear under `/proc/<pid>/ns`.
    pub fn namespaces(&self) -> impl Iterator<Item = &'static str> {
        let requested = [
            (self.pid, "pid"),
            (self.mount, "mnt"),
            (self.net, "net"),
            (self.ipc, "ipc"),
            (self.uts, "uts"),
            (self.user, "user"),
        ];
        requested
            .into_iter()
            .filter(|&(enabled, _)| enabled)
            .map(|(_, name)| name)
    }

    /// Raw `clone()` flags, including `SIGCHLD` as the termination signal and `CLONE_UNTRACED`.
    pub fn to_clone_flags(&self) -> c_int {
        let mut flags = libc::SIGCHLD | libc::CLONE_UNTRACED;
        if self.pid {
            flags |= libc::CLONE_NEWPID;
        }
        if self.mount {
            flags |= libc::CLONE_NEWNS;
        }
        if self.net {
            flags |= libc::CLONE_NEWNET;
        }
        if self.ipc {
            flags |= libc::CLONE_NEWIPC;
        }
        if self.uts {
            flags |= libc::CLONE_NEWUTS;
        }
        if self.user {
            flags |= libc::CLONE_NEWUSER;
        }
        flags
    }
}

#[derive(Clone, Debug)]
pub struct Launcher {
    config: LaunchConfig,
    mount_setup: MountSetup,
}

impl Launcher {
    pub fn new(config: LaunchConfig) -> Self {
        Launcher {
            config,
            mount_setup: MountSetup::default(),
        }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn mount_setup(&mut self, setup: MountSetup) -> &mut Self {
        self.mount_setup = setup;
        self
    }

    /// Clones the isolated child and returns without waiting for it.
    ///
    /// The child is a copy of the calling thread only. Call this from a single-threaded program,
    /// or make sure no other thread holds the allocator, stderr or environment locks, or the
    /// child can deadlock before it reaches the payload.
    pub fn spawn(&self) -> Result<Child> {
        let handoff = os::HandOff::prepare(&self.config, self.mount_setup)?;
        let stack = os::ChildStack::new().map_err(LaunchError::StackAllocation)?;
        os::create_isolated_process(IsolationFlags::STANDARD, stack, &handoff)
    }

    /// Spawns the payload and blocks until it terminates.
    pub fn launch(&self) -> Result<ExitOutcome> {
        let mut child = self.spawn()?;
        let outcome = child.wait()?;
        info!("exit status of child {}: {}", child.id(), outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_flags_isolate_everything_but_users() {
        let flags = IsolationFlags::STANDARD.to_clone_flags();
        for ns in &[
            libc::CLONE_NEWPID,
            libc::CLONE_NEWNS,
            libc::CLONE_NEWNET,
            libc::CLONE_NEWIPC,
            libc::CLONE_NEWUTS,
        ] {
            assert_eq!(flags & ns, *ns);
        }
        assert_eq!(flags & libc::CLONE_NEWUSER, 0);
        assert!(!IsolationFlags::STANDARD.user());
    }

    #[test]
    fn standard_flags_request_sigchld_and_no_tracing() {
        let flags = IsolationFlags::STANDARD.to_clone_flags();
        assert_eq!(flags & 0xff, libc::SIGCHLD);
        assert_eq!(flags & libc::CLONE_UNTRACED, libc::CLONE_UNTRACED);
        assert_eq!(flags & libc::CLONE_VM, 0);
    }

    #[test]
    fn namespace_names_match_proc_entries() {
        let names: Vec<_> = IsolationFlags::STANDARD.namespaces().collect();
        assert_eq!(names, vec!["pid", "mnt", "net", "ipc", "uts"]);
    }

    #[test]
    fn invalid_parameters_fail_before_spawning() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let config = LaunchConfig::new("/bin/true", "x", OsString::from_vec(b"t\0".to_vec()));
        match Launcher::new(config).spawn() {
            Err(LaunchError::InvalidParameter(name)) => assert_eq!(name, "debug_tag"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
