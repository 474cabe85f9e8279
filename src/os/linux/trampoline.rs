use std::ffi::{CString, OsStr};
use std::io::Error;
use std::os::unix::ffi::OsStrExt;
use std::ptr;

use libc::{c_char, c_int, c_void};
use log::debug;

use super::mount::MountSetup;
use crate::error::LaunchError;
use crate::protocol::{LaunchConfig, CALLBACK_EXECUTABLE, PROCESS_NAME};

/// Status the child exits with when the payload could not be found.
pub const EXEC_NOT_FOUND_STATUS: c_int = 127;
/// Status the child exits with when the payload exists but could not be executed.
pub const EXEC_FAILED_STATUS: c_int = 126;
/// Status the child exits with when mount namespace setup failed.
pub const SETUP_FAILED_STATUS: c_int = 125;

const SETUP_FAILURE: &[u8] = b"ERROR [process_cloner] mount namespace setup failed: os error ";

/// Everything the trampoline needs to replace itself with the payload, built ahead of the
/// clone so the child does no allocation or formatting on its small stack.
///
/// The pointer arrays point into the heap buffers of the owned `CString`s, which stay put
/// when the `HandOff` itself moves.
#[derive(Debug)]
pub struct HandOff {
    path: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
    mount_setup: MountSetup,
    exec_failure: Vec<u8>,
}

impl HandOff {
    pub fn prepare(config: &LaunchConfig, mount_setup: MountSetup) -> Result<Self, LaunchError> {
        let path = to_cstring(config.callback_executable().as_os_str(), CALLBACK_EXECUTABLE)?;
        let argv = vec![to_cstring(OsStr::new(PROCESS_NAME), "argv[0]")?];

        let envp = config
            .payload_environment()
            .iter()
            .map(|&(key, value)| env_entry(key, value))
            .collect::<Result<Vec<_>, _>>()?;

        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);
        let exec_failure = format!(
            "ERROR [process_cloner] execve({:?}) as {:?} failed: os error ",
            path, PROCESS_NAME
        )
        .into_bytes();

        let handoff = HandOff {
            path,
            argv,
            envp,
            argv_ptrs,
            envp_ptrs,
            mount_setup,
            exec_failure,
        };
        debug!(
            "hand-off prepared: exec {:?} as {:?} with {} variables",
            handoff.path,
            handoff.argv[0],
            handoff.envp.len()
        );
        Ok(handoff)
    }

    /// Runs inside the child. Only returns if the payload could not be started.
    ///
    /// The child owns 8 KiB of stack, which `log` and `fmt` can exhaust on their own, so
    /// failures are reported with bare `write(2)` calls.
    fn enter(&self) -> c_int {
        if let Err(e) = self.mount_setup.apply() {
            report(SETUP_FAILURE, e.raw_os_error().unwrap_or(0));
            return SETUP_FAILED_STATUS;
        }

        unsafe {
            libc::execve(
                self.path.as_ptr(),
                self.argv_ptrs.as_ptr(),
                self.envp_ptrs.as_ptr(),
            );
        }

        let errno = Error::last_os_error().raw_os_error().unwrap_or(0);
        report(&self.exec_failure, errno);
        exec_failure_status(errno)
    }
}

/// Child entry point handed to `clone()`. `arg` must point at a live `HandOff`.
pub extern "C" fn trampoline(arg: *mut c_void) -> c_int {
    let handoff = unsafe { &*(arg as *const HandOff) };
    handoff.enter()
}

fn exec_failure_status(errno: c_int) -> c_int {
    match errno {
        libc::ENOENT => EXEC_NOT_FOUND_STATUS,
        _ => EXEC_FAILED_STATUS,
    }
}

fn report(prefix: &[u8], errno: c_int) {
    let mut buf = [0u8; 12];
    let digits = errno_digits(errno, &mut buf);
    write_stderr(prefix);
    write_stderr(digits);
    write_stderr(b"\n");
}

// Best effort: a closed or full stderr must not change the exit status.
fn write_stderr(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let n = unsafe {
            libc::write(
                libc::STDERR_FILENO,
                bytes.as_ptr() as *const c_void,
                bytes.len(),
            )
        };
        if n <= 0 {
            return;
        }
        bytes = &bytes[n as usize..];
    }
}

fn errno_digits(errno: c_int, buf: &mut [u8; 12]) -> &[u8] {
    let mut n = errno.unsigned_abs();
    let mut start = buf.len();
    loop {
        start -= 1;
        buf[start] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &buf[start..]
}

fn to_cstring(value: &OsStr, name: &'static str) -> Result<CString, LaunchError> {
    CString::new(value.as_bytes()).map_err(|_| LaunchError::InvalidParameter(name))
}

// Sized for `key=value` plus the nul terminator, so `CString::new` never reallocates.
fn env_entry(key: &'static str, value: &OsStr) -> Result<CString, LaunchError> {
    let value = value.as_bytes();
    let mut entry = Vec::with_capacity(key.len() + 1 + value.len() + 1);
    entry.extend_from_slice(key.as_bytes());
    entry.push(b'=');
    entry.extend_from_slice(value);
    CString::new(entry).map_err(|_| LaunchError::InvalidParameter(key))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(Some(ptr::null()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::clone::clone_process;
    use super::super::stack::ChildStack;
    use super::*;
    use crate::process::ExitOutcome;
    use crate::util;
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    fn prepare(config: &LaunchConfig) -> HandOff {
        HandOff::prepare(config, MountSetup::Inherit).unwrap()
    }

    #[test]
    fn argv_is_only_the_sentinel() {
        let a = prepare(&LaunchConfig::new("/bin/true", "x", "t1"));
        let b = prepare(&LaunchConfig::new("/usr/local/bin/other", "y", "t2"));
        assert_eq!(a.argv, vec![CString::new(PROCESS_NAME).unwrap()]);
        assert_eq!(a.argv, b.argv);
        assert_eq!(a.argv_ptrs.len(), 2);
        assert!(a.argv_ptrs[1].is_null());
    }

    #[test]
    fn envp_holds_exactly_the_two_reencoded_entries() {
        let handoff = prepare(&LaunchConfig::new("/bin/true", "x", "t1"));
        let entries: Vec<_> = handoff.envp.iter().map(|e| e.to_str().unwrap()).collect();
        assert_eq!(entries, vec!["packed_torigoya_content=x", "debug_tag=t1"]);
        assert_eq!(handoff.envp_ptrs.len(), 3);
        assert!(handoff.envp_ptrs[2].is_null());
        assert_eq!(handoff.envp_ptrs[0], handoff.envp[0].as_ptr());
    }

    #[test]
    fn values_are_passed_through_byte_for_byte() {
        let content = OsString::from_vec(b"a=b c\xff\n".to_vec());
        let handoff = prepare(&LaunchConfig::new("/bin/true", content, ""));
        assert_eq!(
            handoff.envp[0].as_bytes(),
            &b"packed_torigoya_content=a=b c\xff\n"[..]
        );
        assert_eq!(handoff.envp[1].as_bytes(), b"debug_tag=");
    }

    #[test]
    fn env_entry_is_sized_exactly() {
        let entry = env_entry("debug_tag", OsStr::new("t1")).unwrap();
        assert_eq!(entry.as_bytes_with_nul().len(), "debug_tag=t1".len() + 1);
    }

    #[test]
    fn interior_nul_is_rejected_before_any_clone() {
        let config = LaunchConfig::new("/bin/true", OsString::from_vec(b"x\0y".to_vec()), "t");
        match HandOff::prepare(&config, MountSetup::Inherit) {
            Err(LaunchError::InvalidParameter(name)) => assert_eq!(name, "packed_torigoya_content"),
            other => panic!("unexpected {:?}", other),
        }

        let config = LaunchConfig::new(OsString::from_vec(b"/bin/\0true".to_vec()), "x", "t");
        match HandOff::prepare(&config, MountSetup::Inherit) {
            Err(LaunchError::InvalidParameter(name)) => assert_eq!(name, CALLBACK_EXECUTABLE),
            other => panic!("unexpected {:?}", other),
        }
    }

    // A failing execve returns to the caller, so these run safely in the test process.
    #[test]
    fn missing_payload_returns_not_found_status() {
        let handoff = prepare(&LaunchConfig::new("/nonexistent/payload", "x", "t"));
        assert_eq!(handoff.enter(), EXEC_NOT_FOUND_STATUS);
    }

    #[test]
    fn non_executable_payload_returns_failed_status() {
        let handoff = prepare(&LaunchConfig::new("/", "x", "t"));
        assert_eq!(handoff.enter(), EXEC_FAILED_STATUS);
    }

    #[test]
    fn exec_failure_message_is_built_ahead_of_time() {
        let handoff = prepare(&LaunchConfig::new("/nonexistent/payload", "x", "t"));
        let msg = String::from_utf8(handoff.exec_failure.clone()).unwrap();
        assert!(msg.starts_with("ERROR [process_cloner] execve(\"/nonexistent/payload\")"));
        assert!(msg.contains(PROCESS_NAME));
        assert!(msg.ends_with("os error "));
    }

    #[test]
    fn errno_digits_are_rendered_without_fmt() {
        let mut buf = [0u8; 12];
        assert_eq!(errno_digits(0, &mut buf), b"0");
        assert_eq!(errno_digits(libc::ENOENT, &mut buf), b"2");
        assert_eq!(errno_digits(libc::EACCES, &mut buf), b"13");
        assert_eq!(errno_digits(c_int::MAX, &mut buf), b"2147483647");
    }

    #[test]
    fn exec_failure_status_follows_errno() {
        assert_eq!(exec_failure_status(libc::ENOENT), EXEC_NOT_FOUND_STATUS);
        assert_eq!(exec_failure_status(libc::EACCES), EXEC_FAILED_STATUS);
        assert_eq!(exec_failure_status(libc::ENOEXEC), EXEC_FAILED_STATUS);
    }

    // Runs the trampoline the way the launcher does: in a cloned child on the guarded 8 KiB
    // stack. Touching the guard page kills the child with SIGSEGV instead of an exit code.
    fn status_on_child_stack(path: &str) -> ExitOutcome {
        let handoff = prepare(&LaunchConfig::new(path, "x", "t"));
        let mut stack = ChildStack::new().unwrap();
        let pid = unsafe {
            clone_process(
                libc::SIGCHLD,
                stack.top(),
                trampoline,
                &handoff as *const HandOff as *mut c_void,
            )
        }
        .unwrap();

        let mut status = 0;
        util::check_syscall_retry(|| unsafe { libc::waitpid(pid, &mut status, 0) }).unwrap();
        ExitOutcome::from_raw(status)
    }

    #[test]
    fn missing_payload_fits_the_child_stack() {
        let outcome = status_on_child_stack("/nonexistent/payload");
        assert_eq!(outcome.signal(), None);
        assert_eq!(outcome.code(), Some(EXEC_NOT_FOUND_STATUS));
    }

    #[test]
    fn non_executable_payload_fits_the_child_stack() {
        let outcome = status_on_child_stack("/");
        assert_eq!(outcome.signal(), None);
        assert_eq!(outcome.code(), Some(EXEC_FAILED_STATUS));
    }
}
