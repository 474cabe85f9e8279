use std::fmt::{Display, Formatter, Result as FmtResult};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use libc::{c_int, pid_t};
use log::debug;

use crate::error::{LaunchError, Result};
use crate::os::ChildStack;
use crate::util;

/// How the isolated child terminated, decoded from the raw `waitpid` status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExitOutcome(ExitStatus);

impl ExitOutcome {
    pub fn from_raw(status: c_int) -> Self {
        ExitOutcome(ExitStatus::from_raw(status))
    }

    /// True only if the child exited normally with code zero. A signal never counts.
    pub fn success(&self) -> bool {
        self.0.code() == Some(0)
    }

    pub fn code(&self) -> Option<i32> {
        self.0.code()
    }

    pub fn signal(&self) -> Option<i32> {
        self.0.signal()
    }

    pub fn into_raw(self) -> c_int {
        self.0.into_raw()
    }

    pub fn into_result(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(LaunchError::PayloadExit(self))
        }
    }
}

impl Display for ExitOutcome {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match (self.code(), self.signal()) {
            (Some(code), _) => write!(fmt, "exit code {}", code),
            (None, Some(signal)) => write!(fmt, "signal {}", signal),
            (None, None) => write!(fmt, "raw status {:#x}", self.into_raw()),
        }
    }
}

/// Handle to the isolated child. Owns the stack the child was cloned onto, so the stack is only
/// released once the handle is dropped.
#[derive(Debug)]
pub struct Child {
    pid: pid_t,
    status: Option<ExitOutcome>,
    _stack: ChildStack,
}

impl Child {
    pub(crate) fn from_parts(pid: pid_t, stack: ChildStack) -> Self {
        Child {
            pid,
            status: None,
            _stack: stack,
        }
    }

    pub fn id(&self) -> u32 {
        self.pid as u32
    }

    /// Blocks until the child terminates. There is no timeout.
    pub fn wait(&mut self) -> Result<ExitOutcome> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let mut status = 0 as c_int;
        util::check_syscall_retry(|| unsafe { libc::waitpid(self.pid, &mut status, 0) }).map_err(
            |source| LaunchError::Wait {
                pid: self.id(),
                source,
            },
        )?;

        let outcome = ExitOutcome::from_raw(status);
        debug!("child {} reaped with raw status {:#x}", self.pid, status);
        self.status = Some(outcome);
        Ok(outcome)
    }
}
