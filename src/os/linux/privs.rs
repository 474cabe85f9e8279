use std::io::Error;

use caps::{CapSet, Capability};
use log::debug;

/// Extra context for a failed `clone()`: an `EPERM` almost always means a missing
/// `CAP_SYS_ADMIN`, or a seccomp filter / LSM vetoing namespace creation despite it.
pub fn isolation_hint(err: &Error) -> String {
    if err.raw_os_error() != Some(libc::EPERM) {
        return String::new();
    }

    match caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_ADMIN) {
        Ok(false) => " (CAP_SYS_ADMIN is not in the effective capability set)".to_string(),
        Ok(true) => " (CAP_SYS_ADMIN is effective; namespace creation was denied by policy)"
            .to_string(),
        Err(e) => {
            debug!("unable to read capabilities: {}", e);
            String::new()
        }
    }
}
