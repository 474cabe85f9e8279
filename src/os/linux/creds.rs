use std::io::{Error, ErrorKind, Write};

use libc::pid_t;
use log::debug;
use openat::Dir;

/// One line of a `uid_map` / `gid_map`: `count` ids starting at `inside` in the child's user
/// namespace map onto ids starting at `outside` in the launcher's.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IdMap {
    pub inside: u32,
    pub outside: u32,
    pub count: u32,
}

impl IdMap {
    pub fn single(inside: u32, outside: u32) -> Self {
        IdMap {
            inside,
            outside,
            count: 1,
        }
    }

    /// Maps root in the child onto the launcher's real uid.
    pub fn root_to_current_uid() -> Self {
        IdMap::single(0, unsafe { libc::getuid() })
    }

    /// Maps root in the child onto the launcher's real gid.
    pub fn root_to_current_gid() -> Self {
        IdMap::single(0, unsafe { libc::getgid() })
    }

    fn render(&self) -> String {
        format!("{} {} {}\n", self.inside, self.outside, self.count)
    }
}

/// Writes the id maps of a child that was cloned into a new user namespace. `setgroups` is
/// denied first, which unprivileged writers of `gid_map` are required to do.
pub fn write_id_maps(pid: pid_t, uid_map: IdMap, gid_map: IdMap) -> Result<(), Error> {
    let proc = Dir::open("/proc")
        .map_err(|_| Error::new(ErrorKind::Other, "Unable to open /proc dir"))?;
    let ns_dir = proc.sub_dir(pid.to_string().as_str())?;

    ns_dir
        .update_file("uid_map", 0)
        .and_then(|mut file| file.write_all(uid_map.render().as_bytes()))
        .map_err(|e| Error::new(e.kind(), format!("Failed to set up uid map: {}", e)))?;

    if let Err(err) = ns_dir
        .update_file("setgroups", 0)
        .and_then(|mut file| file.write_all(b"deny\n"))
    {
        // Kernels older than 3.19 have no setgroups file.
        if err.kind() != ErrorKind::NotFound {
            return Err(Error::new(err.kind(), "Error writing to setgroups"));
        }
    }

    ns_dir
        .update_file("gid_map", 0)
        .and_then(|mut file| file.write_all(gid_map.render().as_bytes()))
        .map_err(|e| Error::new(e.kind(), format!("Failed to set up gid map: {}", e)))?;

    debug!("wrote id maps for {}: {:?} {:?}", pid, uid_map, gid_map);
    Ok(())
}
