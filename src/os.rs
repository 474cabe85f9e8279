#[cfg(target_os = "linux")]
pub use self::linux::{create_isolated_process, ChildStack, HandOff, IdMap, MountSetup};

#[cfg(target_os = "linux")]
mod linux;

#[cfg(not(target_os = "linux"))]
compile_error!("process_cloner relies on Linux namespaces and only builds for Linux targets");
