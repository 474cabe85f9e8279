//! The environment hand-off between the invoker, the launcher and the payload.
//!
//! The invoker starts the launcher with exactly three variables set. The payload is started with
//! only two of them, re-encoded, and a single constant argv entry.

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{LaunchError, Result};

pub const CALLBACK_EXECUTABLE: &str = "callback_executable";
pub const PACKED_TORIGOYA_CONTENT: &str = "packed_torigoya_content";
pub const DEBUG_TAG: &str = "debug_tag";

/// The payload's only argv entry, shown in process listings instead of its real name.
pub const PROCESS_NAME: &str = "d=(^o^)=b";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchConfig {
    callback_executable: PathBuf,
    packed_torigoya_content: OsString,
    debug_tag: OsString,
}

impl LaunchConfig {
    pub fn new<P, C, T>(callback_executable: P, packed_torigoya_content: C, debug_tag: T) -> Self
    where
        P: Into<PathBuf>,
        C: Into<OsString>,
        T: Into<OsString>,
    {
        LaunchConfig {
            callback_executable: callback_executable.into(),
            packed_torigoya_content: packed_torigoya_content.into(),
            debug_tag: debug_tag.into(),
        }
    }

    /// Reads the three required parameters from this process's environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars_os())
    }

    /// Reads the three required parameters from an arbitrary set of variables. Everything else
    /// in `vars` is ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: Into<OsString>,
    {
        let mut callback_executable = None;
        let mut packed_torigoya_content = None;
        let mut debug_tag = None;

        for (key, value) in vars {
            let slot = match key.as_ref().to_str() {
                Some(CALLBACK_EXECUTABLE) => &mut callback_executable,
                Some(PACKED_TORIGOYA_CONTENT) => &mut packed_torigoya_content,
                Some(DEBUG_TAG) => &mut debug_tag,
                _ => continue,
            };
            *slot = Some(value.into());
        }

        let callback_executable =
            callback_executable.ok_or(LaunchError::MissingParameter(CALLBACK_EXECUTABLE))?;
        let packed_torigoya_content =
            packed_torigoya_content.ok_or(LaunchError::MissingParameter(PACKED_TORIGOYA_CONTENT))?;
        let debug_tag = debug_tag.ok_or(LaunchError::MissingParameter(DEBUG_TAG))?;

        Ok(LaunchConfig {
            callback_executable: PathBuf::from(callback_executable),
            packed_torigoya_content,
            debug_tag,
        })
    }

    pub fn callback_executable(&self) -> &Path {
        &self.callback_executable
    }

    pub fn packed_torigoya_content(&self) -> &OsStr {
        &self.packed_torigoya_content
    }

    pub fn debug_tag(&self) -> &OsStr {
        &self.debug_tag
    }

    /// The complete environment the payload is started with.
    pub fn payload_environment(&self) -> [(&'static str, &OsStr); 2] {
        [
            (PACKED_TORIGOYA_CONTENT, self.packed_torigoya_content.as_os_str()),
            (DEBUG_TAG, self.debug_tag.as_os_str()),
        ]
    }

    /// Encodes this config onto a command that starts the launcher binary. The command's
    /// environment is cleared first, so only the three parameters reach the launcher.
    pub fn apply_to<'a>(&self, command: &'a mut Command) -> &'a mut Command {
        command
            .env_clear()
            .env(CALLBACK_EXECUTABLE, &self.callback_executable)
            .env(PACKED_TORIGOYA_CONTENT, &self.packed_torigoya_content)
            .env(DEBUG_TAG, &self.debug_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("PATH", "/usr/bin:/bin"),
            (CALLBACK_EXECUTABLE, "/bin/true"),
            (PACKED_TORIGOYA_CONTENT, "x"),
            ("HOME", "/root"),
            (DEBUG_TAG, "t1"),
        ]
    }

    #[test]
    fn reads_required_parameters() {
        let config = LaunchConfig::from_vars(full_vars()).unwrap();
        assert_eq!(config, LaunchConfig::new("/bin/true", "x", "t1"));
    }

    #[test]
    fn each_parameter_is_required() {
        for missing in &[CALLBACK_EXECUTABLE, PACKED_TORIGOYA_CONTENT, DEBUG_TAG] {
            let vars = full_vars().into_iter().filter(|(k, _)| k != missing);
            match LaunchConfig::from_vars(vars) {
                Err(LaunchError::MissingParameter(name)) => assert_eq!(name, *missing),
                other => panic!("expected missing `{}`, got {:?}", missing, other),
            }
        }
    }

    #[test]
    fn empty_values_count_as_present() {
        let vars = vec![
            (CALLBACK_EXECUTABLE, "/bin/true"),
            (PACKED_TORIGOYA_CONTENT, ""),
            (DEBUG_TAG, ""),
        ];
        let config = LaunchConfig::from_vars(vars).unwrap();
        assert!(config.packed_torigoya_content().is_empty());
        assert!(config.debug_tag().is_empty());
    }

    #[test]
    fn payload_environment_excludes_callback_executable() {
        let config = LaunchConfig::from_vars(full_vars()).unwrap();
        let env = config.payload_environment();
        let keys: Vec<_> = env.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![PACKED_TORIGOYA_CONTENT, DEBUG_TAG]);
        assert_eq!(env[0].1, "x");
        assert_eq!(env[1].1, "t1");
    }

    #[test]
    fn apply_to_sets_exactly_three_variables() {
        let config = LaunchConfig::new("/bin/true", "x", "t1");
        let mut command = Command::new("process_cloner");
        command.env("LEAKED", "yes");
        config.apply_to(&mut command);

        let mut envs: Vec<_> = command
            .get_envs()
            .filter_map(|(k, v)| v.map(|v| (k.to_os_string(), v.to_os_string())))
            .collect();
        envs.sort();
        assert_eq!(
            envs,
            vec![
                (CALLBACK_EXECUTABLE.into(), "/bin/true".into()),
                (DEBUG_TAG.into(), "t1".into()),
                (PACKED_TORIGOYA_CONTENT.into(), "x".into()),
            ]
        );
    }
}
