//! Service user resolution.

use crate::errors::{BootResult, SystemError};
use nix::unistd::{Uid, User};
use std::path::{Path, PathBuf};

/// Password database entry of the user the service runs as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
}

impl TargetUser {
    /// Resolve `path` against the home directory unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home.join(path)
        }
    }
}

impl From<User> for TargetUser {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
            shell: user.shell,
        }
    }
}

/// Look up the password database entry for `uid`.
pub fn lookup_user(uid: u32) -> BootResult<TargetUser> {
    let user = User::from_uid(Uid::from_raw(uid))
        .map_err(|e| SystemError::UserLookup {
            uid,
            source: e.into(),
        })?
        .ok_or(SystemError::UnknownUser(uid))?;

    tracing::debug!(uid, name = %user.name, home = %user.dir.display(), "Resolved service user");
    Ok(user.into())
}
