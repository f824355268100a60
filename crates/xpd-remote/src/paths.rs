use std::path::{Path, PathBuf};

use xpd_core::{ErrorInfo, XpdError};

/// The current user's home directory.
pub fn home_dir() -> Result<PathBuf, XpdError> {
    dirs::home_dir().ok_or_else(|| {
        XpdError::Config(ErrorInfo::new(
            "home_unknown",
            "could not determine home directory",
        ))
    })
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> Result<PathBuf, XpdError> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(home_dir()?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Joins remote path segments with `/`, leaving `~` for the remote shell.
pub fn remote_join(base: &str, segment: impl AsRef<str>) -> String {
    let segment = segment.as_ref().trim_matches('/');
    if segment.is_empty() || segment == "." {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), segment)
}
