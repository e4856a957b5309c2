use crate::peer::Role;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    pub fn state_dir() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            Some(
                PathBuf::from(home)
                    .join(".local")
                    .join("state")
                    .join("pumprate"),
            )
        } else {
            ProjectDirs::from("", "", "pumprate")
                .map(|proj_dirs| proj_dirs.data_local_dir().to_path_buf())
        }
    }

    /// Each role keeps its own defaults, so a secondary on the same host
    /// never touches the primary's session or coefficient.
    pub fn db_path_in(state_dir: &Path, role: Role) -> PathBuf {
        state_dir.join(format!("defaults-{role}.db"))
    }

    pub fn log_dir() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("logs"))
    }
}
