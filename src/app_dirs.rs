use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    pub fn db_path() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            let state_dir = PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("vigil");
            Some(state_dir.join("vigil.db"))
        } else {
            ProjectDirs::from("", "", "vigil")
                .map(|proj_dirs| proj_dirs.data_local_dir().join("vigil.db"))
        }
    }
}
