//! Data directory and preference file for the beacon CLI.

use anyhow::{Context, Result};
use beacon_client::{Configuration, FilePreferenceStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Preference file name inside the data directory.
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Get the default data directory for beacon.
pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "beacon", "beacon")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Create the data directory (owner-only) if it does not exist.
pub async fn ensure_data_dir(data_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;
    set_dir_permissions_0700(data_dir).await
}

/// Open the persisted preferences in `data_dir`.
pub fn open_configuration(data_dir: &Path) -> Result<Configuration> {
    let path = data_dir.join(PREFERENCES_FILE);
    let store = FilePreferenceStore::open(&path)
        .with_context(|| format!("Failed to open preferences at {}", path.display()))?;
    Ok(Configuration::new(Arc::new(store)))
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
