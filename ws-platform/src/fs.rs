//! Permission-aware filesystem helpers.

use std::io;
use std::path::Path;

/// Mark a file executable by its owner (no-op on Windows).
pub fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o700);
        std::fs::set_permissions(path, permissions)?;
    }

    #[cfg(not(unix))]
    {
        std::fs::metadata(path)?;
    }

    Ok(())
}

/// Create a directory tree readable only by the current user.
pub fn create_private_dir_all(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(path)
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(path)
    }
}

/// Present in a plugin's install directory once its first-run setup has
/// happened. Left behind when the plugin is uninstalled so it is not
/// installed again automatically.
pub const SETUP_LOCK_FILE: &str = "initial-setup.lock";

pub fn is_setup_locked(install_dir: &Path) -> bool {
    install_dir.join(SETUP_LOCK_FILE).is_file()
}

/// Create `install_dir` if needed and put the setup lock in it.
pub fn write_setup_lock(install_dir: &Path) -> io::Result<()> {
    create_private_dir_all(install_dir)?;
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(install_dir.join(SETUP_LOCK_FILE))?;
    Ok(())
}
