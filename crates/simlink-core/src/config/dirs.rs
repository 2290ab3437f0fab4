//! Where SimLink looks for its config file.

use directories::ProjectDirs;
use std::path::PathBuf;

const CONFIG_FILE: &str = "config.json";

/// `config.json` in the platform config directory, or under
/// `$TMPDIR/simlink` when no home directory is known.
#[must_use]
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "simlink")
        .map_or_else(
            || std::env::temp_dir().join("simlink"),
            |project| project.config_dir().to_path_buf(),
        )
        .join(CONFIG_FILE)
}
