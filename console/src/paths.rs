/// Canonical file paths for proctor-console data files.
///
/// Both files live in the application directory:
///   - config.toml  Written by the operator, read by the console.
///   - status.toml  Written by the console, read by a dashboard. Placed next
///                  to whichever config file is in use.
///
/// The directory is `$PROCTOR_CONSOLE_HOME` when set, otherwise
/// `proctor-console` under the platform config directory.
use std::path::PathBuf;

use anyhow::{bail, Result};

const APP_DIR_NAME: &str = "proctor-console";
pub const HOME_ENV: &str = "PROCTOR_CONSOLE_HOME";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the application directory.
pub fn app_data_dir() -> Result<PathBuf> {
    app_data_dir_from(|key| std::env::var(key).ok())
}

/// Resolves the application directory using `var` to read the environment.
fn app_data_dir_from(var: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    let set = |key: &str| var(key).filter(|v| !v.is_empty());

    if let Some(home) = set(HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    if let Some(appdata) = set("APPDATA") {
        return Ok(PathBuf::from(appdata).join(APP_DIR_NAME));
    }
    if let Some(xdg) = set("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join(APP_DIR_NAME));
    }
    if let Some(home) = set("HOME") {
        return Ok(PathBuf::from(home).join(".config").join(APP_DIR_NAME));
    }
    bail!("cannot locate a config directory; set {HOME_ENV}")
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join(CONFIG_FILE_NAME))
}
