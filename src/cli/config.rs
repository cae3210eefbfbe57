//! Configuration file discovery
//!
//! The `espfactory.toml` file is looked up in the current directory, then in
//! its parent, and finally in the user's configuration directory.

use std::{env::current_dir, path::PathBuf};

use directories::ProjectDirs;
use log::debug;
use miette::{IntoDiagnostic, Result};

use crate::BuildEnv;

/// Name of the configuration file
pub const CONFIG_FILE: &str = "espfactory.toml";

/// Load the build configuration from `path`, or from the first configuration
/// file found when no path is given.
pub fn load(path: Option<PathBuf>) -> Result<BuildEnv> {
    let path = match path {
        Some(path) => path,
        None => find_config_path()?,
    };
    debug!("Loading configuration from {}", path.display());

    Ok(BuildEnv::load(&path)?)
}

fn find_config_path() -> Result<PathBuf> {
    let cwd = current_dir().into_diagnostic()?;

    let local_config = cwd.join(CONFIG_FILE);
    if local_config.exists() {
        return Ok(local_config);
    }
    if let Some(parent_folder) = cwd.parent() {
        let workspace_config = parent_folder.join(CONFIG_FILE);
        if workspace_config.exists() {
            return Ok(workspace_config);
        }
    }

    let global_config = ProjectDirs::from("rs", "esp", "espfactory")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
        .filter(|path| path.exists());

    // Without any configuration file the current directory is the project root
    Ok(global_config.unwrap_or(local_config))
}
