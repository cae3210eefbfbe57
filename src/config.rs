//! Build environment configuration
//!
//! The [BuildEnv] type describes everything the surrounding build system
//! exposes to the helpers: project and build directories, the active build
//! environment, board metadata, and the factory image sources. It is loaded
//! from an `espfactory.toml` file and handed to each component by reference.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{error::Error, merge::UploadTarget, plan::ImagePlacement};

/// Default base name of the application binary produced by the build
pub const DEFAULT_PROGRAM_NAME: &str = "firmware";
/// Default name of the external flashing tool
pub const DEFAULT_ESPTOOL: &str = "esptool.py";

/// Complete configuration of one build invocation
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct BuildEnv {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub factory: FactoryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Project layout
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProjectConfig {
    /// Project root; relative paths in this file are resolved against it
    #[serde(default)]
    pub dir: PathBuf,
    /// Directory holding the build output of the active environment
    #[serde(default)]
    pub build_dir: PathBuf,
    /// Name of the active build environment, e.g. `esp32_app`
    #[serde(default)]
    pub env_name: String,
    /// Base name of the application binary inside `build_dir`
    #[serde(default = "default_program_name")]
    pub program_name: String,
    /// Path of the CSV partition table
    #[serde(default)]
    pub partitions: Option<PathBuf>,
    /// Images already registered for flashing, as `<offset> <path>`
    #[serde(default)]
    pub extra_images: Vec<ImagePlacement>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            dir: PathBuf::new(),
            build_dir: PathBuf::new(),
            env_name: String::new(),
            program_name: default_program_name(),
            partitions: None,
            extra_images: Vec::new(),
        }
    }
}

fn default_program_name() -> String {
    DEFAULT_PROGRAM_NAME.into()
}

/// Board metadata
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct BoardConfig {
    /// MCU identifier passed to the flashing tool as `--chip`
    #[serde(default)]
    pub mcu: String,
    /// Baud rate used when writing to the device
    #[serde(default)]
    pub upload_speed: Option<u32>,
    /// Serial port of the device
    #[serde(default)]
    pub upload_port: Option<String>,
}

/// Sources of the factory image
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct FactoryConfig {
    /// Base name of a local factory binary in the project root, without `.bin`
    #[serde(default)]
    pub binary: String,
    /// Base URL the factory binary is downloaded from
    #[serde(default)]
    pub url: Option<String>,
    /// Existing directory downloads are stored in
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

/// External tools
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_esptool")]
    pub esptool: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig {
            esptool: default_esptool(),
        }
    }
}

fn default_esptool() -> String {
    DEFAULT_ESPTOOL.into()
}

/// How the upload step is pointed at the merged image
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct UploadConfig {
    #[serde(default)]
    pub strategy: UploadTarget,
}

impl BuildEnv {
    /// Parse a configuration from its TOML representation
    pub fn from_toml(data: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(data)
    }

    /// Load the configuration file at `path`.
    ///
    /// A missing file yields the default configuration rooted at the file's
    /// directory. An empty `project.dir` is replaced by that directory too,
    /// relative ones are resolved against it.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut env = match read_to_string(path) {
            Ok(data) => {
                Self::from_toml(&data).map_err(|e| Error::InvalidConfig(path.to_path_buf(), e))?
            }
            Err(_) => {
                debug!("No configuration at {}, using defaults", path.display());
                Self::default()
            }
        };

        env.project.dir = base.join(&env.project.dir);
        debug!("Config: {:#?}", &env);

        Ok(env)
    }

    /// Project root
    pub fn project_dir(&self) -> &Path {
        &self.project.dir
    }

    /// Resolve a project-relative path
    pub fn project_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.project.dir.join(path)
    }

    /// Build output directory
    pub fn build_dir(&self) -> PathBuf {
        self.project_path(&self.project.build_dir)
    }

    /// Path of the partition table, if one is configured
    pub fn partition_table_path(&self) -> Option<PathBuf> {
        self.project
            .partitions
            .as_ref()
            .map(|path| self.project_path(path))
    }

    /// Path of the application binary produced by the build
    pub fn app_image_path(&self) -> PathBuf {
        self.build_dir()
            .join(format!("{}.bin", self.project.program_name))
    }
}
