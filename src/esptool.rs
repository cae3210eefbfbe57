//! Invocation of the external `esptool` flashing tool

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::Command,
};

use log::{debug, info};

use crate::{
    config::BuildEnv,
    error::Error,
    plan::{ImagePlacement, ImagePlan},
};

/// Arguments of `merge_bin`, in the order esptool expects them
pub fn merge_bin_args(chip: &str, output: &Path, plan: &ImagePlan) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--chip".into(),
        chip.into(),
        "merge_bin".into(),
        "-o".into(),
        output.into(),
    ];
    for placement in plan {
        args.push(placement.offset().into());
        args.push(placement.path().into());
    }

    args
}

/// Arguments of `write_flash` for a single image
pub fn write_flash_args(
    baud: u32,
    chip: &str,
    port: &str,
    placement: &ImagePlacement,
) -> Vec<OsString> {
    vec![
        "--baud".into(),
        baud.to_string().into(),
        "--chip".into(),
        chip.into(),
        "--port".into(),
        port.into(),
        "write_flash".into(),
        placement.offset().into(),
        placement.path().into(),
    ]
}

/// The esptool executable and the directory it is run from
#[derive(Debug, Clone)]
pub struct Esptool {
    program: String,
    current_dir: Option<PathBuf>,
}

impl Esptool {
    pub fn new(program: impl Into<String>) -> Self {
        Esptool {
            program: program.into(),
            current_dir: None,
        }
    }

    /// The configured tool, run from the project directory
    pub fn from_env(env: &BuildEnv) -> Self {
        let mut tool = Self::new(env.tools.esptool.clone());
        tool.current_dir = Some(env.project_dir().to_path_buf());
        tool
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Write a single image to the device
    pub fn write_flash(
        &self,
        baud: u32,
        chip: &str,
        port: &str,
        placement: &ImagePlacement,
    ) -> Result<(), Error> {
        self.run(&write_flash_args(baud, chip, port, placement))
    }

    /// Run the tool with `args`, failing unless it exits successfully
    pub fn run(&self, args: &[OsString]) -> Result<(), Error> {
        let mut cmd = self.command();
        cmd.args(args);
        debug!("Running command: {cmd:?}");

        let status = cmd.status().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => Error::ToolNotFound(self.program.clone()),
            _ => Error::IoError(err),
        })?;

        if !status.success() {
            return Err(Error::ToolFailed {
                tool: self.program.clone(),
                code: status.code(),
            });
        }
        info!("{} finished successfully", self.program);

        Ok(())
    }

    fn command(&self) -> Command {
        // `python path/to/esptool.py` is configured as a single string
        let mut parts = self.program.split_whitespace();
        let mut cmd = Command::new(parts.next().unwrap_or_default());
        cmd.args(parts);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        cmd
    }
}

impl Default for Esptool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ESPTOOL)
    }
}
