//! Library and application errors

use std::{io, path::PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// All possible errors returned by espfactory
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("No partition table found at {}", .0.display())]
    #[diagnostic(
        code(espfactory::partition_table_not_found),
        help("Set `project.partitions` in espfactory.toml to the CSV partition table of the board")
    )]
    PartitionTableNotFound(PathBuf),

    #[error("No offset found for partition: {0}")]
    #[diagnostic(
        code(espfactory::partition_not_found),
        help("Add a partition with this name to the partition table")
    )]
    PartitionNotFound(String),

    #[error("Partition '{0}' is located at offset zero")]
    #[diagnostic(
        code(espfactory::zero_offset),
        help("Offset zero is reserved for the bootloader, images are never placed there")
    )]
    ZeroOffset(String),

    #[error("Invalid offset or size literal: '{0}'")]
    #[diagnostic(
        code(espfactory::invalid_offset),
        help("Offsets and sizes are written as hexadecimal (0x10000), decimal (65536) or with a K/M multiplier (64K)")
    )]
    InvalidOffset(String),

    #[error("Factory binary {} does not exist", .0.display())]
    #[diagnostic(code(espfactory::factory_binary_missing))]
    FactoryBinaryMissing(PathBuf),

    #[error("No factory binary specified for environment: {0}")]
    #[diagnostic(
        code(espfactory::no_factory_source),
        help("Set `factory.binary` to a local binary or `factory.url` to download one")
    )]
    NoFactorySource(String),

    #[error("No download directory configured for the factory binary")]
    #[diagnostic(
        code(espfactory::download_dir_not_configured),
        help("Set `factory.download_dir` in espfactory.toml")
    )]
    DownloadDirNotConfigured,

    #[error("Download directory {} does not exist", .0.display())]
    #[diagnostic(
        code(espfactory::download_dir_missing),
        help("Create the directory before building, it is never created automatically")
    )]
    DownloadDirMissing(PathBuf),

    #[error("Environment name '{env_name}' does not end with '{suffix}'")]
    #[diagnostic(
        code(espfactory::unexpected_environment_name),
        help("The factory download name is derived by replacing the suffix of the environment name")
    )]
    UnexpectedEnvironmentName { env_name: String, suffix: String },

    #[error("Failed to download {url}")]
    #[diagnostic(code(espfactory::download_failed))]
    DownloadFailed {
        url: String,
        #[source]
        source: Box<ureq::Transport>,
    },

    #[error("Download of {url} failed with HTTP status {status}")]
    #[diagnostic(code(espfactory::http_status))]
    HttpStatus { url: String, status: u16 },

    #[error("No images to merge")]
    #[diagnostic(
        code(espfactory::empty_plan),
        help("Neither the factory nor the application partition could be resolved")
    )]
    EmptyPlan,

    #[error("Image {second} overlaps image {first}")]
    #[diagnostic(code(espfactory::overlapping_images))]
    OverlappingImages { first: String, second: String },

    #[error("Tool '{0}' could not be found")]
    #[diagnostic(
        code(espfactory::tool_not_found),
        help("Install esptool or set `tools.esptool` in espfactory.toml")
    )]
    ToolNotFound(String),

    #[error("Tool '{tool}' failed with {}", exit_code(.code))]
    #[diagnostic(code(espfactory::tool_failed))]
    ToolFailed { tool: String, code: Option<i32> },

    #[error("No upload port configured")]
    #[diagnostic(
        code(espfactory::missing_upload_port),
        help("Set `board.upload_port` in espfactory.toml")
    )]
    MissingUploadPort,

    #[error("No upload speed configured")]
    #[diagnostic(
        code(espfactory::missing_upload_speed),
        help("Set `board.upload_speed` in espfactory.toml")
    )]
    MissingUploadSpeed,

    #[error("Failed to parse configuration file {}", .0.display())]
    #[diagnostic(code(espfactory::invalid_config))]
    InvalidConfig(PathBuf, #[source] toml::de::Error),

    #[error("Invalid image placement '{0}', expected '<offset> <path>'")]
    #[diagnostic(code(espfactory::invalid_placement))]
    InvalidPlacement(String),

    #[error("Failed to open file: {0}")]
    FileOpenError(String, #[source] io::Error),

    #[error(transparent)]
    IoError(#[from] io::Error),
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => String::from("no exit code (terminated by signal)"),
    }
}
