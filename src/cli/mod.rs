//! Command-line interface
//!
//! Each subcommand corresponds to one build hook. Non-fatal conditions are
//! logged and the command succeeds, only a failing flashing tool (or an
//! unusable configuration) makes it exit with an error.

use std::path::PathBuf;

use clap::{builder::PossibleValuesParser, Args};
use log::warn;
use miette::{IntoDiagnostic, Result};
use strum::VariantNames;

use crate::{
    factory::{flash_factory, register_factory_image},
    BuildEnv, Esptool, FactoryLocator, ImagePlacement, NativeMerge, Orchestrator, PartitionTable,
    UploadTarget,
};

pub mod config;

/// Options shared by all subcommands
#[derive(Debug, Args)]
pub struct EnvArgs {
    /// Path of the configuration file
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// Name of the active build environment
    #[clap(long, global = true, env = "ESPFACTORY_ENV")]
    pub env_name: Option<String>,
    /// Target MCU, passed to esptool as `--chip`
    #[clap(long, global = true)]
    pub chip: Option<String>,
}

impl EnvArgs {
    /// Load the configuration and apply the command-line overrides
    pub fn build_env(&self) -> Result<BuildEnv> {
        let mut env = config::load(self.config.clone())?;

        if let Some(env_name) = &self.env_name {
            env.project.env_name = env_name.clone();
        }
        if let Some(chip) = &self.chip {
            env.board.mcu = chip.clone();
        }

        Ok(env)
    }
}

/// Print a partition table
#[derive(Debug, Args)]
pub struct PartitionTableArgs {
    /// CSV partition table, the configured one if omitted
    pub partition_table: Option<PathBuf>,
}

/// Merge the registered images, the factory image and the application image
#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Merge in-process instead of running `esptool merge_bin`
    #[clap(long)]
    pub native: bool,
}

/// Prepare the upload step and print the image it has to upload
#[derive(Debug, Args)]
pub struct UploadTargetArgs {
    /// How the merged image becomes the upload target
    #[clap(long, value_parser = PossibleValuesParser::new(UploadTarget::VARIANTS.iter().copied()))]
    pub strategy: Option<String>,
}

fn partition_table(env: &BuildEnv) -> PartitionTable {
    PartitionTable::load_or_empty(env.partition_table_path().as_deref())
}

pub fn print_partition_table(args: PartitionTableArgs, env: &BuildEnv) -> Result<()> {
    let table = match args.partition_table {
        Some(path) => PartitionTable::load(&path)?,
        None => match env.partition_table_path() {
            Some(path) => PartitionTable::load(&path)?,
            None => {
                warn!("No partition table configured");
                return Ok(());
            }
        },
    };

    table.pretty_print();

    Ok(())
}

pub fn locate(env: &BuildEnv) -> Result<()> {
    if let Some(path) = FactoryLocator::new(env).locate() {
        println!("{}", path.display());
    }

    Ok(())
}

pub fn register(env: &BuildEnv) -> Result<()> {
    let Some(factory) = FactoryLocator::new(env).locate() else {
        warn!("No factory image found, nothing registered");
        return Ok(());
    };

    let table = partition_table(env);
    let mut extra_images: Vec<ImagePlacement> = env
        .project
        .extra_images
        .iter()
        .map(|placement| placement.relative_to(env.project_dir()))
        .collect();

    if let Err(err) = register_factory_image(&mut extra_images, &table, &factory) {
        warn!("{err}");
        return Ok(());
    }
    for placement in &extra_images {
        println!("{placement}");
    }

    Ok(())
}

pub fn merge(args: MergeArgs, env: &BuildEnv) -> Result<()> {
    let table = partition_table(env);
    let factory = FactoryLocator::new(env).locate();

    let output = if args.native {
        Orchestrator::new(env, NativeMerge).merge(&table, factory.as_deref())?
    } else {
        Orchestrator::new(env, Esptool::from_env(env)).merge(&table, factory.as_deref())?
    };
    println!("{}", output.display());

    Ok(())
}

pub fn upload_target(args: UploadTargetArgs, env: &BuildEnv) -> Result<()> {
    let strategy = match args.strategy.as_deref() {
        Some(strategy) => strategy.parse::<UploadTarget>().into_diagnostic()?,
        None => env.upload.strategy,
    };

    match Orchestrator::new(env, NativeMerge).prepare_upload(strategy)? {
        Some(target) => println!("{}", target.display()),
        None => warn!("No merged image to upload, run `merge` first"),
    }

    Ok(())
}

pub fn flash(env: &BuildEnv) -> Result<()> {
    let Some(factory) = FactoryLocator::new(env).locate() else {
        warn!("No factory image found, skipping factory flashing");
        return Ok(());
    };

    let table = partition_table(env);
    Ok(flash_factory(env, &Esptool::from_env(env), &table, &factory)?)
}
