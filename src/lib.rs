//! Factory image helpers for Espressif firmware builds
//!
//! `espfactory` is meant to be called from the hooks of a firmware build. It
//! reads the board's CSV partition table, locates (or downloads) a factory
//! image, places images at the offsets of their partitions, and merges the
//! factory and application images into a single binary which is then
//! uploaded in place of the application.
//!
//! ```no_run
//! use espfactory::{BuildEnv, FactoryLocator, NativeMerge, Orchestrator, PartitionTable};
//!
//! # fn main() -> Result<(), espfactory::Error> {
//! let env = BuildEnv::load("espfactory.toml".as_ref())?;
//! let table = PartitionTable::load_or_empty(env.partition_table_path().as_deref());
//! let factory = FactoryLocator::new(&env).locate();
//!
//! let merged = Orchestrator::new(&env, NativeMerge).merge(&table, factory.as_deref())?;
//! println!("{}", merged.display());
//! # Ok(())
//! # }
//! ```

pub use self::{
    config::BuildEnv,
    error::Error,
    esptool::Esptool,
    locator::{FactoryLocator, Fetch, HttpFetcher},
    merge::{MergeTool, NativeMerge, Orchestrator, UploadTarget},
    partition_table::{Partition, PartitionTable},
    plan::{ImagePlacement, ImagePlan},
};

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod esptool;
pub mod factory;
pub mod locator;
#[cfg(feature = "cli")]
pub mod logging;
pub mod merge;
pub mod partition_table;
pub mod plan;

mod error;
