//! Factory image registration and flashing
//!
//! Before upload the factory image is registered as an extra flash image so
//! that it is written together with the application. After upload it can also
//! be written on its own.

use std::path::Path;

use log::info;

use crate::{
    config::BuildEnv,
    error::Error,
    esptool::Esptool,
    merge::FACTORY_PARTITION,
    partition_table::PartitionTable,
    plan::{ImagePlacement, ImagePlan},
};

/// Place the factory image at the `factory` partition and append it to the
/// extra flash images of the build.
pub fn register_factory_image(
    extra_images: &mut Vec<ImagePlacement>,
    table: &PartitionTable,
    factory: &Path,
) -> Result<ImagePlacement, Error> {
    let mut plan = ImagePlan::new();
    let placement = plan.place(table, FACTORY_PARTITION, factory)?.clone();

    info!("Registered factory image {placement}");
    extra_images.push(placement.clone());

    Ok(placement)
}

/// Write the factory image to the connected device
pub fn flash_factory(
    env: &BuildEnv,
    tool: &Esptool,
    table: &PartitionTable,
    factory: &Path,
) -> Result<(), Error> {
    let mut plan = ImagePlan::new();
    let placement = plan.place(table, FACTORY_PARTITION, factory)?;

    let port = env
        .board
        .upload_port
        .as_deref()
        .ok_or(Error::MissingUploadPort)?;
    let baud = env.board.upload_speed.ok_or(Error::MissingUploadSpeed)?;

    info!("Flashing factory image {placement}");
    tool.write_flash(baud, &env.board.mcu, port, placement)
}
