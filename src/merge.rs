//! Merging the factory and application images into one binary
//!
//! A build runs the stages in this order:
//!
//! 1. resolve the `factory` and `app` offsets from the partition table,
//! 2. build the section list: registered extra images, factory, application,
//! 3. print the section table,
//! 4. invoke the merge tool once,
//! 5. before upload, point the upload step at the merged image.
//!
//! Only a failing merge tool aborts the build, uploading the unmerged
//! application would ship the wrong image.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

use crate::{
    config::BuildEnv,
    error::Error,
    esptool::{merge_bin_args, Esptool},
    partition_table::{parse_offset, PartitionTable},
    plan::{ImagePlacement, ImagePlan},
};

/// Partition holding the factory image
pub const FACTORY_PARTITION: &str = "factory";
/// Partition holding the application image
pub const APP_PARTITION: &str = "app";
/// Program name of the merged image
pub const MERGED_PROGRAM_NAME: &str = "merged-firmware";

/// Value of erased flash, used to fill the gaps between images
const ERASED: u8 = 0xFF;

/// Combines the images of a plan into a single binary
pub trait MergeTool {
    fn merge(&self, chip: &str, output: &Path, plan: &ImagePlan) -> Result<(), Error>;
}

impl MergeTool for Esptool {
    fn merge(&self, chip: &str, output: &Path, plan: &ImagePlan) -> Result<(), Error> {
        self.run(&merge_bin_args(chip, output, plan))
    }
}

/// In-process merging, equivalent to `esptool merge_bin` without flash
/// parameter patching: images are written at their offsets starting from
/// address zero and gaps are filled with `0xFF`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeMerge;

impl NativeMerge {
    /// Merge the images of `plan` into a buffer
    pub fn merge_to_vec(plan: &ImagePlan) -> Result<Vec<u8>, Error> {
        let mut images = Vec::with_capacity(plan.len());
        for placement in plan {
            let offset = parse_offset(placement.offset())?;
            let data = fs::read(placement.path())
                .map_err(|e| Error::FileOpenError(placement.path().display().to_string(), e))?;
            images.push((offset as usize, placement, data));
        }
        images.sort_by_key(|(offset, ..)| *offset);

        let mut merged = Vec::new();
        let mut previous: Option<&ImagePlacement> = None;
        for (offset, placement, data) in &images {
            if *offset < merged.len() {
                let first = previous.map(ToString::to_string).unwrap_or_default();
                return Err(Error::OverlappingImages {
                    first,
                    second: placement.to_string(),
                });
            }

            merged.resize(*offset, ERASED);
            merged.extend_from_slice(data);
            previous = Some(*placement);
        }

        Ok(merged)
    }
}

impl MergeTool for NativeMerge {
    fn merge(&self, chip: &str, output: &Path, plan: &ImagePlan) -> Result<(), Error> {
        let merged = Self::merge_to_vec(plan)?;
        fs::write(output, &merged)
            .map_err(|e| Error::FileOpenError(output.display().to_string(), e))?;
        info!(
            "Wrote {} byte {chip} image to {}",
            merged.len(),
            output.display()
        );

        Ok(())
    }
}

/// How the upload step is made to use the merged image
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString, VariantNames, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum UploadTarget {
    /// Upload `merged-firmware.bin` instead of the application binary
    #[default]
    RenameProgram,
    /// Move the merged image over the application binary
    ReplaceFirmware,
}

/// Result of [replace_firmware]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The merged image now sits at the application binary's path
    Replaced,
    /// There was no merged image, nothing was changed
    MergedImageMissing(PathBuf),
}

/// Move `merged` over `firmware`, deleting `firmware` first.
///
/// Does nothing when `merged` does not exist, so repeating it is harmless.
pub fn replace_firmware(firmware: &Path, merged: &Path) -> Result<ReplaceOutcome, Error> {
    if !merged.exists() {
        warn!("New firmware not found: {}", merged.display());
        return Ok(ReplaceOutcome::MergedImageMissing(merged.to_path_buf()));
    }

    if firmware.exists() {
        fs::remove_file(firmware)?;
        info!("Removed old firmware: {}", firmware.display());
    } else {
        debug!("No old firmware found to remove");
    }

    fs::rename(merged, firmware)?;
    info!("Replaced firmware successfully");

    Ok(ReplaceOutcome::Replaced)
}

/// Drives the merge of one build
pub struct Orchestrator<'a, T> {
    env: &'a BuildEnv,
    tool: T,
    program_name: String,
}

impl<'a, T> Orchestrator<'a, T>
where
    T: MergeTool,
{
    pub fn new(env: &'a BuildEnv, tool: T) -> Self {
        Orchestrator {
            env,
            tool,
            program_name: env.project.program_name.clone(),
        }
    }

    /// Program name the upload step refers to
    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// Path of the merged image
    pub fn merged_image_path(&self) -> PathBuf {
        self.env
            .build_dir()
            .join(format!("{MERGED_PROGRAM_NAME}.bin"))
    }

    /// Section list: registered extra images, then the factory image, then
    /// the application image. Images without a partition are left out.
    pub fn plan(&self, table: &PartitionTable, factory: Option<&Path>) -> ImagePlan {
        let project_dir = self.env.project_dir();
        let mut plan: ImagePlan = self
            .env
            .project
            .extra_images
            .iter()
            .map(|placement| placement.relative_to(project_dir))
            .collect();

        match factory {
            Some(factory) => {
                plan.try_place(table, FACTORY_PARTITION, factory);
            }
            None => warn!("No factory image found, merging without it"),
        }
        plan.try_place(table, APP_PARTITION, self.env.app_image_path());

        plan
    }

    /// Merge all images into [Orchestrator::merged_image_path]
    pub fn merge(&self, table: &PartitionTable, factory: Option<&Path>) -> Result<PathBuf, Error> {
        info!("Merging factory and firmware binaries ...");

        let plan = self.plan(table, factory);
        if plan.is_empty() {
            return Err(Error::EmptyPlan);
        }

        println!("\n{}\n", plan.section_table());

        let output = self.merged_image_path();
        self.tool.merge(&self.env.board.mcu, &output, &plan)?;

        Ok(output)
    }

    /// Point the upload step at the merged image and return the path it has
    /// to upload.
    ///
    /// With [UploadTarget::ReplaceFirmware] nothing is returned when there is
    /// no merged image to move into place.
    pub fn prepare_upload(&mut self, strategy: UploadTarget) -> Result<Option<PathBuf>, Error> {
        match strategy {
            UploadTarget::RenameProgram => {
                self.program_name = MERGED_PROGRAM_NAME.to_string();
                info!("Changed program name to {MERGED_PROGRAM_NAME} for upload");

                Ok(Some(self.merged_image_path()))
            }
            UploadTarget::ReplaceFirmware => {
                let firmware = self.env.app_image_path();
                match replace_firmware(&firmware, &self.merged_image_path())? {
                    ReplaceOutcome::Replaced => Ok(Some(firmware)),
                    ReplaceOutcome::MergedImageMissing(_) => Ok(None),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, str::FromStr};

    use pretty_assertions::assert_eq;

    use super::*;

    const PTABLE: &str = "
nvs,      data, nvs,   0x9000,  0x5000,
factory,  app,  ota_0, 0x10000, 0x1E0000
app,      app,  ota_1, 0x1F0000, 0x1E0000
";

    #[derive(Default)]
    struct RecordingTool {
        calls: RefCell<Vec<(String, PathBuf, ImagePlan)>>,
    }

    impl MergeTool for &RecordingTool {
        fn merge(&self, chip: &str, output: &Path, plan: &ImagePlan) -> Result<(), Error> {
            self.calls
                .borrow_mut()
                .push((chip.to_string(), output.to_path_buf(), plan.clone()));
            Ok(())
        }
    }

    struct FailingTool;

    impl MergeTool for FailingTool {
        fn merge(&self, _: &str, _: &Path, _: &ImagePlan) -> Result<(), Error> {
            Err(Error::ToolFailed {
                tool: String::from("esptool.py"),
                code: Some(2),
            })
        }
    }

    fn env() -> BuildEnv {
        let mut env = BuildEnv::default();
        env.project.dir = PathBuf::from("/p");
        env.project.build_dir = PathBuf::from("build");
        env.board.mcu = String::from("esp32");
        env.project.extra_images = vec![ImagePlacement::new("0x1000", "bootloader.bin")];
        env
    }

    #[test]
    fn test_plan_order() {
        let env = env();
        let table = PartitionTable::from_csv(PTABLE);
        let orchestrator = Orchestrator::new(&env, NativeMerge);

        let plan = orchestrator.plan(&table, Some(Path::new("/p/factory.bin")));
        let sections: Vec<String> = plan.iter().map(ToString::to_string).collect();

        assert_eq!(
            sections,
            [
                "0x1000 /p/bootloader.bin",
                "0x10000 /p/factory.bin",
                "0x1F0000 /p/build/firmware.bin",
            ]
        );
    }

    #[test]
    fn test_plan_without_app_partition() {
        let env = env();
        let table = PartitionTable::from_csv("factory,app,ota_0,0x10000,0x1E0000");
        let orchestrator = Orchestrator::new(&env, NativeMerge);

        let plan = orchestrator.plan(&table, Some(Path::new("/p/factory.bin")));
        let offsets: Vec<&str> = plan.iter().map(ImagePlacement::offset).collect();

        assert_eq!(offsets, ["0x1000", "0x10000"]);
    }

    #[test]
    fn test_merge_invokes_tool_once() {
        let env = env();
        let table = PartitionTable::from_csv(PTABLE);
        let tool = RecordingTool::default();

        let output = Orchestrator::new(&env, &tool)
            .merge(&table, Some(Path::new("/p/factory.bin")))
            .unwrap();

        let calls = tool.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "esp32");
        assert_eq!(calls[0].1, output);
        assert_eq!(calls[0].2.len(), 3);
        assert_eq!(output, PathBuf::from("/p/build/merged-firmware.bin"));
    }

    #[test]
    fn test_empty_plan_is_not_merged() {
        let mut env = env();
        env.project.extra_images.clear();
        let tool = RecordingTool::default();

        let result = Orchestrator::new(&env, &tool).merge(&PartitionTable::default(), None);

        assert!(matches!(result, Err(Error::EmptyPlan)));
        assert!(tool.calls.borrow().is_empty());
    }

    #[test]
    fn test_tool_failure_is_fatal() {
        let env = env();
        let table = PartitionTable::from_csv(PTABLE);

        let result = Orchestrator::new(&env, FailingTool).merge(&table, None);

        assert!(matches!(result, Err(Error::ToolFailed { code: Some(2), .. })));
    }

    #[test]
    fn test_rename_program() {
        let env = env();
        let mut orchestrator = Orchestrator::new(&env, NativeMerge);
        assert_eq!(orchestrator.program_name(), "firmware");

        let target = orchestrator
            .prepare_upload(UploadTarget::RenameProgram)
            .unwrap();

        assert_eq!(orchestrator.program_name(), MERGED_PROGRAM_NAME);
        assert_eq!(target, Some(PathBuf::from("/p/build/merged-firmware.bin")));
    }

    #[test]
    fn test_replace_firmware_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let firmware = dir.path().join("firmware.bin");
        let merged = dir.path().join("merged-firmware.bin");
        fs::write(&firmware, b"app").unwrap();
        fs::write(&merged, b"factory+app").unwrap();

        assert_eq!(
            replace_firmware(&firmware, &merged).unwrap(),
            ReplaceOutcome::Replaced
        );
        assert_eq!(fs::read(&firmware).unwrap(), b"factory+app");
        assert!(!merged.exists());

        assert_eq!(
            replace_firmware(&firmware, &merged).unwrap(),
            ReplaceOutcome::MergedImageMissing(merged.clone())
        );
        assert_eq!(fs::read(&firmware).unwrap(), b"factory+app");
        assert!(!merged.exists());
    }

    #[test]
    fn test_replace_without_old_firmware() {
        let dir = tempfile::tempdir().unwrap();
        let firmware = dir.path().join("firmware.bin");
        let merged = dir.path().join("merged-firmware.bin");
        fs::write(&merged, b"merged").unwrap();

        assert_eq!(
            replace_firmware(&firmware, &merged).unwrap(),
            ReplaceOutcome::Replaced
        );
        assert_eq!(fs::read(&firmware).unwrap(), b"merged");
    }

    #[test]
    fn test_prepare_upload_replace() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("merged-firmware.bin"), b"merged").unwrap();

        let mut env = env();
        env.project.dir = dir.path().to_path_buf();
        env.project.build_dir = PathBuf::new();

        let mut orchestrator = Orchestrator::new(&env, NativeMerge);
        let target = orchestrator
            .prepare_upload(UploadTarget::ReplaceFirmware)
            .unwrap()
            .unwrap();

        assert_eq!(target, dir.path().join("firmware.bin"));
        assert_eq!(fs::read(&target).unwrap(), b"merged");
        assert_eq!(orchestrator.program_name(), "firmware");
    }

    #[test]
    fn test_prepare_upload_replace_without_merged_image() {
        let dir = tempfile::tempdir().unwrap();

        let mut env = env();
        env.project.dir = dir.path().to_path_buf();
        env.project.build_dir = PathBuf::new();

        let target = Orchestrator::new(&env, NativeMerge)
            .prepare_upload(UploadTarget::ReplaceFirmware)
            .unwrap();

        assert_eq!(target, None);
        assert!(!dir.path().join("firmware.bin").exists());

        // An unmerged application binary is not offered as the upload target
        fs::write(dir.path().join("firmware.bin"), b"app").unwrap();
        let target = Orchestrator::new(&env, NativeMerge)
            .prepare_upload(UploadTarget::ReplaceFirmware)
            .unwrap();

        assert_eq!(target, None);
        assert_eq!(fs::read(dir.path().join("firmware.bin")).unwrap(), b"app");
    }

    #[test]
    fn test_native_merge() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, [1, 2]).unwrap();
        fs::write(&b, [3]).unwrap();

        // Declared out of order on purpose
        let plan: ImagePlan = [ImagePlacement::new("6", &b), ImagePlacement::new("0x2", &a)]
            .into_iter()
            .collect();

        let merged = NativeMerge::merge_to_vec(&plan).unwrap();
        assert_eq!(merged, [0xFF, 0xFF, 1, 2, 0xFF, 0xFF, 3]);

        let output = dir.path().join("merged.bin");
        NativeMerge.merge("esp32", &output, &plan).unwrap();
        assert_eq!(fs::read(&output).unwrap(), merged);
    }

    #[test]
    fn test_native_merge_rejects_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        fs::write(&a, [0; 16]).unwrap();

        let plan: ImagePlan = [ImagePlacement::new("0", &a), ImagePlacement::new("8", &a)]
            .into_iter()
            .collect();

        assert!(matches!(
            NativeMerge::merge_to_vec(&plan),
            Err(Error::OverlappingImages { .. })
        ));
    }

    #[test]
    fn test_native_merge_missing_image() {
        let plan: ImagePlan = [ImagePlacement::new("0x1000", "/does/not/exist.bin")]
            .into_iter()
            .collect();

        assert!(matches!(
            NativeMerge::merge_to_vec(&plan),
            Err(Error::FileOpenError(..))
        ));
    }

    #[test]
    fn test_upload_target_names() {
        assert_eq!(UploadTarget::RenameProgram.to_string(), "rename-program");
        assert_eq!(
            UploadTarget::from_str("replace-firmware").unwrap(),
            UploadTarget::ReplaceFirmware
        );
        assert_eq!(
            UploadTarget::VARIANTS,
            ["rename-program", "replace-firmware"]
        );
    }
}
