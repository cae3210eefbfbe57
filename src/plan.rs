//! Image placement
//!
//! An [ImagePlan] is the ordered list of `(offset, path)` pairs handed to the
//! flashing or merging tool. Images are placed by looking up the offset of a
//! named partition in the [PartitionTable].

use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    partition_table::{parse_offset, PartitionTable},
};

/// Offset of the partition named `name`, first match in declaration order
pub fn resolve_offset<'a>(table: &'a PartitionTable, name: &str) -> Option<&'a str> {
    table.find(name).map(|partition| partition.offset())
}

/// An image and the flash offset it belongs at
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImagePlacement {
    offset: String,
    path: PathBuf,
}

impl ImagePlacement {
    pub fn new(offset: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        ImagePlacement {
            offset: offset.into(),
            path: path.into(),
        }
    }

    /// Offset literal, unchanged from its source
    pub fn offset(&self) -> &str {
        &self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The same placement with a relative path resolved against `base`
    pub fn relative_to(&self, base: &Path) -> Self {
        ImagePlacement::new(self.offset.clone(), base.join(&self.path))
    }
}

impl Display for ImagePlacement {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.offset, self.path.display())
    }
}

impl FromStr for ImagePlacement {
    type Err = Error;

    /// Parse `<offset> <path>`; the path may itself contain spaces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(' ') {
            Some((offset, path)) if !path.trim().is_empty() => {
                Ok(ImagePlacement::new(offset, path.trim()))
            }
            _ => Err(Error::InvalidPlacement(s.to_string())),
        }
    }
}

impl TryFrom<String> for ImagePlacement {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ImagePlacement> for String {
    fn from(placement: ImagePlacement) -> Self {
        placement.to_string()
    }
}

/// Ordered list of image placements
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImagePlan {
    placements: Vec<ImagePlacement>,
}

impl ImagePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `path` at the offset of `partition`.
    ///
    /// Fails if the partition does not exist, its offset cannot be parsed or
    /// it sits at offset zero. The plan is left untouched in that case.
    pub fn place(
        &mut self,
        table: &PartitionTable,
        partition: &str,
        path: impl Into<PathBuf>,
    ) -> Result<&ImagePlacement, Error> {
        let offset = resolve_offset(table, partition)
            .ok_or_else(|| Error::PartitionNotFound(partition.to_string()))?;

        if parse_offset(offset)? == 0 {
            return Err(Error::ZeroOffset(partition.to_string()));
        }

        let placement = ImagePlacement::new(offset, path);
        debug!("Placing {placement} ({partition})");
        self.placements.push(placement);

        Ok(&self.placements[self.placements.len() - 1])
    }

    /// Like [ImagePlan::place], but a failure is reported and the image left
    /// out of the plan. Returns whether the image was placed.
    pub fn try_place(
        &mut self,
        table: &PartitionTable,
        partition: &str,
        path: impl Into<PathBuf>,
    ) -> bool {
        match self.place(table, partition, path) {
            Ok(_) => true,
            Err(err) => {
                warn!("{err}, image is excluded");
                false
            }
        }
    }

    pub fn push(&mut self, placement: ImagePlacement) {
        self.placements.push(placement);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImagePlacement> {
        self.placements.iter()
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Human readable table of the placements, in plan order
    pub fn section_table(&self) -> String {
        let rows: Vec<(&str, String)> = self
            .placements
            .iter()
            .map(|p| (p.offset(), p.path().display().to_string()))
            .collect();

        let offset_width = rows
            .iter()
            .map(|(offset, _)| offset.len())
            .fold("Offset".len(), usize::max);
        let file_width = rows
            .iter()
            .map(|(_, file)| file.len())
            .fold("File".len(), usize::max);

        let mut lines = Vec::with_capacity(rows.len() + 2);
        lines.push(format!(
            "{:<offset_width$} | {:<file_width$}",
            "Offset", "File"
        ));
        lines.push(format!(
            "{}-+-{}",
            "-".repeat(offset_width),
            "-".repeat(file_width)
        ));
        for (offset, file) in &rows {
            lines.push(format!("{offset:<offset_width$} | {file:<file_width$}"));
        }

        lines.join("\n")
    }
}

impl FromIterator<ImagePlacement> for ImagePlan {
    fn from_iter<I: IntoIterator<Item = ImagePlacement>>(iter: I) -> Self {
        ImagePlan {
            placements: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ImagePlan {
    type Item = &'a ImagePlacement;
    type IntoIter = std::slice::Iter<'a, ImagePlacement>;

    fn into_iter(self) -> Self::IntoIter {
        self.placements.iter()
    }
}
