//! ESP-IDF partition table CSV reader
//!
//! For more information on the partition table format see:
//! <https://docs.espressif.com/projects/esp-idf/en/latest/esp32/api-guides/partition-tables.html>
//!
//! Offsets and sizes are kept exactly as they are written in the CSV, they are
//! handed on verbatim to the flashing tool. [parse_offset] interprets them when
//! a numeric value is required.

use std::{
    fmt::{Display, Formatter},
    fs,
    path::Path,
};

#[cfg(feature = "cli")]
use comfy_table::{modifiers, presets::UTF8_FULL, Attribute, Cell, Color, Table};
use log::{debug, error};

use crate::error::Error;

const MIN_FIELDS: usize = 5;

/// A single row of the partition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    name: String,
    ty: String,
    sub_type: String,
    offset: String,
    size: String,
    flags: String,
}

impl Partition {
    pub fn new(
        name: impl Into<String>,
        ty: impl Into<String>,
        sub_type: impl Into<String>,
        offset: impl Into<String>,
        size: impl Into<String>,
        flags: impl Into<String>,
    ) -> Self {
        Partition {
            name: name.into(),
            ty: ty.into(),
            sub_type: sub_type.into(),
            offset: offset.into(),
            size: size.into(),
            flags: flags.into(),
        }
    }

    /// Parse one CSV line, `None` for comments, blank lines, lines with fewer
    /// than five fields and rows without a name.
    pub fn from_csv_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < MIN_FIELDS || fields[0].is_empty() {
            debug!("Skipping partition table line '{line}'");
            return None;
        }

        Some(Partition::new(
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            fields[4],
            fields.get(5).copied().unwrap_or_default(),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &str {
        &self.ty
    }

    pub fn sub_type(&self) -> &str {
        &self.sub_type
    }

    /// Offset literal as written in the table
    pub fn offset(&self) -> &str {
        &self.offset
    }

    /// Size literal as written in the table
    pub fn size(&self) -> &str {
        &self.size
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    /// Numeric value of the offset
    pub fn offset_value(&self) -> Result<u32, Error> {
        parse_offset(&self.offset)
    }

    /// Numeric value of the size
    pub fn size_value(&self) -> Result<u32, Error> {
        parse_offset(&self.size)
    }
}

impl Display for Partition {
    /// Writes the row back in CSV form, omitting empty flags
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.name, self.ty, self.sub_type, self.offset, self.size
        )?;
        if !self.flags.is_empty() {
            write!(f, ",{}", self.flags)?;
        }

        Ok(())
    }
}

/// Partitions in the order they are declared
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn new(partitions: Vec<Partition>) -> Self {
        PartitionTable { partitions }
    }

    /// Parse a CSV partition table. Lines which do not describe a partition
    /// are skipped, so this never fails.
    pub fn from_csv(data: &str) -> Self {
        let partitions = data.lines().filter_map(Partition::from_csv_line).collect();

        PartitionTable { partitions }
    }

    /// Read the CSV partition table at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.is_file() {
            return Err(Error::PartitionTableNotFound(path.to_path_buf()));
        }

        let data = fs::read_to_string(path)
            .map_err(|e| Error::FileOpenError(path.display().to_string(), e))?;
        let table = Self::from_csv(&data);
        debug!(
            "Loaded {} partitions from {}",
            table.partitions.len(),
            path.display()
        );

        Ok(table)
    }

    /// Read the partition table at `path`, or report why it could not be read
    /// and continue with an empty table.
    pub fn load_or_empty(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            error!("No partition table found or partition table not configured");
            return Self::default();
        };

        Self::load(path).unwrap_or_else(|err| {
            error!("{err}");
            Self::default()
        })
    }

    /// First partition named `name`
    pub fn find(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    #[cfg(feature = "cli")]
    pub fn pretty_print(&self) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Name")
                    .fg(Color::Green)
                    .add_attribute(Attribute::Bold),
                Cell::new("Type")
                    .fg(Color::Cyan)
                    .add_attribute(Attribute::Bold),
                Cell::new("SubType")
                    .fg(Color::Magenta)
                    .add_attribute(Attribute::Bold),
                Cell::new("Offset")
                    .fg(Color::Red)
                    .add_attribute(Attribute::Bold),
                Cell::new("Size")
                    .fg(Color::Yellow)
                    .add_attribute(Attribute::Bold),
                Cell::new("Flags")
                    .fg(Color::DarkCyan)
                    .add_attribute(Attribute::Bold),
            ]);
        for part in &self.partitions {
            let size = match part.size_value() {
                Ok(size) => format!("{} ({}KiB)", part.size, size / 1024),
                Err(_) => part.size.clone(),
            };

            table.add_row(vec![
                Cell::new(&part.name).fg(Color::Green),
                Cell::new(&part.ty).fg(Color::Cyan),
                Cell::new(&part.sub_type).fg(Color::Magenta),
                Cell::new(&part.offset).fg(Color::Red),
                Cell::new(&size).fg(Color::Yellow),
                Cell::new(&part.flags).fg(Color::DarkCyan),
            ]);
        }
        println!("{table}");
    }
}

impl<'a> IntoIterator for &'a PartitionTable {
    type Item = &'a Partition;
    type IntoIter = std::slice::Iter<'a, Partition>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.iter()
    }
}

/// Interpret an offset or size literal: hexadecimal (`0x10000`), decimal
/// (`65536`) or with a size multiplier (`64K`, `1M`).
pub fn parse_offset(literal: &str) -> Result<u32, Error> {
    let literal = literal.trim();
    let invalid = || Error::InvalidOffset(literal.to_string());

    if let Some(hex) = literal
        .strip_prefix("0x")
        .or_else(|| literal.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16).map_err(|_| invalid());
    }

    let (digits, multiplier) = match literal.char_indices().last() {
        Some((i, 'k' | 'K')) => (&literal[..i], 1024),
        Some((i, 'm' | 'M')) => (&literal[..i], 1024 * 1024),
        _ => (literal, 1),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    digits
        .parse::<u32>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .ok_or_else(invalid)
}
