// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Parser for the partition layout comment block of an `unpack_partitions.sh`
//! script, which the image build emits next to every disk image. Only the
//! layout table is read. The script itself is never executed.
//!
//! ```text
//! #        start        size    part  contents
//! #            0           1          PMBR (Boot GUID: ...)
//! #            1           1          Pri GPT header
//! #      4513792     4194304       1  Label: "STATE"
//! #                                   Type: Linux data
//! ```

use std::{
    io::{self, Read},
    num::ParseIntError,
};

use thiserror::Error;
use tracing::debug;

use crate::stream::FromReader;

/// File name of the manifest, relative to the directory containing the image.
pub const MANIFEST_FILE_NAME: &str = "unpack_partitions.sh";

/// Marker that separates the numeric columns from the partition label.
const LABEL_MARKER: &str = "Label:";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Line {line}: Invalid {column} column: {value:?}")]
    InvalidColumn {
        line: usize,
        column: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("Failed to read manifest data")]
    DataRead(#[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Partition number.
    pub number: u32,
    /// Starting sector.
    pub start: u64,
    /// Size in sectors.
    pub size: u64,
    pub label: String,
}

/// Unparsed numeric columns of a layout row. They are only converted when the
/// row's partition is looked up, so a malformed row never affects lookups of
/// other partitions.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ManifestRow {
    line: usize,
    number: u32,
    start: String,
    size: String,
    label: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn parse(data: &str) -> Self {
        let rows = data
            .lines()
            .enumerate()
            .filter_map(|(index, line)| parse_line(index + 1, line))
            .collect();

        Self { rows }
    }

    /// Look up partition `number`. Returns [`None`] if the partition is not
    /// listed and an error if its row is listed, but malformed.
    pub fn find(&self, number: u32) -> Result<Option<ManifestEntry>> {
        let Some(row) = self.rows.iter().find(|r| r.number == number) else {
            return Ok(None);
        };

        let parse_u64 = |column, value: &str| {
            value.parse::<u64>().map_err(|e| Error::InvalidColumn {
                line: row.line,
                column,
                value: value.to_owned(),
                source: e,
            })
        };

        Ok(Some(ManifestEntry {
            number,
            start: parse_u64("start", &row.start)?,
            size: parse_u64("size", &row.size)?,
            label: row.label.clone(),
        }))
    }
}

impl<R: Read> FromReader<R> for Manifest {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let mut data = String::new();
        reader.read_to_string(&mut data).map_err(Error::DataRead)?;

        Ok(Self::parse(&data))
    }
}

/// Split a `#  <start>  <size>  <part>  Label: "<name>"` line into columns.
/// Lines of any other shape, or with a non-numeric partition column, are not
/// partition entries and yield [`None`].
fn parse_line(line_num: usize, line: &str) -> Option<ManifestRow> {
    let columns = line.trim_start().strip_prefix('#')?;
    let (columns, label) = columns.split_once(LABEL_MARKER)?;

    let columns = columns.split_ascii_whitespace().collect::<Vec<_>>();
    let [start, size, number] = columns[..] else {
        return None;
    };

    let number = match number.parse::<u32>() {
        Ok(n) => n,
        Err(e) => {
            debug!("Line {line_num}: Skipping row with invalid part column {number:?}: {e}");
            return None;
        }
    };

    Some(ManifestRow {
        line: line_num,
        number,
        start: start.to_owned(),
        size: size.to_owned(),
        label: label.trim().trim_matches('"').to_owned(),
    })
}
