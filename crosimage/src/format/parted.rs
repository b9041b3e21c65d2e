// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Parser for `parted --machine <image> unit s print` output.
//!
//! ```text
//! BYT;
//! /path/to/image.bin:8388608s:file:512:512:gpt::;
//! 1:4513792s:8708095s:4194304s::STATE:;
//! 2:20480s:53247s:32768s::KERN-A:;
//! ```

use std::num::ParseIntError;

use thiserror::Error;

/// Units lines that may start the output.
const UNIT_MARKERS: &[&str] = &["BYT;", "CHS;", "CYL;"];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Partition {number}: Invalid {field} field: {value:?}")]
    InvalidField {
        number: u32,
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("Partition {number}: Missing {field} field")]
    MissingField { number: u32, field: &'static str },
}

type Result<T> = std::result::Result<T, Error>;

/// One partition row. All values are in sectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartedEntry {
    pub number: u32,
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

/// Find the raw row for partition `number`, skipping the units marker and the
/// device line.
fn find_row(output: &str, number: u32) -> Option<&str> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let mut rows = vec![];

    if let Some(first) = lines.next() {
        if UNIT_MARKERS.contains(&first) {
            // Device line.
            lines.next();
        } else {
            rows.push(first);
        }
    }

    rows.extend(lines);

    rows.into_iter().find(|row| {
        row.split_once(':')
            .and_then(|(n, _)| n.parse::<u32>().ok())
            .is_some_and(|n| n == number)
    })
}

/// Check whether partition `number` is listed at all.
pub fn has_partition(output: &str, number: u32) -> bool {
    find_row(output, number).is_some()
}

/// Look up partition `number`. Returns [`None`] if the partition is not
/// listed and an error if it is listed, but its fields cannot be parsed.
pub fn find_partition(output: &str, number: u32) -> Result<Option<PartedEntry>> {
    let Some(row) = find_row(output, number) else {
        return Ok(None);
    };

    let mut fields = row.trim_end_matches(';').split(':').skip(1);

    let mut next_sectors = |field: &'static str| -> Result<u64> {
        let value = fields
            .next()
            .ok_or(Error::MissingField { number, field })?;

        value
            .trim_end_matches('s')
            .parse()
            .map_err(|e| Error::InvalidField {
                number,
                field,
                value: value.to_owned(),
                source: e,
            })
    };

    let start = next_sectors("start")?;
    let end = next_sectors("end")?;
    let size = next_sectors("size")?;

    Ok(Some(PartedEntry {
        number,
        start,
        end,
        size,
    }))
}
