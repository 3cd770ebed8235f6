//! Raw captures and their filename-derived timestamps.
use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{Error, Result};

/// Capture time as carried by a capture's file name, `F20YYMMDDhhmmss.<ext>`.
///
/// The year is kept within the century, the time of day as seconds since midnight,
/// matching the retransmission command wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaptureTimestamp {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub second_of_day: u32,
}

impl CaptureTimestamp {
    /// Prefix of every capture identifier; the century is implied.
    pub const PREFIX: &'static str = "F20";
    /// Length of an identifier without extension, e.g., `F20240822162559`.
    pub const IDENTIFIER_LEN: usize = 15;
    pub const SECONDS_PER_DAY: u32 = 86_400;

    /// Construct from calendar fields.
    ///
    /// # Errors
    /// [Error::InvalidTimestamp] if the fields are not a valid date and time of day.
    pub fn new(year: u8, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Result<Self> {
        let second_of_day = u32::from(second) + 60 * (u32::from(minute) + 60 * u32::from(hour));
        Self::from_parts(year, month, day, second_of_day)
    }

    /// Construct from the wire representation fields.
    ///
    /// # Errors
    /// [Error::InvalidTimestamp] if the fields are not a valid date and time of day.
    pub fn from_parts(year: u8, month: u8, day: u8, second_of_day: u32) -> Result<Self> {
        let ts = CaptureTimestamp {
            year,
            month,
            day,
            second_of_day,
        };
        if year > 99 {
            return Err(Error::InvalidTimestamp(format!("year {year} is not within a century")));
        }
        if second_of_day >= Self::SECONDS_PER_DAY {
            return Err(Error::InvalidTimestamp(format!(
                "{second_of_day} seconds is past the end of the day"
            )));
        }
        ts.to_datetime()
            .map(|_| ts)
            .ok_or_else(|| Error::InvalidTimestamp(format!("{year:02}-{month:02}-{day:02}")))
    }

    /// Parse from a capture file name or path. Only the file name portion is used
    /// and anything after the 15 identifier characters (usually the extension) is
    /// ignored.
    ///
    /// # Errors
    /// [Error::InvalidTimestamp] if the name does not follow `F20YYMMDDhhmmss`.
    pub fn from_filename<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidTimestamp(format!("{path:?} has no file name")))?;
        let invalid = || Error::InvalidTimestamp(format!("{name:?} is not F20YYMMDDhhmmss"));

        let ident = name.get(..Self::IDENTIFIER_LEN).ok_or_else(invalid)?;
        if !ident.starts_with(Self::PREFIX) || !ident[1..].bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        // all ascii digits, so every 2 char slice parses
        let field = |i: usize| ident[i..i + 2].parse::<u8>().map_err(|_| invalid());
        Self::new(field(3)?, field(5)?, field(7)?, field(9)?, field(11)?, field(13)?)
    }

    #[must_use]
    pub fn hour(&self) -> u32 {
        self.second_of_day / 3600
    }

    #[must_use]
    pub fn minute(&self) -> u32 {
        self.second_of_day / 60 % 60
    }

    #[must_use]
    pub fn second(&self) -> u32 {
        self.second_of_day % 60
    }

    /// The canonical capture identifier, `F20YYMMDDhhmmss`.
    ///
    /// Carries no extension. The ground scripts appended `.dat` when naming the
    /// file a command referred to; append it yourself where that name is needed.
    #[must_use]
    pub fn identifier(&self) -> String {
        format!(
            "{}{:02}{:02}{:02}{:02}{:02}{:02}",
            Self::PREFIX,
            self.year,
            self.month,
            self.day,
            self.hour(),
            self.minute(),
            self.second()
        )
    }

    /// Capture time as a calendar date-time, or `None` if the fields do not describe
    /// one.
    #[must_use]
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let date = NaiveDate::from_ymd_opt(
            2000 + i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?;
        let time = NaiveTime::from_num_seconds_from_midnight_opt(self.second_of_day, 0)?;
        Some(NaiveDateTime::new(date, time))
    }
}

impl Display for CaptureTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl FromStr for CaptureTimestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_filename(s)
    }
}

/// One downlink session or retransmission batch, held as a single owned buffer.
#[derive(Debug, Clone)]
pub struct RawCapture {
    /// File name the capture was ingested from, used in ledger rows and product names.
    pub name: String,
    pub data: Vec<u8>,
}

impl RawCapture {
    pub fn new<S: Into<String>>(name: S, data: Vec<u8>) -> Self {
        RawCapture {
            name: name.into(),
            data,
        }
    }

    /// Read a capture file fully into memory.
    ///
    /// # Errors
    /// Any ``std::io::Error`` reading the file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        debug!(name = %name, bytes = data.len(), "read capture");
        Ok(RawCapture { name, data })
    }

    /// Timestamp derived from the capture's file name.
    ///
    /// # Errors
    /// [Error::InvalidTimestamp] if the name does not carry one.
    pub fn timestamp(&self) -> Result<CaptureTimestamp> {
        CaptureTimestamp::from_filename(&self.name)
    }
}

/// Supplies captures to process. Any iterator of capture results qualifies.
pub trait CaptureSource: Iterator<Item = Result<RawCapture>> {}

impl<I> CaptureSource for I where I: Iterator<Item = Result<RawCapture>> {}

/// Reads every capture file in a directory once, in file name order.
///
/// This is a one-shot listing; discovering files that arrive later is up to the
/// caller.
#[derive(Debug)]
pub struct FileCaptures {
    paths: std::vec::IntoIter<PathBuf>,
}

impl FileCaptures {
    /// List files in `dir` with the given extension (without the dot), sorted by name.
    ///
    /// # Errors
    /// Any ``std::io::Error`` listing the directory.
    pub fn from_dir<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Self> {
        let mut paths = Vec::default();
        for entry in fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == extension) {
                paths.push(path);
            }
        }
        paths.sort();
        trace!(count = paths.len(), dir = ?dir.as_ref(), "found captures");
        Ok(FileCaptures {
            paths: paths.into_iter(),
        })
    }
}

impl Iterator for FileCaptures {
    type Item = Result<RawCapture>;

    fn next(&mut self) -> Option<Self::Item> {
        self.paths.next().map(RawCapture::read)
    }
}
