//! Append-only CSV record of per-capture outcomes, rolled over into numbered files.
use std::fmt::{self, Display};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::{GapReport, SequenceRange};
use crate::{Error, Result};

/// Header row every ledger file starts with.
pub const HEADER: &str =
    "Filename,Type,Start_Packet_number,End_Packet_number,Incompleteness(100*missing/16621)";

/// Value used for range and incompleteness fields that carry no information.
pub const SENTINEL: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Image,
    Housekeeping,
    /// Capture complete, nothing to request.
    Ok,
    /// Capture unreadable.
    Error,
}

impl EntryType {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Image => "IM",
            Self::Housekeeping => "HK",
            Self::Ok => "OK",
            Self::Error => "Error",
        }
    }

    /// Whether rows of this type describe a real gap.
    #[must_use]
    pub fn is_gap(&self) -> bool {
        matches!(self, Self::Image | Self::Housekeeping)
    }
}

impl Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IM" => Ok(Self::Image),
            "HK" => Ok(Self::Housekeeping),
            "OK" => Ok(Self::Ok),
            "Error" => Ok(Self::Error),
            _ => Err(Error::Config(format!("unknown ledger entry type {s:?}"))),
        }
    }
}

/// The incompleteness column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Incompleteness {
    /// Percentage of the image missing. Rendered the way the reporting consumers
    /// expect, with a trailing `.0` for integral values.
    Rate(f64),
    Fixed(u32),
}

impl Display for Incompleteness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate(rate) if rate.is_finite() && rate.fract() == 0.0 => write!(f, "{rate:.1}"),
            Self::Rate(rate) => write!(f, "{rate}"),
            Self::Fixed(value) => write!(f, "{value}"),
        }
    }
}

impl FromStr for Incompleteness {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(value) = s.parse::<u32>() {
            return Ok(Self::Fixed(value));
        }
        s.parse::<f64>()
            .map(Self::Rate)
            .map_err(|_| Error::Config(format!("invalid incompleteness {s:?}")))
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub filename: String,
    pub entry_type: EntryType,
    pub start: u32,
    pub end: u32,
    pub incompleteness: Incompleteness,
}

impl LedgerEntry {
    /// Rows for an analyzed capture: a single `OK` row if nothing is missing,
    /// otherwise one row per missing image range then one per missing housekeeping
    /// range.
    #[must_use]
    pub fn from_report(filename: &str, report: &GapReport) -> Vec<LedgerEntry> {
        if report.is_complete() {
            return vec![LedgerEntry {
                filename: filename.to_string(),
                entry_type: EntryType::Ok,
                start: 0,
                end: 0,
                incompleteness: Incompleteness::Fixed(0),
            }];
        }

        let image = report.image.ranges.iter().map(|r| {
            Self::gap(filename, EntryType::Image, r, Incompleteness::Rate(report.missing_rate))
        });
        let housekeeping = report.housekeeping.ranges.iter().map(|r| {
            Self::gap(filename, EntryType::Housekeeping, r, Incompleteness::Fixed(SENTINEL))
        });
        image.chain(housekeeping).collect()
    }

    fn gap(
        filename: &str,
        entry_type: EntryType,
        range: &SequenceRange,
        incompleteness: Incompleteness,
    ) -> Self {
        LedgerEntry {
            filename: filename.to_string(),
            entry_type,
            start: range.start,
            end: range.end,
            incompleteness,
        }
    }

    /// The terminal row for a capture that could not be analyzed.
    #[must_use]
    pub fn unreadable(filename: &str) -> Self {
        LedgerEntry {
            filename: filename.to_string(),
            entry_type: EntryType::Error,
            start: SENTINEL,
            end: SENTINEL,
            incompleteness: Incompleteness::Fixed(SENTINEL),
        }
    }

    /// Rows for an analysis outcome, `None` meaning unreadable.
    #[must_use]
    pub fn outcome(filename: &str, report: Option<&GapReport>) -> Vec<LedgerEntry> {
        match report {
            Some(report) => Self::from_report(filename, report),
            None => vec![Self::unreadable(filename)],
        }
    }

    /// Number of packets a gap row reports missing, 0 for other rows.
    #[must_use]
    pub fn missing(&self) -> u64 {
        if self.entry_type.is_gap() {
            SequenceRange::new(self.start, self.end).len()
        } else {
            0
        }
    }
}

impl Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.filename, self.entry_type, self.start, self.end, self.incompleteness
        )
    }
}

impl FromStr for LedgerEntry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim_end().rsplitn(5, ',').collect();
        let [incompleteness, end, start, entry_type, filename] = fields[..] else {
            return Err(Error::Config(format!("invalid ledger row {s:?}")));
        };
        let number = |v: &str| {
            v.parse::<u32>()
                .map_err(|_| Error::Config(format!("invalid ledger row {s:?}")))
        };
        Ok(LedgerEntry {
            filename: filename.to_string(),
            entry_type: entry_type.parse()?,
            start: number(start)?,
            end: number(end)?,
            incompleteness: incompleteness.parse()?,
        })
    }
}

/// When the active ledger file is retired in favor of a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverPolicy {
    /// Roll over once the file is larger than `max_bytes`.
    Size { max_bytes: u64 },
    /// Roll over once the gap rows in the file report more than `max_missing`
    /// packets in total.
    MissingBudget { max_missing: u64 },
}

impl RolloverPolicy {
    pub const DEFAULT_MAX_BYTES: u64 = 10_000;
    pub const DEFAULT_MAX_MISSING: u64 = 8310;

    fn exceeded(&self, path: &Path) -> io::Result<bool> {
        match *self {
            Self::Size { max_bytes } => Ok(fs::metadata(path)?.len() > max_bytes),
            Self::MissingBudget { max_missing } => {
                let missing: u64 = fs::read_to_string(path)?
                    .lines()
                    .skip(1)
                    .filter_map(|line| match line.parse::<LedgerEntry>() {
                        Ok(entry) => Some(entry.missing()),
                        Err(err) => {
                            warn!(path = ?path, "skipping ledger row: {err}");
                            None
                        }
                    })
                    .sum();
                Ok(missing > max_missing)
            }
        }
    }
}

impl Default for RolloverPolicy {
    fn default() -> Self {
        Self::Size {
            max_bytes: Self::DEFAULT_MAX_BYTES,
        }
    }
}

/// A directory of ledger files, the lexicographically last of which is active.
///
/// There is no state beyond what is on disk; opening a ledger rescans the
/// directory. A single `Ledger` must be the only writer to its directory.
#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    policy: RolloverPolicy,
    active: Option<PathBuf>,
}

fn is_ledger_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "csv")
}

impl Ledger {
    /// Open the ledger in `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// If the directory cannot be created or listed.
    pub fn open<P: AsRef<Path>>(dir: P, policy: RolloverPolicy) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut ledger = Ledger {
            dir,
            policy,
            active: None,
        };
        ledger.active = ledger.files()?.pop();
        debug!(dir = ?ledger.dir, active = ?ledger.active, "opened ledger");
        Ok(ledger)
    }

    /// All ledger files, sorted by name.
    ///
    /// # Errors
    /// If the directory cannot be listed.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::default();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_ledger_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    #[must_use]
    pub fn policy(&self) -> RolloverPolicy {
        self.policy
    }

    /// The file the next rows go to, creating a new one with a header row if there is
    /// none yet or the active one is past the rollover policy.
    ///
    /// # Errors
    /// [Error::LedgerWrite] if a new file cannot be created.
    pub fn current_file(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.active {
            match self.policy.exceeded(path) {
                Ok(false) => return Ok(path.clone()),
                Ok(true) => debug!(path = ?path, "ledger file past rollover policy"),
                Err(err) => warn!(path = ?path, "cannot inspect ledger file: {err}"),
            }
        }

        let index = self.files()?.len();
        let name = format!("report_{index:04}_{}.csv", Local::now().format("%d_%H%M%S"));
        let path = self.dir.join(name);
        Self::create(&path).map_err(|source| Error::LedgerWrite {
            path: path.clone(),
            source,
        })?;
        info!(path = ?path, "started new ledger file");
        self.active = Some(path.clone());
        Ok(path)
    }

    fn create(path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(format!("{HEADER}\n").as_bytes())?;
        file.sync_data()
    }

    /// Append a single row.
    ///
    /// # Errors
    /// See [Ledger::append_all].
    pub fn append(&mut self, entry: &LedgerEntry) -> Result<PathBuf> {
        self.append_all(std::slice::from_ref(entry))
    }

    /// Append rows as one unit: either all of them are written or the file is left as
    /// it was. Returns the file written to.
    ///
    /// # Errors
    /// [Error::LedgerWrite] if the rows could not be written. Rows already in the file
    /// are not affected.
    pub fn append_all(&mut self, entries: &[LedgerEntry]) -> Result<PathBuf> {
        let path = self.current_file()?;
        if entries.is_empty() {
            return Ok(path);
        }
        let mut buf = String::default();
        for entry in entries {
            buf.push_str(&entry.to_string());
            buf.push('\n');
        }

        Self::write_rows(&path, buf.as_bytes()).map_err(|source| Error::LedgerWrite {
            path: path.clone(),
            source,
        })?;
        debug!(path = ?path, rows = entries.len(), "appended ledger rows");
        Ok(path)
    }

    fn write_rows(path: &Path, rows: &[u8]) -> io::Result<()> {
        let mut file: File = OpenOptions::new().append(true).open(path)?;
        let prior = file.metadata()?.len();
        let written = file.write_all(rows).and_then(|()| file.sync_data());
        if let Err(err) = written {
            if let Err(truncate) = file.set_len(prior) {
                warn!(path = ?path, "cannot roll back partial ledger rows: {truncate}");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Every row in every ledger file, oldest first.
    ///
    /// # Errors
    /// If a file cannot be read or holds a malformed row.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::default();
        for path in self.files()? {
            for line in fs::read_to_string(&path)?.lines().skip(1) {
                entries.push(line.parse()?);
            }
        }
        Ok(entries)
    }
}
