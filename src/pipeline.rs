//! Processing of captures into products, ledger rows and retransmission requests.
//!
//! Splitting, decoding and analysis of independent captures may run in parallel. Writing
//! products and ledger rows is serialized through the single [Processor] that owns the
//! [Ledger], one capture at a time and in input order.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::analysis::{CaptureSummary, DetailReport, GapReport};
use crate::assemble::{assemble, Assembly, PacketSet, Product};
use crate::capture::{CaptureSource, CaptureTimestamp, RawCapture};
use crate::command::{commands_for, RetransmissionCommand};
use crate::config::Config;
use crate::framing::{decode_packets, FramingProfile, ASM};
use crate::ledger::{Ledger, LedgerEntry};
use crate::{Error, Result};

/// Accepts encoded retransmission commands, e.g., a radio link.
pub trait Transmitter {
    /// # Errors
    /// If the record could not be sent.
    fn transmit(&mut self, record: &[u8; RetransmissionCommand::LEN]) -> Result<()>;
}

impl<F> Transmitter for F
where
    F: FnMut(&[u8; RetransmissionCommand::LEN]) -> Result<()>,
{
    fn transmit(&mut self, record: &[u8; RetransmissionCommand::LEN]) -> Result<()> {
        self(record)
    }
}

/// Everything produced for one capture.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub capture: String,
    pub summary: CaptureSummary,
    /// `None` if the capture was unreadable.
    pub report: Option<GapReport>,
    /// Rows appended to the ledger.
    pub entries: Vec<LedgerEntry>,
    /// Requests to send back, empty if the capture name carries no timestamp.
    pub commands: Vec<RetransmissionCommand>,
    /// Where the product was written, `None` if there was no product.
    pub product: Option<PathBuf>,
    pub ledger_file: PathBuf,
}

impl Outcome {
    /// Every expected packet is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.report.as_ref().is_some_and(GapReport::is_complete)
    }

    #[must_use]
    pub fn detail(&self) -> DetailReport {
        DetailReport {
            capture: self.capture.clone(),
            summary: self.summary.clone(),
            gaps: self.report.clone(),
        }
    }
}

/// Result of the parallelizable part of processing.
#[derive(Debug)]
struct Evaluation {
    capture: String,
    summary: CaptureSummary,
    assembly: Option<Assembly>,
}

fn decode(data: &[u8], marker: &[u8], profile: &FramingProfile) -> (CaptureSummary, PacketSet) {
    let mut summary = CaptureSummary::default();
    let mut set = PacketSet::new();
    for packet in decode_packets(data, marker, profile) {
        summary.add(&packet);
        set.insert(packet);
    }
    (summary, set)
}

fn evaluate(
    capture: &str,
    summary: CaptureSummary,
    set: &PacketSet,
    config: &Config,
) -> Result<Evaluation> {
    let assembly = match assemble(set, &config.domain) {
        Ok(assembly) => Some(assembly),
        Err(Error::UnreadableCapture(reason)) => {
            warn!(capture, %reason, "unreadable capture");
            None
        }
        Err(err) => return Err(err),
    };
    Ok(Evaluation {
        capture: capture.to_string(),
        summary,
        assembly,
    })
}

/// Write `data` to `path` so that readers never observe a partial file.
fn write_product(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_data()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Drives captures through analysis and records the results.
#[derive(Debug)]
pub struct Processor {
    config: Config,
    profile: FramingProfile,
    ledger: Ledger,
}

impl Processor {
    /// Resolve the configuration and open the ledger.
    ///
    /// # Errors
    /// If the configuration is invalid or the ledger directory cannot be opened.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let profile = config.framing()?;
        let ledger = Ledger::open(&config.report_dir, config.rollover)?;
        info!(profile = %profile.name, ledger = ?config.report_dir, "processor ready");
        Ok(Processor {
            config,
            profile,
            ledger,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Decode a capture using the configured profile.
    #[must_use]
    pub fn packets(&self, capture: &RawCapture) -> PacketSet {
        decode(&capture.data, &self.config.sync_marker, &self.profile).1
    }

    /// Packets of the best-effort product previously stored for `capture`, if any.
    ///
    /// # Errors
    /// If the stored product exists but cannot be read.
    pub fn stored(&self, capture: &str) -> Result<Option<PacketSet>> {
        let path = self.incomplete_path(capture);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        let (_, set) = decode(&data, &ASM, &FramingProfile::archive());
        debug!(path = ?path, packets = set.len(), "loaded stored product");
        Ok(Some(set))
    }

    /// Analyze a fresh capture, write its product and ledger rows.
    ///
    /// # Errors
    /// If the product or ledger rows cannot be written. An unreadable capture is not
    /// an error; it is recorded in the ledger.
    pub fn process(&mut self, capture: &RawCapture) -> Result<Outcome> {
        let (summary, set) = decode(&capture.data, &self.config.sync_marker, &self.profile);
        let evaluation = evaluate(&capture.name, summary, &set, &self.config)?;
        self.commit(evaluation)
    }

    /// Merge a retransmission into packets previously received for `capture` and
    /// record the result under the original capture's name.
    ///
    /// # Errors
    /// See [Processor::process].
    pub fn reconcile(
        &mut self,
        capture: &str,
        original: PacketSet,
        retransmission: &RawCapture,
    ) -> Result<Outcome> {
        let (_, later) = decode(&retransmission.data, &self.config.sync_marker, &self.profile);
        self.reconcile_sets(capture, original, later)
    }

    /// Like [Processor::reconcile] for already decoded retransmission packets.
    ///
    /// # Errors
    /// See [Processor::process].
    pub fn reconcile_sets(
        &mut self,
        capture: &str,
        mut original: PacketSet,
        retransmission: PacketSet,
    ) -> Result<Outcome> {
        let replaced = original.merge(retransmission);
        info!(capture, replaced, "merged retransmission");
        let summary: CaptureSummary = original.iter().collect();
        let evaluation = evaluate(capture, summary, &original, &self.config)?;
        self.commit(evaluation)
    }

    /// Merge a retransmission into the best-effort product stored for `capture`.
    ///
    /// # Errors
    /// See [Processor::process]; also if the stored product cannot be read.
    pub fn resume(&mut self, capture: &str, retransmission: &RawCapture) -> Result<Outcome> {
        let original = match self.stored(capture)? {
            Some(set) => set,
            None => {
                warn!(capture, "no stored product, using retransmission alone");
                PacketSet::new()
            }
        };
        self.reconcile(capture, original, retransmission)
    }

    /// Process many captures, analyzing them in parallel and committing results in
    /// input order. One failed capture does not stop the others.
    ///
    /// # Errors
    /// [Error::Config] if the worker pool cannot be built.
    pub fn process_batch(&mut self, captures: &[RawCapture]) -> Result<Vec<Result<Outcome>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
            .map_err(|err| Error::Config(format!("failed to build worker pool: {err}")))?;

        let config = &self.config;
        let profile = &self.profile;
        let evaluations: Vec<Result<Evaluation>> = pool.install(|| {
            captures
                .par_iter()
                .map(|capture| {
                    let (summary, set) = decode(&capture.data, &config.sync_marker, profile);
                    evaluate(&capture.name, summary, &set, config)
                })
                .collect()
        });
        debug!(captures = captures.len(), "evaluated batch");

        Ok(evaluations
            .into_iter()
            .map(|evaluation| evaluation.and_then(|e| self.commit(e)))
            .collect())
    }

    /// Read every capture from `source` and process them as a batch.
    ///
    /// # Errors
    /// See [Processor::process_batch].
    pub fn process_source<S: CaptureSource>(&mut self, source: S) -> Result<Vec<Result<Outcome>>> {
        let mut captures = Vec::default();
        let mut failed = Vec::default();
        for (idx, capture) in source.enumerate() {
            match capture {
                Ok(capture) => captures.push(capture),
                Err(err) => {
                    warn!("failed to read capture: {err}");
                    failed.push((idx, err));
                }
            }
        }
        let mut results = self.process_batch(&captures)?;
        for (idx, err) in failed {
            results.insert(idx, Err(err));
        }
        Ok(results)
    }

    /// Send every command of `outcome`, stopping at the first failure. Returns the
    /// number of commands sent.
    ///
    /// # Errors
    /// The first encode or transmit error.
    pub fn transmit<T>(&self, outcome: &Outcome, transmitter: &mut T) -> Result<usize>
    where
        T: Transmitter + ?Sized,
    {
        for command in &outcome.commands {
            transmitter.transmit(&command.encode()?)?;
            debug!(%command, "sent command");
        }
        Ok(outcome.commands.len())
    }

    fn incomplete_path(&self, capture: &str) -> PathBuf {
        self.config.incomplete_dir.join(format!("tmp_{capture}"))
    }

    fn product_path(&self, capture: &str) -> Result<PathBuf> {
        let count = fs::read_dir(&self.config.product_dir)?.count();
        Ok(self
            .config
            .product_dir
            .join(format!("opt_frame_{count:04}_{capture}")))
    }

    fn store(&self, capture: &str, product: &Product) -> Result<PathBuf> {
        let (dir, path) = match product {
            Product::Complete { .. } => {
                fs::create_dir_all(&self.config.product_dir)?;
                (&self.config.product_dir, self.product_path(capture)?)
            }
            Product::Incomplete { .. } => {
                fs::create_dir_all(&self.config.incomplete_dir)?;
                (&self.config.incomplete_dir, self.incomplete_path(capture))
            }
        };
        write_product(dir, &path, product.data())?;

        if product.is_complete() {
            let stale = self.incomplete_path(capture);
            if stale.exists() {
                fs::remove_file(&stale)?;
                debug!(path = ?stale, "removed superseded incomplete product");
            }
        }
        Ok(path)
    }

    fn commit(&mut self, evaluation: Evaluation) -> Result<Outcome> {
        let Evaluation {
            capture,
            summary,
            assembly,
        } = evaluation;

        let (report, product) = match assembly {
            Some(Assembly { report, product }) => {
                let path = self.store(&capture, &product)?;
                (Some(report), Some(path))
            }
            None => (None, None),
        };

        let entries = LedgerEntry::outcome(&capture, report.as_ref());
        let ledger_file = self.ledger.append_all(&entries)?;

        let commands = match CaptureTimestamp::from_filename(&capture) {
            Ok(timestamp) => commands_for(timestamp, report.as_ref())?,
            Err(err) => {
                warn!(capture = %capture, "no retransmission commands: {err}");
                Vec::default()
            }
        };

        info!(
            capture = %capture,
            complete = report.as_ref().is_some_and(GapReport::is_complete),
            rows = entries.len(),
            commands = commands.len(),
            "processed capture"
        );
        Ok(Outcome {
            capture,
            summary,
            report,
            entries,
            commands,
            product,
            ledger_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ExpectedDomain;
    use crate::command::CommandType;
    use crate::framing::{encode_frame, PacketKind};

    const NAME: &str = "F20240822162559.bin";

    fn config(dir: &Path) -> Config {
        Config::builder()
            .profile("direct")
            .domain(
                ExpectedDomain::builder()
                    .image_packets(6)
                    .housekeeping_ceiling(100)
                    .build(),
            )
            .report_dir(dir.join("report"))
            .product_dir(dir.join("optical"))
            .incomplete_dir(dir.join("tmp"))
            .threads(2)
            .build()
    }

    fn capture(name: &str, image: &[u32], housekeeping: &[u32]) -> RawCapture {
        let profile = FramingProfile::direct();
        let mut data = vec![0xffu8; 3];
        for &seq in image {
            data.extend(encode_frame(&profile, PacketKind::Image, seq, 0, &[seq as u8 + 1]).unwrap());
        }
        for &seq in housekeeping {
            data.extend(encode_frame(&profile, PacketKind::Housekeeping, seq, 0, &[0xaa]).unwrap());
        }
        RawCapture::new(name, data)
    }

    #[test]
    fn complete_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = Processor::new(config(dir.path())).unwrap();

        let outcome = processor
            .process(&capture(NAME, &[0, 1, 2, 3, 4, 5], &[7, 8]))
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.entries[0].to_string(), format!("{NAME},OK,0,0,0"));
        assert_eq!(outcome.commands.len(), 1);
        assert_eq!(outcome.commands[0].kind, CommandType::Complete);
        let product = outcome.product.unwrap();
        assert_eq!(
            product.file_name().unwrap().to_str().unwrap(),
            format!("opt_frame_0000_{NAME}")
        );
        assert_eq!(fs::read(product).unwrap(), [1, 2, 3, 4, 5, 6, 0xaa, 0xaa]);
    }

    #[test]
    fn gaps_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = Processor::new(config(dir.path())).unwrap();

        let first = processor
            .process(&capture(NAME, &[0, 1, 4, 5], &[7, 8]))
            .unwrap();
        assert!(!first.is_complete());
        assert_eq!(first.commands.len(), 1);
        assert_eq!(first.commands[0].kind, CommandType::Image);
        assert_eq!(first.entries[0].start, 2);
        assert_eq!(first.entries[0].end, 3);
        let stored = first.product.unwrap();
        assert_eq!(stored, dir.path().join("tmp").join(format!("tmp_{NAME}")));

        let retransmission = capture("F20240822170000.bin", &[2, 3], &[]);
        let second = processor.resume(NAME, &retransmission).unwrap();

        assert!(second.is_complete());
        assert_eq!(second.capture, NAME);
        assert!(!stored.exists());
        assert_eq!(fs::read(second.product.unwrap()).unwrap(), [1, 2, 3, 4, 5, 6, 0xaa, 0xaa]);
        assert_eq!(processor.ledger().entries().unwrap().len(), 2);
    }

    #[test]
    fn housekeeping_gap_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = Processor::new(config(dir.path())).unwrap();

        let first = processor
            .process(&capture(NAME, &[0, 1, 2, 3, 4, 5], &[7, 9]))
            .unwrap();
        assert!(first.report.as_ref().unwrap().image.is_complete());
        assert!(!first.is_complete());
        assert_eq!(first.commands[0].kind, CommandType::Housekeeping);
        assert_eq!(first.entries[0].to_string(), format!("{NAME},HK,8,8,255"));
        let stored = first.product.unwrap();
        assert_eq!(stored, dir.path().join("tmp").join(format!("tmp_{NAME}")));
        assert!(!dir.path().join("optical").exists());

        let retransmission = capture("F20240822170000.bin", &[], &[8]);
        let second = processor.resume(NAME, &retransmission).unwrap();

        assert!(second.is_complete());
        assert!(!stored.exists());
        assert_eq!(
            fs::read(second.product.unwrap()).unwrap(),
            [1, 2, 3, 4, 5, 6, 0xaa, 0xaa, 0xaa]
        );
    }

    #[test]
    fn unreadable_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = Processor::new(config(dir.path())).unwrap();

        let outcome = processor
            .process(&RawCapture::new(NAME, vec![0u8; 100]))
            .unwrap();

        assert!(outcome.report.is_none());
        assert!(outcome.product.is_none());
        assert_eq!(outcome.entries[0].to_string(), format!("{NAME},Error,255,255,255"));
        assert_eq!(outcome.commands[0].kind, CommandType::Unreadable);
        assert!(outcome.detail().to_string().ends_with("Unreadable capture\n"));
    }

    #[test]
    fn batch_commits_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = Processor::new(config(dir.path())).unwrap();
        let captures = vec![
            capture("F20240822000001.bin", &[0, 1, 2, 3, 4, 5], &[1]),
            RawCapture::new("F20240822000002.bin", Vec::default()),
            capture("F20240822000003.bin", &[0, 5], &[1, 3]),
        ];

        let outcomes: Vec<Outcome> = processor
            .process_batch(&captures)
            .unwrap()
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let names: Vec<&str> = outcomes.iter().map(|o| o.capture.as_str()).collect();
        assert_eq!(
            names,
            vec!["F20240822000001.bin", "F20240822000002.bin", "F20240822000003.bin"]
        );
        let rows: Vec<String> = processor
            .ledger()
            .entries()
            .unwrap()
            .iter()
            .map(|e| format!("{},{}", e.filename, e.entry_type))
            .collect();
        assert_eq!(
            rows,
            vec![
                "F20240822000001.bin,OK",
                "F20240822000002.bin,Error",
                "F20240822000003.bin,IM",
                "F20240822000003.bin,HK",
            ]
        );
    }

    #[test]
    fn transmit_stops_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = Processor::new(config(dir.path())).unwrap();
        let outcome = processor
            .process(&capture(NAME, &[0, 2, 4], &[1, 3]))
            .unwrap();
        assert_eq!(outcome.commands.len(), 4);

        let mut sent = Vec::default();
        let count = processor
            .transmit(&outcome, &mut |record: &[u8; 11]| -> Result<()> {
                sent.push(*record);
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(sent[0][6], 1);
        assert_eq!(&sent[0][7..], &[0, 1, 0, 1]);

        let mut calls = 0;
        let err = processor.transmit(&outcome, &mut |_: &[u8; 11]| -> Result<()> {
            calls += 1;
            Err(Error::Config("link down".to_string()))
        });
        assert!(err.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn unnamed_capture_has_no_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = Processor::new(config(dir.path())).unwrap();

        let outcome = processor
            .process(&capture("pass.bin", &[0, 1], &[1]))
            .unwrap();

        assert!(outcome.commands.is_empty());
        assert_eq!(outcome.entries.len(), 1);
    }
}
