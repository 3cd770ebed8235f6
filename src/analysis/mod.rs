//! Completeness analysis of a capture's packets.
mod summary;

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::ops::{Range, RangeInclusive};

use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::framing::{Packet, PacketKind};
use crate::{Error, Result, Unreadable};

pub use summary::{CaptureSummary, DetailReport, KindSummary};

/// Inclusive range of sequence numbers.
#[derive(
    Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct SequenceRange {
    pub start: u32,
    pub end: u32,
}

impl SequenceRange {
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        SequenceRange { start, end }
    }

    /// Number of sequence numbers covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        u64::from(self.end.saturating_sub(self.start)) + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    #[must_use]
    pub fn contains(&self, seq: u32) -> bool {
        self.start <= seq && seq <= self.end
    }
}

impl Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

impl From<SequenceRange> for RangeInclusive<u32> {
    fn from(r: SequenceRange) -> Self {
        r.start..=r.end
    }
}

/// Compress ascending sequence numbers into maximal inclusive ranges.
///
/// A new range starts whenever a value is not exactly one greater than the one
/// before it.
///
/// # Example
/// ```
/// use downlink::analysis::{compress, SequenceRange};
///
/// assert_eq!(
///     compress(&[0, 1, 2, 5, 6, 9]),
///     vec![SequenceRange::new(0, 2), SequenceRange::new(5, 6), SequenceRange::new(9, 9)],
/// );
/// ```
#[must_use]
pub fn compress(sorted: &[u32]) -> Vec<SequenceRange> {
    let mut ranges: Vec<SequenceRange> = Vec::default();
    for &seq in sorted {
        match ranges.last_mut() {
            Some(last) if last.end.checked_add(1) == Some(seq) => last.end = seq,
            _ => ranges.push(SequenceRange::new(seq, seq)),
        }
    }
    ranges
}

/// The sequence numbers a complete capture must contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct ExpectedDomain {
    /// Image sequences are `0..image_packets`.
    #[builder(default = ExpectedDomain::IMAGE_PACKETS)]
    pub image_packets: u32,
    /// Housekeeping sequences above this value are ignored when deriving the upper
    /// bound of the housekeeping domain.
    #[builder(default = ExpectedDomain::HOUSEKEEPING_CEILING)]
    pub housekeeping_ceiling: u32,
}

impl Default for ExpectedDomain {
    fn default() -> Self {
        ExpectedDomain {
            image_packets: Self::IMAGE_PACKETS,
            housekeeping_ceiling: Self::HOUSEKEEPING_CEILING,
        }
    }
}

impl ExpectedDomain {
    /// Number of image packets in a complete product.
    pub const IMAGE_PACKETS: u32 = 16620;
    /// Largest housekeeping sequence observed before the counter rolls over.
    pub const HOUSEKEEPING_CEILING: u32 = 8136;

    #[must_use]
    pub fn image(&self) -> Range<u32> {
        0..self.image_packets
    }

    /// Housekeeping domain derived from the observed sequences: from the smallest
    /// observed up to the largest observed that does not exceed the ceiling.
    ///
    /// # Errors
    /// [Error::UnreadableCapture] if there is nothing to derive the domain from.
    pub fn housekeeping(&self, observed: &BTreeSet<u32>) -> Result<RangeInclusive<u32>> {
        let Some(&min) = observed.first() else {
            return Err(Error::UnreadableCapture(Unreadable::NoHousekeeping));
        };
        let Some(&max) = observed.range(..=self.housekeeping_ceiling).next_back() else {
            return Err(Error::UnreadableCapture(
                Unreadable::HousekeepingAboveCeiling,
            ));
        };
        Ok(min..=max)
    }

    /// Percentage of the image product missing.
    ///
    /// The denominator is one more than the domain size; reports consumed downstream
    /// depend on this exact value.
    #[must_use]
    pub fn missing_rate(&self, missing: usize) -> f64 {
        (missing as f64 / (f64::from(self.image_packets) + 1.0)) * 100.0
    }
}

/// Gaps for one packet kind.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindGaps {
    /// Number of distinct good sequence numbers.
    pub counted: usize,
    /// Sequence numbers only seen with a nonzero quality flag.
    pub bad: Vec<u32>,
    /// Expected sequence numbers without a good packet, ascending.
    pub missing: Vec<u32>,
    /// `missing` compressed into maximal ranges.
    pub ranges: Vec<SequenceRange>,
}

impl KindGaps {
    fn new<I>(domain: I, counted: &BTreeSet<u32>, bad: &BTreeSet<u32>) -> Self
    where
        I: Iterator<Item = u32>,
    {
        let missing: Vec<u32> = domain.filter(|seq| !counted.contains(seq)).collect();
        KindGaps {
            counted: counted.len(),
            bad: bad.difference(counted).copied().collect(),
            ranges: compress(&missing),
            missing,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Outcome of analyzing one capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    pub image: KindGaps,
    pub housekeeping: KindGaps,
    /// Derived housekeeping domain.
    pub housekeeping_domain: SequenceRange,
    /// Percentage of the image product missing, see [ExpectedDomain::missing_rate].
    pub missing_rate: f64,
    pub unclassified: usize,
}

impl GapReport {
    /// No image or housekeeping gaps.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.image.is_complete() && self.housekeeping.is_complete()
    }

    #[must_use]
    pub fn gaps(&self, kind: PacketKind) -> Option<&KindGaps> {
        match kind {
            PacketKind::Image => Some(&self.image),
            PacketKind::Housekeeping => Some(&self.housekeeping),
            PacketKind::Unclassified => None,
        }
    }

    /// Total missing packets across kinds.
    #[must_use]
    pub fn total_missing(&self) -> usize {
        self.image.missing.len() + self.housekeeping.missing.len()
    }
}

/// Determine which packets are missing from a capture.
///
/// Only packets with a zero quality flag count as present; bad quality packets are
/// reported as missing. The image domain is fixed, the housekeeping domain is derived
/// from what was received (see [ExpectedDomain::housekeeping]), so housekeeping packets
/// lost before the first or after the last one received go unnoticed.
///
/// # Errors
/// [Error::UnreadableCapture] if there are no packets or the housekeeping domain
/// cannot be derived.
pub fn analyze<'a, I>(packets: I, domain: &ExpectedDomain) -> Result<GapReport>
where
    I: IntoIterator<Item = &'a Packet>,
{
    let mut total = 0usize;
    let mut unclassified = 0usize;
    let mut counted = [BTreeSet::default(), BTreeSet::default()];
    let mut bad = [BTreeSet::default(), BTreeSet::default()];
    let mut hk_observed: BTreeSet<u32> = BTreeSet::default();

    for packet in packets {
        total += 1;
        let idx = match packet.kind {
            PacketKind::Image => 0,
            PacketKind::Housekeeping => {
                hk_observed.insert(packet.sequence);
                1
            }
            PacketKind::Unclassified => {
                unclassified += 1;
                continue;
            }
        };
        if packet.is_good() {
            counted[idx].insert(packet.sequence);
        } else {
            bad[idx].insert(packet.sequence);
        }
    }

    if total == 0 {
        return Err(Error::UnreadableCapture(Unreadable::NoPackets));
    }
    let hk_domain = domain.housekeeping(&hk_observed)?;

    let image = KindGaps::new(domain.image(), &counted[0], &bad[0]);
    let housekeeping = KindGaps::new(hk_domain.clone(), &counted[1], &bad[1]);
    let missing_rate = domain.missing_rate(image.missing.len());
    debug!(
        packets = total,
        unclassified,
        missing_image = image.missing.len(),
        missing_housekeeping = housekeeping.missing.len(),
        "analyzed"
    );

    Ok(GapReport {
        image,
        housekeeping,
        housekeeping_domain: SequenceRange::new(*hk_domain.start(), *hk_domain.end()),
        missing_rate,
        unclassified,
    })
}
