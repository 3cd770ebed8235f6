use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use super::GapReport;
use crate::framing::{Packet, PacketKind};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSummary {
    pub count: usize,
    pub bad: usize,
    pub bytes: usize,
}

/// Tracks stats on packet iteration.
///
/// # Example
/// ```
/// use downlink::analysis::CaptureSummary;
/// use downlink::framing::{decode_packets, FramingProfile, PacketKind, ASM};
///
/// let mut dat = ASM.to_vec();
/// dat.extend_from_slice(&[0x55, 0x40, 0x00, 0x00, 0x01, 0x00, 0xff]);
///
/// let mut summary = CaptureSummary::default();
/// decode_packets(&dat, &ASM, &FramingProfile::archive()).for_each(|p| summary.add(&p));
/// assert_eq!(summary.kinds[&PacketKind::Image].count, 1);
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub packets: usize,
    pub kinds: BTreeMap<PacketKind, KindSummary>,
}

impl CaptureSummary {
    pub fn add(&mut self, packet: &Packet) {
        self.packets += 1;
        let kind = self.kinds.entry(packet.kind).or_default();
        kind.count += 1;
        kind.bytes += packet.payload.len();
        if !packet.is_good() {
            kind.bad += 1;
        }
    }

    #[must_use]
    pub fn count(&self, kind: PacketKind) -> usize {
        self.kinds.get(&kind).map_or(0, |k| k.count)
    }

    #[must_use]
    pub fn bad(&self, kind: PacketKind) -> usize {
        self.kinds.get(&kind).map_or(0, |k| k.bad)
    }
}

impl<'a> FromIterator<&'a Packet> for CaptureSummary {
    fn from_iter<T: IntoIterator<Item = &'a Packet>>(iter: T) -> Self {
        let mut summary = CaptureSummary::default();
        iter.into_iter().for_each(|p| summary.add(p));
        summary
    }
}

/// Operator facing description of a single capture.
///
/// `Display` renders the plain text form; serialize for JSON.
#[derive(Debug, Clone, Serialize)]
pub struct DetailReport {
    pub capture: String,
    pub summary: CaptureSummary,
    /// `None` when the capture could not be analyzed.
    pub gaps: Option<GapReport>,
}

fn join<T: Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Display for DetailReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "Capture: {}", self.capture)?;
        writeln!(f, "Number of Packets: {}", s.packets)?;
        writeln!(f, "Total Image Packets: {}", s.count(PacketKind::Image))?;
        writeln!(f, "Total HK Packets: {}", s.count(PacketKind::Housekeeping))?;
        writeln!(f, "UnClassified Packets: {}", s.count(PacketKind::Unclassified))?;
        writeln!(f, "Number of bad quality Image Packets: {}", s.bad(PacketKind::Image))?;
        writeln!(f, "Number of bad quality HK Packets: {}", s.bad(PacketKind::Housekeeping))?;

        let Some(gaps) = &self.gaps else {
            return writeln!(f, "Unreadable capture");
        };
        writeln!(f, "Number of Missing Image Packets: {}", gaps.image.missing.len())?;
        writeln!(f, "Number of Missing HK Packets: {}", gaps.housekeeping.missing.len())?;
        writeln!(f, "Total missing packets: {}", gaps.total_missing())?;
        writeln!(f, "Segment of request image packets: [{}]", join(&gaps.image.ranges))?;
        writeln!(f, "Segment of request HK packets: [{}]", join(&gaps.housekeeping.ranges))?;
        writeln!(
            f,
            "Request image packets rate (missing image/Image packet %): {}",
            gaps.missing_rate
        )
    }
}
