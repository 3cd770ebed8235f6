//! Merging of original and retransmitted packets and product assembly.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::analysis::{analyze, ExpectedDomain, GapReport};
use crate::framing::{pack_packets, FramingProfile, Packet, PacketKind};
use crate::Result;

/// Packets keyed by `(kind, sequence)`, at most one per key.
///
/// When a key is inserted twice the later packet wins, unless the later packet has a
/// bad quality flag and the existing one is good. Unclassified packets have no
/// meaningful sequence number; they are only counted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PacketSet {
    packets: BTreeMap<(PacketKind, u32), Packet>,
    unclassified: usize,
}

impl PacketSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a packet, returning `true` if it replaced or added an entry.
    pub fn insert(&mut self, packet: Packet) -> bool {
        if packet.kind == PacketKind::Unclassified {
            self.unclassified += 1;
            return false;
        }
        let key = (packet.kind, packet.sequence);
        if let Some(existing) = self.packets.get(&key) {
            if existing.is_good() && !packet.is_good() {
                trace!(kind = %packet.kind, seq = packet.sequence, "keeping good copy over bad");
                return false;
            }
        }
        self.packets.insert(key, packet);
        true
    }

    /// Merge a later delivery into this set. Returns the number of packets that
    /// were added or replaced. The later set's unclassified count is not carried over.
    pub fn merge(&mut self, later: PacketSet) -> usize {
        later
            .packets
            .into_values()
            .map(|p| usize::from(self.insert(p)))
            .sum()
    }

    #[must_use]
    pub fn get(&self, kind: PacketKind, sequence: u32) -> Option<&Packet> {
        self.packets.get(&(kind, sequence))
    }

    /// Number of unclassified packets inserted into this set.
    #[must_use]
    pub fn unclassified(&self) -> usize {
        self.unclassified
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// All packets ordered by kind then sequence.
    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.values()
    }

    /// Good packets of one kind ordered by sequence.
    pub fn good(&self, kind: PacketKind) -> impl Iterator<Item = &Packet> {
        self.packets
            .range((kind, 0)..=(kind, u32::MAX))
            .map(|(_, p)| p)
            .filter(|p| p.is_good())
    }
}

impl FromIterator<Packet> for PacketSet {
    fn from_iter<T: IntoIterator<Item = Packet>>(iter: T) -> Self {
        let mut set = PacketSet::default();
        set.extend(iter);
        set
    }
}

impl Extend<Packet> for PacketSet {
    fn extend<T: IntoIterator<Item = Packet>>(&mut self, iter: T) {
        for packet in iter {
            self.insert(packet);
        }
    }
}

/// Merge a retransmission into an original capture's packets.
///
/// A good retransmitted packet always supersedes the original copy.
pub fn merge<A, B>(original: A, retransmission: B) -> PacketSet
where
    A: IntoIterator<Item = Packet>,
    B: IntoIterator<Item = Packet>,
{
    let mut set: PacketSet = original.into_iter().collect();
    let count = set.merge(retransmission.into_iter().collect());
    debug!(merged = count, total = set.len(), "merged retransmission");
    set
}

/// Remove trailing zero padding.
fn unpad(mut data: Vec<u8>) -> Vec<u8> {
    let len = data.iter().rposition(|b| *b != 0).map_or(0, |idx| idx + 1);
    data.truncate(len);
    data
}

fn concat_payloads<'a, I>(packets: I) -> Vec<u8>
where
    I: Iterator<Item = &'a Packet>,
{
    let mut data = Vec::default();
    for packet in packets {
        data.extend_from_slice(&packet.payload);
    }
    unpad(data)
}

/// Serialized data product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    /// No image or housekeeping packet is missing. Holds the unpadded image payload
    /// stream followed by the unpadded housekeeping payload stream.
    Complete { data: Vec<u8> },
    /// Image or housekeeping packets are missing. Holds the available good packets
    /// framed with [FramingProfile::archive] so they can be merged again later.
    Incomplete { data: Vec<u8> },
}

impl Product {
    #[must_use]
    pub fn data(&self) -> &[u8] {
        match self {
            Self::Complete { data } | Self::Incomplete { data } => data,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Analysis of a packet set together with the product it yields.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub report: GapReport,
    pub product: Product,
}

/// Analyze `set` and serialize its product.
///
/// # Errors
/// [Error::UnreadableCapture](crate::Error::UnreadableCapture) if the set cannot be
/// analyzed; there is no product in that case.
pub fn assemble(set: &PacketSet, domain: &ExpectedDomain) -> Result<Assembly> {
    let mut report = analyze(set.iter(), domain)?;
    report.unclassified = set.unclassified();

    let product = if report.is_complete() {
        let image = domain.image();
        let hk = &report.housekeeping_domain;
        let mut data = concat_payloads(
            set.good(PacketKind::Image)
                .filter(|p| image.contains(&p.sequence)),
        );
        data.extend(concat_payloads(
            set.good(PacketKind::Housekeeping)
                .filter(|p| hk.contains(p.sequence)),
        ));
        debug!(bytes = data.len(), "assembled complete product");
        Product::Complete { data }
    } else {
        let good = set
            .good(PacketKind::Image)
            .chain(set.good(PacketKind::Housekeeping));
        let data = pack_packets(&FramingProfile::archive(), good);
        debug!(bytes = data.len(), "assembled incomplete product");
        Product::Incomplete { data }
    };

    Ok(Assembly { report, product })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{decode_packets, ASM};

    fn packet(kind: PacketKind, sequence: u32, quality_flag: u8, payload: &[u8]) -> Packet {
        Packet {
            kind,
            sequence,
            quality_flag,
            payload: payload.to_vec(),
        }
    }

    fn domain() -> ExpectedDomain {
        ExpectedDomain::builder()
            .image_packets(4)
            .housekeeping_ceiling(100)
            .build()
    }

    #[test]
    fn insert_prefers_good_then_later() {
        let mut set = PacketSet::new();
        assert!(set.insert(packet(PacketKind::Image, 1, 1, &[1])));
        assert!(set.insert(packet(PacketKind::Image, 1, 0, &[2])));
        assert!(!set.insert(packet(PacketKind::Image, 1, 3, &[3])));
        assert_eq!(set.get(PacketKind::Image, 1).unwrap().payload, [2]);

        assert!(set.insert(packet(PacketKind::Image, 1, 0, &[4])));
        assert_eq!(set.get(PacketKind::Image, 1).unwrap().payload, [4]);

        assert!(!set.insert(Packet::unclassified()));
        assert_eq!(set.len(), 1);
        assert_eq!(set.unclassified(), 1);
    }

    #[test]
    fn merge_with_self_is_identity() {
        let packets = vec![
            packet(PacketKind::Image, 0, 0, &[1]),
            packet(PacketKind::Image, 2, 5, &[2]),
            packet(PacketKind::Housekeeping, 9, 0, &[3]),
        ];
        let original: PacketSet = packets.clone().into_iter().collect();

        let merged = merge(packets.clone(), packets.clone());

        assert_eq!(merged, original);
        assert_eq!(
            analyze(merged.iter(), &domain()).unwrap(),
            analyze(&packets, &domain()).unwrap()
        );
    }

    #[test]
    fn retransmission_fills_gaps() {
        let original = vec![
            packet(PacketKind::Image, 0, 0, &[1, 1]),
            packet(PacketKind::Image, 1, 9, &[0xee, 0xee]),
            packet(PacketKind::Image, 3, 0, &[4, 0]),
            packet(PacketKind::Housekeeping, 5, 0, &[5, 0]),
        ];
        let retransmission = vec![
            packet(PacketKind::Image, 1, 0, &[2, 2]),
            packet(PacketKind::Image, 2, 0, &[3, 3]),
        ];

        let set = merge(original, retransmission);
        let assembly = assemble(&set, &domain()).unwrap();

        assert!(assembly.report.is_complete());
        assert_eq!(
            assembly.product,
            Product::Complete {
                data: vec![1, 1, 2, 2, 3, 3, 4, 5]
            }
        );
    }

    #[test]
    fn housekeeping_gaps_keep_packets_for_later() {
        let packets = vec![
            packet(PacketKind::Image, 0, 0, &[1]),
            packet(PacketKind::Image, 1, 0, &[1]),
            packet(PacketKind::Image, 2, 0, &[1]),
            packet(PacketKind::Image, 3, 0, &[1, 0, 0]),
            packet(PacketKind::Housekeeping, 5, 0, &[5]),
            packet(PacketKind::Housekeeping, 7, 0, &[7]),
        ];

        let assembly = assemble(&packets.clone().into_iter().collect(), &domain()).unwrap();

        assert!(assembly.report.image.is_complete());
        assert_eq!(assembly.report.housekeeping.missing, vec![6]);
        assert!(!assembly.product.is_complete());
        let stored: Vec<Packet> =
            decode_packets(assembly.product.data(), &ASM, &FramingProfile::archive()).collect();
        assert_eq!(stored, packets);

        // The stored packets plus the missing one make a complete product.
        let set = merge(stored, vec![packet(PacketKind::Housekeeping, 6, 0, &[6])]);
        assert_eq!(
            assemble(&set, &domain()).unwrap().product,
            Product::Complete {
                data: vec![1, 1, 1, 1, 5, 6, 7]
            }
        );
    }

    #[test]
    fn image_gaps_produce_archive() {
        let packets = vec![
            packet(PacketKind::Image, 0, 0, &[1]),
            packet(PacketKind::Image, 1, 2, &[2]),
            packet(PacketKind::Image, 3, 0, &[4]),
            packet(PacketKind::Housekeeping, 5, 0, &[5]),
        ];
        let set: PacketSet = packets.into_iter().collect();

        let assembly = assemble(&set, &domain()).unwrap();

        assert!(!assembly.product.is_complete());
        let stored: Vec<Packet> =
            decode_packets(assembly.product.data(), &ASM, &FramingProfile::archive()).collect();
        let sequences: Vec<(PacketKind, u32)> = stored.iter().map(|p| (p.kind, p.sequence)).collect();
        assert_eq!(
            sequences,
            vec![
                (PacketKind::Image, 0),
                (PacketKind::Image, 3),
                (PacketKind::Housekeeping, 5)
            ]
        );
        assert_eq!(stored[1].payload, [4]);
    }

    #[test]
    fn unreadable_set() {
        let set: PacketSet = vec![packet(PacketKind::Image, 0, 0, &[1])].into_iter().collect();
        assert!(assemble(&set, &domain()).is_err());
        assert!(assemble(&PacketSet::new(), &domain()).is_err());
    }

    #[test]
    fn unpad_strips_only_trailing_zeros() {
        assert_eq!(unpad(vec![0, 1, 0, 2, 0, 0]), vec![0, 1, 0, 2]);
        assert_eq!(unpad(vec![0, 0]), Vec::<u8>::new());
    }
}
