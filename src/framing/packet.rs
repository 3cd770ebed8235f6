use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{split_frames, FramingProfile};
use crate::{Error, Result};

/// Packet classification by kind discriminant.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketKind {
    Image,
    Housekeeping,
    Unclassified,
}

impl PacketKind {
    /// Short label used in reports, e.g., `IM`.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Image => "IM",
            Self::Housekeeping => "HK",
            Self::Unclassified => "UnClassified",
        }
    }
}

impl Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A packet parsed from a single frame.
///
/// A packet with a nonzero `quality_flag` has payload bytes that must not be trusted.
/// Such packets never contribute to a product and count as missing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    /// Packet sequence counter
    pub sequence: u32,
    /// 0 is good, anything else is unusable
    pub quality_flag: u8,
    /// Payload bytes with the frame trailer removed
    pub payload: Vec<u8>,
}

impl Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet{{kind: {}, sequence: {}, quality: {}, payload:[len={}]}}",
            self.kind,
            self.sequence,
            self.quality_flag,
            self.payload.len()
        )
    }
}

impl Packet {
    #[must_use]
    pub fn is_good(&self) -> bool {
        self.quality_flag == 0
    }

    /// The packet that stands in for a frame too short to carry a header.
    #[must_use]
    pub fn unclassified() -> Self {
        Packet {
            kind: PacketKind::Unclassified,
            sequence: 0,
            quality_flag: 0,
            payload: Vec::default(),
        }
    }

    /// Decode a frame according to `profile`.
    ///
    /// # Errors
    /// [Error::MalformedFrame] if the frame is shorter than [FramingProfile::header_len].
    pub fn try_decode(frame: &[u8], profile: &FramingProfile) -> Result<Packet> {
        let minimum = profile.header_len();
        if frame.len() < minimum {
            return Err(Error::MalformedFrame {
                actual: frame.len(),
                minimum,
            });
        }

        let id = [frame[profile.kind_offset], frame[profile.kind_offset + 1]];
        let kind = if id == profile.image_id {
            PacketKind::Image
        } else if id == profile.housekeeping_id {
            PacketKind::Housekeeping
        } else {
            PacketKind::Unclassified
        };
        let seq = &frame[profile.sequence_offset..profile.sequence_offset + 3];
        let payload = profile
            .payload_bounds(frame.len())
            .map(|(start, end)| frame[start..end].to_vec())
            .unwrap_or_default();

        Ok(Packet {
            kind,
            sequence: u32::from_be_bytes([0, seq[0], seq[1], seq[2]]),
            quality_flag: profile.quality_offset.map_or(0, |q| frame[q]),
            payload,
        })
    }

    /// Decode a frame according to `profile`, degrading a malformed frame to an
    /// [unclassified](Packet::unclassified) packet. A truncated frame is expected at
    /// the end of a capture, so this never fails.
    #[must_use]
    pub fn decode(frame: &[u8], profile: &FramingProfile) -> Packet {
        match Self::try_decode(frame, profile) {
            Ok(packet) => packet,
            Err(err) => {
                trace!(profile = %profile.name, "{err}; treating as unclassified");
                Self::unclassified()
            }
        }
    }
}

/// Split `data` on `marker` and decode every frame using `profile`.
///
/// Every frame produces exactly one packet, see [Packet::decode].
///
/// # Example
/// ```
/// use downlink::framing::{decode_packets, FramingProfile, PacketKind, ASM};
///
/// let mut dat = ASM.to_vec();
/// dat.extend_from_slice(&[0x55, 0x40, 0x00, 0x01, 0x02, 0xaa, 0xbb]);
///
/// let packets: Vec<_> = decode_packets(&dat, &ASM, &FramingProfile::archive()).collect();
/// assert_eq!(packets[0].kind, PacketKind::Image);
/// assert_eq!(packets[0].sequence, 258);
/// assert_eq!(packets[0].payload, [0xaa, 0xbb]);
/// ```
pub fn decode_packets<'a>(
    data: &'a [u8],
    marker: &'a [u8],
    profile: &'a FramingProfile,
) -> impl Iterator<Item = Packet> + 'a {
    split_frames(data, marker).map(move |frame| Packet::decode(frame, profile))
}
