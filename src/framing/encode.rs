//! Builds frames laid out per a [FramingProfile], the inverse of
//! [Packet::decode](super::Packet::decode).
use super::{FramingProfile, Packet, PacketKind, ASM};

/// Payload block size used by the onboard packer.
pub const DEFAULT_BLOCK_SIZE: usize = 1087;

/// Encode a single sync-prefixed frame.
///
/// Bytes not covered by the profile's header fields, including the trailer, are zero.
/// `quality_flag` is dropped if the profile has no quality field.
/// Returns `None` for [PacketKind::Unclassified], which has no discriminant, or for
/// sequence values that do not fit in 3 bytes.
#[must_use]
pub fn encode_frame(
    profile: &FramingProfile,
    kind: PacketKind,
    sequence: u32,
    quality_flag: u8,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let id = match kind {
        PacketKind::Image => profile.image_id,
        PacketKind::Housekeeping => profile.housekeeping_id,
        PacketKind::Unclassified => return None,
    };
    if sequence > 0xff_ffff {
        return None;
    }

    let header_len = profile.header_len().max(profile.payload_offset);
    let mut frame = vec![0u8; ASM.len() + header_len + payload.len() + profile.trailer_len];
    frame[..ASM.len()].copy_from_slice(&ASM);
    {
        let body = &mut frame[ASM.len()..];
        body[profile.kind_offset..profile.kind_offset + 2].copy_from_slice(&id);
        body[profile.sequence_offset..profile.sequence_offset + 3]
            .copy_from_slice(&sequence.to_be_bytes()[1..]);
        if let Some(quality) = profile.quality_offset {
            body[quality] = quality_flag;
        }
        body[profile.payload_offset..profile.payload_offset + payload.len()]
            .copy_from_slice(payload);
    }
    Some(frame)
}

/// Frame every packet in `packets`, skipping any that cannot be encoded.
pub fn pack_packets<'a, I>(profile: &FramingProfile, packets: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Packet>,
{
    let mut out = Vec::default();
    for packet in packets {
        if let Some(frame) = encode_frame(
            profile,
            packet.kind,
            packet.sequence,
            packet.quality_flag,
            &packet.payload,
        ) {
            out.extend(frame);
        }
    }
    out
}

/// Split a data product into `block_size` payloads and frame each one with sequence
/// numbers starting at 0. Only the final block is zero padded.
///
/// # Example
/// ```
/// use downlink::framing::{decode_packets, pack_product, FramingProfile, PacketKind, ASM};
///
/// let profile = FramingProfile::direct();
/// let stream = pack_product(&profile, PacketKind::Image, &[7u8; 10], 4);
/// let packets: Vec<_> = decode_packets(&stream, &ASM, &profile).collect();
///
/// assert_eq!(packets.len(), 3);
/// assert_eq!(packets[2].payload, [7, 7, 0, 0]);
/// ```
///
/// # Panics
/// If `block_size` is 0.
#[must_use]
pub fn pack_product(
    profile: &FramingProfile,
    kind: PacketKind,
    data: &[u8],
    block_size: usize,
) -> Vec<u8> {
    assert!(block_size > 0, "block size must be nonzero");
    let mut out = Vec::default();
    let mut block = vec![0u8; block_size];
    for (seq, chunk) in (0u32..).zip(data.chunks(block_size)) {
        block.fill(0);
        block[..chunk.len()].copy_from_slice(chunk);
        if let Some(frame) = encode_frame(profile, kind, seq, 0, &block) {
            out.extend(frame);
        }
    }
    out
}
