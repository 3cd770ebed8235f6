use downlink::framing::{encode_frame, FramingProfile, PacketKind};

pub const NAME: &str = "F20240822162559.bin";

/// Deterministic, never zero payload for a packet.
pub fn payload(kind: PacketKind, seq: u32, len: usize) -> Vec<u8> {
    let base = match kind {
        PacketKind::Housekeeping => 0x80,
        _ => 0,
    };
    vec![base + (seq % 120) as u8 + 1; len]
}

/// Frame the given sequences, `bad` ones with a nonzero quality flag.
pub fn frames<I>(profile: &FramingProfile, kind: PacketKind, seqs: I, bad: &[u32], len: usize) -> Vec<u8>
where
    I: IntoIterator<Item = u32>,
{
    let mut out = Vec::default();
    for seq in seqs {
        let quality = u8::from(bad.contains(&seq));
        out.extend(encode_frame(profile, kind, seq, quality, &payload(kind, seq, len)).unwrap());
    }
    out
}

/// A capture with noise before the first frame.
pub fn capture<I, H>(profile: &FramingProfile, image: I, housekeeping: H, len: usize) -> Vec<u8>
where
    I: IntoIterator<Item = u32>,
    H: IntoIterator<Item = u32>,
{
    let mut out = vec![0x00, 0x1a, 0xcf];
    out.extend(frames(profile, PacketKind::Image, image, &[], len));
    out.extend(frames(profile, PacketKind::Housekeeping, housekeeping, &[], len));
    out
}
