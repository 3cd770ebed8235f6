use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use downlink::analysis::{analyze, ExpectedDomain};
use downlink::assemble::{merge, PacketSet};
use downlink::framing::{
    decode_packets, pack_product, split_frames, FramingProfile, Packet, PacketKind, ASM,
    DEFAULT_BLOCK_SIZE,
};

// A full size relayed capture with random payload.
fn relayed_capture() -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(16620);
    let mut product = vec![0u8; ExpectedDomain::IMAGE_PACKETS as usize * DEFAULT_BLOCK_SIZE];
    rng.fill(&mut product[..]);
    let profile = FramingProfile::relayed();
    let mut dat = pack_product(&profile, PacketKind::Image, &product, DEFAULT_BLOCK_SIZE);
    dat.extend(pack_product(
        &profile,
        PacketKind::Housekeeping,
        &product[..100 * DEFAULT_BLOCK_SIZE],
        DEFAULT_BLOCK_SIZE,
    ));
    dat
}

fn bench_split(c: &mut Criterion) {
    let dat = relayed_capture();

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(dat.len() as u64));
    group.bench_function("split", |b| {
        b.iter(|| split_frames(&dat, &ASM).count());
    });
    group.bench_function("decode", |b| {
        let profile = FramingProfile::relayed();
        b.iter(|| decode_packets(&dat, &ASM, &profile).count());
    });
    group.finish();
}

fn bench_analyze(c: &mut Criterion) {
    let dat = relayed_capture();
    let profile = FramingProfile::relayed();
    let packets: Vec<Packet> = decode_packets(&dat, &ASM, &profile).collect();
    let domain = ExpectedDomain::default();

    let mut group = c.benchmark_group("analysis");
    group.throughput(Throughput::Elements(packets.len() as u64));
    group.bench_function("analyze", |b| {
        b.iter(|| analyze(&packets, &domain).unwrap());
    });
    group.bench_function("merge", |b| {
        b.iter(|| {
            let set: PacketSet = merge(packets.clone(), packets[..1000].to_vec());
            set.len()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_split, bench_analyze);
criterion_main!(benches);
