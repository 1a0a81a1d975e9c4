//! Address codec and reply encoding benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use socks5_relay::proxy::{Address, HandshakeReply};

fn domain_request() -> Vec<u8> {
    let host = b"www.example.com";
    let mut buf = vec![0x03, host.len() as u8];
    buf.extend_from_slice(host);
    buf.extend_from_slice(&443u16.to_be_bytes());
    buf
}

fn bench_address_decode(c: &mut Criterion) {
    let ipv4 = [0x01, 93, 184, 216, 34, 0x01, 0xBB];
    let mut ipv6 = vec![0x04];
    ipv6.extend_from_slice(&[0u8; 15]);
    ipv6.push(1);
    ipv6.extend_from_slice(&[0x00, 0x50]);
    let domain = domain_request();

    let mut group = c.benchmark_group("address_decode");
    for (name, buf) in [("ipv4", &ipv4[..]), ("ipv6", &ipv6[..]), ("domain", &domain[..])] {
        group.throughput(Throughput::Bytes(buf.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| black_box(Address::decode(black_box(buf)).unwrap()))
        });
    }
    group.finish();
}

fn bench_reply_encode(c: &mut Criterion) {
    let (address, _) = Address::decode(&domain_request()).unwrap();
    let reply = HandshakeReply::success(address);

    c.bench_function("reply_encode_domain", |b| {
        b.iter(|| black_box(reply.encode()))
    });
}

fn bench_host_text(c: &mut Criterion) {
    let mut raw = vec![0x04];
    raw.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8]);
    raw.extend_from_slice(&[0u8; 11]);
    raw.push(1);
    raw.extend_from_slice(&[0x01, 0xBB]);
    let (address, _) = Address::decode(&raw).unwrap();

    c.bench_function("ipv6_host_text", |b| b.iter(|| black_box(address.host())));
}

criterion_group!(benches, bench_address_decode, bench_reply_encode, bench_host_text);
criterion_main!(benches);
