//! Benchmarks for the wire codec

use std::io::Cursor;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memgate::protocol::{read_request, write_response, Response, Value};

fn codec_benchmarks(c: &mut Criterion) {
    let set_line = b"set benchmark:key 0 3600 64\r\n".to_vec();
    let mut set_request = set_line.clone();
    set_request.extend_from_slice(&[b'x'; 64]);
    set_request.extend_from_slice(b"\r\n");

    c.bench_function("decode_set_64b", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(&set_request[..]));
            read_request(&mut cursor).unwrap()
        })
    });

    c.bench_function("decode_get", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(&b"get benchmark:key\r\n"[..]));
            read_request(&mut cursor).unwrap()
        })
    });

    let response = Response::Values(vec![Value {
        key: "benchmark:key".to_string(),
        flags: 0,
        cas_unique: Some(12345),
        data: Bytes::from(vec![b'x'; 64]),
    }]);

    c.bench_function("encode_value_64b", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(128);
            write_response(&mut buf, black_box(&response)).unwrap();
            buf
        })
    });
}

criterion_group!(benches, codec_benchmarks);
criterion_main!(benches);
