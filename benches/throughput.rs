//! Throughput benchmarks for the request path: decoding, command execution
//! against the keyspace, and the full frame-to-reply round.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use respkv::commands::{CommandHandler, Source};
use respkv::protocol::{decode, RespParser};
use respkv::storage::Keyspace;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn new_handler() -> CommandHandler {
    CommandHandler::new(Arc::new(Mutex::new(Keyspace::new())))
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let set = b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n";
    group.bench_function("multi_bulk_set", |b| {
        b.iter(|| black_box(decode(black_box(set)).unwrap()));
    });

    group.bench_function("inline_set", |b| {
        b.iter(|| black_box(decode(black_box(b"SET name Ariz\r\n")).unwrap()));
    });

    let mut pipeline = Vec::new();
    for _ in 0..16 {
        pipeline.extend_from_slice(set);
    }
    group.throughput(Throughput::Elements(16));
    group.bench_function("split_pipeline_16", |b| {
        b.iter(|| {
            let mut offset = 0;
            while let Some(len) = RespParser::next_frame(&pipeline[offset..]) {
                offset += len;
            }
            black_box(offset)
        });
    });

    group.finish();
}

fn bench_strings(c: &mut Criterion) {
    let handler = new_handler();
    for i in 0..100_000 {
        handler.execute(
            "SET",
            &[format!("key:{}", i), format!("value:{}", i)],
            Source::Client,
        );
    }

    let mut group = c.benchmark_group("strings");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set", |b| {
        let mut i = 0u64;
        b.iter(|| {
            handler.execute("SET", &[format!("new:{}", i), "value".into()], Source::Client);
            i += 1;
        });
    });

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(handler.execute("GET", &[format!("key:{}", i % 100_000)], Source::Client));
            i += 1;
        });
    });

    group.bench_function("incr_single_counter", |b| {
        let counter = args(&["counter"]);
        b.iter(|| black_box(handler.execute("INCR", &counter, Source::Client)));
    });

    group.finish();
}

fn bench_lists(c: &mut Criterion) {
    let handler = new_handler();

    let mut group = c.benchmark_group("lists");
    group.throughput(Throughput::Elements(1));

    group.bench_function("rpush_lpop", |b| {
        let push = args(&["queue", "job"]);
        let pop = args(&["queue"]);
        b.iter(|| {
            handler.execute("RPUSH", &push, Source::Client);
            black_box(handler.execute("LPOP", &pop, Source::Client));
        });
    });

    for i in 0..1_000 {
        handler.execute("RPUSH", &[String::from("long"), i.to_string()], Source::Client);
    }
    group.bench_function("lrange_100", |b| {
        let range = args(&["long", "100", "199"]);
        b.iter(|| black_box(handler.execute("LRANGE", &range, Source::Client)));
    });

    group.finish();
}

fn bench_handle_frame(c: &mut Criterion) {
    let handler = new_handler();

    let mut group = c.benchmark_group("handle_frame");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_then_get", |b| {
        b.iter(|| {
            black_box(handler.handle_frame(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n"));
            black_box(handler.handle_frame(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"));
        });
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let handler = new_handler();
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let handler = handler.clone();
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = format!("key:{}:{}", t, i);
                            handler.execute("SET", &[key.clone(), "value".into()], Source::Client);
                            handler.execute("GET", &[key], Source::Client);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(handler.with_keyspace(|ks| ks.len()));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_strings,
    bench_lists,
    bench_handle_frame,
    bench_concurrent,
);

criterion_main!(benches);
