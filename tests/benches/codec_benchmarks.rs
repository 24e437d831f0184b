//! # Nodetree Hot Path Benchmarks
//!
//! | Path | What is measured |
//! |------|------------------|
//! | Codec | encode / decode of typical records, whole and split across reads |
//! | Correlation | register + resolve through the pending tables |

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nodetree_client::domain::{CorrelationTables, QueryKind, QueryReply};
use nodetree_proto::{encode, FrameDecoder, Message, Node, NodeId, Value};

// ============================================================================
// FIXTURES
// ============================================================================

fn sample_node() -> Node {
    let mut node = Node::new(NodeId::random());
    node.parent = Some(NodeId::ROOT);
    node.tags.insert("blob".into());
    node.tags.insert("indexed".into());
    node.attr.insert("name".into(), Value::from("sample"));
    node.bindata.insert("raw".into(), 4096);
    node
}

fn sample_messages() -> Vec<(&'static str, Message)> {
    vec![
        (
            "get_reply",
            Message::GetReply {
                qid: 17,
                obj: sample_node(),
            },
        ),
        ("request_ack", Message::RequestAck { rid: 9 }),
        (
            "get_bindata_reply_4k",
            Message::GetBinDataReply {
                qid: 3,
                data: Bytes::from(vec![0xabu8; 4096]),
            },
        ),
        (
            "plugin_method_run",
            Message::PluginMethodRun {
                phid: 2,
                pmid: 44,
                node: NodeId::random(),
                params: Value::Array(vec![Value::from(1), Value::from("two")]),
            },
        ),
    ]
}

// ============================================================================
// CODEC
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-encode");

    for (name, msg) in sample_messages() {
        group.bench_function(name, |b| b.iter(|| black_box(encode(black_box(&msg)))));
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-decode");

    for (name, msg) in sample_messages() {
        let bytes = encode(&msg).expect("encode");
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                decoder.feed(&bytes);
                black_box(decoder.decode_next())
            })
        });
    }

    group.finish();
}

/// A stream of records fed in fixed-size chunks, as a socket would.
fn bench_decode_split_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-decode-stream");

    let mut stream = Vec::new();
    let mut count = 0u64;
    for _ in 0..64 {
        for (_, msg) in sample_messages() {
            stream.extend(encode(&msg).expect("encode"));
            count += 1;
        }
    }
    group.throughput(Throughput::Elements(count));

    for chunk in [64usize, 1024, 8192] {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                let mut decoded = 0u64;
                for piece in stream.chunks(chunk) {
                    decoder.feed(piece);
                    while let Ok(Some(msg)) = decoder.decode_next() {
                        black_box(msg);
                        decoded += 1;
                    }
                }
                assert_eq!(decoded, count);
            })
        });
    }

    group.finish();
}

// ============================================================================
// CORRELATION
// ============================================================================

fn bench_query_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation");

    for outstanding in [0usize, 1_000, 10_000] {
        let mut tables = CorrelationTables::new();
        let mut keep = Vec::with_capacity(outstanding);
        for _ in 0..outstanding {
            keep.push(tables.open_query(QueryKind::Data).expect("open"));
        }
        let reply = QueryReply::Data(Value::from(1));

        group.bench_with_input(
            BenchmarkId::new("open_then_deliver", outstanding),
            &outstanding,
            |b, _| {
                b.iter(|| {
                    let (qid, completion) = tables.open_query(QueryKind::Data).expect("open");
                    tables.deliver_reply(qid, reply.clone()).expect("deliver");
                    black_box(completion)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_decode_split_stream,
    bench_query_round_trip
);
criterion_main!(benches);
