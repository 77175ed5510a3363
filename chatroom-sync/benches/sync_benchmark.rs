use chatroom_sync::{
    group_messages, Document, MemoryStore, Message, MessageLog, PresenceTracker, SyncConfig,
    SyncEngine, MAX_LOG,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

const NOW: u64 = 1_700_000_000_000;

/// A document at the log cap, alternating between two senders.
fn full_document() -> Document {
    let log = MessageLog::default();
    let mut doc = Document::new();
    for i in 0..MAX_LOG as u64 {
        let sender = if i % 3 == 0 { "Ana" } else { "Ben" };
        doc = log.append(doc, Message::chat(sender, format!("message number {i}"), NOW + i));
    }
    doc
}

fn bench_encode_full(c: &mut Criterion) {
    let doc = full_document();

    c.bench_function("document_encode_150", |b| {
        b.iter(|| black_box(black_box(&doc).encode().unwrap()))
    });
}

fn bench_decode_full(c: &mut Criterion) {
    let encoded = full_document().encode().unwrap();

    c.bench_function("document_decode_150", |b| {
        b.iter(|| black_box(Document::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_append_at_cap(c: &mut Criterion) {
    let log = MessageLog::default();
    let doc = full_document();

    c.bench_function("log_append_at_cap", |b| {
        b.iter(|| {
            let next = log.append(doc.clone(), Message::chat("Ana", "oi", NOW));
            black_box(next);
        })
    });
}

fn bench_view_active(c: &mut Criterion) {
    let presence = PresenceTracker::default();
    let mut doc = Document::new();
    for i in 0..100u64 {
        // Half fresh, half stale
        doc.typing.insert(format!("user-{i}"), NOW - (i % 2) * 10_000);
    }

    c.bench_function("presence_view_active_100", |b| {
        b.iter(|| black_box(presence.view_active(black_box(&doc), NOW, Some("user-0"))))
    });
}

fn bench_group_messages(c: &mut Criterion) {
    let doc = full_document();

    c.bench_function("group_messages_150", |b| {
        b.iter(|| black_box(group_messages(black_box(&doc.messages), Some("Ana"))))
    });
}

fn bench_read_modify_write(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = SyncEngine::new(MemoryStore::new(), SyncConfig::default());
    rt.block_on(engine.join("Ana")).unwrap();

    c.bench_function("engine_send_memory_store", |b| {
        b.iter(|| black_box(rt.block_on(engine.send("benchmark message"))))
    });
}

criterion_group!(
    benches,
    bench_encode_full,
    bench_decode_full,
    bench_append_at_cap,
    bench_view_active,
    bench_group_messages,
    bench_read_modify_write,
);
criterion_main!(benches);
