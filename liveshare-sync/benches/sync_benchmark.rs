use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::time::Duration;

use liveshare_core::{DocumentKey, DocumentOperation, Position, SessionId, TextRange, UserId};
use liveshare_sync::document::DocumentSync;
use liveshare_sync::host::{EchoGuard, EditorHost};
use liveshare_sync::protocol::{Frame, OperationPayload};
use liveshare_sync::{LastTimestampWins, MemoryHost, Message, PresenceRoom};

fn operation_frame() -> Frame {
    let op = DocumentOperation::new(
        DocumentKey::new("file:///bench/main.py"),
        TextRange::caret(Position::new(3, 12)),
        "print(value)".to_string(),
        0,
        1_700_000_000_000,
        UserId::new("bench"),
    );
    Frame::new(Message::DocumentOperation {
        uri: op.document_key.clone(),
        operation: OperationPayload::from_operation(&op),
    })
    .in_session(&SessionId::parse("BENCH1").unwrap())
    .from_user(&UserId::new("bench"))
}

// ─── Wire codec ─────────────────────────────────────────────────

fn bench_operation_encode(c: &mut Criterion) {
    let frame = operation_frame();

    c.bench_function("operation_frame_encode", |b| {
        b.iter(|| black_box(black_box(&frame).encode().unwrap()))
    });
}

fn bench_operation_decode(c: &mut Criterion) {
    let encoded = operation_frame().encode().unwrap();

    c.bench_function("operation_frame_decode", |b| {
        b.iter(|| black_box(Frame::decode(black_box(&encoded)).unwrap()))
    });
}

// ─── Document sync ──────────────────────────────────────────────

fn bench_drain_100_ops(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let key = &DocumentKey::new("file:///bench/main.py");
    let origin = &UserId::new("remote");

    c.bench_function("drain_100_inserts", |b| {
        b.to_async(&rt).iter(|| async move {
            let host = MemoryHost::new();
            let mut sync = DocumentSync::new(
                Box::new(LastTimestampWins::new()),
                4_096,
                Duration::from_millis(50),
                EchoGuard::new(),
            );
            sync.materialize(&host, key, Some("main.py"), "", None)
                .await
                .unwrap();
            for i in 0..100u32 {
                sync.enqueue(DocumentOperation::new(
                    key.clone(),
                    TextRange::caret(Position::new(0, i)),
                    "x".to_string(),
                    0,
                    u64::from(i) + 1,
                    origin.clone(),
                ));
            }
            let report = sync.drain(&host).await;
            black_box(report.applied);
            host.close_document(key).await.unwrap();
        })
    });
}

// ─── Presence ───────────────────────────────────────────────────

fn bench_presence_cursor_update(c: &mut Criterion) {
    let mut room = PresenceRoom::new(UserId::new("local"));
    let members: Vec<UserId> = (0..8).map(|i| UserId::new(format!("peer-{i}"))).collect();
    for (i, id) in members.iter().enumerate() {
        room.join(id.clone(), &format!("Peer {i}"));
    }
    let key = DocumentKey::new("file:///bench/main.py");

    c.bench_function("presence_cursor_update_and_snapshot", |b| {
        let mut col = 0;
        b.iter(|| {
            col = (col + 1) % 80;
            room.update_cursor(&members[3], &key, Some(Position::new(10, col)), None);
            black_box(room.snapshot());
        })
    });
}

criterion_group!(
    benches,
    bench_operation_encode,
    bench_operation_decode,
    bench_drain_100_ops,
    bench_presence_cursor_update,
);
criterion_main!(benches);
