//! # Verdict Queue Benchmarks
//!
//! | Area | Measured |
//! |------|----------|
//! | QueueCore | admit → notify → verdict → reinject cycle, per batch size |
//! | Codec | notification encode, verdict decode with rewrite |
//! | Control path | full MODE request through `ControlHandler` |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use verdict_queue::ipc::codec::{decode_verdict, encode_mode, encode_verdict, notification_frame};
use verdict_queue::ipc::wire::frame;
use verdict_queue::ipc::{flags, msg_type};
use verdict_queue::{
    ChannelTransport, ControlHandler, CopyMode, Credentials, HookInfo, ModeChange, PacketBuffer,
    ProtocolFamily, QueueConfig, QueueCore, RecordingHook, Verdict, VerdictQueue, VerdictRecord,
};

fn random_packet(len: usize) -> PacketBuffer {
    let mut rng = rand::thread_rng();
    PacketBuffer::new((0..len).map(|_| rng.gen::<u8>()).collect::<Vec<u8>>())
}

// ============================================================================
// QueueCore: full element lifecycle without I/O
// ============================================================================

fn bench_core_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue-core");
    group.measurement_time(Duration::from_secs(5));

    let packet = random_packet(512);
    let hook = HookInfo::new(ProtocolFamily::Ipv4, 1).with_in_dev("eth0");

    for batch in [1usize, 16, 256, 1024] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("lifecycle", batch), &batch, |b, &batch| {
            b.iter(|| {
                let mut core = QueueCore::new(batch, 1);
                core.register_peer(1);
                core.set_mode(ModeChange::new(CopyMode::Packet, 128), 0xFFFF)
                    .unwrap();
                for _ in 0..batch {
                    let _ = core.admit(packet.clone(), hook.clone());
                }
                let plan = core.begin_pass();
                for job in &plan.jobs {
                    core.mark_notified(job.id);
                }
                for job in plan.jobs {
                    let _ = core.apply_verdict(VerdictRecord::new(job.id, Verdict::Accept));
                }
                black_box(core.begin_pass().reinject.len())
            })
        });
    }

    group.finish();
}

// ============================================================================
// Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let mut core = QueueCore::new(4, 1);
    core.register_peer(1);
    core.set_mode(ModeChange::new(CopyMode::Packet, 0), 0xFFFF)
        .unwrap();
    let _ = core.admit(random_packet(1500), HookInfo::new(ProtocolFamily::Ipv4, 1));
    let job = core
        .begin_pass()
        .jobs
        .pop()
        .expect("one notification job");

    group.throughput(Throughput::Bytes(1500));
    group.bench_function("notification_frame_1500", |b| {
        b.iter(|| black_box(notification_frame(&job, 1)))
    });

    let verdict = encode_verdict(
        &VerdictRecord::new(42, Verdict::Accept).with_payload(random_packet(1500).into_bytes()),
    );
    group.bench_function("decode_verdict_rewrite_1500", |b| {
        b.iter(|| black_box(decode_verdict(verdict.clone()).unwrap()))
    });

    group.finish();
}

// ============================================================================
// Control path
// ============================================================================

fn bench_control_path(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let handler = runtime.block_on(async {
        let hook = Arc::new(RecordingHook::new());
        let (transport, _frames) = ChannelTransport::new(16);
        let queue =
            VerdictQueue::start(QueueConfig::for_testing(), hook, Arc::new(transport)).unwrap();
        ControlHandler::new(queue)
    });
    let credentials = Credentials::admin(7);
    let request: Bytes = frame(
        msg_type::MODE,
        flags::REQUEST | flags::ACK,
        1,
        7,
        &encode_mode(ModeChange::new(CopyMode::Meta, 0)),
    );

    c.bench_function("control/mode_request", |b| {
        b.iter(|| black_box(handler.handle_frame(request.clone(), &credentials)))
    });

    runtime.block_on(handler.queue().shutdown()).unwrap();
}

criterion_group!(benches, bench_core_lifecycle, bench_codec, bench_control_path);
criterion_main!(benches);
