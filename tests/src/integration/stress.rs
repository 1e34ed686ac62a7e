//! # Exactly-Once Stress
//!
//! Several producers push tagged packets through the hook while an
//! in-process peer answers in shuffled order, sometimes rewriting payloads,
//! and a controller keeps flipping the copy mode. Whatever the interleaving,
//! every packet must come back to the hook exactly once.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::{BufMut, Bytes, BytesMut};
    use futures::future::join_all;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use tokio::sync::mpsc;

    use verdict_queue::domain::errno;
    use verdict_queue::ipc::codec::{decode_ack, encode_mode, encode_verdict};
    use verdict_queue::ipc::wire::frame;
    use verdict_queue::ipc::{flags, msg_type, Notification, ENVELOPE_LEN};
    use verdict_queue::{
        ControlHandler, CopyMode, Credentials, ModeChange, PeerFrame, QueueConfig,
        QueueState, RecordingHook, Verdict, VerdictRecord,
    };

    use crate::harness::{ipv4_hook, tag_of, tagged_packet, wait_until, Harness, PEER_PID};

    const PRODUCERS: u32 = 4;
    const PER_PRODUCER: u32 = 500;
    const TOTAL: u32 = PRODUCERS * PER_PRODUCER;
    const MAX_LEN: usize = 64;

    fn stress_config() -> QueueConfig {
        QueueConfig {
            max_len: MAX_LEN,
            ..QueueConfig::for_testing()
        }
    }

    /// Spawns producers that deliver `PER_PRODUCER` tagged packets each.
    /// Resolves to the number of packets the queue admitted.
    async fn run_producers(hook: Arc<RecordingHook>) -> usize {
        let producers = (0..PRODUCERS).map(|p| {
            let hook = hook.clone();
            tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(u64::from(p));
                let mut accepted = 0usize;
                for i in 0..PER_PRODUCER {
                    let tag = p * PER_PRODUCER + i;
                    let len = rng.gen_range(8..256);
                    let admission = hook
                        .deliver(tagged_packet(tag, len), ipv4_hook())
                        .expect("hook registered while producing");
                    if admission.is_accepted() {
                        accepted += 1;
                    }
                    if rng.gen_ratio(1, 8) {
                        tokio::task::yield_now().await;
                    }
                }
                accepted
            })
        });

        join_all(producers)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .sum()
    }

    /// In-process peer: answers batches of notifications in shuffled order.
    /// Stops after `limit` answers (dropping its receiver) or when the
    /// channel closes.
    async fn run_peer(
        mut frames: mpsc::Receiver<PeerFrame>,
        control: ControlHandler,
        limit: Option<usize>,
    ) -> usize {
        let mut rng = StdRng::seed_from_u64(0xFEED);
        let credentials = Credentials::admin(PEER_PID);
        let mut seq = 0u32;
        let mut answered = 0usize;

        while let Some(first) = frames.recv().await {
            let mut batch = vec![first];
            while let Ok(more) = frames.try_recv() {
                batch.push(more);
            }
            batch.shuffle(&mut rng);

            for (pid, raw) in batch {
                assert_eq!(pid, PEER_PID);
                let note = Notification::decode(&raw[ENVELOPE_LEN..]).unwrap();
                let verdict = if rng.gen_bool(0.7) {
                    Verdict::Accept
                } else {
                    Verdict::Drop
                };
                let mut record = VerdictRecord::new(note.id, verdict);
                if rng.gen_ratio(1, 4) {
                    // Rewrite, keeping the tag so the packet stays traceable.
                    let mut payload = BytesMut::new();
                    payload.put_slice(&note.payload[..4]);
                    payload.put_bytes(0xCC, rng.gen_range(0..300));
                    record = record.with_payload(payload.freeze());
                }

                seq += 1;
                let raw = frame(
                    msg_type::VERDICT,
                    flags::REQUEST,
                    seq,
                    PEER_PID,
                    &encode_verdict(&record),
                );
                let _ = control.handle_frame(raw, &credentials);
                answered += 1;

                if limit.is_some_and(|limit| answered >= limit) {
                    return answered;
                }
            }
        }
        answered
    }

    fn mode_frame(mode: CopyMode, seq: u32) -> Bytes {
        frame(
            msg_type::MODE,
            flags::REQUEST | flags::ACK,
            seq,
            PEER_PID,
            &encode_mode(ModeChange::new(mode, 0)),
        )
    }

    fn assert_exactly_once(hook: &RecordingHook) {
        let reinjected = hook.reinjected();
        assert_eq!(reinjected.len(), TOTAL as usize);

        let tags: HashSet<u32> = reinjected
            .iter()
            .map(|r| tag_of(r.packet.as_bytes()))
            .collect();
        assert_eq!(tags.len(), TOTAL as usize, "a packet was reinjected twice");
        assert!(tags.iter().all(|tag| *tag < TOTAL));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_packet_reinjected_exactly_once() {
        let mut h = Harness::start(stress_config(), 16);
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);
        let Harness {
            queue,
            hook,
            control,
            frames,
            ..
        } = h;

        let peer = tokio::spawn(run_peer(frames, control.clone(), None));

        // Flip the mode back and forth; enabling may race a pending flush.
        let stop = Arc::new(AtomicBool::new(false));
        let toggler = {
            let stop = stop.clone();
            let control = control.clone();
            tokio::spawn(async move {
                let credentials = Credentials::admin(PEER_PID);
                let mut seq = 10_000u32;
                let mut flips = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(3)).await;
                    seq += 1;
                    let _ = control.handle_frame(mode_frame(CopyMode::None, seq), &credentials);
                    loop {
                        seq += 1;
                        let reply = control
                            .handle_frame(mode_frame(CopyMode::Packet, seq), &credentials)
                            .expect("acked");
                        let (error, _) = decode_ack(&reply[ENVELOPE_LEN..]).unwrap();
                        if error != errno::EBUSY {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                    flips += 1;
                }
                flips
            })
        };

        let accepted = run_producers(hook.clone()).await;
        stop.store(true, Ordering::SeqCst);
        let flips = toggler.await.unwrap();

        queue.shutdown().await.unwrap();
        let answered = peer.await.unwrap();

        assert_exactly_once(&hook);
        assert!(queue.is_empty());
        assert!(answered <= accepted);

        let stats = queue.diagnostics().stats;
        assert_eq!(
            stats.enqueued + stats.rejected_full + stats.rejected_inactive,
            u64::from(TOTAL)
        );
        assert_eq!(stats.enqueued as usize, accepted);
        assert!(stats.flushes as usize >= flips.min(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_peer_death_under_load_loses_nothing() {
        let mut h = Harness::start(stress_config(), 16);
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);
        let Harness {
            queue,
            hook,
            control,
            frames,
            ..
        } = h;

        // The peer answers a few packets, then vanishes mid-stream and its
        // endpoint is released the way a socket reader reports EOF. The
        // limit stays below `MAX_LEN` so it is reached whatever the timing.
        let limit = MAX_LEN / 3;
        let peer = {
            let control = control.clone();
            tokio::spawn(async move {
                let answered = run_peer(frames, control.clone(), Some(limit)).await;
                control.queue().peer_released(PEER_PID);
                answered
            })
        };

        let accepted = run_producers(hook.clone()).await;
        let answered = peer.await.unwrap();
        assert_eq!(answered, limit);

        // The queue flushes and holds; later packets are refused up front.
        let watched = queue.clone();
        assert!(
            wait_until(move || {
                let diag = watched.diagnostics();
                diag.state == QueueState::Hold && diag.length == 0
            })
            .await
        );
        assert!(queue.diagnostics().peer.died);
        assert!(queue.diagnostics().stats.peer_deaths >= 1);

        queue.shutdown().await.unwrap();
        assert_exactly_once(&hook);
        assert!(queue.is_empty());
        assert!(hook.count_verdict(Verdict::Drop) >= TOTAL as usize - answered);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unanswered_packets_drained_on_shutdown() {
        let mut h = Harness::start(stress_config(), 1024);
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);
        let Harness { queue, hook, .. } = h;

        // Nobody answers: everything admitted is drained by shutdown.
        let producers = tokio::spawn(run_producers(hook.clone()));
        let accepted = producers.await.unwrap();
        queue.shutdown().await.unwrap();

        assert_exactly_once(&hook);
        assert_eq!(hook.count_verdict(Verdict::Drop), TOTAL as usize);
        assert!(accepted <= queue.config().max_len);
    }
}
