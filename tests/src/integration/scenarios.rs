//! # End-to-End Scenarios
//!
//! Each test drives a real queue worker through the hook on one side and
//! wire frames on the other.
//!
//! | Scenario | Expectation |
//! |----------|-------------|
//! | PACKET mode, range 0 | Whole packet copied to the peer |
//! | Mode NONE | Packets dropped at admission, never notified |
//! | Queue full | Excess packet dropped, length stays at `max_len` |
//! | Peer channel full | Decided packets still reinjected, blocked ones retried |
//! | Verdict after flush | Ignored, later packets unaffected |
//! | Peer transport dies | Everything dropped in one pass, HOLD, re-enable works |

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use verdict_queue::domain::errno;
    use verdict_queue::{
        Admission, CopyMode, ElementState, HookInfo, PacketBuffer, ProtocolFamily, QueueConfig,
        QueueError, QueueState, Verdict,
    };

    use crate::harness::{ipv4_hook, tag_of, tagged_packet, wait_until, Harness, PEER_PID, WAIT};

    // =============================================================================
    // COPY MODES
    // =============================================================================

    #[tokio::test]
    async fn test_packet_mode_copies_whole_packet() {
        let mut h = Harness::with_defaults();
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);

        let payload: Vec<u8> = (0..100u8).collect();
        let hook = HookInfo::new(ProtocolFamily::Ipv4, 3)
            .with_in_dev("eth0")
            .with_out_dev("eth1");
        let admission = h.deliver(PacketBuffer::new(payload.clone()), hook);
        let Some(Admission::Accepted(id)) = admission else {
            panic!("packet not admitted: {admission:?}");
        };

        let note = h.next_notification().await;
        assert_eq!(note.id, id);
        assert_eq!(note.hook, 3);
        assert_eq!(note.in_dev.as_deref(), Some("eth0"));
        assert_eq!(note.out_dev.as_deref(), Some("eth1"));
        assert_eq!(note.payload.len(), 100);
        assert_eq!(&note.payload[..], &payload[..]);
        assert!(h.wait_for_state(id, ElementState::Waiting).await);

        assert_eq!(h.send_verdict(id, Verdict::Accept, None), 0);
        assert!(h.hook.wait_for(1, WAIT).await);
        let reinjected = h.hook.reinjected();
        assert_eq!(reinjected[0].verdict, Verdict::Accept);
        assert_eq!(reinjected[0].packet.as_bytes(), &payload[..]);
        assert!(!reinjected[0].packet.is_altered());
        assert!(h.queue.is_empty());

        h.queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_meta_mode_sends_headers_only() {
        let mut h = Harness::with_defaults();
        assert_eq!(h.set_mode(CopyMode::Meta, 512), 0);
        assert_eq!(h.queue.diagnostics().peer.copy_range, 0);

        let id = h.deliver_accepted(tagged_packet(7, 300));
        let note = h.next_notification().await;
        assert_eq!(note.id, id);
        assert!(note.payload.is_empty());

        assert_eq!(h.send_verdict(id, Verdict::Accept, None), 0);
        assert!(h.hook.wait_for(1, WAIT).await);
        assert_eq!(h.hook.reinjected()[0].packet.len(), 300);

        h.queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mode_none_drops_at_admission() {
        let mut h = Harness::with_defaults();
        assert_eq!(h.set_mode(CopyMode::None, 0), 0);

        let admission = h.deliver(tagged_packet(1, 64), ipv4_hook());
        assert_eq!(admission, Some(Admission::RejectedInactive));

        // Rejected packets go back to the hook before deliver returns.
        assert_eq!(h.hook.count_verdict(Verdict::Drop), 1);
        assert_eq!(h.queue.len(), 0);
        assert!(h.frames.try_recv().is_err());
        assert_eq!(h.queue.diagnostics().stats.rejected_inactive, 1);

        h.queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_packets_dropped_before_any_peer() {
        let h = Harness::with_defaults();
        assert_eq!(h.queue.state(), QueueState::Hold);

        let admission = h.deliver(tagged_packet(1, 64), ipv4_hook());
        assert_eq!(admission, Some(Admission::RejectedInactive));
        assert_eq!(h.hook.count_verdict(Verdict::Drop), 1);

        h.queue.shutdown().await.unwrap();
    }

    // =============================================================================
    // CAPACITY
    // =============================================================================

    #[tokio::test]
    async fn test_full_queue_drops_excess() {
        let config = QueueConfig {
            max_len: 2,
            ..QueueConfig::for_testing()
        };
        let mut h = Harness::start(config, 64);
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);

        let first = h.deliver_accepted(tagged_packet(1, 32));
        let second = h.deliver_accepted(tagged_packet(2, 32));
        let third = h.deliver(tagged_packet(3, 32), ipv4_hook());
        assert_eq!(third, Some(Admission::RejectedFull));
        assert_eq!(h.hook.count_verdict(Verdict::Drop), 1);

        let a = h.next_notification().await;
        let b = h.next_notification().await;
        assert_eq!((a.id, b.id), (first, second));
        assert!(h.wait_for_state(first, ElementState::Waiting).await);
        assert!(h.wait_for_state(second, ElementState::Waiting).await);
        assert!(h.queue.len() <= 2);

        let stats = h.queue.diagnostics().stats;
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.rejected_full, 1);

        h.queue.shutdown().await.unwrap();
        assert_eq!(h.hook.count_verdict(Verdict::Drop), 3);
    }

    #[tokio::test]
    async fn test_max_len_changed_at_runtime() {
        let mut h = Harness::with_defaults();
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);

        h.queue.set_max_len(1).unwrap();
        h.deliver_accepted(tagged_packet(1, 16));
        assert_eq!(
            h.deliver(tagged_packet(2, 16), ipv4_hook()),
            Some(Admission::RejectedFull)
        );
        assert!(matches!(h.queue.set_max_len(0), Err(QueueError::Config(_))));

        h.queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_backpressure_defers_and_retries() {
        // One-slot channel: the second notification hits a full channel.
        let mut h = Harness::start(QueueConfig::for_testing(), 1);
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);

        let ids: Vec<_> = (0..3)
            .map(|tag| h.deliver_accepted(tagged_packet(tag, 32)))
            .collect();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(h.next_notification().await.id);
        }
        assert_eq!(seen, ids);
        assert!(h.queue.diagnostics().stats.send_deferred >= 1);

        for id in &ids {
            assert_eq!(h.send_verdict(*id, Verdict::Accept, None), 0);
        }
        assert!(h.hook.wait_for(3, WAIT).await);
        assert_eq!(h.hook.count_verdict(Verdict::Accept), 3);

        h.queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_blocked_notification_does_not_hold_up_decided_packets() {
        let mut h = Harness::start(QueueConfig::for_testing(), 1);
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);

        let a = h.deliver_accepted(tagged_packet(0xA, 32));
        assert!(h.wait_for_state(a, ElementState::Waiting).await);

        // A's notification stays unread, so B keeps hitting a full channel.
        let b = h.deliver_accepted(tagged_packet(0xB, 32));
        let queue = h.queue.clone();
        assert!(wait_until(move || queue.diagnostics().stats.send_deferred >= 1).await);
        assert_eq!(h.queue.element_state(b), Some(ElementState::New));

        assert_eq!(h.send_verdict(a, Verdict::Accept, None), 0);
        assert!(h.hook.wait_for(1, WAIT).await);
        let out = &h.hook.reinjected()[0];
        assert_eq!(tag_of(out.packet.as_bytes()), 0xA);
        assert_eq!(out.verdict, Verdict::Accept);
        assert_eq!(h.queue.element_state(b), Some(ElementState::New));

        // Draining the channel lets B through.
        assert_eq!(h.next_notification().await.id, a);
        assert_eq!(h.next_notification().await.id, b);
        assert!(h.wait_for_state(b, ElementState::Waiting).await);

        h.queue.shutdown().await.unwrap();
    }

    // =============================================================================
    // FLUSH
    // =============================================================================

    #[tokio::test]
    async fn test_verdict_after_flush_is_ignored() {
        let mut h = Harness::with_defaults();
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);

        let stale = h.deliver_accepted(tagged_packet(1, 32));
        assert_eq!(h.next_notification().await.id, stale);

        assert_eq!(h.set_mode(CopyMode::None, 0), 0);
        assert!(h.hook.wait_for(1, WAIT).await);
        assert_eq!(h.hook.count_verdict(Verdict::Drop), 1);
        let queue = h.queue.clone();
        assert!(wait_until(|| queue.state() == QueueState::Hold).await);

        // Not found is swallowed; the positive ack still goes out.
        assert_eq!(h.send_verdict(stale, Verdict::Accept, None), 0);
        assert_eq!(h.hook.reinjected_count(), 1);
        assert_eq!(h.queue.diagnostics().stats.verdicts, 0);

        // Ids are never reused, so the stale id cannot hit a new packet.
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);
        let fresh = h.deliver_accepted(tagged_packet(2, 32));
        assert_ne!(fresh, stale);
        assert_eq!(h.next_notification().await.id, fresh);
        assert_eq!(h.send_verdict(stale, Verdict::Accept, None), 0);
        assert_ne!(
            h.queue.element_state(fresh),
            Some(ElementState::VerdictSet(Verdict::Accept))
        );

        assert_eq!(h.send_verdict(fresh, Verdict::Repeat, None), 0);
        assert!(h.hook.wait_for(2, WAIT).await);
        assert_eq!(h.hook.count_verdict(Verdict::Repeat), 1);

        h.queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_device_down_drops_matching_packets() {
        let mut h = Harness::with_defaults();
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);

        let down = h.deliver(
            tagged_packet(1, 32),
            ipv4_hook().with_in_dev("eth1"),
        );
        let up = h.deliver(tagged_packet(2, 32), ipv4_hook().with_in_dev("eth0"));
        let (Some(Admission::Accepted(down)), Some(Admission::Accepted(up))) = (down, up) else {
            panic!("packets not admitted");
        };
        h.next_notification().await;
        h.next_notification().await;

        assert_eq!(h.queue.drop_device("eth1"), 1);
        assert!(h.hook.wait_for(1, WAIT).await);
        assert_eq!(h.hook.count_verdict(Verdict::Drop), 1);
        assert_eq!(h.queue.element_state(down), None);

        // The peer may still answer for the dropped packet; it is gone.
        assert_eq!(h.send_verdict(down, Verdict::Accept, None), 0);
        assert_eq!(h.send_verdict(up, Verdict::Accept, None), 0);
        assert!(h.hook.wait_for(2, WAIT).await);
        assert_eq!(h.hook.count_verdict(Verdict::Accept), 1);

        h.queue.shutdown().await.unwrap();
    }

    // =============================================================================
    // PEER DEATH
    // =============================================================================

    #[tokio::test]
    async fn test_fatal_send_flushes_and_recovers() {
        let mut h = Harness::with_defaults();
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);

        let ids: Vec<_> = (0..3)
            .map(|tag| h.deliver_accepted(tagged_packet(tag, 32)))
            .collect();
        for _ in 0..3 {
            h.next_notification().await;
        }
        for id in &ids {
            assert!(h.wait_for_state(*id, ElementState::Waiting).await);
        }

        h.disconnect_peer();
        h.deliver_accepted(tagged_packet(3, 32));

        assert!(h.hook.wait_for(4, WAIT).await);
        assert_eq!(h.hook.count_verdict(Verdict::Drop), 4);
        let queue = h.queue.clone();
        assert!(wait_until(|| queue.state() == QueueState::Hold).await);

        let diag = h.queue.diagnostics();
        assert_eq!(diag.length, 0);
        assert_eq!(diag.peer.pid, None);
        assert!(diag.peer.died);
        assert_eq!(diag.stats.peer_deaths, 1);
        assert_eq!(diag.stats.flushes, 1);

        // Peer death is recoverable with a fresh mode request.
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);
        let diag = h.queue.diagnostics();
        assert_eq!(diag.state, QueueState::Copy);
        assert_eq!(diag.peer.pid, Some(PEER_PID));
        assert!(!diag.peer.died);

        h.queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_released_flushes() {
        let mut h = Harness::with_defaults();
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);
        h.deliver_accepted(tagged_packet(1, 32));
        h.next_notification().await;

        assert!(!h.queue.peer_released(PEER_PID + 1));
        assert!(h.queue.peer_released(PEER_PID));
        assert!(h.hook.wait_for(1, WAIT).await);
        assert_eq!(h.hook.count_verdict(Verdict::Drop), 1);

        h.queue.shutdown().await.unwrap();
    }

    // =============================================================================
    // SHUTDOWN
    // =============================================================================

    #[tokio::test]
    async fn test_shutdown_drops_pending_and_unhooks() {
        let mut h = Harness::with_defaults();
        assert_eq!(h.set_mode(CopyMode::Packet, 0), 0);
        for tag in 0..5 {
            h.deliver_accepted(tagged_packet(tag, 32));
        }

        h.queue.shutdown().await.unwrap();
        assert_eq!(h.hook.count_verdict(Verdict::Drop), 5);
        assert!(h.queue.is_empty());
        assert!(!h.hook.is_registered(ProtocolFamily::Ipv4));
        assert_eq!(h.deliver(tagged_packet(9, 32), ipv4_hook()), None);

        // Control requests after shutdown are refused, shutdown is idempotent.
        assert_eq!(h.set_mode(CopyMode::Packet, 0), errno::ESHUTDOWN);
        h.queue.shutdown().await.unwrap();

        let diag = h.queue.diagnostics();
        assert!(diag.worker.terminate);
        assert!(!diag.worker.running);
    }

    #[tokio::test]
    async fn test_shutdown_closes_peer_channel() {
        let mut h = Harness::with_defaults();
        h.queue.shutdown().await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(1), h.frames.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }
}
