// Integration tests for idle timeout and lifecycle cleanup

mod common;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use common::{harness, harness_with, test_config, wait_for, word};
use dictation_stream::nats::{forward_decision, Forward};
use dictation_stream::pipeline::StreamEvent;
use dictation_stream::session::{PipelineStage, SessionConfig, SessionStatus};
use dictation_stream::{ErrorCode, StartOutcome, StreamError};

async fn start(h: &common::Harness, socket: Option<&str>) -> dictation_stream::SessionId {
    match h
        .service
        .start_stream(SessionConfig::global("nurse-1"), socket.map(str::to_string))
        .await
        .unwrap()
    {
        StartOutcome::Started(id) => id,
        StartOutcome::Queued { .. } => panic!("unexpectedly queued"),
    }
}

#[tokio::test]
async fn test_idle_session_times_out_with_data_retained() -> Result<()> {
    let h = harness();
    let id = start(&h, Some("sock-1")).await;
    let mut events = h.service.subscribe(&id).await?;

    h.service.add_chunk(&id, 0, word("obs")).await?;
    wait_for(&h.service, &id, |s| s.transcript_len > 0).await;

    // Within the idle timeout nothing happens
    let report = h.service.sweep(Utc::now()).await;
    assert!(report.timed_out.is_empty());

    let report = h.service.sweep(Utc::now() + ChronoDuration::seconds(61)).await;
    assert_eq!(report.timed_out, vec![id.clone()]);

    let snapshot = h.service.snapshot(&id).await?;
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert_eq!(snapshot.transcript_len, "obs".len());
    assert_eq!(h.service.session_for_socket("sock-1").await, None);
    // Idle sessions still hold their slot
    assert_eq!(h.service.stats().await.active_sessions, 1);

    let mut timeout_seen = false;
    while let Ok(event) = events.try_recv() {
        if let StreamEvent::Error { code, .. } = event {
            timeout_seen |= code == ErrorCode::SessionTimeout;
        }
    }
    assert!(timeout_seen);
    Ok(())
}

#[tokio::test]
async fn test_timeout_notice_reaches_the_socket_it_unbinds() -> Result<()> {
    let h = harness();
    let id = start(&h, Some("sock-1")).await;
    let mut events = h.service.subscribe(&id).await?;

    h.service.sweep(Utc::now() + ChronoDuration::seconds(61)).await;

    // The forwarder sees the notice only after the reaper released the socket
    let bound = h.service.session_for_socket("sock-1").await;
    assert_eq!(bound, None);

    let mut decisions = Vec::new();
    while let Ok(event) = events.try_recv() {
        decisions.push((forward_decision(&event, bound.as_ref() == Some(&id)), event));
    }
    let published: Vec<_> = decisions
        .iter()
        .filter(|(decision, _)| *decision != Forward::Stop)
        .collect();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, Forward::PublishAndStop);
    assert!(matches!(
        published[0].1,
        StreamEvent::Error {
            code: ErrorCode::SessionTimeout,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn test_timed_out_session_can_reconnect() -> Result<()> {
    let h = harness();
    let id = start(&h, None).await;
    h.service.add_chunk(&id, 0, word("a")).await?;
    wait_for(&h.service, &id, |s| s.next_sequence == 1).await;

    h.service.sweep(Utc::now() + ChronoDuration::seconds(61)).await;
    let resume = h.service.reconnect(&id, None).await?;
    assert_eq!(resume.next_sequence, 1);

    h.service.add_chunk(&id, 1, word("b")).await?;
    assert_eq!(h.service.stop(&id).await?.transcript, "a b");
    Ok(())
}

#[tokio::test]
async fn test_expired_idle_session_is_delivered_and_purged() -> Result<()> {
    let h = harness();
    let id = start(&h, None).await;
    h.service.add_chunk(&id, 0, word("handover")).await?;

    let now = Utc::now();
    h.service.sweep(now + ChronoDuration::seconds(61)).await;
    let report = h
        .service
        .sweep(now + ChronoDuration::seconds(61 + 301))
        .await;

    assert_eq!(report.finalized, vec![id.clone()]);
    assert_eq!(report.purged, vec![id.clone()]);
    assert_eq!(h.store.items().len(), 1);
    assert_eq!(h.store.items()[0].transcript, "handover");

    assert!(matches!(
        h.service.snapshot(&id).await,
        Err(StreamError::SessionNotFound(_))
    ));
    let stats = h.service.stats().await;
    assert_eq!(stats.active_sessions, 0);
    assert_eq!(stats.buffered_bytes, 0);
    Ok(())
}

#[tokio::test]
async fn test_expired_session_with_failed_handoff_is_retained() -> Result<()> {
    let h = harness();
    let id = start(&h, None).await;
    h.service.add_chunk(&id, 0, word("insulin")).await?;

    let now = Utc::now();
    h.service.sweep(now + ChronoDuration::seconds(61)).await;
    h.store.fail_next(1);
    let report = h
        .service
        .sweep(now + ChronoDuration::seconds(61 + 301))
        .await;

    assert_eq!(report.retained, vec![id.clone()]);
    assert!(report.purged.is_empty());

    let snapshot = h.service.snapshot(&id).await?;
    assert_eq!(snapshot.status, SessionStatus::Processing);
    assert!(snapshot.stage.is_failed());
    assert_eq!(h.service.transcript(&id).await?.transcript, "insulin");

    // The slot was released even though the data is retained
    assert_eq!(h.service.stats().await.active_sessions, 0);
    assert!(h.service.retry_finalization(&id).await?.is_delivered());
    Ok(())
}

#[tokio::test]
async fn test_completed_sessions_purged_after_recovery_window() -> Result<()> {
    let h = harness();
    let id = start(&h, None).await;
    h.service.add_chunk(&id, 0, word("done")).await?;
    h.service.stop(&id).await?;

    let report = h.service.sweep(Utc::now() + ChronoDuration::seconds(10)).await;
    assert!(report.purged.is_empty());
    assert_eq!(h.service.transcript(&id).await?.transcript, "done");

    let report = h.service.sweep(Utc::now() + ChronoDuration::seconds(301)).await;
    assert_eq!(report.purged, vec![id.clone()]);
    assert_eq!(h.service.stats().await.tracked_sessions, 0);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_sessions_keep_transcript_until_purge() -> Result<()> {
    let h = harness();
    let id = start(&h, None).await;
    h.service.add_chunk(&id, 0, word("draft")).await?;
    wait_for(&h.service, &id, |s| s.transcript_len > 0).await;
    h.service.cancel(&id).await?;

    let view = h.service.transcript(&id).await?;
    assert_eq!(view.stage, PipelineStage::Cancelled);
    assert_eq!(view.transcript, "draft");

    let report = h.service.sweep(Utc::now() + ChronoDuration::seconds(301)).await;
    assert_eq!(report.purged, vec![id]);
    Ok(())
}

#[tokio::test]
async fn test_sweep_skips_expired_gaps_for_live_sessions() -> Result<()> {
    let mut config = test_config();
    config.streaming.gap_skip_timeout_ms = 1;
    let h = harness_with(config);
    let id = start(&h, None).await;

    h.service.add_chunk(&id, 0, word("zero")).await?;
    wait_for(&h.service, &id, |s| s.next_sequence == 1).await;
    h.service.add_chunk(&id, 2, word("two")).await?;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    // Chunk 1 never arrives; the sweep nudges the worker past the gap
    h.service.sweep(Utc::now()).await;
    let snapshot = wait_for(&h.service, &id, |s| s.next_sequence == 3).await;
    assert_eq!(snapshot.pending_chunks, 0);
    assert_eq!(h.service.transcript(&id).await?.transcript, "zero two");
    Ok(())
}
