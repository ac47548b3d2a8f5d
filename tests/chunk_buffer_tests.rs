// Integration tests for the per-session chunk buffer
//
// These tests verify ordering, gap detection, idempotent inserts and the
// gap-skip policy of `ChunkBuffer`.

use chrono::{Duration as ChronoDuration, Utc};
use dictation_stream::audio::{AudioChunk, ChunkBuffer, ChunkBufferConfig, InsertOutcome};
use dictation_stream::StreamError;
use proptest::prelude::*;
use std::time::Duration;

fn chunk(seq: i64) -> AudioChunk {
    AudioChunk::new(seq, vec![seq as u8; 10]).unwrap()
}

fn no_skip() -> ChunkBuffer {
    ChunkBuffer::new(ChunkBufferConfig {
        max_reorder_window: 4096,
        gap_skip_timeout: None,
    })
}

fn sequences(chunks: &[AudioChunk]) -> Vec<u64> {
    chunks.iter().map(|c| c.sequence_number).collect()
}

#[test]
fn test_out_of_order_arrival_combines_in_sequence_order() {
    let mut buffer = no_skip();

    for seq in [5, 3, 4, 1, 0, 2] {
        assert_eq!(buffer.insert(chunk(seq)).unwrap(), InsertOutcome::Inserted);
    }

    let expected: Vec<u8> = (0u8..=5).flat_map(|seq| vec![seq; 10]).collect();
    assert_eq!(buffer.combined_audio(), expected);
    assert!(buffer.check_for_gaps().is_empty());
}

#[test]
fn test_gaps_reported_and_ready_prefix_stops_at_first_gap() {
    let mut buffer = no_skip();
    for seq in [0, 1, 3, 5, 6] {
        buffer.insert(chunk(seq)).unwrap();
    }

    assert_eq!(buffer.check_for_gaps(), vec![2, 4]);
    assert_eq!(sequences(&buffer.ready_chunks(32)), vec![0, 1]);
}

#[test]
fn test_ready_chunks_respects_max_count() {
    let mut buffer = no_skip();
    for seq in 0..10 {
        buffer.insert(chunk(seq)).unwrap();
    }

    assert_eq!(sequences(&buffer.ready_chunks(3)), vec![0, 1, 2]);
}

#[test]
fn test_duplicate_insert_is_noop() {
    let mut buffer = no_skip();
    buffer.insert(chunk(0)).unwrap();

    let duplicate = AudioChunk::new(0, vec![0xFF; 64]).unwrap();
    assert_eq!(buffer.insert(duplicate).unwrap(), InsertOutcome::Duplicate);

    assert_eq!(buffer.combined_audio(), vec![0u8; 10]);
    assert_eq!(buffer.stats().total_chunks, 1);
    assert_eq!(buffer.buffered_bytes(), 10);
}

#[test]
fn test_duplicate_of_processed_chunk_is_noop() {
    let mut buffer = no_skip();
    buffer.insert(chunk(0)).unwrap();
    buffer.mark_processed(&[0], "hello", 0.9);

    assert_eq!(buffer.insert(chunk(0)).unwrap(), InsertOutcome::Duplicate);
    assert_eq!(buffer.assembled_transcription(), "hello");
    assert_eq!(buffer.next_expected(), 1);
}

#[test]
fn test_invalid_chunks_rejected_without_state_change() {
    assert!(matches!(
        AudioChunk::new(-1, vec![1, 2]),
        Err(StreamError::InvalidSequence(-1))
    ));
    assert!(matches!(
        AudioChunk::new(u32::MAX as i64 + 1, vec![1, 2]),
        Err(StreamError::InvalidSequence(_))
    ));
    assert!(matches!(
        AudioChunk::new(0, Vec::new()),
        Err(StreamError::InvalidAudio(_))
    ));
    assert!(matches!(
        AudioChunk::new(0, vec![1, 2, 3]),
        Err(StreamError::InvalidAudio(_))
    ));

    let mut buffer = ChunkBuffer::new(ChunkBufferConfig {
        max_reorder_window: 8,
        gap_skip_timeout: None,
    });
    buffer.insert(chunk(0)).unwrap();

    let err = buffer.insert(chunk(100)).unwrap_err();
    assert!(matches!(err, StreamError::InvalidSequence(100)));
    assert_eq!(buffer.stats().total_chunks, 1);
    assert!(buffer.check_for_gaps().is_empty());
}

#[test]
fn test_empty_buffer_queries_are_benign() {
    let mut buffer = no_skip();

    assert!(buffer.ready_chunks(10).is_empty());
    assert!(buffer.check_for_gaps().is_empty());
    assert!(buffer.all_unprocessed_chunks().is_empty());
    assert!(buffer.combined_audio().is_empty());
    assert_eq!(buffer.assembled_transcription(), "");
    assert_eq!(buffer.average_confidence(), None);
    assert_eq!(buffer.mark_processed(&[42], "ghost", 0.5), 0);
}

#[test]
fn test_marks_assemble_in_sequence_order_regardless_of_call_order() {
    let mut buffer = no_skip();
    for seq in 0..4 {
        buffer.insert(chunk(seq)).unwrap();
    }

    // Later batch finishes first
    assert_eq!(buffer.mark_processed(&[2, 3], "second half", 0.8), 2);
    assert_eq!(buffer.next_expected(), 0);
    assert_eq!(buffer.mark_processed(&[0, 1], "first half", 0.6), 2);

    assert_eq!(buffer.assembled_transcription(), "first half second half");
    assert_eq!(buffer.next_expected(), 4);
    let average = buffer.average_confidence().unwrap();
    assert!((average - 0.7).abs() < 1e-6);
}

#[test]
fn test_gap_skipped_after_timeout() {
    let mut buffer = ChunkBuffer::new(ChunkBufferConfig {
        max_reorder_window: 4096,
        gap_skip_timeout: Some(Duration::from_secs(5)),
    });
    for seq in [0, 1, 3, 4] {
        buffer.insert(chunk(seq)).unwrap();
    }
    let ready = buffer.ready_chunks(32);
    buffer.mark_processed(&sequences(&ready), "zero one", 0.9);

    // Within the timeout the gap still blocks readiness
    assert!(buffer.ready_chunks_at(32, Utc::now()).is_empty());

    let later = Utc::now() + ChronoDuration::seconds(6);
    assert_eq!(sequences(&buffer.ready_chunks_at(32, later)), vec![3, 4]);
    assert_eq!(buffer.stats().skipped_chunks, 1);

    // The missing chunk finally arrives: too late to be used
    assert_eq!(buffer.insert(chunk(2)).unwrap(), InsertOutcome::Stale);
    assert_eq!(buffer.stats().late_chunks, 1);
}

#[test]
fn test_gap_never_skipped_when_disabled() {
    let mut buffer = no_skip();
    for seq in [0, 2] {
        buffer.insert(chunk(seq)).unwrap();
    }
    buffer.mark_processed(&[0], "zero", 0.9);

    let much_later = Utc::now() + ChronoDuration::hours(1);
    assert!(buffer.ready_chunks_at(32, much_later).is_empty());
    assert_eq!(buffer.check_for_gaps(), vec![1]);
}

#[test]
fn test_force_skip_gaps_unblocks_everything() {
    let mut buffer = no_skip();
    for seq in [0, 1, 3, 5, 6] {
        buffer.insert(chunk(seq)).unwrap();
    }

    assert_eq!(buffer.force_skip_gaps(), vec![2, 4]);
    assert_eq!(sequences(&buffer.ready_chunks(32)), vec![0, 1, 3, 5, 6]);
    assert!(buffer.check_for_gaps().is_empty());
}

#[test]
fn test_dispose_and_clear_release_bytes() {
    let mut buffer = no_skip();
    for seq in 0..4 {
        buffer.insert(chunk(seq)).unwrap();
    }
    buffer.mark_processed(&[0, 1], "a b", 0.9);

    assert_eq!(buffer.unprocessed_bytes(), 20);
    assert_eq!(buffer.dispose_processed(), 20);
    assert_eq!(buffer.buffered_bytes(), 20);

    let stats = buffer.clear();
    assert_eq!(stats.total_chunks, 4);
    assert_eq!(stats.total_bytes, 40);
    assert_eq!(stats.processed_chunks, 2);
    assert_eq!(buffer.buffered_bytes(), 0);
    assert!(!buffer.has_unprocessed());
}

proptest! {
    #[test]
    fn prop_unprocessed_chunks_sorted_for_any_arrival_order(
        order in Just((0i64..64).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let mut buffer = no_skip();
        for seq in &order {
            buffer.insert(chunk(*seq)).unwrap();
        }

        let seqs: Vec<u64> = buffer.all_unprocessed_chunks().iter().map(|c| c.sequence_number).collect();
        prop_assert_eq!(seqs, (0u64..64).collect::<Vec<_>>());
    }

    #[test]
    fn prop_ready_prefix_is_contiguous_from_cursor(
        present in proptest::collection::btree_set(0i64..32, 1..32)
    ) {
        let mut buffer = no_skip();
        for seq in &present {
            buffer.insert(chunk(*seq)).unwrap();
        }

        let ready = sequences(&buffer.ready_chunks(64));
        let expected: Vec<u64> = (0u64..).take_while(|s| present.contains(&(*s as i64))).collect();
        prop_assert_eq!(ready, expected);

        let missing = buffer.check_for_gaps();
        for seq in &missing {
            prop_assert!(!present.contains(&(*seq as i64)));
        }
    }
}
