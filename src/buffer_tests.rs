//! Unit tests for the buffer module

#[cfg(test)]
mod tests {
    use crate::buffer::{chunk_ring, ChunkConsumer, Pull, PushError};
    use crate::codec::ChannelPair;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn pair(values: &[f32]) -> ChannelPair {
        ChannelPair {
            left: values.to_vec(),
            right: values.iter().map(|v| -v).collect(),
        }
    }

    fn pull(consumer: &mut ChunkConsumer, frames: usize) -> (Vec<f32>, Vec<f32>, Pull) {
        let mut left = vec![9.0; frames];
        let mut right = vec![9.0; frames];
        let result = consumer.pull(&mut left, &mut right);
        (left, right, result)
    }

    #[test]
    fn test_empty_ring_outputs_silence() {
        let (_producer, mut consumer) = chunk_ring(4);

        let (left, right, result) = pull(&mut consumer, 8);

        assert_eq!(left, vec![0.0; 8]);
        assert_eq!(right, vec![0.0; 8]);
        assert_eq!(result.frames_written, 0);
        assert!(!result.ended_and_drained);
    }

    #[test]
    fn test_pull_crosses_chunk_boundaries() {
        let (mut producer, mut consumer) = chunk_ring(4);

        producer.push(pair(&[0.1, 0.2, 0.3])).unwrap();
        producer.push(pair(&[0.4, 0.5])).unwrap();
        assert_eq!(producer.buffered_frames(), 5);

        let (left, right, result) = pull(&mut consumer, 4);
        assert_eq!(left, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(right, vec![-0.1, -0.2, -0.3, -0.4]);
        assert_eq!(result.frames_written, 4);
        assert_eq!(consumer.buffered_frames(), 1);

        let (left, _, result) = pull(&mut consumer, 4);
        assert_eq!(left, vec![0.5, 0.0, 0.0, 0.0]);
        assert_eq!(result.frames_written, 1);
        assert_eq!(consumer.buffered_frames(), 0);
    }

    #[test]
    fn test_push_full_returns_pair() {
        let (mut producer, _consumer) = chunk_ring(2);

        producer.push(pair(&[0.1])).unwrap();
        producer.push(pair(&[0.2])).unwrap();

        match producer.push(pair(&[0.3])) {
            Err(PushError::Full(rejected)) => assert_eq!(rejected.left, vec![0.3]),
            other => panic!("Expected PushError::Full, got {other:?}"),
        }
        assert_eq!(producer.buffered_frames(), 2);
    }

    #[test]
    fn test_push_after_end_is_rejected() {
        let (mut producer, _consumer) = chunk_ring(2);

        producer.mark_ended();
        producer.mark_ended();

        let err = producer.push(pair(&[0.1])).unwrap_err();
        assert!(matches!(err, PushError::Ended(_)));
        assert_eq!(err.into_inner().left, vec![0.1]);
        assert_eq!(producer.buffered_frames(), 0);
    }

    #[test]
    fn test_empty_pair_is_ignored() {
        let (mut producer, mut consumer) = chunk_ring(1);

        producer.push(ChannelPair::default()).unwrap();
        producer.push(pair(&[0.25])).unwrap();

        let (left, _, _) = pull(&mut consumer, 1);
        assert_eq!(left, vec![0.25]);
    }

    #[test]
    fn test_ended_and_drained_reported_once() {
        let (mut producer, mut consumer) = chunk_ring(4);

        producer.push(pair(&[0.1, 0.2, 0.3])).unwrap();
        producer.mark_ended();

        // Still audio queued
        let (_, _, result) = pull(&mut consumer, 2);
        assert!(!result.ended_and_drained);

        let (left, _, result) = pull(&mut consumer, 2);
        assert_eq!(left, vec![0.3, 0.0]);
        assert!(result.ended_and_drained);

        let (_, _, result) = pull(&mut consumer, 2);
        assert!(!result.ended_and_drained);
        assert!(consumer.is_ended());
    }

    #[test]
    fn test_not_drained_before_end() {
        let (mut producer, mut consumer) = chunk_ring(4);

        producer.push(pair(&[0.1])).unwrap();
        let (_, _, result) = pull(&mut consumer, 4);
        assert!(!result.ended_and_drained);

        producer.mark_ended();
        let (_, _, result) = pull(&mut consumer, 4);
        assert!(result.ended_and_drained);
    }

    #[test]
    fn test_reset_clears_queue_and_end() {
        let (mut producer, mut consumer) = chunk_ring(4);

        producer.push(pair(&[0.1, 0.2])).unwrap();
        producer.push(pair(&[0.3])).unwrap();
        producer.mark_ended();
        pull(&mut consumer, 1);

        consumer.reset();

        assert_eq!(consumer.buffered_frames(), 0);
        assert!(!consumer.is_ended());
        assert!(!producer.is_ended());

        let (left, _, result) = pull(&mut consumer, 2);
        assert_eq!(left, vec![0.0, 0.0]);
        assert_eq!(result.frames_written, 0);
        assert!(!result.ended_and_drained);
    }

    #[test]
    fn test_spent_pairs_are_reclaimed_by_producer() {
        let (mut producer, mut consumer) = chunk_ring(1);

        // A capacity of one only keeps working if retired pairs flow back
        for i in 0..64 {
            producer.push(pair(&[i as f32 / 64.0])).unwrap();
            let (left, _, _) = pull(&mut consumer, 1);
            assert_eq!(left, vec![i as f32 / 64.0]);
        }
    }

    #[test]
    fn test_randomized_push_pull_preserves_order() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let (mut producer, mut consumer) = chunk_ring(8);

        let total = 5000;
        let mut next_push = 0usize;
        let mut expected = 0usize;
        let mut pending: Option<ChannelPair> = None;

        while expected < total {
            if rng.random_bool(0.5) && (next_push < total || pending.is_some()) {
                let chunk = pending.take().unwrap_or_else(|| {
                    let frames = rng.random_range(1..=64).min(total - next_push);
                    let values: Vec<f32> = (next_push..next_push + frames).map(|v| v as f32).collect();
                    next_push += frames;
                    pair(&values)
                });
                if let Err(PushError::Full(rejected)) = producer.push(chunk) {
                    pending = Some(rejected);
                }
                if next_push == total && pending.is_none() {
                    producer.mark_ended();
                }
            } else {
                let frames = rng.random_range(1..=128);
                let (left, right, result) = pull(&mut consumer, frames);

                for i in 0..result.frames_written {
                    assert_eq!(left[i], expected as f32);
                    assert_eq!(right[i], -(expected as f32));
                    expected += 1;
                }
                assert!(left[result.frames_written..].iter().all(|v| *v == 0.0));
                assert_eq!(
                    result.ended_and_drained,
                    expected == total && producer.is_ended()
                );
            }
        }

        assert_eq!(consumer.buffered_frames(), 0);
    }
}
