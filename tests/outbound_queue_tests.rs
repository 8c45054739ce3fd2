use std::time::Duration;

use duplex::audio::encoder::AudioFrame;
use duplex::transport::queue::OutboundQueue;

fn frame(tag: u8) -> AudioFrame {
    AudioFrame {
        pcm: vec![tag, 0],
        sample_rate: 16_000,
    }
}

#[test]
fn test_backpressure_drops_oldest_and_keeps_order() {
    let queue = OutboundQueue::new(3);
    for tag in 0..5 {
        assert!(queue.push(frame(tag)));
    }
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.dropped(), 2);

    let survivors: Vec<u8> = std::iter::from_fn(|| queue.try_pop())
        .map(|f| f.pcm[0])
        .collect();
    assert_eq!(survivors, vec![2, 3, 4]);
}

#[test]
fn test_closed_queue_rejects_and_empties() {
    let queue = OutboundQueue::new(4);
    queue.push(frame(1));
    queue.close();
    assert!(queue.is_closed());
    assert!(queue.is_empty());
    assert!(!queue.push(frame(2)));
}

#[tokio::test]
async fn test_pop_waits_for_a_frame() {
    let queue = OutboundQueue::new(4);
    let producer = queue.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.push(frame(7));
    });

    let got = tokio::time::timeout(Duration::from_secs(1), queue.pop())
        .await
        .expect("pop timed out");
    assert_eq!(got.map(|f| f.pcm[0]), Some(7));
}

#[tokio::test]
async fn test_pop_ends_when_closed() {
    let queue = OutboundQueue::new(4);
    let closer = queue.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close();
    });

    let got = tokio::time::timeout(Duration::from_secs(1), queue.pop())
        .await
        .expect("pop did not observe close");
    assert!(got.is_none());
}

#[test]
fn test_zero_capacity_is_treated_as_one() {
    let queue = OutboundQueue::new(0);
    assert_eq!(queue.capacity(), 1);
    queue.push(frame(1));
    queue.push(frame(2));
    assert_eq!(queue.try_pop().map(|f| f.pcm[0]), Some(2));
}
