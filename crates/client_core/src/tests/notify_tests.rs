use std::time::Duration;

use futures::StreamExt;

use super::*;

async fn no_signal_within(trigger: &mut RefreshTrigger, wait: Duration) -> bool {
    tokio::time::timeout(wait, trigger.recv()).await.is_err()
}

#[tokio::test]
async fn seeded_subscription_fires_before_any_emission() {
    let channel = UpdateChannel::new();
    let mut trigger = channel.subscribe();

    assert_eq!(trigger.recv().await, Some(()));
    assert!(no_signal_within(&mut trigger, Duration::from_millis(50)).await);
}

#[tokio::test]
async fn raw_subscription_does_not_replay_past_signals() {
    let channel = UpdateChannel::new();
    channel.notify();

    let mut late = channel.subscribe_raw();
    assert!(no_signal_within(&mut late, Duration::from_millis(50)).await);

    channel.notify();
    assert_eq!(late.recv().await, Some(()));
}

#[tokio::test]
async fn every_subscriber_sees_every_emission() {
    let channel = UpdateChannel::new();
    let mut first = channel.subscribe_raw();
    let mut second = channel.subscribe_raw();
    assert_eq!(channel.subscriber_count(), 2);

    channel.notify();
    channel.notify();

    for trigger in [&mut first, &mut second] {
        assert_eq!(trigger.recv().await, Some(()));
        assert_eq!(trigger.recv().await, Some(()));
    }
}

#[tokio::test]
async fn lagged_subscriber_collapses_missed_signals() {
    let channel = UpdateChannel::new();
    let mut trigger = channel.subscribe_raw();

    for _ in 0..(CHANNEL_CAPACITY * 3) {
        channel.notify();
    }

    assert_eq!(trigger.recv().await, Some(()));
    assert!(no_signal_within(&mut trigger, Duration::from_millis(50)).await);
}

#[tokio::test]
async fn trigger_ends_when_channel_is_dropped() {
    let channel = UpdateChannel::new();
    let mut trigger = channel.subscribe_raw();
    drop(channel);

    assert_eq!(trigger.recv().await, None);
}

#[tokio::test]
async fn stream_yields_seed_then_emissions() {
    let channel = UpdateChannel::new();
    let mut stream = Box::pin(channel.subscribe().into_stream());

    assert_eq!(stream.next().await, Some(()));
    channel.notify();
    assert_eq!(stream.next().await, Some(()));
    drop(channel);
    assert_eq!(stream.next().await, None);
}
