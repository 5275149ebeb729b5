//! Property-based tests for the broadcast subscription primitive

use std::collections::HashSet;

use proptest::prelude::*;

use crate::subscription::{BufferingPolicy, Emitter, SubscriptionId};

proptest! {
    /// *For any* number of generated subscription IDs, all IDs SHALL be
    /// unique and SHALL serialize with the "sub_" prefix.
    #[test]
    fn prop_subscription_id_uniqueness(count in 1usize..500) {
        let mut ids = HashSet::new();
        for _ in 0..count {
            let id = SubscriptionId::new();
            let id_str = id.to_string();

            prop_assert!(id_str.starts_with("sub_"), "ID should start with 'sub_': {}", id_str);
            prop_assert_eq!(id_str.len(), 40, "ID should be 40 chars (4 prefix + 36 UUID): {}", id_str);
            prop_assert!(ids.insert(id), "Duplicate subscription ID generated: {}", id_str);
        }
        prop_assert_eq!(ids.len(), count);
    }
}

proptest! {
    /// *For any* sequence of events emitted by one producer, an unbounded
    /// subscriber SHALL observe them all, in emission order.
    #[test]
    fn prop_unbounded_preserves_emission_order(events in prop::collection::vec(any::<i32>(), 0..64)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let emitter: Emitter<i32> = Emitter::new();
            let mut subscription = emitter.subscribe(BufferingPolicy::Unbounded);

            for event in &events {
                emitter.emit(*event);
            }
            drop(emitter);

            let mut received = Vec::new();
            while let Some(event) = subscription.next().await {
                received.push(event);
            }
            prop_assert_eq!(received, events);
            Ok(())
        })?;
    }
}

proptest! {
    /// *For any* bounded subscriber with capacity `n` that lags behind,
    /// overflow SHALL drop the oldest events: the subscriber observes the
    /// last `n` emissions, in order.
    #[test]
    fn prop_bounded_drops_oldest_on_overflow(
        capacity in 1usize..16,
        overflow in 1usize..16,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let emitter: Emitter<usize> = Emitter::new();
            let mut subscription = emitter.subscribe(BufferingPolicy::Bounded(capacity));

            let total = capacity + overflow;
            for event in 0..total {
                emitter.emit(event);
            }
            drop(emitter);

            let mut received = Vec::new();
            while let Some(event) = subscription.next().await {
                received.push(event);
            }
            let expected: Vec<usize> = (total - capacity..total).collect();
            prop_assert_eq!(received, expected);
            Ok(())
        })?;
    }
}

proptest! {
    /// *For any* pair of subscribers, each SHALL receive every event emitted
    /// while it is subscribed, independently of the other.
    #[test]
    fn prop_every_subscriber_receives_all_events(events in prop::collection::vec(any::<u8>(), 1..32)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let emitter: Emitter<u8> = Emitter::new();
            let mut first = emitter.subscribe(BufferingPolicy::Unbounded);
            let mut second = emitter.subscribe(BufferingPolicy::Unbounded);
            prop_assert_eq!(emitter.subscriber_count(), 2);

            for event in &events {
                emitter.emit(*event);
            }
            drop(emitter);

            let mut received_first = Vec::new();
            while let Some(event) = first.next().await {
                received_first.push(event);
            }
            let mut received_second = Vec::new();
            while let Some(event) = second.next().await {
                received_second.push(event);
            }
            prop_assert_eq!(&received_first, &events);
            prop_assert_eq!(&received_second, &events);
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn unsubscribe_stops_delivery_and_is_idempotent() {
    let emitter: Emitter<i32> = Emitter::new();
    let mut subscription = emitter.subscribe(BufferingPolicy::Unbounded);

    emitter.emit(1);
    subscription.unsubscribe();
    subscription.unsubscribe();
    emitter.emit(2);

    // The event emitted before unsubscribing is still delivered; nothing
    // emitted afterwards is.
    assert_eq!(subscription.next().await, Some(1));
    assert_eq!(subscription.next().await, None);
    assert_eq!(emitter.subscriber_count(), 0);
}

#[tokio::test]
async fn dropping_a_subscription_removes_it() {
    let emitter: Emitter<i32> = Emitter::new();
    let subscription = emitter.subscribe(BufferingPolicy::Unbounded);
    assert_eq!(emitter.subscriber_count(), 1);

    drop(subscription);
    assert_eq!(emitter.subscriber_count(), 0);
}

#[tokio::test]
async fn late_subscriber_misses_earlier_events() {
    let emitter: Emitter<i32> = Emitter::new();
    emitter.emit(1);

    let mut subscription = emitter.subscribe(BufferingPolicy::Unbounded);
    emitter.emit(2);
    drop(emitter);

    assert_eq!(subscription.next().await, Some(2));
    assert_eq!(subscription.next().await, None);
}
