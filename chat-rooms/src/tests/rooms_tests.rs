//! Tests for room assembly, channel naming and the registry

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::channel::RealtimeChannel;
use crate::contributor::Feature;
use crate::error::ErrorCode;
use crate::room::{ChannelProvider, Room, RoomOptions};
use crate::rooms::Rooms;
use crate::status::RoomStatus;
use crate::subscription::BufferingPolicy;

use super::mock::MockChannel;

/// Provider that records every requested channel name and hands out one
/// mock channel per name.
#[derive(Default)]
struct RecordingProvider {
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
    requested: Mutex<Vec<String>>,
}

impl RecordingProvider {
    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl ChannelProvider for RecordingProvider {
    fn channel(&self, name: &str) -> Arc<dyn RealtimeChannel> {
        self.requested.lock().unwrap().push(name.to_string());
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .entry(name.to_string())
            .or_insert_with(|| MockChannel::new(name));
        Arc::clone(channel) as Arc<dyn RealtimeChannel>
    }
}

#[test]
fn features_map_to_their_channel_names() {
    assert_eq!(
        Feature::Messages.channel_name("basketball"),
        "basketball::$chat::$chatMessages"
    );
    assert_eq!(
        Feature::Presence.channel_name("basketball"),
        "basketball::$chat::$chatMessages"
    );
    assert_eq!(
        Feature::Reactions.channel_name("basketball"),
        "basketball::$chat::$chatMessages"
    );
    assert_eq!(
        Feature::Occupancy.channel_name("basketball"),
        "basketball::$chat::$chatMessages"
    );
    assert_eq!(
        Feature::Typing.channel_name("basketball"),
        "basketball::$chat::$typingIndicators"
    );
}

#[tokio::test]
async fn room_wires_one_contributor_per_enabled_feature() {
    let provider = RecordingProvider::default();
    let room = Room::new("basketball", RoomOptions::all_features(), &provider);

    let requested = provider.requested();
    assert_eq!(requested.len(), 5);
    assert_eq!(
        requested
            .iter()
            .filter(|name| name.ends_with("$chatMessages"))
            .count(),
        4
    );
    assert_eq!(
        requested
            .iter()
            .filter(|name| name.ends_with("$typingIndicators"))
            .count(),
        1
    );

    assert!(
        room.subscribe_discontinuities(Feature::Typing, BufferingPolicy::Unbounded)
            .is_some()
    );
}

#[tokio::test]
async fn room_without_optional_features_only_has_messages() {
    let provider = RecordingProvider::default();
    let room = Room::new("basketball", RoomOptions::default(), &provider);

    assert_eq!(provider.requested().len(), 1);
    assert!(
        room.subscribe_discontinuities(Feature::Messages, BufferingPolicy::Unbounded)
            .is_some()
    );
    assert!(
        room.subscribe_discontinuities(Feature::Presence, BufferingPolicy::Unbounded)
            .is_none()
    );
}

#[tokio::test]
async fn room_proxies_lifecycle_operations() {
    let provider = RecordingProvider::default();
    let room = Room::new("basketball", RoomOptions::default(), &provider);
    let mut statuses = room.on_status_change(BufferingPolicy::Unbounded);

    room.attach().await.unwrap();
    assert_eq!(room.status(), RoomStatus::Attached);
    assert_eq!(
        statuses.next().await.unwrap().current,
        RoomStatus::Attaching { error: None }
    );
    assert_eq!(statuses.next().await.unwrap().current, RoomStatus::Attached);

    room.release().await;
    assert_eq!(room.status(), RoomStatus::Released);
}

#[tokio::test]
async fn registry_returns_the_same_room_for_the_same_id() {
    let rooms = Rooms::new(Arc::new(RecordingProvider::default()));

    let first = rooms.get("basketball", RoomOptions::all_features()).unwrap();
    let second = rooms.get("basketball", RoomOptions::all_features()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(rooms.len(), 1);
}

#[tokio::test]
async fn registry_rejects_inconsistent_options() {
    let rooms = Rooms::new(Arc::new(RecordingProvider::default()));

    rooms.get("basketball", RoomOptions::all_features()).unwrap();
    let error = rooms.get("basketball", RoomOptions::default()).unwrap_err();

    assert!(error.is(ErrorCode::InconsistentRoomOptions));
    assert_eq!(error.status_code, 400);
}

#[tokio::test]
async fn releasing_a_room_forgets_it() {
    let rooms = Rooms::new(Arc::new(RecordingProvider::default()));

    let first = rooms.get("basketball", RoomOptions::default()).unwrap();
    first.attach().await.unwrap();

    rooms.release("basketball").await;
    assert_eq!(first.status(), RoomStatus::Released);
    assert!(rooms.is_empty());

    // A later get builds a fresh room, even with different options.
    let second = rooms.get("basketball", RoomOptions::all_features()).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.status(), RoomStatus::Initialized);
}

#[tokio::test]
async fn releasing_an_unknown_room_is_a_no_op() {
    let rooms = Rooms::new(Arc::new(RecordingProvider::default()));
    rooms.release("nowhere").await;
    assert!(rooms.is_empty());
}
