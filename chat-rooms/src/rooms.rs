//! Room registry

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ErrorInfo, RoomResult};
use crate::room::{ChannelProvider, Room, RoomOptions};

/// Hands out rooms by id, one instance per id.
///
/// A second `get` for the same id must use the same options; releasing a
/// room forgets it, so a later `get` builds a fresh instance.
pub struct Rooms {
    provider: Arc<dyn ChannelProvider>,
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl Rooms {
    pub fn new(provider: Arc<dyn ChannelProvider>) -> Self {
        Self {
            provider,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the room with the given id.
    ///
    /// Fails with `inconsistentRoomOptions` when the room already exists
    /// with different options.
    pub fn get(&self, id: &str, options: RoomOptions) -> RoomResult<Arc<Room>> {
        let mut rooms = self.lock();
        if let Some(existing) = rooms.get(id) {
            if *existing.options() != options {
                return Err(ErrorInfo::inconsistent_room_options(
                    &serde_json::to_string(&options).unwrap_or_default(),
                    &serde_json::to_string(existing.options()).unwrap_or_default(),
                ));
            }
            return Ok(Arc::clone(existing));
        }
        let room = Arc::new(Room::new(id, options, self.provider.as_ref()));
        rooms.insert(id.to_string(), Arc::clone(&room));
        Ok(room)
    }

    /// Release the room with the given id and forget it.
    ///
    /// A no-op for an unknown id. The RELEASE operation itself never fails.
    pub async fn release(&self, id: &str) {
        let room = self.lock().remove(id);
        if let Some(room) = room {
            room.release().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Room>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Rooms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rooms").field("rooms", &self.len()).finish()
    }
}
